//! Deposit and withdrawal orders
//!
//! Durable records linking an originating business event to the ledger legs
//! it produced.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{AssetRef, AssetType, DomainError};

/// Event key prefix for bank deposits approved by an admin
pub const BANK_DEPOSIT_PREFIX: &str = "bank-deposit";

/// Event key prefix for card-gateway payments
pub const GATEWAY_PAYMENT_PREFIX: &str = "gateway-payment";

/// Event key prefix for completed bank withdrawals
pub const BANK_WITHDRAWAL_PREFIX: &str = "bank-withdrawal";

/// A pending or settled external deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositOrder {
    pub order_id: Uuid,
    pub wallet_account_id: Uuid,
    pub user_id: Uuid,
    pub base_amount: Decimal,
    pub fees_amount: Decimal,
    pub tax_amount: Decimal,
    pub asset_symbol: String,
    pub asset_type: AssetType,
    /// Idempotency key of the settlement this order triggers
    pub event_key: String,
    pub processed: bool,
    pub journal_entry_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DepositOrder {
    pub fn net_amount(&self) -> Decimal {
        self.base_amount - self.fees_amount - self.tax_amount
    }

    pub fn asset(&self) -> AssetRef {
        AssetRef {
            asset_type: self.asset_type,
            asset_id: None,
            symbol: self.asset_symbol.clone(),
        }
    }

    /// Event key of a bank deposit order
    pub fn bank_event_key(order_id: Uuid) -> String {
        format!("{BANK_DEPOSIT_PREFIX}-{order_id}")
    }

    /// Event key of a gateway payment
    pub fn gateway_event_key(transaction_ref: &str) -> String {
        format!("{GATEWAY_PAYMENT_PREFIX}-{transaction_ref}")
    }
}

/// Withdrawal lifecycle.
///
/// ```text
/// PENDING ──approve──▶ PROCESSING ──complete──▶ COMPLETED
///    │                 (APPROVED)  ──cancel────▶ CANCELLED
///    └──reject──▶ REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Approved,
    Completed,
    Cancelled,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Processing => "PROCESSING",
            WithdrawalStatus::Approved => "APPROVED",
            WithdrawalStatus::Completed => "COMPLETED",
            WithdrawalStatus::Cancelled => "CANCELLED",
            WithdrawalStatus::Rejected => "REJECTED",
        }
    }

    /// No more transitions possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Cancelled | WithdrawalStatus::Rejected
        )
    }

    /// Funds are still sitting in `reserved`
    pub fn holds_reservation(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Pending | WithdrawalStatus::Processing | WithdrawalStatus::Approved
        )
    }

    /// An approved withdrawal waiting for the bank transfer
    pub fn is_in_flight(&self) -> bool {
        matches!(self, WithdrawalStatus::Processing | WithdrawalStatus::Approved)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(WithdrawalStatus::Pending),
            "PROCESSING" => Ok(WithdrawalStatus::Processing),
            "APPROVED" => Ok(WithdrawalStatus::Approved),
            "COMPLETED" => Ok(WithdrawalStatus::Completed),
            "CANCELLED" => Ok(WithdrawalStatus::Cancelled),
            "REJECTED" => Ok(WithdrawalStatus::Rejected),
            other => Err(format!("unknown withdrawal status: {other}")),
        }
    }
}

/// Admin actions on a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalAction {
    Approve,
    Reject,
    Complete,
    Cancel,
}

impl WithdrawalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalAction::Approve => "approve",
            WithdrawalAction::Reject => "reject",
            WithdrawalAction::Complete => "complete",
            WithdrawalAction::Cancel => "cancel",
        }
    }

    /// States this action may start from
    pub fn allowed_from(&self, status: WithdrawalStatus) -> bool {
        match self {
            WithdrawalAction::Approve | WithdrawalAction::Reject => {
                status == WithdrawalStatus::Pending
            }
            WithdrawalAction::Complete | WithdrawalAction::Cancel => status.is_in_flight(),
        }
    }

    /// State after the action succeeds
    pub fn target(&self) -> WithdrawalStatus {
        match self {
            WithdrawalAction::Approve => WithdrawalStatus::Processing,
            WithdrawalAction::Reject => WithdrawalStatus::Rejected,
            WithdrawalAction::Complete => WithdrawalStatus::Completed,
            WithdrawalAction::Cancel => WithdrawalStatus::Cancelled,
        }
    }
}

/// A user's request to move funds out to a bank account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalOrder {
    pub order_id: Uuid,
    pub wallet_account_id: Uuid,
    pub user_id: Uuid,
    /// Amount moved from available to reserved at request time
    pub base_amount: Decimal,
    pub fees_amount: Decimal,
    pub tax_amount: Decimal,
    pub asset_symbol: String,
    pub status: WithdrawalStatus,
    pub processed: bool,
    pub journal_entry_ids: Vec<Uuid>,
    /// Free-text bank details supplied by the user
    pub destination: Option<String>,
    pub reason: Option<String>,
    pub transfer_reference: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WithdrawalOrder {
    /// Reserved quantity this order holds while in flight
    pub fn reserved_amount(&self) -> Decimal {
        self.base_amount
    }

    /// Amount actually wired out after fees and tax
    pub fn net_amount(&self) -> Decimal {
        self.base_amount - self.fees_amount - self.tax_amount
    }

    pub fn event_key(&self) -> String {
        format!("{BANK_WITHDRAWAL_PREFIX}-{}", self.order_id)
    }

    /// Guard a transition, naming the current state on failure.
    pub fn ensure_can(&self, action: WithdrawalAction) -> Result<(), DomainError> {
        if action.allowed_from(self.status) {
            Ok(())
        } else {
            Err(DomainError::IllegalTransition {
                order_id: self.order_id,
                action: action.as_str(),
                current: self.status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(status: WithdrawalStatus) -> WithdrawalOrder {
        WithdrawalOrder {
            order_id: Uuid::new_v4(),
            wallet_account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            base_amount: dec!(500),
            fees_amount: dec!(10),
            tax_amount: dec!(5),
            asset_symbol: "USD".to_string(),
            status,
            processed: false,
            journal_entry_ids: vec![],
            destination: None,
            reason: None,
            transfer_reference: None,
            requested_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            cancelled_by: None,
            cancelled_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_transition_table() {
        use WithdrawalAction::*;
        use WithdrawalStatus::*;

        assert!(Approve.allowed_from(Pending));
        assert!(Reject.allowed_from(Pending));
        assert!(!Complete.allowed_from(Pending));
        assert!(!Cancel.allowed_from(Pending));

        for from in [Processing, Approved] {
            assert!(Complete.allowed_from(from));
            assert!(Cancel.allowed_from(from));
            assert!(!Approve.allowed_from(from));
            assert!(!Reject.allowed_from(from));
        }

        for terminal in [Completed, Cancelled, Rejected] {
            assert!(terminal.is_terminal());
            for action in [Approve, Reject, Complete, Cancel] {
                assert!(!action.allowed_from(terminal));
            }
        }
    }

    #[test]
    fn test_complete_on_pending_names_state() {
        let err = order(WithdrawalStatus::Pending)
            .ensure_can(WithdrawalAction::Complete)
            .unwrap_err();
        assert!(err.to_string().contains("PENDING"));
    }

    #[test]
    fn test_amounts_and_keys() {
        let o = order(WithdrawalStatus::Processing);
        assert_eq!(o.reserved_amount(), dec!(500));
        assert_eq!(o.net_amount(), dec!(485));
        assert_eq!(o.event_key(), format!("bank-withdrawal-{}", o.order_id));
    }

    #[test]
    fn test_deposit_event_keys() {
        let id = Uuid::nil();
        assert_eq!(
            DepositOrder::bank_event_key(id),
            "bank-deposit-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(DepositOrder::gateway_event_key("TX-9"), "gateway-payment-TX-9");
    }
}
