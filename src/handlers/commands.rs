//! Command definitions
//!
//! Commands carry the inputs of one settlement operation. Amounts are
//! already computed by the caller (see [`SettlementAmounts`]).
//!
//! [`SettlementAmounts`]: crate::domain::SettlementAmounts

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AssetRef, AssetType, JournalEntry, SettlementAmounts};
use crate::gateway::GatewayStatus;

// =========================================================================
// Deposits
// =========================================================================

/// Settle a completed external deposit into a wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleDepositCommand {
    /// `bank-deposit-<orderId>` or `gateway-payment-<ref>`
    pub event_key: String,
    pub user_id: Uuid,
    pub wallet_account_id: Uuid,
    pub asset: AssetRef,
    pub base_amount: Decimal,
    pub fee_amount: Decimal,
    pub tax_amount: Decimal,
    /// Order to flip to processed in the same unit of work
    pub order_id: Option<Uuid>,
}

impl SettleDepositCommand {
    pub fn new(
        event_key: impl Into<String>,
        user_id: Uuid,
        wallet_account_id: Uuid,
        asset: AssetRef,
        base_amount: Decimal,
    ) -> Self {
        Self {
            event_key: event_key.into(),
            user_id,
            wallet_account_id,
            asset,
            base_amount,
            fee_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            order_id: None,
        }
    }

    pub fn with_fee(mut self, fee_amount: Decimal) -> Self {
        self.fee_amount = fee_amount;
        self
    }

    pub fn with_tax(mut self, tax_amount: Decimal) -> Self {
        self.tax_amount = tax_amount;
        self
    }

    pub fn with_amounts(mut self, amounts: &SettlementAmounts) -> Self {
        self.base_amount = amounts.base;
        self.fee_amount = amounts.fee;
        self.tax_amount = amounts.tax;
        self
    }

    pub fn with_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// Record a bank deposit awaiting admin approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDepositOrderCommand {
    pub user_id: Uuid,
    pub wallet_account_id: Uuid,
    pub asset_symbol: String,
    #[serde(default)]
    pub asset_type: AssetType,
    pub base_amount: Decimal,
    pub fee_amount: Decimal,
    pub tax_amount: Decimal,
}

impl CreateDepositOrderCommand {
    pub fn new(
        user_id: Uuid,
        wallet_account_id: Uuid,
        asset_symbol: impl Into<String>,
        base_amount: Decimal,
    ) -> Self {
        Self {
            user_id,
            wallet_account_id,
            asset_symbol: asset_symbol.into(),
            asset_type: AssetType::Currency,
            base_amount,
            fee_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
        }
    }

    pub fn with_fee(mut self, fee_amount: Decimal) -> Self {
        self.fee_amount = fee_amount;
        self
    }

    pub fn with_tax(mut self, tax_amount: Decimal) -> Self {
        self.tax_amount = tax_amount;
        self
    }

    pub fn with_asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }
}

/// Outcome of a deposit settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub event_key: String,
    /// Principal first, then fees and tax when non-zero
    pub journal_entries: Vec<JournalEntry>,
    /// True when the event had been settled before and nothing moved
    pub replayed: bool,
}

impl SettlementResult {
    pub fn entry_ids(&self) -> Vec<Uuid> {
        self.journal_entries.iter().map(|e| e.id).collect()
    }
}

// =========================================================================
// Withdrawals
// =========================================================================

/// Reserve funds for a bank withdrawal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestWithdrawalCommand {
    pub user_id: Uuid,
    pub wallet_account_id: Uuid,
    pub asset_symbol: String,
    /// Reserved on request, debited on completion
    pub base_amount: Decimal,
    pub fee_amount: Decimal,
    pub tax_amount: Decimal,
    /// Free-text bank details
    pub destination: Option<String>,
}

impl RequestWithdrawalCommand {
    pub fn new(
        user_id: Uuid,
        wallet_account_id: Uuid,
        asset_symbol: impl Into<String>,
        base_amount: Decimal,
    ) -> Self {
        Self {
            user_id,
            wallet_account_id,
            asset_symbol: asset_symbol.into(),
            base_amount,
            fee_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            destination: None,
        }
    }

    pub fn with_fee(mut self, fee_amount: Decimal) -> Self {
        self.fee_amount = fee_amount;
        self
    }

    pub fn with_tax(mut self, tax_amount: Decimal) -> Self {
        self.tax_amount = tax_amount;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

// =========================================================================
// Gateway payments
// =========================================================================

/// Open a gateway payment for a card deposit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPaymentCommand {
    pub transaction_ref: String,
    pub deposit: CreateDepositOrderCommand,
}

impl RegisterPaymentCommand {
    pub fn new(transaction_ref: impl Into<String>, deposit: CreateDepositOrderCommand) -> Self {
        Self {
            transaction_ref: transaction_ref.into(),
            deposit,
        }
    }
}

/// Callback body as delivered by the gateway. Untrusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCallback {
    pub transaction_ref: String,
    pub status: GatewayStatus,
    /// Raw body, kept on the payment for reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl GatewayCallback {
    pub fn new(transaction_ref: impl Into<String>, status: GatewayStatus) -> Self {
        Self {
            transaction_ref: transaction_ref.into(),
            status,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// How a callback was handled. Every variant acknowledges the delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Settled now
    Settled(SettlementResult),
    /// Settled before; nothing changed
    Duplicate,
    /// No payment with this reference
    UnknownReference,
    /// Gateway reports the payment declined; marked FAILED
    Declined,
    /// Gateway has not finished the payment yet
    Pending,
    /// Confirmed by the gateway but not settled; flagged SETTLEMENT_FAILED
    SettlementFailed { reason: String },
}
