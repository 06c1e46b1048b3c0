//! Gateway payments
//!
//! A card-gateway payment backing a deposit order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    /// Gateway confirmed the money, the ledger could not apply it.
    /// Needs reconciliation.
    SettlementFailed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::SettlementFailed => "SETTLEMENT_FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "SETTLEMENT_FAILED" => Ok(PaymentStatus::SettlementFailed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    /// Gateway transaction reference (unique)
    pub transaction_ref: String,
    pub deposit_order_id: Uuid,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    /// The gateway confirmed amount and currency against the order, so a
    /// settlement retry need not ask it again
    pub amount_confirmed: bool,
    /// Last callback body received for this payment
    pub last_callback: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(transaction_ref: impl Into<String>, deposit_order_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_ref: transaction_ref.into(),
            deposit_order_id,
            status: PaymentStatus::Pending,
            failure_reason: None,
            amount_confirmed: false,
            last_callback: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn needs_reconciliation(&self) -> bool {
        self.status == PaymentStatus::SettlementFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(PaymentStatus::SettlementFailed.to_string(), "SETTLEMENT_FAILED");
        assert_eq!(
            "SETTLEMENT_FAILED".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::SettlementFailed
        );
    }

    #[test]
    fn test_new_payment_is_pending() {
        let payment = Payment::new("TX-1", Uuid::new_v4());
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(!payment.needs_reconciliation());
    }
}
