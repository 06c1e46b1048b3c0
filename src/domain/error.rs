//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::WithdrawalStatus;

/// Business rule violations and balance invariant failures.
///
/// Every variant is a client-side validation failure: the request can never
/// succeed as submitted, and nothing was written when it is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Not enough available funds to reserve or debit
    #[error("Insufficient available balance: required {required}, available {available}")]
    InsufficientAvailable { required: Decimal, available: Decimal },

    /// Not enough reserved funds to release or consume
    #[error("Insufficient reserved balance: required {required}, reserved {reserved}")]
    InsufficientReserved { required: Decimal, reserved: Decimal },

    /// Withdrawal transition attempted from the wrong state
    #[error("Cannot {action} withdrawal {order_id}: current status is {current}")]
    IllegalTransition {
        order_id: Uuid,
        action: &'static str,
        current: WithdrawalStatus,
    },

    /// Net amount after fees and tax is zero or negative
    #[error("Net amount must be positive: base {base}, fees {fees}, tax {tax}")]
    NonPositiveNet { base: Decimal, fees: Decimal, tax: Decimal },

    /// A reason string is mandatory for this action
    #[error("A reason is required to {0} a withdrawal")]
    MissingReason(&'static str),

    /// Account is not active
    #[error("Account {0} is not active")]
    AccountInactive(Uuid),

    /// Account exists but has the wrong kind for this operation
    #[error("Account {0} is not a wallet account")]
    NotAWallet(Uuid),

    /// Deposit or withdrawal references a different asset than its order
    #[error("Asset mismatch: expected {expected}, got {actual}")]
    AssetMismatch { expected: String, actual: String },
}

impl DomainError {
    /// Create an insufficient available balance error
    pub fn insufficient_available(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientAvailable { required, available }
    }

    /// Create an insufficient reserved balance error
    pub fn insufficient_reserved(required: Decimal, reserved: Decimal) -> Self {
        Self::InsufficientReserved { required, reserved }
    }

    /// Check if this error reports a shortage of funds
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(
            self,
            Self::InsufficientAvailable { .. } | Self::InsufficientReserved { .. }
        )
    }
}
