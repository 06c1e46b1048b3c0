//! Error handling module
//!
//! Centralized error type of the ledger API and its classification into
//! not-found, validation, conflict and internal failures.

use uuid::Uuid;

use crate::domain::{AmountError, DomainError};

/// Ledger-wide Result type
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

/// Ledger error types
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    // Not found
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Validation
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    // Conflict
    #[error("Lock unavailable: {key}")]
    LockUnavailable { key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    // Internal
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_)
            | LedgerError::OrderNotFound(_)
            | LedgerError::PaymentNotFound(_)
            | LedgerError::NotFound(_) => ErrorKind::NotFound,

            LedgerError::Validation(_) | LedgerError::Domain(_) | LedgerError::Amount(_) => {
                ErrorKind::Validation
            }

            LedgerError::LockUnavailable { .. } | LedgerError::Conflict(_) => ErrorKind::Conflict,

            LedgerError::Database(_)
            | LedgerError::Gateway(_)
            | LedgerError::Internal(_)
            | LedgerError::Config(_) => ErrorKind::Internal,

            #[cfg(feature = "redis")]
            LedgerError::Redis(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a client error (the request itself is wrong)
    pub fn is_client_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Validation)
    }

    /// Check if retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockUnavailable { .. })
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        LedgerError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LedgerError::AccountNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::from(DomainError::insufficient_available(
                Decimal::ONE,
                Decimal::ZERO
            ))
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::from(AmountError::NotPositive(Decimal::ZERO)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::LockUnavailable { key: "k".into() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(LedgerError::internal("boom").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_only_lock_contention_is_retryable() {
        assert!(LedgerError::LockUnavailable { key: "k".into() }.is_retryable());
        assert!(!LedgerError::Conflict("duplicate".into()).is_retryable());
        assert!(!LedgerError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_client_errors() {
        assert!(LedgerError::OrderNotFound(Uuid::nil()).is_client_error());
        assert!(LedgerError::Validation("x".into()).is_client_error());
        assert!(!LedgerError::Conflict("x".into()).is_client_error());
        assert!(!LedgerError::Gateway("x".into()).is_client_error());
    }
}
