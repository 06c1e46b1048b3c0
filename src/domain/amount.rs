//! Amount type
//!
//! Domain primitive for monetary amounts moving through the ledger.
//! All amounts are validated at construction time, ensuring invalid values
//! cannot reach a balance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum allowed single movement (1 trillion units of any asset)
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Maximum decimal places (8)
pub const MAX_SCALE: u32 = 8;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum 8 decimal places
/// - Maximum value is 1 trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use wallet_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(100, 0)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(100, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 8 decimal places
    /// - `AmountError::Overflow` if value > 1 trillion
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        check_bounds(value)?;
        Ok(Self(value))
    }

    /// Create an Amount from an integer (no decimal places).
    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

/// Validate an optional leg amount (fees, tax) which may be zero but never negative.
pub fn non_negative(value: Decimal) -> Result<Decimal, AmountError> {
    if value < Decimal::ZERO {
        return Err(AmountError::Negative(value));
    }
    check_bounds(value)?;
    Ok(value)
}

fn check_bounds(value: Decimal) -> Result<(), AmountError> {
    if value.scale() > MAX_SCALE && value.normalize().scale() > MAX_SCALE {
        return Err(AmountError::TooManyDecimals(value.scale()));
    }
    if value > MAX_AMOUNT {
        return Err(AmountError::Overflow);
    }
    Ok(())
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(Decimal::new(100, 0)).unwrap();
        assert_eq!(amount.value(), Decimal::new(100, 0));
    }

    #[test]
    fn test_amount_zero_rejected() {
        let amount = Amount::new(Decimal::ZERO);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        let amount = Amount::new(Decimal::new(-100, 0));
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_too_many_decimals() {
        // 0.123456789 has 9 decimal places
        let amount = Amount::new(Decimal::new(123456789, 9));
        assert!(matches!(amount, Err(AmountError::TooManyDecimals(9))));
    }

    #[test]
    fn test_trailing_zeros_do_not_count_as_precision() {
        // 1.500000000 normalizes to 1.5
        let amount = Amount::new(Decimal::new(1_500_000_000, 9));
        assert!(amount.is_ok());
    }

    #[test]
    fn test_amount_overflow() {
        let value = Decimal::from_str("1000000000001").unwrap();
        assert!(matches!(Amount::new(value), Err(AmountError::Overflow)));

        let max = Decimal::from_str("1000000000000").unwrap();
        assert!(Amount::new(max).is_ok());
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = "123.456".parse().unwrap();
        assert_eq!(amount.value(), Decimal::new(123456, 3));

        let bad: Result<Amount, _> = "abc".parse();
        assert!(matches!(bad, Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_non_negative_allows_zero() {
        assert_eq!(non_negative(Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert!(matches!(
            non_negative(Decimal::new(-1, 2)),
            Err(AmountError::Negative(_))
        ));
    }
}
