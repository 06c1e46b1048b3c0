//! Balances
//!
//! One row per `(account_id, asset_symbol)` holding the available, locked and
//! reserved quantities of that asset.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

/// Asset type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    #[default]
    Currency,
    Metal,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Currency => "CURRENCY",
            AssetType::Metal => "METAL",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CURRENCY" => Ok(AssetType::Currency),
            "METAL" => Ok(AssetType::Metal),
            other => Err(format!("unknown asset type: {other}")),
        }
    }
}

/// Identifies the asset a balance row holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub asset_type: AssetType,
    /// Reference-data id of the currency or metal, when known
    pub asset_id: Option<Uuid>,
    pub symbol: String,
}

impl AssetRef {
    pub fn currency(symbol: impl Into<String>) -> Self {
        Self {
            asset_type: AssetType::Currency,
            asset_id: None,
            symbol: symbol.into(),
        }
    }

    pub fn metal(symbol: impl Into<String>) -> Self {
        Self {
            asset_type: AssetType::Metal,
            asset_id: None,
            symbol: symbol.into(),
        }
    }

    pub fn with_asset_id(mut self, asset_id: Uuid) -> Self {
        self.asset_id = Some(asset_id);
        self
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Per-account, per-asset quantities.
///
/// # Invariants
/// - `available >= 0`
/// - `reserved >= 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: Uuid,
    pub asset_type: AssetType,
    pub asset_id: Option<Uuid>,
    pub asset_symbol: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub reserved: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Zero balance for an account/asset that has no row yet
    pub fn empty(account_id: Uuid, asset: &AssetRef) -> Self {
        Self {
            account_id,
            asset_type: asset.asset_type,
            asset_id: asset.asset_id,
            asset_symbol: asset.symbol.clone(),
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            reserved: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn asset(&self) -> AssetRef {
        AssetRef {
            asset_type: self.asset_type,
            asset_id: self.asset_id,
            symbol: self.asset_symbol.clone(),
        }
    }

    /// Everything the account holds in this asset
    pub fn total(&self) -> Decimal {
        self.available + self.locked + self.reserved
    }

    /// Apply a delta, refusing any result that breaks non-negativity.
    pub fn apply(&self, delta: &BalanceDelta) -> Result<Balance, DomainError> {
        let available = self.available + delta.available;
        if available < Decimal::ZERO {
            return Err(DomainError::insufficient_available(
                -delta.available,
                self.available,
            ));
        }
        let reserved = self.reserved + delta.reserved;
        if reserved < Decimal::ZERO {
            return Err(DomainError::insufficient_reserved(
                -delta.reserved,
                self.reserved,
            ));
        }
        Ok(Balance {
            available,
            reserved,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}

/// Signed change to the available and reserved buckets of one balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceDelta {
    pub available: Decimal,
    pub reserved: Decimal,
}

impl BalanceDelta {
    /// Increase available
    pub fn credit(amount: Decimal) -> Self {
        Self {
            available: amount,
            reserved: Decimal::ZERO,
        }
    }

    /// Decrease available
    pub fn debit(amount: Decimal) -> Self {
        Self {
            available: -amount,
            reserved: Decimal::ZERO,
        }
    }

    /// Move from available to reserved
    pub fn reserve(amount: Decimal) -> Self {
        Self {
            available: -amount,
            reserved: amount,
        }
    }

    /// Move from reserved back to available
    pub fn release(amount: Decimal) -> Self {
        Self {
            available: amount,
            reserved: -amount,
        }
    }

    /// Remove from reserved (funds leave the system)
    pub fn consume_reserved(amount: Decimal) -> Self {
        Self {
            available: Decimal::ZERO,
            reserved: -amount,
        }
    }

    /// Change to the account's total holding
    pub fn net(&self) -> Decimal {
        self.available + self.reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(available: Decimal, reserved: Decimal) -> Balance {
        Balance {
            available,
            reserved,
            ..Balance::empty(Uuid::new_v4(), &AssetRef::currency("USD"))
        }
    }

    #[test]
    fn test_reserve_then_release_is_a_no_op() {
        let start = balance(dec!(500), dec!(0));

        let reserved = start.apply(&BalanceDelta::reserve(dec!(500))).unwrap();
        assert_eq!(reserved.available, dec!(0));
        assert_eq!(reserved.reserved, dec!(500));
        assert_eq!(reserved.total(), start.total());

        let released = reserved.apply(&BalanceDelta::release(dec!(500))).unwrap();
        assert_eq!(released.available, dec!(500));
        assert_eq!(released.reserved, dec!(0));
    }

    #[test]
    fn test_over_reservation_rejected() {
        let start = balance(dec!(100), dec!(0));
        let err = start.apply(&BalanceDelta::reserve(dec!(100.01))).unwrap_err();
        assert_eq!(
            err,
            DomainError::insufficient_available(dec!(100.01), dec!(100))
        );
    }

    #[test]
    fn test_consume_more_than_reserved_rejected() {
        let start = balance(dec!(0), dec!(40));
        let err = start
            .apply(&BalanceDelta::consume_reserved(dec!(50)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientReserved { .. }));
    }

    #[test]
    fn test_delta_net() {
        assert_eq!(BalanceDelta::reserve(dec!(10)).net(), dec!(0));
        assert_eq!(BalanceDelta::credit(dec!(10)).net(), dec!(10));
        assert_eq!(BalanceDelta::consume_reserved(dec!(10)).net(), dec!(-10));
    }
}
