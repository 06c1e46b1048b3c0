//! Fee and tax policies
//!
//! Collaborators resolve currency/bank fee configuration into concrete fee
//! and tax amounts before calling the settlement handlers.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::amount::MAX_SCALE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeKind {
    Fixed,
    Percentage,
    /// Fixed amount plus percentage
    Hybrid,
}

/// Fee configuration of a currency or bank
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub enabled: bool,
    pub kind: FeeKind,
    /// Percent, e.g. `15` for 15%
    pub percentage: Decimal,
    pub fixed_amount: Decimal,
}

impl FeePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            kind: FeeKind::Fixed,
            percentage: Decimal::ZERO,
            fixed_amount: Decimal::ZERO,
        }
    }

    pub fn fixed(amount: Decimal) -> Self {
        Self {
            enabled: true,
            kind: FeeKind::Fixed,
            percentage: Decimal::ZERO,
            fixed_amount: amount,
        }
    }

    pub fn percentage(percent: Decimal) -> Self {
        Self {
            enabled: true,
            kind: FeeKind::Percentage,
            percentage: percent,
            fixed_amount: Decimal::ZERO,
        }
    }

    pub fn hybrid(fixed: Decimal, percent: Decimal) -> Self {
        Self {
            enabled: true,
            kind: FeeKind::Hybrid,
            percentage: percent,
            fixed_amount: fixed,
        }
    }

    /// Charge for `base`, rounded half-up to 8 decimal places.
    pub fn compute(&self, base: Decimal) -> Decimal {
        if !self.enabled {
            return Decimal::ZERO;
        }
        let pct = base * self.percentage / Decimal::ONE_HUNDRED;
        let raw = match self.kind {
            FeeKind::Fixed => self.fixed_amount,
            FeeKind::Percentage => pct,
            FeeKind::Hybrid => self.fixed_amount + pct,
        };
        raw.max(Decimal::ZERO)
            .round_dp_with_strategy(MAX_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Resolved amounts of one deposit or withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAmounts {
    pub base: Decimal,
    pub fee: Decimal,
    pub tax: Decimal,
    pub net: Decimal,
}

impl SettlementAmounts {
    /// Fee and tax are both computed on the base amount.
    pub fn resolve(base: Decimal, fee_policy: &FeePolicy, tax_policy: &FeePolicy) -> Self {
        let fee = fee_policy.compute(base);
        let tax = tax_policy.compute(base);
        Self {
            base,
            fee,
            tax,
            net: base - fee - tax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixed_fee_and_percentage_tax() {
        let amounts = SettlementAmounts::resolve(
            dec!(1000),
            &FeePolicy::fixed(dec!(25)),
            &FeePolicy::percentage(dec!(15)),
        );
        assert_eq!(amounts.fee, dec!(25));
        assert_eq!(amounts.tax, dec!(150));
        assert_eq!(amounts.net, dec!(825));
    }

    #[test]
    fn test_hybrid_fee() {
        let policy = FeePolicy::hybrid(dec!(2), dec!(1.5));
        assert_eq!(policy.compute(dec!(200)), dec!(5));
    }

    #[test]
    fn test_disabled_policy_charges_nothing() {
        let mut policy = FeePolicy::fixed(dec!(25));
        policy.enabled = false;
        assert_eq!(policy.compute(dec!(1000)), Decimal::ZERO);
        assert_eq!(FeePolicy::disabled().compute(dec!(1000)), Decimal::ZERO);
    }

    #[test]
    fn test_percentage_rounds_to_eight_places() {
        let policy = FeePolicy::percentage(dec!(33.333333333));
        let fee = policy.compute(dec!(1));
        assert!(fee.scale() <= 8);
    }
}
