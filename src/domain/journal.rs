//! Transactions and journal entries
//!
//! Both are write-once. The only mutation ever applied is back-filling a
//! transaction's `journal_entry_id` inside the unit of work that created it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Direction of a single balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// Append-only record of one balance mutation.
///
/// `balance_before`/`balance_after` are the account's total holding of the
/// asset (available + locked + reserved) around the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub asset_symbol: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One leg of a settlement as recorded in the journal.
///
/// External deposits carry only a credit account and withdrawals only a debit
/// account; money crossing the system boundary is single-legged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub debit_account_id: Option<Uuid>,
    pub credit_account_id: Option<Uuid>,
    pub asset_symbol: String,
    pub amount: Decimal,
    pub transaction_ids: Vec<Uuid>,
    /// Globally unique
    pub idempotency_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// The account whose balance this entry moved
    pub fn account_id(&self) -> Option<Uuid> {
        self.credit_account_id.or(self.debit_account_id)
    }
}

/// Role of a leg within a multi-leg settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegRole {
    Principal,
    Fees,
    Tax,
}

impl LegRole {
    pub const ALL: [LegRole; 3] = [LegRole::Principal, LegRole::Fees, LegRole::Tax];

    /// Idempotency key of this leg for the given event key
    pub fn idempotency_key(&self, event_key: &str) -> String {
        match self {
            LegRole::Principal => event_key.to_string(),
            LegRole::Fees => format!("{event_key}-fees"),
            LegRole::Tax => format!("{event_key}-tax"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_keys() {
        let event = "bank-deposit-42";
        assert_eq!(LegRole::Principal.idempotency_key(event), "bank-deposit-42");
        assert_eq!(LegRole::Fees.idempotency_key(event), "bank-deposit-42-fees");
        assert_eq!(LegRole::Tax.idempotency_key(event), "bank-deposit-42-tax");
    }

    #[test]
    fn test_transaction_kind_parse() {
        assert_eq!(
            "WITHDRAWAL".parse::<TransactionKind>().unwrap(),
            TransactionKind::Withdrawal
        );
        assert!("REFUND".parse::<TransactionKind>().is_err());
    }
}
