//! Ledger accounts
//!
//! Wallets belong to users; SYSTEM accounts are platform treasuries
//! (fees, tax) and have no owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    Wallet,
    System,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Wallet => "WALLET",
            AccountKind::System => "SYSTEM",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WALLET" => Ok(AccountKind::Wallet),
            "SYSTEM" => Ok(AccountKind::System),
            other => Err(format!("unknown account kind: {other}")),
        }
    }
}

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AccountStatus::Active),
            "INACTIVE" => Ok(AccountStatus::Inactive),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// A ledger-addressable holder of balances.
///
/// At most one non-deleted account exists per `(kind, owner_id, subtype)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub kind: AccountKind,
    pub owner_id: Option<Uuid>,
    pub subtype: String,
    pub status: AccountStatus,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Tombstone; lookups skip rows where this is set
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// New user wallet
    pub fn wallet(owner_id: Uuid, subtype: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AccountKind::Wallet,
            owner_id: Some(owner_id),
            subtype: subtype.into(),
            status: AccountStatus::Active,
            name: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// New treasury account
    pub fn system(subtype: impl Into<String>) -> Self {
        let subtype = subtype.into();
        Self {
            id: Uuid::new_v4(),
            kind: AccountKind::System,
            owner_id: None,
            name: Some(format!("System {subtype}")),
            subtype,
            status: AccountStatus::Active,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active && self.deleted_at.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Key of the uniqueness constraint
    pub fn unique_key(&self) -> (AccountKind, Option<Uuid>, &str) {
        (self.kind, self.owner_id, self.subtype.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_account_has_no_owner() {
        let account = Account::system("FEES");
        assert_eq!(account.kind, AccountKind::System);
        assert!(account.owner_id.is_none());
        assert_eq!(account.name.as_deref(), Some("System FEES"));
        assert!(account.is_active());
    }

    #[test]
    fn test_kind_round_trips_through_text() {
        assert_eq!("WALLET".parse::<AccountKind>().unwrap(), AccountKind::Wallet);
        assert_eq!(AccountKind::System.to_string(), "SYSTEM");
        assert!("wallet".parse::<AccountKind>().is_err());
    }

    #[test]
    fn test_tombstoned_account_is_not_active() {
        let mut account = Account::wallet(Uuid::new_v4(), "MAIN");
        account.deleted_at = Some(Utc::now());
        assert!(account.is_deleted());
        assert!(!account.is_active());
    }
}
