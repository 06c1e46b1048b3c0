//! Journal Engine
//!
//! Posts the legs of one settlement event inside a caller-owned unit of
//! work. Each leg moves one balance, appends a [`LedgerTransaction`] with the
//! account's holding before and after, and writes a [`JournalEntry`] keyed
//! `<eventKey>`, `<eventKey>-fees` or `<eventKey>-tax`.
//!
//! The principal key decides replays: if it is already taken, nothing is
//! touched and the entries recorded the first time are returned.
//!
//! External money is single-legged. A deposit leg carries only a credit
//! account and a withdrawal debit only a debit account.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::balance;
use crate::domain::{AssetRef, JournalEntry, LedgerTransaction, LegRole, TransactionKind};
use crate::error::{LedgerError, LedgerResult};
use crate::store::UnitOfWork;

/// Which bucket a leg moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegDirection {
    /// available += amount
    Credit,
    /// reserved -= amount (funds leave the ledger)
    DebitReserved,
}

/// One balance movement of a settlement
#[derive(Debug, Clone)]
pub struct Leg {
    pub role: LegRole,
    pub account_id: Uuid,
    pub direction: LegDirection,
    pub amount: Decimal,
}

impl Leg {
    pub fn credit(role: LegRole, account_id: Uuid, amount: Decimal) -> Self {
        Self {
            role,
            account_id,
            direction: LegDirection::Credit,
            amount,
        }
    }

    pub fn debit_reserved(role: LegRole, account_id: Uuid, amount: Decimal) -> Self {
        Self {
            role,
            account_id,
            direction: LegDirection::DebitReserved,
            amount,
        }
    }
}

/// Everything one settlement event posts
#[derive(Debug, Clone)]
pub struct Posting {
    pub event_key: String,
    pub kind: TransactionKind,
    pub asset: AssetRef,
    pub legs: Vec<Leg>,
    pub description: Option<String>,
}

impl Posting {
    pub fn new(event_key: impl Into<String>, kind: TransactionKind, asset: AssetRef) -> Self {
        Self {
            event_key: event_key.into(),
            kind,
            asset,
            legs: Vec::new(),
            description: None,
        }
    }

    pub fn with_leg(mut self, leg: Leg) -> Self {
        self.legs.push(leg);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Idempotency key of the principal leg
    pub fn principal_key(&self) -> String {
        LegRole::Principal.idempotency_key(&self.event_key)
    }

    fn validate(&self) -> LedgerResult<()> {
        let principal = self
            .legs
            .iter()
            .filter(|leg| leg.role == LegRole::Principal)
            .collect::<Vec<_>>();
        match principal.as_slice() {
            [leg] if leg.amount > Decimal::ZERO => {}
            [_] => {
                return Err(LedgerError::Validation(format!(
                    "principal leg of {} must be positive",
                    self.event_key
                )))
            }
            _ => {
                return Err(LedgerError::Validation(format!(
                    "{} needs exactly one principal leg",
                    self.event_key
                )))
            }
        }

        for role in [LegRole::Fees, LegRole::Tax] {
            if self.legs.iter().filter(|leg| leg.role == role).count() > 1 {
                return Err(LedgerError::Validation(format!(
                    "{} has more than one {role:?} leg",
                    self.event_key
                )));
            }
        }

        if let Some(leg) = self.legs.iter().find(|leg| leg.amount < Decimal::ZERO) {
            return Err(LedgerError::Validation(format!(
                "leg amount must not be negative, got {}",
                leg.amount
            )));
        }
        Ok(())
    }
}

/// Result of posting an event
#[derive(Debug, Clone, PartialEq)]
pub enum PostingOutcome {
    /// Legs were applied in this unit of work
    Posted(Vec<JournalEntry>),
    /// The event was settled before; nothing was touched
    AlreadyPosted(Vec<JournalEntry>),
}

impl PostingOutcome {
    pub fn entries(&self) -> &[JournalEntry] {
        match self {
            PostingOutcome::Posted(entries) | PostingOutcome::AlreadyPosted(entries) => entries,
        }
    }

    pub fn into_entries(self) -> Vec<JournalEntry> {
        match self {
            PostingOutcome::Posted(entries) | PostingOutcome::AlreadyPosted(entries) => entries,
        }
    }

    pub fn entry_ids(&self) -> Vec<Uuid> {
        self.entries().iter().map(|e| e.id).collect()
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, PostingOutcome::AlreadyPosted(_))
    }
}

/// Posts settlement legs idempotently
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalEngine;

impl JournalEngine {
    pub fn new() -> Self {
        Self
    }

    /// Post every non-zero leg, or return the earlier outcome on replay.
    ///
    /// The caller holds the lock of every balance a leg touches and owns the
    /// unit of work; on error it must roll back.
    pub async fn post(
        &self,
        uow: &mut dyn UnitOfWork,
        posting: &Posting,
    ) -> LedgerResult<PostingOutcome> {
        posting.validate()?;

        if uow.find_journal_entry(&posting.principal_key()).await?.is_some() {
            let recorded = self.recorded_entries(uow, &posting.event_key).await?;
            tracing::warn!(
                event_key = %posting.event_key,
                entries = recorded.len(),
                "settlement event already posted, skipping"
            );
            return Ok(PostingOutcome::AlreadyPosted(recorded));
        }

        let mut entries = Vec::with_capacity(posting.legs.len());
        for leg in &posting.legs {
            if leg.amount.is_zero() {
                continue;
            }
            entries.push(self.post_leg(uow, posting, leg).await?);
        }

        tracing::info!(
            event_key = %posting.event_key,
            kind = %posting.kind,
            asset = %posting.asset,
            legs = entries.len(),
            "settlement posted"
        );
        Ok(PostingOutcome::Posted(entries))
    }

    /// Entries already recorded for an event, principal first
    pub async fn recorded_entries(
        &self,
        uow: &mut dyn UnitOfWork,
        event_key: &str,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let mut found = Vec::new();
        for role in LegRole::ALL {
            if let Some(entry) = uow.find_journal_entry(&role.idempotency_key(event_key)).await? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    async fn post_leg(
        &self,
        uow: &mut dyn UnitOfWork,
        posting: &Posting,
        leg: &Leg,
    ) -> LedgerResult<JournalEntry> {
        let (before, after) = match leg.direction {
            LegDirection::Credit => {
                balance::credit(uow, leg.account_id, &posting.asset, leg.amount).await?
            }
            LegDirection::DebitReserved => {
                balance::consume_reserved(uow, leg.account_id, &posting.asset, leg.amount).await?
            }
        };

        let now = Utc::now();
        let mut transaction = LedgerTransaction {
            id: Uuid::new_v4(),
            account_id: leg.account_id,
            asset_symbol: posting.asset.symbol.clone(),
            kind: posting.kind,
            amount: leg.amount,
            balance_before: before.total(),
            balance_after: after.total(),
            journal_entry_id: None,
            created_at: now,
        };
        uow.insert_transaction(&transaction).await?;

        let (debit_account_id, credit_account_id) = match leg.direction {
            LegDirection::Credit => (None, Some(leg.account_id)),
            LegDirection::DebitReserved => (Some(leg.account_id), None),
        };
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            debit_account_id,
            credit_account_id,
            asset_symbol: posting.asset.symbol.clone(),
            amount: leg.amount,
            transaction_ids: vec![transaction.id],
            idempotency_key: leg.role.idempotency_key(&posting.event_key),
            description: posting.description.clone(),
            created_at: now,
        };
        uow.insert_journal_entry(&entry).await?;

        uow.link_transaction_journal(transaction.id, entry.id).await?;
        transaction.journal_entry_id = Some(entry.id);

        tracing::debug!(
            event_key = %posting.event_key,
            idempotency_key = %entry.idempotency_key,
            account_id = %leg.account_id,
            amount = %leg.amount,
            balance_after = %transaction.balance_after,
            "leg posted"
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Account;
    use crate::store::{AccountRepository, InMemoryLedgerStore, LedgerStore};
    use rust_decimal_macros::dec;

    struct Fixture {
        store: InMemoryLedgerStore,
        wallet: Uuid,
        fees: Uuid,
        tax: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::new();
        let wallet = Account::wallet(Uuid::new_v4(), "MAIN");
        let fees = Account::system("FEES");
        let tax = Account::system("TAX");

        let mut uow = store.begin().await.unwrap();
        for account in [&wallet, &fees, &tax] {
            uow.insert_account(account).await.unwrap();
        }
        uow.commit().await.unwrap();

        Fixture {
            store,
            wallet: wallet.id,
            fees: fees.id,
            tax: tax.id,
        }
    }

    fn deposit(f: &Fixture, key: &str) -> Posting {
        Posting::new(key, TransactionKind::Deposit, AssetRef::currency("USD"))
            .with_leg(Leg::credit(LegRole::Principal, f.wallet, dec!(825)))
            .with_leg(Leg::credit(LegRole::Fees, f.fees, dec!(25)))
            .with_leg(Leg::credit(LegRole::Tax, f.tax, dec!(150)))
    }

    #[tokio::test]
    async fn test_post_writes_one_entry_per_leg() {
        let f = fixture().await;
        let engine = JournalEngine::new();

        let mut uow = f.store.begin().await.unwrap();
        let outcome = engine
            .post(uow.as_mut(), &deposit(&f, "bank-deposit-1"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert!(!outcome.is_replay());
        let keys: Vec<_> = outcome
            .entries()
            .iter()
            .map(|e| e.idempotency_key.as_str())
            .collect();
        assert_eq!(
            keys,
            vec!["bank-deposit-1", "bank-deposit-1-fees", "bank-deposit-1-tax"]
        );
        assert!(outcome.entries().iter().all(|e| e.debit_account_id.is_none()));

        let transactions = f.store.transactions();
        assert_eq!(transactions.len(), 3);
        for (tx, entry) in transactions.iter().zip(outcome.entries()) {
            assert_eq!(tx.journal_entry_id, Some(entry.id));
            assert_eq!(entry.transaction_ids, vec![tx.id]);
            assert_eq!(tx.balance_after - tx.balance_before, tx.amount);
        }

        assert_eq!(f.store.balance(f.wallet, "USD").unwrap().available, dec!(825));
        assert_eq!(f.store.balance(f.fees, "USD").unwrap().available, dec!(25));
        assert_eq!(f.store.balance(f.tax, "USD").unwrap().available, dec!(150));
    }

    #[tokio::test]
    async fn test_replay_touches_nothing() {
        let f = fixture().await;
        let engine = JournalEngine::new();

        let mut uow = f.store.begin().await.unwrap();
        let first = engine
            .post(uow.as_mut(), &deposit(&f, "bank-deposit-2"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = f.store.begin().await.unwrap();
        let second = engine
            .post(uow.as_mut(), &deposit(&f, "bank-deposit-2"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert!(second.is_replay());
        assert_eq!(first.entry_ids(), second.entry_ids());
        assert_eq!(f.store.journal_entries().len(), 3);
        assert_eq!(f.store.balance(f.wallet, "USD").unwrap().available, dec!(825));
    }

    #[tokio::test]
    async fn test_zero_legs_are_skipped() {
        let f = fixture().await;
        let posting = Posting::new("gateway-payment-T1", TransactionKind::Deposit, AssetRef::currency("USD"))
            .with_leg(Leg::credit(LegRole::Principal, f.wallet, dec!(100)))
            .with_leg(Leg::credit(LegRole::Fees, f.fees, dec!(0)))
            .with_leg(Leg::credit(LegRole::Tax, f.tax, dec!(0)));

        let mut uow = f.store.begin().await.unwrap();
        let outcome = JournalEngine::new().post(uow.as_mut(), &posting).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(outcome.entries().len(), 1);
        assert!(f.store.balance(f.fees, "USD").is_none());
    }

    #[tokio::test]
    async fn test_debit_reserved_leg_is_single_sided() {
        let f = fixture().await;
        let usd = AssetRef::currency("USD");

        let mut uow = f.store.begin().await.unwrap();
        balance::credit(uow.as_mut(), f.wallet, &usd, dec!(500)).await.unwrap();
        balance::reserve(uow.as_mut(), f.wallet, &usd, dec!(500)).await.unwrap();
        let posting = Posting::new("bank-withdrawal-1", TransactionKind::Withdrawal, usd)
            .with_leg(Leg::debit_reserved(LegRole::Principal, f.wallet, dec!(500)))
            .with_leg(Leg::credit(LegRole::Fees, f.fees, dec!(10)));
        let outcome = JournalEngine::new().post(uow.as_mut(), &posting).await.unwrap();
        uow.commit().await.unwrap();

        let principal = &outcome.entries()[0];
        assert_eq!(principal.debit_account_id, Some(f.wallet));
        assert!(principal.credit_account_id.is_none());

        let wallet = f.store.balance(f.wallet, "USD").unwrap();
        assert_eq!(wallet.available, dec!(0));
        assert_eq!(wallet.reserved, dec!(0));
    }

    #[tokio::test]
    async fn test_missing_principal_rejected() {
        let f = fixture().await;
        let posting = Posting::new("bank-deposit-3", TransactionKind::Deposit, AssetRef::currency("USD"))
            .with_leg(Leg::credit(LegRole::Fees, f.fees, dec!(5)));

        let mut uow = f.store.begin().await.unwrap();
        let err = JournalEngine::new().post(uow.as_mut(), &posting).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
