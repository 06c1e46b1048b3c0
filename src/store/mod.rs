//! Persistence layer
//!
//! One narrow repository trait per entity, all reached through a
//! [`UnitOfWork`]: an open atomic session whose writes land together on
//! [`UnitOfWork::commit`] or not at all. Dropping or rolling back a unit of
//! work discards everything it staged.
//!
//! A unit of work gives atomicity, not isolation from other writers of the
//! same balance rows; callers open one only while holding the locks for every
//! balance they intend to touch.

mod memory;
mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Account, AccountKind, AccountStatus, AssetRef, Balance, BalanceDelta, DepositOrder,
    JournalEntry, LedgerTransaction, Payment, PaymentStatus, WithdrawalOrder,
};
use crate::error::LedgerResult;

/// Accounts. Lookups never return tombstoned rows.
#[async_trait]
pub trait AccountRepository: Send {
    async fn find_account(&mut self, id: Uuid) -> LedgerResult<Option<Account>>;

    async fn find_account_by_key(
        &mut self,
        kind: AccountKind,
        owner_id: Option<Uuid>,
        subtype: &str,
    ) -> LedgerResult<Option<Account>>;

    /// `Conflict` when a live account already holds `(kind, owner_id, subtype)`.
    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()>;

    async fn update_account_status(&mut self, id: Uuid, status: AccountStatus)
        -> LedgerResult<bool>;

    async fn tombstone_account(&mut self, id: Uuid, at: DateTime<Utc>) -> LedgerResult<bool>;
}

/// Balance rows, upserted on first write.
#[async_trait]
pub trait BalanceRepository: Send {
    async fn find_balance(
        &mut self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Option<Balance>>;

    /// Asset recorded on any balance row with this symbol
    async fn find_asset(&mut self, asset_symbol: &str) -> LedgerResult<Option<AssetRef>>;

    /// Atomically apply `delta`, creating the row at zero if absent.
    ///
    /// Returns the row before and after. Fails with a validation error,
    /// leaving the row untouched, if either bucket would go negative.
    async fn adjust_balance(
        &mut self,
        account_id: Uuid,
        asset: &AssetRef,
        delta: BalanceDelta,
    ) -> LedgerResult<(Balance, Balance)>;
}

/// Append-only balance mutation records.
#[async_trait]
pub trait TransactionRepository: Send {
    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> LedgerResult<()>;

    /// Back-fill the journal entry of a transaction
    async fn link_transaction_journal(
        &mut self,
        transaction_id: Uuid,
        journal_entry_id: Uuid,
    ) -> LedgerResult<()>;

    /// History of one account/asset in creation order
    async fn list_transactions(
        &mut self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Vec<LedgerTransaction>>;
}

/// Journal entries, unique by idempotency key.
#[async_trait]
pub trait JournalRepository: Send {
    async fn find_journal_entry(
        &mut self,
        idempotency_key: &str,
    ) -> LedgerResult<Option<JournalEntry>>;

    /// `Conflict` when the idempotency key is taken.
    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> LedgerResult<()>;
}

/// Deposit and withdrawal orders.
#[async_trait]
pub trait OrderRepository: Send {
    async fn insert_deposit_order(&mut self, order: &DepositOrder) -> LedgerResult<()>;

    async fn find_deposit_order(&mut self, order_id: Uuid) -> LedgerResult<Option<DepositOrder>>;

    /// Flip `processed` to true. Returns false if it already was.
    async fn mark_deposit_processed(
        &mut self,
        order_id: Uuid,
        journal_entry_ids: &[Uuid],
    ) -> LedgerResult<bool>;

    async fn insert_withdrawal_order(&mut self, order: &WithdrawalOrder) -> LedgerResult<()>;

    async fn find_withdrawal_order(
        &mut self,
        order_id: Uuid,
    ) -> LedgerResult<Option<WithdrawalOrder>>;

    async fn update_withdrawal_order(&mut self, order: &WithdrawalOrder) -> LedgerResult<()>;
}

/// Gateway payments, unique by transaction reference.
#[async_trait]
pub trait PaymentRepository: Send {
    async fn insert_payment(&mut self, payment: &Payment) -> LedgerResult<()>;

    async fn find_payment_by_ref(&mut self, transaction_ref: &str)
        -> LedgerResult<Option<Payment>>;

    /// Overwrite the stored payment. With `expected` set, only while the
    /// stored status still equals it; returns false when it no longer does.
    async fn update_payment(
        &mut self,
        payment: &Payment,
        expected: Option<PaymentStatus>,
    ) -> LedgerResult<bool>;

    /// Least recently updated first
    async fn list_payments_by_status(
        &mut self,
        status: PaymentStatus,
        limit: usize,
    ) -> LedgerResult<Vec<Payment>>;
}

/// An open atomic session over every repository.
#[async_trait]
pub trait UnitOfWork:
    AccountRepository
    + BalanceRepository
    + TransactionRepository
    + JournalRepository
    + OrderRepository
    + PaymentRepository
    + Send
{
    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Opens units of work against one persistence engine.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>> {
        (**self).begin().await
    }
}
