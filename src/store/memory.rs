use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    AccountRepository, BalanceRepository, JournalRepository, LedgerStore, OrderRepository,
    PaymentRepository, TransactionRepository, UnitOfWork,
};
use crate::domain::{
    Account, AccountKind, AccountStatus, AssetRef, Balance, BalanceDelta, DepositOrder,
    JournalEntry, LedgerTransaction, Payment, PaymentStatus, WithdrawalOrder,
};
use crate::error::{LedgerError, LedgerResult};

type BalanceKey = (Uuid, String);

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Account>,
    balances: HashMap<BalanceKey, Balance>,
    transactions: Vec<LedgerTransaction>,
    journal: Vec<JournalEntry>,
    journal_keys: HashMap<String, usize>,
    deposit_orders: HashMap<Uuid, DepositOrder>,
    withdrawal_orders: HashMap<Uuid, WithdrawalOrder>,
    payments: HashMap<String, Payment>,
}

impl LedgerState {
    /// Live account holding the key, ignoring rows the caller is overwriting
    fn live_account_with_key(
        &self,
        account: &Account,
        overwritten: &HashMap<Uuid, Account>,
    ) -> Option<&Account> {
        self.accounts.values().find(|a| {
            !overwritten.contains_key(&a.id)
                && !a.is_deleted()
                && a.unique_key() == account.unique_key()
        })
    }
}

/// In-memory ledger store.
///
/// Intended for tests, dev and the load test. Units of work stage their
/// writes privately and apply them under a single mutex on commit, re-checking
/// every uniqueness constraint at that point.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::internal("ledger state poisoned"))
    }

    /// Every committed journal entry, in insertion order
    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    /// Every committed transaction, in insertion order
    pub fn transactions(&self) -> Vec<LedgerTransaction> {
        self.lock().map(|s| s.transactions.clone()).unwrap_or_default()
    }

    /// Committed balance row, if any
    pub fn balance(&self, account_id: Uuid, asset_symbol: &str) -> Option<Balance> {
        self.lock()
            .ok()
            .and_then(|s| s.balances.get(&(account_id, asset_symbol.to_string())).cloned())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            state: self.state.clone(),
            staged: Staged::default(),
        }))
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<Uuid, Account>,
    new_accounts: HashSet<Uuid>,
    balances: HashMap<BalanceKey, Balance>,
    balance_deltas: HashMap<BalanceKey, (AssetRef, BalanceDelta)>,
    transactions: Vec<LedgerTransaction>,
    journal_links: Vec<(Uuid, Uuid)>,
    journal: Vec<JournalEntry>,
    deposit_orders: HashMap<Uuid, DepositOrder>,
    new_deposit_orders: HashSet<Uuid>,
    withdrawal_orders: HashMap<Uuid, WithdrawalOrder>,
    new_withdrawal_orders: HashSet<Uuid>,
    payments: HashMap<String, Payment>,
    new_payments: HashSet<String>,
    payment_guards: Vec<(String, PaymentStatus)>,
}

struct MemoryUnitOfWork {
    state: Arc<Mutex<LedgerState>>,
    staged: Staged,
}

impl MemoryUnitOfWork {
    fn committed(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::internal("ledger state poisoned"))
    }

    fn view_account(&self, id: Uuid) -> LedgerResult<Option<Account>> {
        if let Some(account) = self.staged.accounts.get(&id) {
            return Ok(Some(account.clone()));
        }
        Ok(self.committed()?.accounts.get(&id).cloned())
    }

    fn view_balance(&self, key: &BalanceKey) -> LedgerResult<Option<Balance>> {
        if let Some(balance) = self.staged.balances.get(key) {
            return Ok(Some(balance.clone()));
        }
        Ok(self.committed()?.balances.get(key).cloned())
    }

    fn view_deposit_order(&self, order_id: Uuid) -> LedgerResult<Option<DepositOrder>> {
        if let Some(order) = self.staged.deposit_orders.get(&order_id) {
            return Ok(Some(order.clone()));
        }
        Ok(self.committed()?.deposit_orders.get(&order_id).cloned())
    }

    fn view_withdrawal_order(&self, order_id: Uuid) -> LedgerResult<Option<WithdrawalOrder>> {
        if let Some(order) = self.staged.withdrawal_orders.get(&order_id) {
            return Ok(Some(order.clone()));
        }
        Ok(self.committed()?.withdrawal_orders.get(&order_id).cloned())
    }

    fn view_payment(&self, transaction_ref: &str) -> LedgerResult<Option<Payment>> {
        if let Some(payment) = self.staged.payments.get(transaction_ref) {
            return Ok(Some(payment.clone()));
        }
        Ok(self.committed()?.payments.get(transaction_ref).cloned())
    }

    fn stage_account(&mut self, account: Account) {
        self.staged.accounts.insert(account.id, account);
    }
}

#[async_trait]
impl AccountRepository for MemoryUnitOfWork {
    async fn find_account(&mut self, id: Uuid) -> LedgerResult<Option<Account>> {
        Ok(self.view_account(id)?.filter(|a| !a.is_deleted()))
    }

    async fn find_account_by_key(
        &mut self,
        kind: AccountKind,
        owner_id: Option<Uuid>,
        subtype: &str,
    ) -> LedgerResult<Option<Account>> {
        let matches = |a: &Account| !a.is_deleted() && a.unique_key() == (kind, owner_id, subtype);

        if let Some(account) = self.staged.accounts.values().find(|a| matches(*a)) {
            return Ok(Some(account.clone()));
        }

        let state = self.committed()?;
        Ok(state
            .accounts
            .values()
            // a staged copy of the same row overrides the committed one
            .filter(|a| !self.staged.accounts.contains_key(&a.id))
            .find(|a| matches(*a))
            .cloned())
    }

    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()> {
        let existing = self
            .find_account_by_key(account.kind, account.owner_id, &account.subtype)
            .await?;
        if existing.is_some() || self.view_account(account.id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "{} account {}/{} already exists",
                account.kind,
                account.owner_id.map(|o| o.to_string()).unwrap_or_default(),
                account.subtype
            )));
        }
        self.staged.new_accounts.insert(account.id);
        self.stage_account(account.clone());
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        id: Uuid,
        status: AccountStatus,
    ) -> LedgerResult<bool> {
        match self.view_account(id)?.filter(|a| !a.is_deleted()) {
            Some(mut account) => {
                account.status = status;
                self.stage_account(account);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn tombstone_account(&mut self, id: Uuid, at: DateTime<Utc>) -> LedgerResult<bool> {
        match self.view_account(id)?.filter(|a| !a.is_deleted()) {
            Some(mut account) => {
                account.deleted_at = Some(at);
                account.status = AccountStatus::Inactive;
                self.stage_account(account);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl BalanceRepository for MemoryUnitOfWork {
    async fn find_balance(
        &mut self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Option<Balance>> {
        self.view_balance(&(account_id, asset_symbol.to_string()))
    }

    async fn find_asset(&mut self, asset_symbol: &str) -> LedgerResult<Option<AssetRef>> {
        if let Some(balance) = self
            .staged
            .balances
            .values()
            .find(|b| b.asset_symbol == asset_symbol)
        {
            return Ok(Some(balance.asset()));
        }
        let state = self.committed()?;
        Ok(state
            .balances
            .values()
            .find(|b| b.asset_symbol == asset_symbol)
            .map(Balance::asset))
    }

    async fn adjust_balance(
        &mut self,
        account_id: Uuid,
        asset: &AssetRef,
        delta: BalanceDelta,
    ) -> LedgerResult<(Balance, Balance)> {
        let key = (account_id, asset.symbol.clone());
        let before = self
            .view_balance(&key)?
            .unwrap_or_else(|| Balance::empty(account_id, asset));
        let after = before.apply(&delta)?;

        let entry = self
            .staged
            .balance_deltas
            .entry(key.clone())
            .or_insert_with(|| (asset.clone(), BalanceDelta::default()));
        entry.1.available += delta.available;
        entry.1.reserved += delta.reserved;

        self.staged.balances.insert(key, after.clone());
        Ok((before, after))
    }
}

#[async_trait]
impl TransactionRepository for MemoryUnitOfWork {
    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> LedgerResult<()> {
        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    async fn link_transaction_journal(
        &mut self,
        transaction_id: Uuid,
        journal_entry_id: Uuid,
    ) -> LedgerResult<()> {
        if let Some(tx) = self
            .staged
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
        {
            tx.journal_entry_id = Some(journal_entry_id);
        } else {
            self.staged
                .journal_links
                .push((transaction_id, journal_entry_id));
        }
        Ok(())
    }

    async fn list_transactions(
        &mut self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        let state = self.committed()?;
        Ok(state
            .transactions
            .iter()
            .chain(self.staged.transactions.iter())
            .filter(|t| t.account_id == account_id && t.asset_symbol == asset_symbol)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JournalRepository for MemoryUnitOfWork {
    async fn find_journal_entry(
        &mut self,
        idempotency_key: &str,
    ) -> LedgerResult<Option<JournalEntry>> {
        if let Some(entry) = self
            .staged
            .journal
            .iter()
            .find(|e| e.idempotency_key == idempotency_key)
        {
            return Ok(Some(entry.clone()));
        }
        let state = self.committed()?;
        Ok(state
            .journal_keys
            .get(idempotency_key)
            .map(|&idx| state.journal[idx].clone()))
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> LedgerResult<()> {
        if self.find_journal_entry(&entry.idempotency_key).await?.is_some() {
            return Err(duplicate_journal_key(&entry.idempotency_key));
        }
        self.staged.journal.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryUnitOfWork {
    async fn insert_deposit_order(&mut self, order: &DepositOrder) -> LedgerResult<()> {
        if self.view_deposit_order(order.order_id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "deposit order {} already exists",
                order.order_id
            )));
        }
        self.staged.new_deposit_orders.insert(order.order_id);
        self.staged
            .deposit_orders
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn find_deposit_order(&mut self, order_id: Uuid) -> LedgerResult<Option<DepositOrder>> {
        self.view_deposit_order(order_id)
    }

    async fn mark_deposit_processed(
        &mut self,
        order_id: Uuid,
        journal_entry_ids: &[Uuid],
    ) -> LedgerResult<bool> {
        let mut order = self
            .view_deposit_order(order_id)?
            .ok_or(LedgerError::OrderNotFound(order_id))?;
        if order.processed {
            return Ok(false);
        }
        order.processed = true;
        order.journal_entry_ids = journal_entry_ids.to_vec();
        order.processed_at = Some(Utc::now());
        self.staged.deposit_orders.insert(order_id, order);
        Ok(true)
    }

    async fn insert_withdrawal_order(&mut self, order: &WithdrawalOrder) -> LedgerResult<()> {
        if self.view_withdrawal_order(order.order_id)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "withdrawal order {} already exists",
                order.order_id
            )));
        }
        self.staged.new_withdrawal_orders.insert(order.order_id);
        self.staged
            .withdrawal_orders
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn find_withdrawal_order(
        &mut self,
        order_id: Uuid,
    ) -> LedgerResult<Option<WithdrawalOrder>> {
        self.view_withdrawal_order(order_id)
    }

    async fn update_withdrawal_order(&mut self, order: &WithdrawalOrder) -> LedgerResult<()> {
        if self.view_withdrawal_order(order.order_id)?.is_none() {
            return Err(LedgerError::OrderNotFound(order.order_id));
        }
        self.staged
            .withdrawal_orders
            .insert(order.order_id, order.clone());
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryUnitOfWork {
    async fn insert_payment(&mut self, payment: &Payment) -> LedgerResult<()> {
        if self.view_payment(&payment.transaction_ref)?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "payment {} already exists",
                payment.transaction_ref
            )));
        }
        self.staged
            .new_payments
            .insert(payment.transaction_ref.clone());
        self.staged
            .payments
            .insert(payment.transaction_ref.clone(), payment.clone());
        Ok(())
    }

    async fn find_payment_by_ref(
        &mut self,
        transaction_ref: &str,
    ) -> LedgerResult<Option<Payment>> {
        self.view_payment(transaction_ref)
    }

    async fn update_payment(
        &mut self,
        payment: &Payment,
        expected: Option<PaymentStatus>,
    ) -> LedgerResult<bool> {
        let current = self
            .view_payment(&payment.transaction_ref)?
            .ok_or_else(|| LedgerError::PaymentNotFound(payment.transaction_ref.clone()))?;
        if let Some(expected) = expected {
            if current.status != expected {
                return Ok(false);
            }
            if !self.staged.payments.contains_key(&payment.transaction_ref) {
                self.staged
                    .payment_guards
                    .push((payment.transaction_ref.clone(), expected));
            }
        }
        self.staged
            .payments
            .insert(payment.transaction_ref.clone(), payment.clone());
        Ok(true)
    }

    async fn list_payments_by_status(
        &mut self,
        status: PaymentStatus,
        limit: usize,
    ) -> LedgerResult<Vec<Payment>> {
        let state = self.committed()?;
        let mut found: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| !self.staged.payments.contains_key(&p.transaction_ref))
            .chain(self.staged.payments.values())
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.transaction_ref.cmp(&b.transaction_ref))
        });
        found.truncate(limit);
        Ok(found)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let MemoryUnitOfWork { state, staged } = *self;
        let mut state = state
            .lock()
            .map_err(|_| LedgerError::internal("ledger state poisoned"))?;

        // Validate everything before touching committed state.
        for id in &staged.new_accounts {
            let account = &staged.accounts[id];
            if state.accounts.contains_key(id)
                || state
                    .live_account_with_key(account, &staged.accounts)
                    .is_some()
            {
                return Err(LedgerError::Conflict(format!(
                    "{} account {} already exists",
                    account.kind, account.subtype
                )));
            }
        }
        for entry in &staged.journal {
            if state.journal_keys.contains_key(&entry.idempotency_key) {
                return Err(duplicate_journal_key(&entry.idempotency_key));
            }
        }
        for id in &staged.new_deposit_orders {
            if state.deposit_orders.contains_key(id) {
                return Err(LedgerError::Conflict(format!(
                    "deposit order {id} already exists"
                )));
            }
        }
        for id in &staged.new_withdrawal_orders {
            if state.withdrawal_orders.contains_key(id) {
                return Err(LedgerError::Conflict(format!(
                    "withdrawal order {id} already exists"
                )));
            }
        }
        for reference in &staged.new_payments {
            if state.payments.contains_key(reference) {
                return Err(LedgerError::Conflict(format!(
                    "payment {reference} already exists"
                )));
            }
        }
        for (reference, expected) in &staged.payment_guards {
            let status = state.payments.get(reference).map(|p| p.status);
            if status != Some(*expected) {
                return Err(LedgerError::Conflict(format!(
                    "payment {reference} changed concurrently"
                )));
            }
        }
        let committed_tx_ids: HashSet<Uuid> = state.transactions.iter().map(|t| t.id).collect();
        for (tx_id, _) in &staged.journal_links {
            if !committed_tx_ids.contains(tx_id) {
                return Err(LedgerError::internal(format!(
                    "transaction {tx_id} not found for journal link"
                )));
            }
        }

        // Deltas are re-applied to the committed rows so a writer that
        // bypassed the lock manager cannot be silently overwritten.
        let mut new_balances = Vec::with_capacity(staged.balance_deltas.len());
        for (key, (asset, delta)) in &staged.balance_deltas {
            let current = state
                .balances
                .get(key)
                .cloned()
                .unwrap_or_else(|| Balance::empty(key.0, asset));
            let updated = current.apply(delta)?;
            new_balances.push((key.clone(), updated));
        }

        // Apply.
        for (id, account) in staged.accounts {
            state.accounts.insert(id, account);
        }
        for (key, balance) in new_balances {
            state.balances.insert(key, balance);
        }
        state.transactions.extend(staged.transactions);
        for (tx_id, journal_id) in staged.journal_links {
            if let Some(tx) = state.transactions.iter_mut().find(|t| t.id == tx_id) {
                tx.journal_entry_id = Some(journal_id);
            }
        }
        for entry in staged.journal {
            let idx = state.journal.len();
            state.journal_keys.insert(entry.idempotency_key.clone(), idx);
            state.journal.push(entry);
        }
        state.deposit_orders.extend(staged.deposit_orders);
        state.withdrawal_orders.extend(staged.withdrawal_orders);
        state.payments.extend(staged.payments);

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        Ok(())
    }
}

fn duplicate_journal_key(key: &str) -> LedgerError {
    LedgerError::Conflict(format!("journal entry {key} already exists"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryLedgerStore::new();
        let account = Account::wallet(Uuid::new_v4(), "MAIN");
        let usd = AssetRef::currency("USD");

        let mut uow = store.begin().await.unwrap();
        uow.insert_account(&account).await.unwrap();
        uow.adjust_balance(account.id, &usd, BalanceDelta::credit(dec!(10)))
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(reader.find_account(account.id).await.unwrap().is_none());
        assert!(store.balance(account.id, "USD").is_none());
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes() {
        let store = InMemoryLedgerStore::new();
        let account = Account::wallet(Uuid::new_v4(), "MAIN");
        let usd = AssetRef::currency("USD");

        let mut uow = store.begin().await.unwrap();
        uow.insert_account(&account).await.unwrap();
        let (before, after) = uow
            .adjust_balance(account.id, &usd, BalanceDelta::credit(dec!(10)))
            .await
            .unwrap();
        assert_eq!(before.available, dec!(0));
        assert_eq!(after.available, dec!(10));
        uow.commit().await.unwrap();

        assert_eq!(store.balance(account.id, "USD").unwrap().available, dec!(10));
    }

    #[tokio::test]
    async fn test_negative_adjustment_rejected_without_staging() {
        let store = InMemoryLedgerStore::new();
        let usd = AssetRef::currency("USD");
        let account_id = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .adjust_balance(account_id, &usd, BalanceDelta::debit(dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(_)));
        uow.commit().await.unwrap();

        assert!(store.balance(account_id, "USD").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_journal_key_conflicts_at_commit() {
        let store = InMemoryLedgerStore::new();
        let entry = |id| JournalEntry {
            id,
            debit_account_id: None,
            credit_account_id: Some(Uuid::new_v4()),
            asset_symbol: "USD".to_string(),
            amount: dec!(1),
            transaction_ids: vec![],
            idempotency_key: "evt-1".to_string(),
            description: None,
            created_at: Utc::now(),
        };

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_journal_entry(&entry(Uuid::new_v4())).await.unwrap();
        second.insert_journal_entry(&entry(Uuid::new_v4())).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(store.journal_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_tombstone_frees_unique_slot() {
        let store = InMemoryLedgerStore::new();
        let owner = Uuid::new_v4();
        let first = Account::wallet(owner, "MAIN");

        let mut uow = store.begin().await.unwrap();
        uow.insert_account(&first).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let dup = uow.insert_account(&Account::wallet(owner, "MAIN")).await;
        assert!(matches!(dup, Err(LedgerError::Conflict(_))));
        assert!(uow.tombstone_account(first.id, Utc::now()).await.unwrap());
        uow.insert_account(&Account::wallet(owner, "MAIN"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(reader.find_account(first.id).await.unwrap().is_none());
        let live = reader
            .find_account_by_key(AccountKind::Wallet, Some(owner), "MAIN")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(live.id, first.id);
    }

    #[tokio::test]
    async fn test_guarded_payment_update_loses_to_earlier_commit() {
        let store = InMemoryLedgerStore::new();
        let payment = Payment::new("TX-1", Uuid::new_v4());
        let mut uow = store.begin().await.unwrap();
        uow.insert_payment(&payment).await.unwrap();
        uow.commit().await.unwrap();

        let completed = Payment {
            status: PaymentStatus::Completed,
            ..payment.clone()
        };
        let flagged = Payment {
            status: PaymentStatus::SettlementFailed,
            ..payment.clone()
        };

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.update_payment(&completed, None).await.unwrap());
        assert!(second
            .update_payment(&flagged, Some(PaymentStatus::Pending))
            .await
            .unwrap());

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let mut reader = store.begin().await.unwrap();
        let stored = reader.find_payment_by_ref("TX-1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert!(!reader
            .update_payment(&flagged, Some(PaymentStatus::Pending))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_flagged_payments_listed_least_recently_updated_first() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let mut uow = store.begin().await.unwrap();
        for (reference, age) in [("TX-A", 1), ("TX-B", 3), ("TX-C", 2)] {
            let mut payment = Payment::new(reference, Uuid::new_v4());
            payment.status = PaymentStatus::SettlementFailed;
            payment.updated_at = now - chrono::Duration::seconds(age);
            uow.insert_payment(&payment).await.unwrap();
        }
        uow.commit().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        let listed: Vec<_> = reader
            .list_payments_by_status(PaymentStatus::SettlementFailed, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.transaction_ref)
            .collect();
        assert_eq!(listed, vec!["TX-B", "TX-C"]);
    }
}
