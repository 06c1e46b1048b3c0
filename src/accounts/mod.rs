//! Account Registry
//!
//! Creates and looks up user wallets and the SYSTEM treasury accounts that
//! collect fee and tax legs. Treasury accounts are created on first use and
//! cached per process.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::domain::{Account, AccountKind, AccountStatus, DomainError};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, UnitOfWork};

/// Account registry backed by a [`LedgerStore`]
pub struct AccountRegistry {
    store: Arc<dyn LedgerStore>,
    system_accounts: RwLock<HashMap<String, Uuid>>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            system_accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Create a wallet. `Conflict` if the owner already has one of this subtype.
    pub async fn create_wallet(&self, owner_id: Uuid, subtype: &str) -> LedgerResult<Account> {
        let account = Account::wallet(owner_id, subtype);

        let mut uow = self.store.begin().await?;
        if let Err(e) = uow.insert_account(&account).await {
            uow.rollback().await?;
            return Err(e);
        }
        uow.commit().await?;

        tracing::info!(
            account_id = %account.id,
            owner_id = %owner_id,
            subtype = %subtype,
            "wallet created"
        );
        Ok(account)
    }

    /// Existing wallet, or a new one
    pub async fn get_or_create_wallet(
        &self,
        owner_id: Uuid,
        subtype: &str,
    ) -> LedgerResult<Account> {
        if let Some(account) = self.find_wallet(owner_id, subtype).await? {
            return Ok(account);
        }
        match self.create_wallet(owner_id, subtype).await {
            Err(LedgerError::Conflict(_)) => self
                .find_wallet(owner_id, subtype)
                .await?
                .ok_or_else(|| LedgerError::internal("wallet vanished after insert conflict")),
            other => other,
        }
    }

    pub async fn find_wallet(
        &self,
        owner_id: Uuid,
        subtype: &str,
    ) -> LedgerResult<Option<Account>> {
        let mut uow = self.store.begin().await?;
        let found = uow
            .find_account_by_key(AccountKind::Wallet, Some(owner_id), subtype)
            .await;
        uow.rollback().await?;
        found
    }

    /// Live account by id, `AccountNotFound` otherwise
    pub async fn get_account(&self, id: Uuid) -> LedgerResult<Account> {
        let mut uow = self.store.begin().await?;
        let found = uow.find_account(id).await;
        uow.rollback().await?;
        found?.ok_or(LedgerError::AccountNotFound(id))
    }

    /// Id of the SYSTEM account for `subtype`, creating it on first use.
    ///
    /// Concurrent first callers race on the insert; the loser re-reads the
    /// winner's row.
    pub async fn ensure_system_account(&self, subtype: &str) -> LedgerResult<Uuid> {
        if let Some(id) = self.cached_system_account(subtype)? {
            return Ok(id);
        }

        let mut uow = self.store.begin().await?;
        let existing = uow
            .find_account_by_key(AccountKind::System, None, subtype)
            .await;
        let id = match existing {
            Ok(Some(account)) => {
                uow.rollback().await?;
                account.id
            }
            Ok(None) => {
                let account = Account::system(subtype);
                // The unique index fires at the insert on Postgres and at
                // commit in memory; either way the loser re-reads.
                let committed = match uow.insert_account(&account).await {
                    Ok(()) => uow.commit().await,
                    Err(e) => {
                        uow.rollback().await?;
                        Err(e)
                    }
                };
                match committed {
                    Ok(()) => {
                        tracing::info!(
                            account_id = %account.id,
                            subtype = %subtype,
                            "system account created"
                        );
                        account.id
                    }
                    Err(LedgerError::Conflict(_)) => self.reload_system_account(subtype).await?,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                uow.rollback().await?;
                return Err(e);
            }
        };

        self.system_accounts
            .write()
            .map_err(|_| LedgerError::internal("system account cache poisoned"))?
            .insert(subtype.to_string(), id);
        Ok(id)
    }

    /// Mark an account INACTIVE. It keeps its balances but takes no new
    /// deposits or withdrawal requests.
    pub async fn deactivate_account(&self, id: Uuid) -> LedgerResult<Account> {
        let mut uow = self.store.begin().await?;
        match uow.update_account_status(id, AccountStatus::Inactive).await {
            Ok(true) => {}
            Ok(false) => {
                uow.rollback().await?;
                return Err(LedgerError::AccountNotFound(id));
            }
            Err(e) => {
                uow.rollback().await?;
                return Err(e);
            }
        }
        let account = uow.find_account(id).await;
        uow.commit().await?;

        tracing::info!(account_id = %id, "account deactivated");
        account?.ok_or(LedgerError::AccountNotFound(id))
    }

    /// Tombstone an account. It disappears from every lookup and its
    /// `(kind, owner, subtype)` slot becomes free.
    pub async fn delete_account(&self, id: Uuid) -> LedgerResult<()> {
        let mut uow = self.store.begin().await?;
        let tombstoned = match uow.tombstone_account(id, Utc::now()).await {
            Ok(done) => done,
            Err(e) => {
                uow.rollback().await?;
                return Err(e);
            }
        };
        if !tombstoned {
            uow.rollback().await?;
            return Err(LedgerError::AccountNotFound(id));
        }
        uow.commit().await?;

        if let Ok(mut cache) = self.system_accounts.write() {
            cache.retain(|_, cached| *cached != id);
        }
        tracing::info!(account_id = %id, "account deleted");
        Ok(())
    }

    fn cached_system_account(&self, subtype: &str) -> LedgerResult<Option<Uuid>> {
        Ok(self
            .system_accounts
            .read()
            .map_err(|_| LedgerError::internal("system account cache poisoned"))?
            .get(subtype)
            .copied())
    }

    async fn reload_system_account(&self, subtype: &str) -> LedgerResult<Uuid> {
        let mut uow = self.store.begin().await?;
        let found = uow
            .find_account_by_key(AccountKind::System, None, subtype)
            .await;
        uow.rollback().await?;
        found?
            .map(|a| a.id)
            .ok_or_else(|| LedgerError::internal(format!("system account {subtype} missing")))
    }
}

impl std::fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRegistry").finish_non_exhaustive()
    }
}

/// Load a wallet that may take new money movements
pub(crate) async fn require_active_wallet(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
) -> LedgerResult<Account> {
    let account = uow
        .find_account(account_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))?;
    if account.kind != AccountKind::Wallet {
        return Err(DomainError::NotAWallet(account_id).into());
    }
    if !account.is_active() {
        return Err(DomainError::AccountInactive(account_id).into());
    }
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;

    fn registry() -> AccountRegistry {
        AccountRegistry::new(Arc::new(InMemoryLedgerStore::new()))
    }

    #[tokio::test]
    async fn test_create_wallet_is_unique_per_owner_and_subtype() {
        let registry = registry();
        let owner = Uuid::new_v4();

        let wallet = registry.create_wallet(owner, "MAIN").await.unwrap();
        assert_eq!(wallet.kind, AccountKind::Wallet);

        let dup = registry.create_wallet(owner, "MAIN").await;
        assert!(matches!(dup, Err(LedgerError::Conflict(_))));

        let other = registry.create_wallet(owner, "SAVINGS").await.unwrap();
        assert_ne!(other.id, wallet.id);

        let again = registry.get_or_create_wallet(owner, "MAIN").await.unwrap();
        assert_eq!(again.id, wallet.id);
    }

    #[tokio::test]
    async fn test_ensure_system_account_creates_once() {
        let registry = registry();
        let first = registry.ensure_system_account("FEES").await.unwrap();
        let second = registry.ensure_system_account("FEES").await.unwrap();
        assert_eq!(first, second);

        let account = registry.get_account(first).await.unwrap();
        assert_eq!(account.kind, AccountKind::System);
        assert!(account.owner_id.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_system_account_creation_converges() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let a = Arc::new(AccountRegistry::new(store.clone()));
        let b = Arc::new(AccountRegistry::new(store.clone()));

        let (ra, rb) = tokio::join!(a.ensure_system_account("TAX"), b.ensure_system_account("TAX"));
        assert_eq!(ra.unwrap(), rb.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_system_account_race_never_surfaces_conflict() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = AccountRegistry::new(store.clone());
            handles.push(tokio::spawn(async move {
                registry.ensure_system_account("FEES").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let registry = registry();
        let err = registry.get_account(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_account_frees_slot() {
        let registry = registry();
        let owner = Uuid::new_v4();
        let wallet = registry.create_wallet(owner, "MAIN").await.unwrap();

        registry.delete_account(wallet.id).await.unwrap();
        assert!(registry.find_wallet(owner, "MAIN").await.unwrap().is_none());
        assert!(registry.get_account(wallet.id).await.is_err());

        let replacement = registry.create_wallet(owner, "MAIN").await.unwrap();
        assert_ne!(replacement.id, wallet.id);
    }

    #[tokio::test]
    async fn test_deactivate_account() {
        let registry = registry();
        let wallet = registry.create_wallet(Uuid::new_v4(), "MAIN").await.unwrap();

        let updated = registry.deactivate_account(wallet.id).await.unwrap();
        assert_eq!(updated.status, AccountStatus::Inactive);
        assert!(!updated.is_active());
    }
}
