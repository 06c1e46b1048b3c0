//! Settlement handlers
//!
//! Orchestrators for deposits, withdrawals and gateway callbacks. Each
//! operation validates its input, acquires every lock it needs in canonical
//! order, runs one unit of work, and releases the locks on every path.

mod commands;
mod deposit_handler;
mod webhook_handler;
mod withdrawal_handler;


pub use commands::*;
pub use deposit_handler::DepositHandler;
pub use webhook_handler::WebhookHandler;
pub use withdrawal_handler::WithdrawalHandler;

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::accounts::AccountRegistry;
use crate::config::LedgerConfig;
use crate::domain::{amount, Account, Amount, DomainError};
use crate::error::{LedgerError, LedgerResult};
use crate::lock::{self, HeldLocks, LockKeys, LockManager};
use crate::store::{LedgerStore, UnitOfWork};

/// Collaborators shared by every handler
#[derive(Clone)]
pub struct LedgerBackend {
    pub store: Arc<dyn LedgerStore>,
    pub locks: Arc<dyn LockManager>,
    pub accounts: Arc<AccountRegistry>,
    pub config: LedgerConfig,
}

impl LedgerBackend {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<dyn LockManager>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            accounts: Arc::new(AccountRegistry::new(store.clone())),
            store,
            locks,
            config,
        }
    }

    pub fn keys(&self) -> LockKeys {
        LockKeys::new(&self.config.lock_prefix)
    }

    /// Ids of the FEES and TAX treasury accounts, created on first use
    pub async fn treasury_accounts(&self) -> LedgerResult<(Uuid, Uuid)> {
        let fees = self
            .accounts
            .ensure_system_account(&self.config.fees_subtype)
            .await?;
        let tax = self
            .accounts
            .ensure_system_account(&self.config.tax_subtype)
            .await?;
        Ok((fees, tax))
    }

    pub(crate) async fn lock(&self, keys: Vec<String>) -> LedgerResult<HeldLocks> {
        lock::acquire_all(self.locks.as_ref(), keys, self.config.lock_ttl).await
    }

    pub(crate) async fn unlock(&self, held: HeldLocks) {
        held.release(self.locks.as_ref()).await;
    }
}

impl std::fmt::Debug for LedgerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Commit on success, roll back on failure
pub(crate) async fn finish<T>(
    uow: Box<dyn UnitOfWork>,
    result: LedgerResult<T>,
) -> LedgerResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Validate settlement amounts and return the net amount.
///
/// Base must be a valid positive amount, fee and tax non-negative, and the
/// net strictly positive.
pub(crate) fn net_amount(base: Decimal, fee: Decimal, tax: Decimal) -> LedgerResult<Decimal> {
    Amount::new(base)?;
    amount::non_negative(fee)?;
    amount::non_negative(tax)?;

    let net = base - fee - tax;
    if net <= Decimal::ZERO {
        return Err(DomainError::NonPositiveNet {
            base,
            fees: fee,
            tax,
        }
        .into());
    }
    Ok(net)
}

pub(crate) fn require_symbol(asset_symbol: &str) -> LedgerResult<()> {
    if asset_symbol.trim().is_empty() {
        return Err(LedgerError::Validation("asset symbol is required".to_string()));
    }
    Ok(())
}

pub(crate) fn require_owner(account: &Account, user_id: Uuid) -> LedgerResult<()> {
    if account.owner_id != Some(user_id) {
        return Err(LedgerError::Validation(format!(
            "account {} does not belong to user {}",
            account.id, user_id
        )));
    }
    Ok(())
}
