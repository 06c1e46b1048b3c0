//! Balance Store
//!
//! Read side of per-account, per-asset balances, plus the bucket movements
//! settlements apply inside an open unit of work. Every movement runs
//! through [`BalanceRepository::adjust_balance`], which refuses any result
//! with a negative `available` or `reserved`.
//!
//! [`BalanceRepository::adjust_balance`]: crate::store::BalanceRepository::adjust_balance

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{AssetRef, Balance, BalanceDelta, LedgerTransaction};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, UnitOfWork};

/// Balance before and after one movement
pub type BalanceChange = (Balance, Balance);

/// Balance queries over a [`LedgerStore`]
pub struct BalanceStore {
    store: Arc<dyn LedgerStore>,
}

impl BalanceStore {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Current balance. A live account with no row yet reads as zero.
    pub async fn get_balance(&self, account_id: Uuid, asset_symbol: &str) -> LedgerResult<Balance> {
        let mut uow = self.store.begin().await?;
        let result = read_balance(uow.as_mut(), account_id, asset_symbol).await;
        uow.rollback().await?;
        result
    }

    /// Transaction history of one account/asset, oldest first
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        let mut uow = self.store.begin().await?;
        let result = read_transactions(uow.as_mut(), account_id, asset_symbol).await;
        uow.rollback().await?;
        result
    }
}

impl std::fmt::Debug for BalanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceStore").finish_non_exhaustive()
    }
}

pub(crate) async fn read_balance(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset_symbol: &str,
) -> LedgerResult<Balance> {
    uow.find_account(account_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))?;

    if let Some(balance) = uow.find_balance(account_id, asset_symbol).await? {
        return Ok(balance);
    }
    let asset = resolve_asset(uow, account_id, asset_symbol).await?;
    Ok(Balance::empty(account_id, &asset))
}

/// Asset of the account's own row, else of any row with the symbol.
/// A symbol no row holds yet is taken as a currency.
pub(crate) async fn resolve_asset(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset_symbol: &str,
) -> LedgerResult<AssetRef> {
    if let Some(balance) = uow.find_balance(account_id, asset_symbol).await? {
        return Ok(balance.asset());
    }
    Ok(uow
        .find_asset(asset_symbol)
        .await?
        .unwrap_or_else(|| AssetRef::currency(asset_symbol)))
}

async fn read_transactions(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset_symbol: &str,
) -> LedgerResult<Vec<LedgerTransaction>> {
    uow.find_account(account_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))?;
    uow.list_transactions(account_id, asset_symbol).await
}

// =========================================================================
// Movements (caller holds the balance lock)
// =========================================================================

/// available += amount
pub async fn credit(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset: &AssetRef,
    amount: Decimal,
) -> LedgerResult<BalanceChange> {
    apply(uow, account_id, asset, "credit", amount, BalanceDelta::credit(amount)).await
}

/// available -= amount, reserved += amount
pub async fn reserve(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset: &AssetRef,
    amount: Decimal,
) -> LedgerResult<BalanceChange> {
    apply(uow, account_id, asset, "reserve", amount, BalanceDelta::reserve(amount)).await
}

/// reserved -= amount, available += amount
pub async fn release(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset: &AssetRef,
    amount: Decimal,
) -> LedgerResult<BalanceChange> {
    apply(uow, account_id, asset, "release", amount, BalanceDelta::release(amount)).await
}

/// reserved -= amount; the funds leave the ledger
pub async fn consume_reserved(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset: &AssetRef,
    amount: Decimal,
) -> LedgerResult<BalanceChange> {
    apply(
        uow,
        account_id,
        asset,
        "consume_reserved",
        amount,
        BalanceDelta::consume_reserved(amount),
    )
    .await
}

async fn apply(
    uow: &mut dyn UnitOfWork,
    account_id: Uuid,
    asset: &AssetRef,
    movement: &'static str,
    amount: Decimal,
    delta: BalanceDelta,
) -> LedgerResult<BalanceChange> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "{movement} amount must be positive, got {amount}"
        )));
    }

    let (before, after) = uow.adjust_balance(account_id, asset, delta).await?;
    tracing::debug!(
        account_id = %account_id,
        asset = %asset,
        movement,
        amount = %amount,
        available = %after.available,
        reserved = %after.reserved,
        "balance adjusted"
    );
    Ok((before, after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, DomainError};
    use crate::store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    async fn funded_wallet(store: &InMemoryLedgerStore, amount: Decimal) -> Uuid {
        let account = Account::wallet(Uuid::new_v4(), "MAIN");
        let mut uow = store.begin().await.unwrap();
        uow.insert_account(&account).await.unwrap();
        if amount > Decimal::ZERO {
            credit(uow.as_mut(), account.id, &AssetRef::currency("USD"), amount)
                .await
                .unwrap();
        }
        uow.commit().await.unwrap();
        account.id
    }

    #[tokio::test]
    async fn test_missing_row_reads_as_zero() {
        let store = InMemoryLedgerStore::new();
        let account_id = funded_wallet(&store, Decimal::ZERO).await;
        let balances = BalanceStore::new(Arc::new(store));

        let balance = balances.get_balance(account_id, "USD").await.unwrap();
        assert_eq!(balance.available, Decimal::ZERO);
        assert_eq!(balance.reserved, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let balances = BalanceStore::new(Arc::new(InMemoryLedgerStore::new()));
        let err = balances.get_balance(Uuid::new_v4(), "USD").await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_reserve_and_release_round_trip() {
        let store = InMemoryLedgerStore::new();
        let account_id = funded_wallet(&store, dec!(500)).await;
        let usd = AssetRef::currency("USD");

        let mut uow = store.begin().await.unwrap();
        let (_, after) = reserve(uow.as_mut(), account_id, &usd, dec!(500)).await.unwrap();
        assert_eq!(after.available, dec!(0));
        assert_eq!(after.reserved, dec!(500));
        assert_eq!(after.total(), dec!(500));

        let (_, after) = release(uow.as_mut(), account_id, &usd, dec!(500)).await.unwrap();
        assert_eq!(after.available, dec!(500));
        assert_eq!(after.reserved, dec!(0));
        uow.commit().await.unwrap();

        let balance = store.balance(account_id, "USD").unwrap();
        assert_eq!(balance.available, dec!(500));
        assert_eq!(balance.reserved, dec!(0));
    }

    #[tokio::test]
    async fn test_over_reservation_rejected() {
        let store = InMemoryLedgerStore::new();
        let account_id = funded_wallet(&store, dec!(100)).await;

        let mut uow = store.begin().await.unwrap();
        let err = reserve(uow.as_mut(), account_id, &AssetRef::currency("USD"), dec!(100.01))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::InsufficientAvailable { .. })
        ));
        uow.rollback().await.unwrap();

        assert_eq!(store.balance(account_id, "USD").unwrap().available, dec!(100));
    }

    #[tokio::test]
    async fn test_consume_more_than_reserved_rejected() {
        let store = InMemoryLedgerStore::new();
        let account_id = funded_wallet(&store, dec!(100)).await;
        let usd = AssetRef::currency("USD");

        let mut uow = store.begin().await.unwrap();
        reserve(uow.as_mut(), account_id, &usd, dec!(40)).await.unwrap();
        let err = consume_reserved(uow.as_mut(), account_id, &usd, dec!(41))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::InsufficientReserved { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_positive_movement_rejected() {
        let store = InMemoryLedgerStore::new();
        let account_id = funded_wallet(&store, dec!(10)).await;

        let mut uow = store.begin().await.unwrap();
        let err = credit(uow.as_mut(), account_id, &AssetRef::currency("USD"), dec!(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
