//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use wallet_ledger::domain::{Account, AssetRef, OperationContext};
use wallet_ledger::gateway::StaticGateway;
use wallet_ledger::handlers::SettleDepositCommand;
use wallet_ledger::lock::InMemoryLockManager;
use wallet_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use wallet_ledger::{Ledger, LedgerConfig, LedgerResult};

/// Ledger over in-memory backends, with handles on each of them
pub struct TestLedger {
    pub ledger: Ledger,
    pub store: InMemoryLedgerStore,
    pub locks: Arc<InMemoryLockManager>,
    pub gateway: Arc<StaticGateway>,
}

pub fn memory_ledger() -> TestLedger {
    let store = InMemoryLedgerStore::new();
    let locks = Arc::new(InMemoryLockManager::new());
    let gateway = Arc::new(StaticGateway::new());
    let ledger = Ledger::new(
        Arc::new(store.clone()),
        locks.clone(),
        gateway.clone(),
        LedgerConfig::default(),
    );
    TestLedger {
        ledger,
        store,
        locks,
        gateway,
    }
}

/// Ledger over Postgres at `DATABASE_URL`, with every ledger table truncated
pub async fn pg_ledger() -> (Ledger, PgPool) {
    dotenvy::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE payments, deposit_orders, withdrawal_orders, journal_entries, \
         ledger_transactions, balances, accounts CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let ledger = Ledger::new(
        store,
        Arc::new(InMemoryLockManager::new()),
        Arc::new(StaticGateway::new()),
        LedgerConfig::default(),
    );
    (ledger, pool)
}

pub async fn new_wallet(ledger: &Ledger) -> Account {
    ledger
        .create_wallet(Uuid::new_v4(), "MAIN")
        .await
        .expect("Failed to create wallet")
}

pub fn deposit(wallet: &Account, event_key: impl Into<String>, amount: Decimal) -> SettleDepositCommand {
    SettleDepositCommand::new(
        event_key,
        wallet.owner_id.expect("wallet has an owner"),
        wallet.id,
        AssetRef::currency("USD"),
        amount,
    )
}

/// Settle, retrying from the caller side while the lock is contended
pub async fn settle_with_retry(ledger: &Ledger, command: SettleDepositCommand) -> LedgerResult<()> {
    let context = OperationContext::system();
    loop {
        match ledger.settle_deposit(command.clone(), &context).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_retryable() => tokio::time::sleep(Duration::from_micros(100)).await,
            Err(e) => return Err(e),
        }
    }
}
