//! wallet_ledger daemon
//!
//! Connects the Postgres store and the lock backend, then runs the
//! settlement retry job until SIGINT or SIGTERM.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_ledger::gateway::StaticGateway;
use wallet_ledger::jobs::JobSchedulerConfig;
use wallet_ledger::lock::{InMemoryLockManager, LockManager};
use wallet_ledger::store::PgLedgerStore;
use wallet_ledger::{db, Config, Ledger};

/// Initialize tracing/logging
fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wallet_ledger=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_locks(config: &Config) -> anyhow::Result<Arc<dyn LockManager>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let manager = wallet_ledger::lock::RedisLockManager::connect(url).await?;
        tracing::info!("Using Redis lock manager");
        return Ok(Arc::new(manager));
    }

    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-process locks");
    }
    if config.is_production() {
        tracing::warn!("In-process locks only serialize settlements within this process");
    }
    Ok(Arc::new(InMemoryLockManager::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_format);

    tracing::info!(environment = %config.environment, "Starting wallet_ledger");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let locks = build_locks(&config).await?;
    // No gateway transport is linked in: callbacks are delivered by the
    // embedding service. Payments flagged after a confirmed amount are
    // retried without the gateway; mismatches stay flagged until a service
    // with a real client reconciles them.
    let gateway = Arc::new(StaticGateway::new());

    let ledger = Ledger::new(
        Arc::new(PgLedgerStore::new(pool.clone())),
        locks,
        gateway,
        config.ledger.clone(),
    );

    let (fees, tax) = ledger.treasury_accounts().await?;
    tracing::info!(fees_account = %fees, tax_account = %tax, "Treasury accounts ready");

    let scheduler = ledger
        .scheduler()
        .with_config(JobSchedulerConfig {
            reconcile_interval: config.reconcile_interval,
            ..JobSchedulerConfig::default()
        })
        .start();

    shutdown_signal().await;

    // Cleanup
    tracing::info!("Shutting down...");
    scheduler.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
