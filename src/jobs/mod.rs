//! Scheduled Jobs
//!
//! Background reconciliation of gateway payments that were confirmed but
//! could not be settled when their callback arrived.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::domain::PaymentStatus;
use crate::error::LedgerError;
use crate::handlers::{WebhookHandler, WebhookOutcome};
use crate::store::LedgerStore;

// =========================================================================
// Settlement Retry Job
// =========================================================================

/// Retry up to `limit` payments flagged SETTLEMENT_FAILED, least recently
/// tried first.
///
/// A payment that fails again stays flagged for the next run; one failure
/// never stops the batch.
pub async fn retry_failed_settlements(
    webhooks: &WebhookHandler,
    store: &dyn LedgerStore,
    limit: usize,
) -> Result<ReconcileReport, JobError> {
    let mut uow = store.begin().await?;
    let flagged = uow
        .list_payments_by_status(PaymentStatus::SettlementFailed, limit)
        .await;
    uow.rollback().await?;
    let flagged = flagged?;

    let mut report = ReconcileReport {
        retried: flagged.len(),
        ..ReconcileReport::default()
    };

    for payment in flagged {
        match webhooks.reconcile(&payment.transaction_ref).await {
            Ok(WebhookOutcome::Settled(_)) | Ok(WebhookOutcome::Duplicate) => {
                report.settled += 1;
            }
            Ok(WebhookOutcome::SettlementFailed { reason }) => {
                report.still_failed += 1;
                tracing::debug!(
                    transaction_ref = %payment.transaction_ref,
                    reason = %reason,
                    "payment still not settleable"
                );
            }
            Ok(other) => {
                tracing::info!(
                    transaction_ref = %payment.transaction_ref,
                    outcome = ?other,
                    "payment left settlement retry"
                );
            }
            Err(e) => {
                report.still_failed += 1;
                report
                    .errors
                    .push(format!("{}: {}", payment.transaction_ref, e));
            }
        }
    }

    if report.retried > 0 {
        tracing::info!(
            retried = report.retried,
            settled = report.settled,
            still_failed = report.still_failed,
            "settlement retry finished"
        );
    }

    report.completed_at = Utc::now();
    Ok(report)
}

/// Report from one retry run
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub retried: usize,
    pub settled: usize,
    pub still_failed: usize,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between settlement retries (default: 1 minute)
    pub reconcile_interval: Duration,
    /// Payments retried per run (default: 100)
    pub batch_size: usize,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Job Scheduler - runs the settlement retry periodically
pub struct JobScheduler {
    webhooks: WebhookHandler,
    store: Arc<dyn LedgerStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(webhooks: WebhookHandler, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            webhooks,
            store,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: JobSchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the job scheduler in the background.
    /// Abort the returned handle to stop it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.reconcile_interval.as_secs(),
            "Job scheduler started"
        );

        let mut reconcile_interval = interval(self.config.reconcile_interval);
        loop {
            reconcile_interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Settlement retry failed");
            }
        }
    }

    /// Run the retry once (for manual trigger or testing)
    pub async fn run_once(&self) -> Result<ReconcileReport, JobError> {
        retry_failed_settlements(&self.webhooks, self.store.as_ref(), self.config.batch_size)
            .await
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::config::LedgerConfig;
    use crate::domain::OperationContext;
    use crate::gateway::{GatewayStatus, StaticGateway};
    use crate::handlers::{
        CreateDepositOrderCommand, DepositHandler, GatewayCallback, LedgerBackend,
        RegisterPaymentCommand,
    };
    use crate::lock::{InMemoryLockManager, LockManager};
    use crate::store::InMemoryLedgerStore;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_retry_settles_corrected_payments() {
        let store = InMemoryLedgerStore::new();
        let gateway = Arc::new(StaticGateway::new());
        let backend = LedgerBackend::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryLockManager::new()),
            LedgerConfig::default(),
        );
        let webhooks = WebhookHandler::new(
            DepositHandler::new(backend.clone()),
            backend.store.clone(),
            gateway.clone(),
        );
        let owner = Uuid::new_v4();
        let wallet = backend.accounts.create_wallet(owner, "MAIN").await.unwrap();

        for reference in ["TX-A", "TX-B"] {
            webhooks
                .register_payment(
                    RegisterPaymentCommand::new(
                        reference,
                        CreateDepositOrderCommand::new(owner, wallet.id, "USD", dec!(50)),
                    ),
                    &OperationContext::new(),
                )
                .await
                .unwrap();
            // Gateway first reports the wrong amount
            gateway.confirm_success(reference, dec!(49), "USD");
            webhooks
                .handle_callback(GatewayCallback::new(reference, GatewayStatus::Success))
                .await
                .unwrap();
        }

        gateway.confirm_success("TX-A", dec!(50), "USD");

        let scheduler = JobScheduler::new(webhooks, backend.store.clone());
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.retried, 2);
        assert_eq!(report.settled, 1);
        assert_eq!(report.still_failed, 1);
        assert!(report.errors.is_empty());
        assert_eq!(
            store.balance(wallet.id, "USD").map(|b| b.available),
            Some(dec!(50))
        );

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.settled, 0);
    }

    #[tokio::test]
    async fn test_unsettleable_payment_does_not_starve_the_batch() {
        let store = InMemoryLedgerStore::new();
        let gateway = Arc::new(StaticGateway::new());
        let locks = Arc::new(InMemoryLockManager::new());
        let backend = LedgerBackend::new(
            Arc::new(store.clone()),
            locks.clone(),
            LedgerConfig::default(),
        );
        let webhooks = WebhookHandler::new(
            DepositHandler::new(backend.clone()),
            backend.store.clone(),
            gateway.clone(),
        );
        let owner = Uuid::new_v4();
        let wallet = backend.accounts.create_wallet(owner, "MAIN").await.unwrap();
        backend.treasury_accounts().await.unwrap();

        for reference in ["TX-OLD", "TX-NEW"] {
            webhooks
                .register_payment(
                    RegisterPaymentCommand::new(
                        reference,
                        CreateDepositOrderCommand::new(owner, wallet.id, "USD", dec!(50)),
                    ),
                    &OperationContext::new(),
                )
                .await
                .unwrap();
        }

        // TX-OLD never matches its order
        gateway.confirm_success("TX-OLD", dec!(49), "USD");
        let outcome = webhooks
            .handle_callback(GatewayCallback::new("TX-OLD", GatewayStatus::Success))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::SettlementFailed { .. }));
        tokio::time::sleep(Duration::from_millis(2)).await;

        // TX-NEW is confirmed but the wallet is busy when it arrives
        gateway.confirm_success("TX-NEW", dec!(50), "USD");
        let key = backend.keys().balance(wallet.id, "USD");
        let token = locks
            .acquire(&key, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        let outcome = webhooks
            .handle_callback(GatewayCallback::new("TX-NEW", GatewayStatus::Success))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::SettlementFailed { .. }));
        assert!(locks.release(&key, &token).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;

        let scheduler = JobScheduler::new(webhooks, backend.store.clone()).with_config(
            JobSchedulerConfig {
                batch_size: 1,
                ..JobSchedulerConfig::default()
            },
        );

        let first = scheduler.run_once().await.unwrap();
        assert_eq!(first.retried, 1);
        assert_eq!(first.still_failed, 1);
        assert!(store.balance(wallet.id, "USD").is_none());

        let second = scheduler.run_once().await.unwrap();
        assert_eq!(second.retried, 1);
        assert_eq!(second.settled, 1);
        assert_eq!(
            store.balance(wallet.id, "USD").map(|b| b.available),
            Some(dec!(50))
        );
    }
}
