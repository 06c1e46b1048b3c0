//! Webhook Handler
//!
//! Turns gateway callbacks into deposit settlements. Deliveries are
//! at-least-once and their bodies untrusted: success is re-confirmed with the
//! gateway, duplicates are acknowledged without side effects, and a confirmed
//! payment that fails to settle is flagged SETTLEMENT_FAILED rather than
//! rejected, so the gateway stops redelivering and reconciliation picks it up.

use chrono::Utc;
use std::sync::Arc;

use crate::domain::{DepositOrder, OperationContext, Payment, PaymentStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{GatewayStatus, PaymentGatewayClient};
use crate::store::{LedgerStore, UnitOfWork};

use super::deposit_handler::{insert_deposit_order, settle_command_for};
use super::{
    finish, net_amount, require_symbol, DepositHandler, GatewayCallback, RegisterPaymentCommand,
    WebhookOutcome,
};

/// Gateway callback ingestion
#[derive(Clone)]
pub struct WebhookHandler {
    deposits: DepositHandler,
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGatewayClient>,
}

impl WebhookHandler {
    pub fn new(
        deposits: DepositHandler,
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGatewayClient>,
    ) -> Self {
        Self {
            deposits,
            store,
            gateway,
        }
    }

    /// Open a PENDING payment and the deposit order it will settle
    /// (event key `gateway-payment-<ref>`).
    pub async fn register_payment(
        &self,
        command: RegisterPaymentCommand,
        context: &OperationContext,
    ) -> LedgerResult<(DepositOrder, Payment)> {
        let reference = command.transaction_ref.trim().to_string();
        if reference.is_empty() {
            return Err(LedgerError::Validation(
                "transaction reference is required".to_string(),
            ));
        }
        let deposit = command.deposit;
        require_symbol(&deposit.asset_symbol)?;
        net_amount(deposit.base_amount, deposit.fee_amount, deposit.tax_amount)?;

        let order = DepositOrder {
            order_id: uuid::Uuid::new_v4(),
            wallet_account_id: deposit.wallet_account_id,
            user_id: deposit.user_id,
            base_amount: deposit.base_amount,
            fees_amount: deposit.fee_amount,
            tax_amount: deposit.tax_amount,
            asset_symbol: deposit.asset_symbol,
            asset_type: deposit.asset_type,
            event_key: DepositOrder::gateway_event_key(&reference),
            processed: false,
            journal_entry_ids: Vec::new(),
            created_at: Utc::now(),
            processed_at: None,
        };
        let payment = Payment::new(reference, order.order_id);

        let mut uow = self.store.begin().await?;
        let result = insert_order_and_payment(uow.as_mut(), &order, &payment).await;
        finish(uow, result).await?;

        tracing::info!(
            transaction_ref = %payment.transaction_ref,
            order_id = %order.order_id,
            correlation_id = ?context.correlation_id,
            "payment registered"
        );
        Ok((order, payment))
    }

    /// Handle one callback delivery.
    ///
    /// Errors are returned only when nothing was recorded and the gateway
    /// should redeliver (storage or gateway transport failures).
    pub async fn handle_callback(&self, callback: GatewayCallback) -> LedgerResult<WebhookOutcome> {
        let context = OperationContext::system();
        let reference = callback.transaction_ref.as_str();

        let Some((payment, order)) = self.load(reference).await? else {
            tracing::warn!(transaction_ref = %reference, "callback for unknown payment");
            return Ok(WebhookOutcome::UnknownReference);
        };

        if order.processed || payment.status == PaymentStatus::Completed {
            tracing::info!(transaction_ref = %reference, "duplicate callback acknowledged");
            return Ok(WebhookOutcome::Duplicate);
        }

        match callback.status {
            GatewayStatus::Declined => {
                self.fail(payment, "declined by gateway", callback.payload)
                    .await
            }
            GatewayStatus::Pending => Ok(WebhookOutcome::Pending),
            GatewayStatus::Success => {
                self.settle_confirmed(payment, order, callback.payload, &context)
                    .await
            }
        }
    }

    /// Retry a payment flagged SETTLEMENT_FAILED.
    ///
    /// A payment whose amount the gateway already confirmed is settled
    /// directly; one flagged for a mismatch is confirmed again first.
    pub async fn reconcile(&self, transaction_ref: &str) -> LedgerResult<WebhookOutcome> {
        let context = OperationContext::system();
        let Some((mut payment, order)) = self.load(transaction_ref).await? else {
            return Ok(WebhookOutcome::UnknownReference);
        };
        if payment.status != PaymentStatus::SettlementFailed {
            return Ok(WebhookOutcome::Duplicate);
        }

        // Stamp the attempt: retry batches take the least recently tried first
        payment.updated_at = Utc::now();
        if !self
            .save(&payment, Some(PaymentStatus::SettlementFailed))
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        if order.processed {
            self.complete(payment, None).await?;
            return Ok(WebhookOutcome::Duplicate);
        }
        if payment.amount_confirmed {
            return self.settle_payment(payment, order, None, &context).await;
        }
        self.settle_confirmed(payment, order, None, &context).await
    }

    async fn settle_confirmed(
        &self,
        mut payment: Payment,
        order: DepositOrder,
        payload: Option<serde_json::Value>,
        context: &OperationContext,
    ) -> LedgerResult<WebhookOutcome> {
        let reference = payment.transaction_ref.clone();

        // Transport failures propagate: nothing is recorded and the
        // gateway redelivers.
        let confirmation = self.gateway.confirm(&reference).await?;
        match confirmation.status {
            GatewayStatus::Success => {}
            GatewayStatus::Pending => return Ok(WebhookOutcome::Pending),
            GatewayStatus::Declined => {
                return self.fail(payment, "declined on confirmation", payload).await;
            }
        }

        let details = &confirmation.amount_details;
        if details.amount != order.base_amount || details.currency != order.asset_symbol {
            let reason = format!(
                "confirmed {} {} does not match order {} {}",
                details.amount, details.currency, order.base_amount, order.asset_symbol
            );
            payment.amount_confirmed = false;
            return self.flag(payment, reason, payload).await;
        }

        payment.amount_confirmed = true;
        self.settle_payment(payment, order, payload, context).await
    }

    async fn settle_payment(
        &self,
        payment: Payment,
        order: DepositOrder,
        payload: Option<serde_json::Value>,
        context: &OperationContext,
    ) -> LedgerResult<WebhookOutcome> {
        match self
            .deposits
            .settle(settle_command_for(&order), context)
            .await
        {
            Ok(result) => {
                self.complete(payment, payload).await?;
                Ok(WebhookOutcome::Settled(result))
            }
            Err(e) => self.flag(payment, e.to_string(), payload).await,
        }
    }

    /// COMPLETED is written whatever the stored status: the money is in.
    async fn complete(
        &self,
        mut payment: Payment,
        payload: Option<serde_json::Value>,
    ) -> LedgerResult<()> {
        payment.status = PaymentStatus::Completed;
        payment.failure_reason = None;
        stamp(&mut payment, payload);
        self.save(&payment, None).await?;
        Ok(())
    }

    async fn fail(
        &self,
        mut payment: Payment,
        reason: &str,
        payload: Option<serde_json::Value>,
    ) -> LedgerResult<WebhookOutcome> {
        let loaded = payment.status;
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        stamp(&mut payment, payload);
        if !self.save(&payment, Some(loaded)).await? {
            return Ok(self.superseded(&payment));
        }
        Ok(WebhookOutcome::Declined)
    }

    async fn flag(
        &self,
        mut payment: Payment,
        reason: String,
        payload: Option<serde_json::Value>,
    ) -> LedgerResult<WebhookOutcome> {
        let loaded = payment.status;
        payment.status = PaymentStatus::SettlementFailed;
        payment.failure_reason = Some(reason.clone());
        stamp(&mut payment, payload);
        if !self.save(&payment, Some(loaded)).await? {
            return Ok(self.superseded(&payment));
        }

        tracing::error!(
            transaction_ref = %payment.transaction_ref,
            order_id = %payment.deposit_order_id,
            amount_confirmed = payment.amount_confirmed,
            reason = %reason,
            "confirmed payment not settled, flagged for reconciliation"
        );
        Ok(WebhookOutcome::SettlementFailed { reason })
    }

    fn superseded(&self, payment: &Payment) -> WebhookOutcome {
        tracing::info!(
            transaction_ref = %payment.transaction_ref,
            "payment updated by a concurrent delivery, write skipped"
        );
        WebhookOutcome::Duplicate
    }

    async fn load(&self, transaction_ref: &str) -> LedgerResult<Option<(Payment, DepositOrder)>> {
        let mut uow = self.store.begin().await?;
        let result = find_payment_and_order(uow.as_mut(), transaction_ref).await;
        uow.rollback().await?;
        result
    }

    /// Returns false when the stored status is no longer `expected`
    async fn save(&self, payment: &Payment, expected: Option<PaymentStatus>) -> LedgerResult<bool> {
        let mut uow = self.store.begin().await?;
        let result = uow.update_payment(payment, expected).await;
        let written = match finish(uow, result).await {
            Ok(written) => written,
            Err(LedgerError::Conflict(_)) => false,
            Err(e) => return Err(e),
        };

        if written {
            tracing::debug!(
                transaction_ref = %payment.transaction_ref,
                status = %payment.status,
                "payment updated"
            );
        }
        Ok(written)
    }
}

fn stamp(payment: &mut Payment, payload: Option<serde_json::Value>) {
    if payload.is_some() {
        payment.last_callback = payload;
    }
    payment.updated_at = Utc::now();
}

async fn insert_order_and_payment(
    uow: &mut dyn UnitOfWork,
    order: &DepositOrder,
    payment: &Payment,
) -> LedgerResult<()> {
    insert_deposit_order(uow, order).await?;
    uow.insert_payment(payment).await
}

async fn find_payment_and_order(
    uow: &mut dyn UnitOfWork,
    transaction_ref: &str,
) -> LedgerResult<Option<(Payment, DepositOrder)>> {
    let Some(payment) = uow.find_payment_by_ref(transaction_ref).await? else {
        return Ok(None);
    };
    let order = uow
        .find_deposit_order(payment.deposit_order_id)
        .await?
        .ok_or(LedgerError::OrderNotFound(payment.deposit_order_id))?;
    Ok(Some((payment, order)))
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler").finish_non_exhaustive()
    }
}
