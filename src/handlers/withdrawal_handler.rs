//! Withdrawal Handler
//!
//! Reserve on request, then exactly one of: reject (from PENDING), or
//! approve followed by complete or cancel. Rejection and cancellation
//! release the reservation; completion consumes it and credits the
//! treasuries with fee and tax.

use chrono::Utc;
use uuid::Uuid;

use crate::accounts::require_active_wallet;
use crate::balance;
use crate::domain::{
    DomainError, LegRole, OperationContext, TransactionKind, WithdrawalAction, WithdrawalOrder,
    WithdrawalStatus,
};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{JournalEngine, Leg, Posting};
use crate::store::{LedgerStore, UnitOfWork};

use super::{finish, net_amount, require_owner, require_symbol, LedgerBackend, RequestWithdrawalCommand};

/// Admin transition and its inputs
#[derive(Debug, Clone)]
enum Transition {
    Approve,
    Reject { reason: String },
    Cancel { reason: String },
    Complete { transfer_reference: String },
}

impl Transition {
    fn action(&self) -> WithdrawalAction {
        match self {
            Transition::Approve => WithdrawalAction::Approve,
            Transition::Reject { .. } => WithdrawalAction::Reject,
            Transition::Cancel { .. } => WithdrawalAction::Cancel,
            Transition::Complete { .. } => WithdrawalAction::Complete,
        }
    }
}

/// Withdrawal settlement state machine
#[derive(Debug, Clone)]
pub struct WithdrawalHandler {
    backend: LedgerBackend,
    journal: JournalEngine,
}

impl WithdrawalHandler {
    pub fn new(backend: LedgerBackend) -> Self {
        Self {
            backend,
            journal: JournalEngine::new(),
        }
    }

    /// Reserve the base amount and open a PENDING order.
    pub async fn request(
        &self,
        command: RequestWithdrawalCommand,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        require_symbol(&command.asset_symbol)?;
        net_amount(command.base_amount, command.fee_amount, command.tax_amount)?;

        let order = WithdrawalOrder {
            order_id: Uuid::new_v4(),
            wallet_account_id: command.wallet_account_id,
            user_id: command.user_id,
            base_amount: command.base_amount,
            fees_amount: command.fee_amount,
            tax_amount: command.tax_amount,
            asset_symbol: command.asset_symbol,
            status: WithdrawalStatus::Pending,
            processed: false,
            journal_entry_ids: Vec::new(),
            destination: command.destination,
            reason: None,
            transfer_reference: None,
            requested_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            cancelled_by: None,
            cancelled_at: None,
            completed_at: None,
        };

        let keys = self.backend.keys();
        let held = self
            .backend
            .lock(vec![
                keys.balance(order.wallet_account_id, &order.asset_symbol),
                keys.withdrawal(order.order_id),
            ])
            .await?;

        let result = match self.backend.store.begin().await {
            Ok(mut uow) => {
                let outcome = reserve_and_insert(uow.as_mut(), &order).await;
                finish(uow, outcome).await
            }
            Err(e) => Err(e),
        };

        self.backend.unlock(held).await;
        result?;

        tracing::info!(
            order_id = %order.order_id,
            wallet_account_id = %order.wallet_account_id,
            reserved = %order.reserved_amount(),
            asset = %order.asset_symbol,
            correlation_id = ?context.correlation_id,
            "withdrawal requested"
        );
        Ok(order)
    }

    /// PENDING -> PROCESSING. Needs an acting admin.
    pub async fn approve(
        &self,
        order_id: Uuid,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        if context.actor_id.is_none() {
            return Err(LedgerError::Validation(
                "approving a withdrawal requires an actor".to_string(),
            ));
        }
        self.transition(order_id, Transition::Approve, context).await
    }

    /// PENDING -> REJECTED, releasing the reservation
    pub async fn reject(
        &self,
        order_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        let reason = required_reason(reason, WithdrawalAction::Reject)?;
        self.transition(order_id, Transition::Reject { reason }, context)
            .await
    }

    /// PROCESSING|APPROVED -> CANCELLED, releasing the reservation
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        let reason = required_reason(reason, WithdrawalAction::Cancel)?;
        self.transition(order_id, Transition::Cancel { reason }, context)
            .await
    }

    /// PROCESSING|APPROVED -> COMPLETED. Consumes the reservation and posts
    /// `bank-withdrawal-<id>` with its fee and tax legs.
    pub async fn complete(
        &self,
        order_id: Uuid,
        transfer_reference: &str,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        let transfer_reference = transfer_reference.trim();
        if transfer_reference.is_empty() {
            return Err(LedgerError::Validation(
                "completing a withdrawal requires a transfer reference".to_string(),
            ));
        }
        let transition = Transition::Complete {
            transfer_reference: transfer_reference.to_string(),
        };
        self.transition(order_id, transition, context).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> LedgerResult<WithdrawalOrder> {
        let mut uow = self.backend.store.begin().await?;
        let found = uow.find_withdrawal_order(order_id).await;
        uow.rollback().await?;
        found?.ok_or(LedgerError::OrderNotFound(order_id))
    }

    async fn transition(
        &self,
        order_id: Uuid,
        transition: Transition,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        let action = transition.action();

        // Fail fast on the unlocked snapshot; re-checked under the lock.
        let snapshot = self.get_order(order_id).await?;
        snapshot.ensure_can(action)?;

        let keys = self.backend.keys();
        let symbol = &snapshot.asset_symbol;
        let mut lock_keys = vec![keys.withdrawal(order_id)];
        let mut treasuries = None;
        match action {
            WithdrawalAction::Approve => {}
            WithdrawalAction::Reject | WithdrawalAction::Cancel => {
                lock_keys.push(keys.balance(snapshot.wallet_account_id, symbol));
            }
            WithdrawalAction::Complete => {
                let (fees, tax) = self.backend.treasury_accounts().await?;
                lock_keys.push(keys.balance(snapshot.wallet_account_id, symbol));
                lock_keys.push(keys.balance(fees, symbol));
                lock_keys.push(keys.balance(tax, symbol));
                treasuries = Some((fees, tax));
            }
        }

        let held = self.backend.lock(lock_keys).await?;

        let result = match self.backend.store.begin().await {
            Ok(mut uow) => {
                let outcome = self
                    .transition_locked(uow.as_mut(), order_id, &transition, treasuries, context)
                    .await;
                finish(uow, outcome).await
            }
            Err(e) => Err(e),
        };

        self.backend.unlock(held).await;

        match &result {
            Ok(order) => tracing::info!(
                order_id = %order_id,
                action = action.as_str(),
                status = %order.status,
                actor_id = ?context.actor_id,
                correlation_id = ?context.correlation_id,
                "withdrawal transitioned"
            ),
            Err(e) => tracing::warn!(
                order_id = %order_id,
                action = action.as_str(),
                error = %e,
                "withdrawal transition failed"
            ),
        }
        result
    }

    async fn transition_locked(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: Uuid,
        transition: &Transition,
        treasuries: Option<(Uuid, Uuid)>,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        let mut order = uow
            .find_withdrawal_order(order_id)
            .await?
            .ok_or(LedgerError::OrderNotFound(order_id))?;
        order.ensure_can(transition.action())?;

        let asset =
            balance::resolve_asset(uow, order.wallet_account_id, &order.asset_symbol).await?;
        let now = Utc::now();

        match transition {
            Transition::Approve => {
                order.approved_by = context.actor_id;
                order.approved_at = Some(now);
            }
            Transition::Reject { reason } => {
                balance::release(uow, order.wallet_account_id, &asset, order.reserved_amount())
                    .await?;
                order.reason = Some(reason.clone());
                order.rejected_by = context.actor_id;
                order.rejected_at = Some(now);
            }
            Transition::Cancel { reason } => {
                balance::release(uow, order.wallet_account_id, &asset, order.reserved_amount())
                    .await?;
                order.reason = Some(reason.clone());
                order.cancelled_by = context.actor_id;
                order.cancelled_at = Some(now);
            }
            Transition::Complete { transfer_reference } => {
                let (fees, tax) = treasuries
                    .ok_or_else(|| LedgerError::internal("treasury accounts not resolved"))?;
                let posting = Posting::new(order.event_key(), TransactionKind::Withdrawal, asset)
                    .with_leg(Leg::debit_reserved(
                        LegRole::Principal,
                        order.wallet_account_id,
                        order.reserved_amount(),
                    ))
                    .with_leg(Leg::credit(LegRole::Fees, fees, order.fees_amount))
                    .with_leg(Leg::credit(LegRole::Tax, tax, order.tax_amount))
                    .with_description(format!("Withdrawal {transfer_reference}"));

                let outcome = self.journal.post(uow, &posting).await?;
                order.processed = true;
                order.journal_entry_ids = outcome.entry_ids();
                order.transfer_reference = Some(transfer_reference.clone());
                order.completed_at = Some(now);
            }
        }

        order.status = transition.action().target();
        uow.update_withdrawal_order(&order).await?;
        Ok(order)
    }
}

async fn reserve_and_insert(
    uow: &mut dyn UnitOfWork,
    order: &WithdrawalOrder,
) -> LedgerResult<()> {
    let wallet = require_active_wallet(uow, order.wallet_account_id).await?;
    require_owner(&wallet, order.user_id)?;

    let asset = balance::resolve_asset(uow, wallet.id, &order.asset_symbol).await?;
    balance::reserve(uow, wallet.id, &asset, order.reserved_amount()).await?;
    uow.insert_withdrawal_order(order).await
}

fn required_reason(reason: &str, action: WithdrawalAction) -> LedgerResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::MissingReason(action.as_str()).into());
    }
    Ok(reason.to_string())
}
