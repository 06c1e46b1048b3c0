//! Deposit Handler
//!
//! Credits a wallet plus the FEES and TAX treasuries for a completed
//! external deposit, at most once per event key.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::accounts::require_active_wallet;
use crate::domain::{DepositOrder, DomainError, LegRole, OperationContext, TransactionKind};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{JournalEngine, Leg, Posting, PostingOutcome};
use crate::store::{LedgerStore, UnitOfWork};

use super::{
    finish, net_amount, require_owner, require_symbol, CreateDepositOrderCommand, LedgerBackend,
    SettleDepositCommand, SettlementResult,
};

/// Deposit settlement orchestrator
#[derive(Debug, Clone)]
pub struct DepositHandler {
    backend: LedgerBackend,
    journal: JournalEngine,
}

impl DepositHandler {
    pub fn new(backend: LedgerBackend) -> Self {
        Self {
            backend,
            journal: JournalEngine::new(),
        }
    }

    /// Settle a deposit.
    ///
    /// Re-running an already settled event key moves nothing and returns the
    /// entries recorded the first time; the originating order is still
    /// flipped to processed if an earlier run had not done so.
    pub async fn settle(
        &self,
        command: SettleDepositCommand,
        context: &OperationContext,
    ) -> LedgerResult<SettlementResult> {
        if command.event_key.trim().is_empty() {
            return Err(LedgerError::Validation("event key is required".to_string()));
        }
        require_symbol(&command.asset.symbol)?;
        let net = net_amount(command.base_amount, command.fee_amount, command.tax_amount)?;

        let (fees_account, tax_account) = self.backend.treasury_accounts().await?;

        let keys = self.backend.keys();
        let symbol = &command.asset.symbol;
        let mut lock_keys = vec![
            keys.balance(command.wallet_account_id, symbol),
            keys.balance(fees_account, symbol),
            keys.balance(tax_account, symbol),
        ];
        if let Some(order_id) = command.order_id {
            lock_keys.push(keys.deposit(order_id));
        }

        let held = self.backend.lock(lock_keys).await?;

        let result = match self.backend.store.begin().await {
            Ok(mut uow) => {
                let outcome = self
                    .settle_locked(uow.as_mut(), &command, net, fees_account, tax_account)
                    .await;
                finish(uow, outcome).await
            }
            Err(e) => Err(e),
        };

        self.backend.unlock(held).await;

        match &result {
            Ok(settled) if settled.replayed => tracing::info!(
                event_key = %command.event_key,
                correlation_id = ?context.correlation_id,
                "deposit already settled"
            ),
            Ok(settled) => tracing::info!(
                event_key = %command.event_key,
                wallet_account_id = %command.wallet_account_id,
                asset = %command.asset,
                base = %command.base_amount,
                net = %net,
                entries = settled.journal_entries.len(),
                correlation_id = ?context.correlation_id,
                "deposit settled"
            ),
            Err(e) => tracing::warn!(
                event_key = %command.event_key,
                error = %e,
                correlation_id = ?context.correlation_id,
                "deposit settlement failed"
            ),
        }
        result
    }

    async fn settle_locked(
        &self,
        uow: &mut dyn UnitOfWork,
        command: &SettleDepositCommand,
        net: Decimal,
        fees_account: Uuid,
        tax_account: Uuid,
    ) -> LedgerResult<SettlementResult> {
        let order = match command.order_id {
            Some(order_id) => {
                let order = uow
                    .find_deposit_order(order_id)
                    .await?
                    .ok_or(LedgerError::OrderNotFound(order_id))?;
                check_order_matches(&order, command)?;
                Some(order)
            }
            None => None,
        };

        let recorded = self
            .journal
            .recorded_entries(uow, &command.event_key)
            .await?;
        let outcome = if recorded.is_empty() {
            let wallet = require_active_wallet(uow, command.wallet_account_id).await?;
            require_owner(&wallet, command.user_id)?;

            let posting = Posting::new(
                command.event_key.clone(),
                TransactionKind::Deposit,
                command.asset.clone(),
            )
            .with_leg(Leg::credit(LegRole::Principal, wallet.id, net))
            .with_leg(Leg::credit(LegRole::Fees, fees_account, command.fee_amount))
            .with_leg(Leg::credit(LegRole::Tax, tax_account, command.tax_amount))
            .with_description(format!("Deposit {}", command.event_key));

            self.journal.post(uow, &posting).await?
        } else {
            PostingOutcome::AlreadyPosted(recorded)
        };

        if let Some(order) = order {
            let flipped = uow
                .mark_deposit_processed(order.order_id, &outcome.entry_ids())
                .await?;
            if flipped && outcome.is_replay() {
                tracing::warn!(
                    order_id = %order.order_id,
                    event_key = %command.event_key,
                    "deposit order re-synced to processed"
                );
            }
        }

        Ok(SettlementResult {
            event_key: command.event_key.clone(),
            replayed: outcome.is_replay(),
            journal_entries: outcome.into_entries(),
        })
    }

    /// Record a bank deposit request. It is settled later by
    /// [`DepositHandler::settle_order`].
    pub async fn create_deposit_order(
        &self,
        command: CreateDepositOrderCommand,
        context: &OperationContext,
    ) -> LedgerResult<DepositOrder> {
        require_symbol(&command.asset_symbol)?;
        net_amount(command.base_amount, command.fee_amount, command.tax_amount)?;

        let order_id = Uuid::new_v4();
        let order = DepositOrder {
            order_id,
            wallet_account_id: command.wallet_account_id,
            user_id: command.user_id,
            base_amount: command.base_amount,
            fees_amount: command.fee_amount,
            tax_amount: command.tax_amount,
            asset_symbol: command.asset_symbol,
            asset_type: command.asset_type,
            event_key: DepositOrder::bank_event_key(order_id),
            processed: false,
            journal_entry_ids: Vec::new(),
            created_at: Utc::now(),
            processed_at: None,
        };

        let mut uow = self.backend.store.begin().await?;
        let result = insert_deposit_order(uow.as_mut(), &order).await;
        finish(uow, result).await?;

        tracing::info!(
            order_id = %order.order_id,
            wallet_account_id = %order.wallet_account_id,
            base = %order.base_amount,
            correlation_id = ?context.correlation_id,
            "deposit order created"
        );
        Ok(order)
    }

    /// Settle a recorded deposit order (admin approval).
    pub async fn settle_order(
        &self,
        order_id: Uuid,
        context: &OperationContext,
    ) -> LedgerResult<SettlementResult> {
        let mut uow = self.backend.store.begin().await?;
        let found = uow.find_deposit_order(order_id).await;
        let recorded = match &found {
            Ok(Some(order)) if order.processed => {
                self.journal.recorded_entries(uow.as_mut(), &order.event_key).await
            }
            _ => Ok(Vec::new()),
        };
        uow.rollback().await?;

        let order = found?.ok_or(LedgerError::OrderNotFound(order_id))?;
        if order.processed {
            return Ok(SettlementResult {
                event_key: order.event_key,
                journal_entries: recorded?,
                replayed: true,
            });
        }

        self.settle(settle_command_for(&order), context).await
    }
}

/// Settlement command replaying a recorded order
pub(crate) fn settle_command_for(order: &DepositOrder) -> SettleDepositCommand {
    SettleDepositCommand::new(
        order.event_key.clone(),
        order.user_id,
        order.wallet_account_id,
        order.asset(),
        order.base_amount,
    )
    .with_fee(order.fees_amount)
    .with_tax(order.tax_amount)
    .with_order(order.order_id)
}

pub(crate) async fn insert_deposit_order(
    uow: &mut dyn UnitOfWork,
    order: &DepositOrder,
) -> LedgerResult<()> {
    let wallet = require_active_wallet(uow, order.wallet_account_id).await?;
    require_owner(&wallet, order.user_id)?;
    uow.insert_deposit_order(order).await
}

fn check_order_matches(order: &DepositOrder, command: &SettleDepositCommand) -> LedgerResult<()> {
    if order.event_key != command.event_key {
        return Err(LedgerError::Validation(format!(
            "order {} settles under {}, not {}",
            order.order_id, order.event_key, command.event_key
        )));
    }
    if order.asset_symbol != command.asset.symbol {
        return Err(DomainError::AssetMismatch {
            expected: order.asset_symbol.clone(),
            actual: command.asset.symbol.clone(),
        }
        .into());
    }
    if order.wallet_account_id != command.wallet_account_id
        || order.base_amount != command.base_amount
        || order.fees_amount != command.fee_amount
        || order.tax_amount != command.tax_amount
    {
        return Err(LedgerError::Validation(format!(
            "settlement does not match order {}",
            order.order_id
        )));
    }
    Ok(())
}
