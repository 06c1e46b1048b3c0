//! Ledger facade
//!
//! The operations collaborators call, wired over one store, one lock manager
//! and one gateway client.

use std::sync::Arc;
use uuid::Uuid;

use crate::accounts::AccountRegistry;
use crate::balance::BalanceStore;
use crate::config::LedgerConfig;
use crate::domain::{
    Account, Balance, DepositOrder, JournalEntry, LedgerTransaction, OperationContext, Payment,
    WithdrawalOrder,
};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::PaymentGatewayClient;
use crate::handlers::{
    CreateDepositOrderCommand, DepositHandler, GatewayCallback, LedgerBackend,
    RegisterPaymentCommand, RequestWithdrawalCommand, SettleDepositCommand, SettlementResult,
    WebhookHandler, WebhookOutcome, WithdrawalHandler,
};
use crate::jobs::JobScheduler;
use crate::lock::LockManager;
use crate::store::LedgerStore;

#[derive(Debug, Clone)]
pub struct Ledger {
    backend: LedgerBackend,
    balances: Arc<BalanceStore>,
    deposits: DepositHandler,
    withdrawals: WithdrawalHandler,
    webhooks: WebhookHandler,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<dyn LockManager>,
        gateway: Arc<dyn PaymentGatewayClient>,
        config: LedgerConfig,
    ) -> Self {
        let backend = LedgerBackend::new(store.clone(), locks, config);
        let deposits = DepositHandler::new(backend.clone());
        let withdrawals = WithdrawalHandler::new(backend.clone());
        let webhooks = WebhookHandler::new(deposits.clone(), store.clone(), gateway);
        Self {
            balances: Arc::new(BalanceStore::new(store)),
            backend,
            deposits,
            withdrawals,
            webhooks,
        }
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.backend.accounts
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.backend.config
    }

    // =========================================================================
    // Accounts and balances
    // =========================================================================

    pub async fn create_wallet(&self, owner_id: Uuid, subtype: &str) -> LedgerResult<Account> {
        self.backend.accounts.create_wallet(owner_id, subtype).await
    }

    pub async fn get_balance(&self, account_id: Uuid, asset_symbol: &str) -> LedgerResult<Balance> {
        self.balances.get_balance(account_id, asset_symbol).await
    }

    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        self.balances.list_transactions(account_id, asset_symbol).await
    }

    /// FEES and TAX treasury account ids
    pub async fn treasury_accounts(&self) -> LedgerResult<(Uuid, Uuid)> {
        self.backend.treasury_accounts().await
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    /// Settle a deposit; returns the journal entries, recorded now or before
    pub async fn settle_deposit(
        &self,
        command: SettleDepositCommand,
        context: &OperationContext,
    ) -> LedgerResult<Vec<JournalEntry>> {
        Ok(self.deposits.settle(command, context).await?.journal_entries)
    }

    pub async fn create_deposit_order(
        &self,
        command: CreateDepositOrderCommand,
        context: &OperationContext,
    ) -> LedgerResult<DepositOrder> {
        self.deposits.create_deposit_order(command, context).await
    }

    pub async fn settle_deposit_order(
        &self,
        order_id: Uuid,
        context: &OperationContext,
    ) -> LedgerResult<SettlementResult> {
        self.deposits.settle_order(order_id, context).await
    }

    // =========================================================================
    // Withdrawals
    // =========================================================================

    pub async fn request_withdrawal(
        &self,
        command: RequestWithdrawalCommand,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        self.withdrawals.request(command, context).await
    }

    pub async fn approve_withdrawal(
        &self,
        order_id: Uuid,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        self.withdrawals.approve(order_id, context).await
    }

    pub async fn reject_withdrawal(
        &self,
        order_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        self.withdrawals.reject(order_id, reason, context).await
    }

    pub async fn complete_withdrawal(
        &self,
        order_id: Uuid,
        transfer_reference: &str,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        self.withdrawals
            .complete(order_id, transfer_reference, context)
            .await
    }

    pub async fn cancel_withdrawal(
        &self,
        order_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<WithdrawalOrder> {
        self.withdrawals.cancel(order_id, reason, context).await
    }

    pub async fn get_withdrawal(&self, order_id: Uuid) -> LedgerResult<WithdrawalOrder> {
        self.withdrawals.get_order(order_id).await
    }

    // =========================================================================
    // Gateway payments
    // =========================================================================

    pub async fn register_payment(
        &self,
        command: RegisterPaymentCommand,
        context: &OperationContext,
    ) -> LedgerResult<(DepositOrder, Payment)> {
        self.webhooks.register_payment(command, context).await
    }

    pub async fn handle_callback(&self, callback: GatewayCallback) -> LedgerResult<WebhookOutcome> {
        self.webhooks.handle_callback(callback).await
    }

    pub async fn get_payment(&self, transaction_ref: &str) -> LedgerResult<Payment> {
        let mut uow = self.backend.store.begin().await?;
        let found = uow.find_payment_by_ref(transaction_ref).await;
        uow.rollback().await?;
        found?.ok_or_else(|| LedgerError::PaymentNotFound(transaction_ref.to_string()))
    }

    /// Settlement retry scheduler over this ledger
    pub fn scheduler(&self) -> JobScheduler {
        JobScheduler::new(self.webhooks.clone(), self.backend.store.clone())
    }
}
