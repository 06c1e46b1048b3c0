//! PostgreSQL ledger store
//!
//! One `sqlx` transaction per unit of work. Balance rows are read with
//! `SELECT ... FOR UPDATE` before every adjustment, and the schema's unique
//! indexes and `CHECK` constraints back the repository contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::{
    AccountRepository, BalanceRepository, JournalRepository, LedgerStore, OrderRepository,
    PaymentRepository, TransactionRepository, UnitOfWork,
};
use crate::domain::{
    Account, AccountKind, AccountStatus, AssetRef, Balance, BalanceDelta, DepositOrder,
    JournalEntry, LedgerTransaction, Payment, PaymentStatus, WithdrawalOrder,
};
use crate::error::{LedgerError, LedgerResult};

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

/// Ledger store over a Postgres pool
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

// =========================================================================
// Row mapping
// =========================================================================

fn map_db_error(err: sqlx::Error, what: &str) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                return LedgerError::Conflict(format!("{what} already exists"));
            }
            Some(CHECK_VIOLATION) => {
                return LedgerError::Validation(format!("{what} violates a constraint"));
            }
            _ => {}
        }
    }
    LedgerError::Database(err)
}

fn text_column<T>(row: &PgRow, column: &str) -> LedgerResult<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| LedgerError::internal(format!("column {column}: {e}")))
}

fn account_from_row(row: &PgRow) -> LedgerResult<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        kind: text_column(row, "kind")?,
        owner_id: row.try_get("owner_id")?,
        subtype: row.try_get("subtype")?,
        status: text_column(row, "status")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn balance_from_row(row: &PgRow) -> LedgerResult<Balance> {
    Ok(Balance {
        account_id: row.try_get("account_id")?,
        asset_type: text_column(row, "asset_type")?,
        asset_id: row.try_get("asset_id")?,
        asset_symbol: row.try_get("asset_symbol")?,
        available: row.try_get("available")?,
        locked: row.try_get("locked")?,
        reserved: row.try_get("reserved")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> LedgerResult<LedgerTransaction> {
    Ok(LedgerTransaction {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        asset_symbol: row.try_get("asset_symbol")?,
        kind: text_column(row, "kind")?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        journal_entry_id: row.try_get("journal_entry_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn journal_from_row(row: &PgRow) -> LedgerResult<JournalEntry> {
    Ok(JournalEntry {
        id: row.try_get("id")?,
        debit_account_id: row.try_get("debit_account_id")?,
        credit_account_id: row.try_get("credit_account_id")?,
        asset_symbol: row.try_get("asset_symbol")?,
        amount: row.try_get("amount")?,
        transaction_ids: row.try_get("transaction_ids")?,
        idempotency_key: row.try_get("idempotency_key")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn deposit_from_row(row: &PgRow) -> LedgerResult<DepositOrder> {
    Ok(DepositOrder {
        order_id: row.try_get("order_id")?,
        wallet_account_id: row.try_get("wallet_account_id")?,
        user_id: row.try_get("user_id")?,
        base_amount: row.try_get("base_amount")?,
        fees_amount: row.try_get("fees_amount")?,
        tax_amount: row.try_get("tax_amount")?,
        asset_symbol: row.try_get("asset_symbol")?,
        asset_type: text_column(row, "asset_type")?,
        event_key: row.try_get("event_key")?,
        processed: row.try_get("processed")?,
        journal_entry_ids: row.try_get("journal_entry_ids")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> LedgerResult<WithdrawalOrder> {
    Ok(WithdrawalOrder {
        order_id: row.try_get("order_id")?,
        wallet_account_id: row.try_get("wallet_account_id")?,
        user_id: row.try_get("user_id")?,
        base_amount: row.try_get("base_amount")?,
        fees_amount: row.try_get("fees_amount")?,
        tax_amount: row.try_get("tax_amount")?,
        asset_symbol: row.try_get("asset_symbol")?,
        status: text_column(row, "status")?,
        processed: row.try_get("processed")?,
        journal_entry_ids: row.try_get("journal_entry_ids")?,
        destination: row.try_get("destination")?,
        reason: row.try_get("reason")?,
        transfer_reference: row.try_get("transfer_reference")?,
        requested_at: row.try_get("requested_at")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        rejected_by: row.try_get("rejected_by")?,
        rejected_at: row.try_get("rejected_at")?,
        cancelled_by: row.try_get("cancelled_by")?,
        cancelled_at: row.try_get("cancelled_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> LedgerResult<Payment> {
    Ok(Payment {
        id: row.try_get("id")?,
        transaction_ref: row.try_get("transaction_ref")?,
        deposit_order_id: row.try_get("deposit_order_id")?,
        status: text_column(row, "status")?,
        failure_reason: row.try_get("failure_reason")?,
        amount_confirmed: row.try_get("amount_confirmed")?,
        last_callback: row.try_get("last_callback")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ACCOUNT_COLUMNS: &str =
    "id, kind, owner_id, subtype, status, name, created_at, deleted_at";

const BALANCE_COLUMNS: &str =
    "account_id, asset_type, asset_id, asset_symbol, available, locked, reserved, updated_at";

const PAYMENT_COLUMNS: &str = r#"
    id, transaction_ref, deposit_order_id, status, failure_reason,
    amount_confirmed, last_callback, created_at, updated_at
"#;

const WITHDRAWAL_COLUMNS: &str = r#"
    order_id, wallet_account_id, user_id, base_amount, fees_amount, tax_amount,
    asset_symbol, status, processed, journal_entry_ids, destination, reason,
    transfer_reference, requested_at, approved_by, approved_at, rejected_by,
    rejected_at, cancelled_by, cancelled_at, completed_at
"#;

// =========================================================================
// Repositories
// =========================================================================

#[async_trait]
impl AccountRepository for PgUnitOfWork {
    async fn find_account(&mut self, id: Uuid) -> LedgerResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_key(
        &mut self,
        kind: AccountKind,
        owner_id: Option<Uuid>,
        subtype: &str,
    ) -> LedgerResult<Option<Account>> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM accounts
            WHERE kind = $1
              AND owner_id IS NOT DISTINCT FROM $2
              AND subtype = $3
              AND deleted_at IS NULL
            "#
        );
        let row = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(owner_id)
            .bind(subtype)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, kind, owner_id, subtype, status, name, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id)
        .bind(account.kind.as_str())
        .bind(account.owner_id)
        .bind(&account.subtype)
        .bind(account.status.as_str())
        .bind(&account.name)
        .bind(account.created_at)
        .bind(account.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_error(e, &format!("{} account {}", account.kind, account.subtype)))?;
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        id: Uuid,
        status: AccountStatus,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET status = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn tombstone_account(&mut self, id: Uuid, at: DateTime<Utc>) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET deleted_at = $2, status = 'INACTIVE'
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl BalanceRepository for PgUnitOfWork {
    async fn find_balance(
        &mut self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Option<Balance>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE account_id = $1 AND asset_symbol = $2"
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(asset_symbol)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn find_asset(&mut self, asset_symbol: &str) -> LedgerResult<Option<AssetRef>> {
        let sql = format!("SELECT {BALANCE_COLUMNS} FROM balances WHERE asset_symbol = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(asset_symbol)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(balance_from_row).transpose()?.map(|b| b.asset()))
    }

    async fn adjust_balance(
        &mut self,
        account_id: Uuid,
        asset: &AssetRef,
        delta: BalanceDelta,
    ) -> LedgerResult<(Balance, Balance)> {
        sqlx::query(
            r#"
            INSERT INTO balances (account_id, asset_type, asset_id, asset_symbol)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id, asset_symbol) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(asset.asset_type.as_str())
        .bind(asset.asset_id)
        .bind(&asset.symbol)
        .execute(&mut *self.tx)
        .await?;

        let select = format!(
            r#"
            SELECT {BALANCE_COLUMNS} FROM balances
            WHERE account_id = $1 AND asset_symbol = $2
            FOR UPDATE
            "#
        );
        let row = sqlx::query(&select)
            .bind(account_id)
            .bind(&asset.symbol)
            .fetch_one(&mut *self.tx)
            .await?;
        let before = balance_from_row(&row)?;

        // Reject in the domain first so the caller sees which bucket was short
        before.apply(&delta)?;

        let update = format!(
            r#"
            UPDATE balances
            SET available = available + $3,
                reserved = reserved + $4,
                updated_at = NOW()
            WHERE account_id = $1 AND asset_symbol = $2
            RETURNING {BALANCE_COLUMNS}
            "#
        );
        let row = sqlx::query(&update)
            .bind(account_id)
            .bind(&asset.symbol)
            .bind(delta.available)
            .bind(delta.reserved)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(e, &format!("balance {account_id}/{}", asset.symbol)))?;
        let after = balance_from_row(&row)?;

        Ok((before, after))
    }
}

#[async_trait]
impl TransactionRepository for PgUnitOfWork {
    async fn insert_transaction(&mut self, transaction: &LedgerTransaction) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_transactions (
                id, account_id, asset_symbol, kind, amount,
                balance_before, balance_after, journal_entry_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_id)
        .bind(&transaction.asset_symbol)
        .bind(transaction.kind.as_str())
        .bind(transaction.amount)
        .bind(transaction.balance_before)
        .bind(transaction.balance_after)
        .bind(transaction.journal_entry_id)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn link_transaction_journal(
        &mut self,
        transaction_id: Uuid,
        journal_entry_id: Uuid,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE ledger_transactions SET journal_entry_id = $2 WHERE id = $1",
        )
        .bind(transaction_id)
        .bind(journal_entry_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::internal(format!(
                "transaction {transaction_id} not found for journal link"
            )));
        }
        Ok(())
    }

    async fn list_transactions(
        &mut self,
        account_id: Uuid,
        asset_symbol: &str,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, asset_symbol, kind, amount,
                   balance_before, balance_after, journal_entry_id, created_at
            FROM ledger_transactions
            WHERE account_id = $1 AND asset_symbol = $2
            ORDER BY seq
            "#,
        )
        .bind(account_id)
        .bind(asset_symbol)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl JournalRepository for PgUnitOfWork {
    async fn find_journal_entry(
        &mut self,
        idempotency_key: &str,
    ) -> LedgerResult<Option<JournalEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, debit_account_id, credit_account_id, asset_symbol, amount,
                   transaction_ids, idempotency_key, description, created_at
            FROM journal_entries
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(journal_from_row).transpose()
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, debit_account_id, credit_account_id, asset_symbol, amount,
                transaction_ids, idempotency_key, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.debit_account_id)
        .bind(entry.credit_account_id)
        .bind(&entry.asset_symbol)
        .bind(entry.amount)
        .bind(&entry.transaction_ids)
        .bind(&entry.idempotency_key)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_error(e, &format!("journal entry {}", entry.idempotency_key)))?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgUnitOfWork {
    async fn insert_deposit_order(&mut self, order: &DepositOrder) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deposit_orders (
                order_id, wallet_account_id, user_id, base_amount, fees_amount,
                tax_amount, asset_symbol, asset_type, event_key, processed,
                journal_entry_ids, created_at, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.order_id)
        .bind(order.wallet_account_id)
        .bind(order.user_id)
        .bind(order.base_amount)
        .bind(order.fees_amount)
        .bind(order.tax_amount)
        .bind(&order.asset_symbol)
        .bind(order.asset_type.as_str())
        .bind(&order.event_key)
        .bind(order.processed)
        .bind(&order.journal_entry_ids)
        .bind(order.created_at)
        .bind(order.processed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_error(e, &format!("deposit order {}", order.order_id)))?;
        Ok(())
    }

    async fn find_deposit_order(&mut self, order_id: Uuid) -> LedgerResult<Option<DepositOrder>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, wallet_account_id, user_id, base_amount, fees_amount,
                   tax_amount, asset_symbol, asset_type, event_key, processed,
                   journal_entry_ids, created_at, processed_at
            FROM deposit_orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn mark_deposit_processed(
        &mut self,
        order_id: Uuid,
        journal_entry_ids: &[Uuid],
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_orders
            SET processed = TRUE, journal_entry_ids = $2, processed_at = NOW()
            WHERE order_id = $1 AND processed = FALSE
            "#,
        )
        .bind(order_id)
        .bind(journal_entry_ids)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.find_deposit_order(order_id).await? {
            Some(_) => Ok(false),
            None => Err(LedgerError::OrderNotFound(order_id)),
        }
    }

    async fn insert_withdrawal_order(&mut self, order: &WithdrawalOrder) -> LedgerResult<()> {
        let sql = format!(
            r#"
            INSERT INTO withdrawal_orders ({WITHDRAWAL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#
        );
        sqlx::query(&sql)
            .bind(order.order_id)
            .bind(order.wallet_account_id)
            .bind(order.user_id)
            .bind(order.base_amount)
            .bind(order.fees_amount)
            .bind(order.tax_amount)
            .bind(&order.asset_symbol)
            .bind(order.status.as_str())
            .bind(order.processed)
            .bind(&order.journal_entry_ids)
            .bind(&order.destination)
            .bind(&order.reason)
            .bind(&order.transfer_reference)
            .bind(order.requested_at)
            .bind(order.approved_by)
            .bind(order.approved_at)
            .bind(order.rejected_by)
            .bind(order.rejected_at)
            .bind(order.cancelled_by)
            .bind(order.cancelled_at)
            .bind(order.completed_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(e, &format!("withdrawal order {}", order.order_id)))?;
        Ok(())
    }

    async fn find_withdrawal_order(
        &mut self,
        order_id: Uuid,
    ) -> LedgerResult<Option<WithdrawalOrder>> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_orders WHERE order_id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn update_withdrawal_order(&mut self, order: &WithdrawalOrder) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_orders
            SET status = $2,
                processed = $3,
                journal_entry_ids = $4,
                reason = $5,
                transfer_reference = $6,
                approved_by = $7,
                approved_at = $8,
                rejected_by = $9,
                rejected_at = $10,
                cancelled_by = $11,
                cancelled_at = $12,
                completed_at = $13
            WHERE order_id = $1
            "#,
        )
        .bind(order.order_id)
        .bind(order.status.as_str())
        .bind(order.processed)
        .bind(&order.journal_entry_ids)
        .bind(&order.reason)
        .bind(&order.transfer_reference)
        .bind(order.approved_by)
        .bind(order.approved_at)
        .bind(order.rejected_by)
        .bind(order.rejected_at)
        .bind(order.cancelled_by)
        .bind(order.cancelled_at)
        .bind(order.completed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::OrderNotFound(order.order_id));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for PgUnitOfWork {
    async fn insert_payment(&mut self, payment: &Payment) -> LedgerResult<()> {
        let sql = format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&sql)
            .bind(payment.id)
            .bind(&payment.transaction_ref)
            .bind(payment.deposit_order_id)
            .bind(payment.status.as_str())
            .bind(&payment.failure_reason)
            .bind(payment.amount_confirmed)
            .bind(&payment.last_callback)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(e, &format!("payment {}", payment.transaction_ref)))?;
        Ok(())
    }

    async fn find_payment_by_ref(
        &mut self,
        transaction_ref: &str,
    ) -> LedgerResult<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_ref = $1");
        let row = sqlx::query(&sql)
            .bind(transaction_ref)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn update_payment(
        &mut self,
        payment: &Payment,
        expected: Option<PaymentStatus>,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, failure_reason = $3, amount_confirmed = $4,
                last_callback = $5, updated_at = $6
            WHERE transaction_ref = $1
              AND ($7::TEXT IS NULL OR status = $7)
            "#,
        )
        .bind(&payment.transaction_ref)
        .bind(payment.status.as_str())
        .bind(&payment.failure_reason)
        .bind(payment.amount_confirmed)
        .bind(&payment.last_callback)
        .bind(payment.updated_at)
        .bind(expected.map(|s| s.as_str()))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.find_payment_by_ref(&payment.transaction_ref).await? {
            Some(_) => Ok(false),
            None => Err(LedgerError::PaymentNotFound(payment.transaction_ref.clone())),
        }
    }

    async fn list_payments_by_status(
        &mut self,
        status: PaymentStatus,
        limit: usize,
    ) -> LedgerResult<Vec<Payment>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = $1
            ORDER BY updated_at, transaction_ref
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(payment_from_row).collect()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_db_error(e, "unit of work"))
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

