//! Database module
//!
//! Connectivity and schema checks for the Postgres store. The schema itself
//! lives in raw SQL files under `migrations/`.

use sqlx::PgPool;

/// Tables the Postgres store reads and writes
pub const REQUIRED_TABLES: [&str; 7] = [
    "accounts",
    "balances",
    "ledger_transactions",
    "journal_entries",
    "deposit_orders",
    "withdrawal_orders",
    "payments",
];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table = %table, "Required table does not exist");
            return Ok(false);
        }
    }

    Ok(true)
}
