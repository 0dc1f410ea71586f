use sqlx::migrate::{MigrateError, MigrationType, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Number of embedded up-migrations the database has not applied yet.
pub async fn pending_count(pool: &DbPool) -> Result<usize, sqlx::Error> {
    let total = MIGRATOR
        .iter()
        .filter(|migration| !matches!(migration.migration_type, MigrationType::ReversibleDown))
        .count();

    let has_ledger: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if has_ledger == 0 {
        return Ok(total);
    }

    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations").fetch_one(pool).await?;
    Ok(total.saturating_sub(applied as usize))
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::migrations::MIGRATOR;
    use crate::testing::memory_pool;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "lead",
        "workflow",
        "run",
        "channel_budget",
        "reply_event",
        "idx_lead_status",
        "idx_lead_blacklisted",
        "idx_run_status",
        "idx_run_lead_id",
        "idx_run_resumption_token",
        "idx_reply_event_lead_id",
        "idx_reply_event_consumed",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = memory_pool().await;
        run_pending(&pool).await.expect("run migrations");

        assert_eq!(table_count(&pool, "lead").await, 1);
        assert_eq!(table_count(&pool, "workflow").await, 1);
        assert_eq!(table_count(&pool, "run").await, 1);
        assert_eq!(table_count(&pool, "channel_budget").await, 1);
        assert_eq!(table_count(&pool, "reply_event").await, 1);
    }

    #[tokio::test]
    async fn pending_count_reaches_zero_after_migrating() {
        let pool = memory_pool().await;
        let pending = super::pending_count(&pool).await.expect("count before");
        assert!(pending > 0, "a fresh database has pending migrations");

        run_pending(&pool).await.expect("run migrations");
        assert_eq!(super::pending_count(&pool).await.expect("count after"), 0);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = memory_pool().await;
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "lead").await, 0);
        assert_eq!(table_count(&pool, "run").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = memory_pool().await;
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
