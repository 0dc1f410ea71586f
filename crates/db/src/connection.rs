use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use leadflow_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Open a pool from the `[database]` section of the application config.
/// WAL keeps the supervisor loop and the operator CLI from starving each
/// other on writes; foreign keys are enforced so a run can never outlive
/// its lead row.
pub async fn connect(database: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&database.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(database.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(database.timeout_secs.max(1)))
        .connect_with(options)
        .await
}
