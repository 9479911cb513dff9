pub mod ports;
pub mod sqlite;

use std::str::FromStr;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};

use crate::error::{HealthError, Result};

/// Opens the health database and applies pending migrations.
///
/// In-memory databases are capped to a single pooled connection, since
/// every sqlite `:memory:` connection is its own database.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| HealthError::Internal(format!("invalid database url: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await
        .map_err(|e| {
            HealthError::Internal(format!("failed to open health database: {e}"))
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            HealthError::Internal(format!("failed to run migrations: {e}"))
        })?;

    Ok(pool)
}
