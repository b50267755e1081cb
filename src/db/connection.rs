use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

/// Create a connection pool for the SQLite database.
///
/// The parent directory is created when missing so a fresh checkout can use
/// the default `.cpds/agentflow.db` path without setup.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(30))
        .pragma("temp_store", "MEMORY")
        .pragma("cache_size", "-64000");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply the embedded migrations. Safe to call on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Convenience for tests and local workers: pool plus schema in one call.
pub async fn open(db_path: &Path) -> Result<SqlitePool> {
    let pool = create_pool(db_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
