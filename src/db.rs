use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::error::Result;

/// Open (creating if needed) the index database. The pool is the explicit
/// handle every other module takes; nothing here is process-global.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an existing database, failing with [`Error::IndexMissing`] rather
/// than silently creating an empty index.
///
/// [`Error::IndexMissing`]: crate::error::Error::IndexMissing
pub async fn connect_existing(config: &Config) -> Result<SqlitePool> {
    if !config.db.path.exists() {
        return Err(crate::error::Error::IndexMissing);
    }
    connect(config).await
}
