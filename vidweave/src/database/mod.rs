//! Database module.
//!
//! Persistence layer using SQLite with sqlx: connection pool management,
//! models, and repositories.

pub mod models;
pub mod repositories;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default busy timeout.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Initialize the database connection pool with WAL mode.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

/// Initialize the database connection pool with a custom size.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Run pending schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// In-memory pool for tests. Single connection, since every `:memory:`
/// connection is its own database.
#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}
