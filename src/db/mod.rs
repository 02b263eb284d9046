//! SQLite persistence for import statuses
//!
//! Only used when `DATABASE_URL` is set; otherwise statuses live in memory.

mod schema;

pub use schema::*;

use std::str::FromStr;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::Result;

/// Each connection to `:memory:` opens a private database, so the pool
/// must stay at one connection for the schema to be visible.
fn pool_size(database_url: &str) -> u32 {
    if database_url.contains(":memory:") {
        1
    } else {
        5
    }
}

/// Open a pool and make sure the `import_status` table exists
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(pool_size(database_url))
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;
    tracing::debug!(url = database_url, "Status database ready");

    Ok(pool)
}
