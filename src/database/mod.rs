//! Async database layer (sqlx + SQLite). A single [`DatabaseManager`]
//! wraps a connection pool; entity-specific queries live in the
//! submodules. Grounded on the teacher's `database/mod.rs` +
//! `database/queues.rs` split.

pub mod messages;
pub mod numbers;
pub mod reservations;
pub mod transactions;
pub mod users;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> EngineResult<Self> {
        tracing::info!("initializing database manager: {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| EngineError::Transient(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            EngineError::Transient(format!("migration failed: {e}"))
        })?;
        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> EngineResult<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction. The pool is opened with `busy_timeout` set so
    /// that a writer blocked behind another in-flight transaction waits
    /// instead of failing with `SQLITE_BUSY` — SQLite's closest equivalent
    /// to a row-level lock on the candidate row.
    pub async fn begin_transaction(&self) -> EngineResult<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_and_migrates() {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
