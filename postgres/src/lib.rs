//! PostgreSQL log store implementation for the logbridge pipeline.
//!
//! Implements the [`LogStore`] trait over a sqlx connection pool. The store
//! owns a single table, `service_messages`, keyed by the entry id. Writes
//! are idempotent: under at-least-once delivery a rolled-back unit is
//! redelivered with the same id, and the second insert must count as
//! success, not as a conflict error.
//!
//! # Example
//!
//! ```no_run
//! use logbridge_postgres::PostgresLogStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresLogStore::connect("postgres://localhost/logbridge").await?;
//! store.ensure_schema().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use logbridge_core::message::LogEntry;
use logbridge_core::store::{LogStore, StoreError};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::pin::Pin;

/// Schema owned by this store, applied at startup.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS service_messages (
    id          TEXT PRIMARY KEY,
    timestamp   BIGINT NOT NULL,
    application TEXT NOT NULL,
    hostname    TEXT NOT NULL,
    level       INTEGER NOT NULL,
    payload     TEXT NOT NULL
)
";

/// PostgreSQL-backed [`LogStore`].
pub struct PostgresLogStore {
    pool: PgPool,
}

impl PostgresLogStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and create a store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the pool cannot be
    /// established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL log store");
        Ok(Self::new(pool))
    }

    /// Create the `service_messages` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailed`] if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        tracing::debug!("Log store schema ensured");
        Ok(())
    }

    /// Access the underlying pool (for shutdown and health checks).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl LogStore for PostgresLogStore {
    fn save(
        &self,
        entry: &LogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        // Clone data before moving into the async block.
        let entry = entry.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO service_messages (
                    id, timestamp, application, hostname, level, payload
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(&entry.id)
            .bind(entry.timestamp)
            .bind(&entry.application)
            .bind(&entry.hostname)
            .bind(entry.level)
            .bind(&entry.payload)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

            if result.rows_affected() == 0 {
                tracing::debug!(id = %entry.id, "Entry already stored, redelivered save ignored");
            } else {
                tracing::debug!(id = %entry.id, "Log entry stored");
            }

            metrics::counter!("store.saved").increment(1);
            Ok(())
        })
    }
}
