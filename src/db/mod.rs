//! SQLite persistence.
//!
//! Connections and migrations live here; the queries are in [`queries`].

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::AppResult;

pub mod queries;

/// Database connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: Arc<SqlitePool>,
}

impl Database {
    /// Create a new database connection
    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!(url, "database connected");
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// A private in-memory database with migrations applied.
    ///
    /// Every SQLite connection to `:memory:` is a separate database, so the
    /// pool is pinned to one connection that is never recycled.
    pub async fn connect_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let database = Self {
            pool: Arc::new(pool),
        };
        database.run_migrations().await?;
        Ok(database)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(self.pool()).await?;
        Ok(())
    }
}

pub(crate) fn to_epoch(instant: DateTime<Utc>) -> i64 {
    instant.timestamp()
}

pub(crate) fn from_epoch(seconds: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| sqlx::Error::Decode(format!("invalid timestamp {}", seconds).into()))
}
