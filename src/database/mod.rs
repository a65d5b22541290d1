//! SQLite read model
//!
//! Queryable projection of the ledger, rebuilt by replaying committed
//! entries. The ledger log stays the source of truth.

pub mod indexer;
pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use crate::error::TrustError;

pub const INITIAL_SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, TrustError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| TrustError::Config(format!("Invalid database URL {}: {}", database_url, e)))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Connected to read-model database {}", database_url);
        Ok(Database { pool })
    }

    /// Private in-memory database on a single connection.
    pub async fn new_in_memory() -> Result<Self, TrustError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Database { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), TrustError> {
        sqlx::raw_sql(INITIAL_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
