//! The primary relational store.
//!
//! The store is the source of truth for packages, reference tables, scenario snapshots and the
//! recompute queue. Every statement autocommits: no operation here holds a transaction open
//! across more than one logical write.
use anyhow::{Context, Result};
use log::info;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

pub mod package;
pub mod queue;
pub mod reference;
pub mod schema;
pub mod snapshot;

/// A connection pool for the primary store
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the store at `path` and make sure every table exists
    pub async fn open(path: &Path) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&url)
            .await
            .with_context(|| format!("Could not open database {}", path.display()))?;
        info!("Connected to database: {}", path.display());

        Self::from_pool(pool).await
    }

    /// An empty in-memory store, mainly useful for tests.
    ///
    /// Limited to one connection because every SQLite in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        schema::create_reference_tables(&pool).await?;
        schema::create_primary_tables(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
