//! cloudmirror Cache - Local resource document store
//!
//! Persistence for the documents the reconciliation engine mirrors:
//! - Compute states, descriptions and disks
//! - Content-addressed tags and resource groups
//! - Endpoint and credential documents read by provider adapters
//!
//! ## Architecture
//!
//! This crate implements the `IResourceStore` port from `cloudmirror-core`
//! twice. [`SqliteResourceStore`] is the durable backend used by the daemon;
//! [`MemoryResourceStore`] keeps everything in a concurrent map and backs
//! tests and short-lived runs.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use cloudmirror_cache::{DatabasePool, SqliteResourceStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/cloudmirror/resources.db")).await?;
//! let store = SqliteResourceStore::new(pool.pool().clone());
//! // Use store as IResourceStore...
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod pool;
pub mod repository;

pub use memory::MemoryResourceStore;
pub use pool::DatabasePool;
pub use repository::SqliteResourceStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored column could not be converted to or from a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
