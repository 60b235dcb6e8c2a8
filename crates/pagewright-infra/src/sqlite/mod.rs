//! SQLite storage layer.
//!
//! Artifact store implementation backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod artifacts;
pub mod pool;

pub use artifacts::SqliteArtifactStore;
pub use pool::DatabasePool;
