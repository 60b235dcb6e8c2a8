//! SQLite artifact store implementation.
//!
//! Implements `ArtifactStore` from `pagewright-core` using sqlx with split
//! read/write pools. Each of the four artifact phases is stored as a JSON
//! text column; the `UNIQUE(execution_id, node_id, action_index)` constraint
//! enforces append-only immutability at the database layer.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use pagewright_core::provider::ArtifactStore;
use pagewright_types::artifact::MemoryArtifact;
use pagewright_types::error::ProviderError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ArtifactStore`.
pub struct SqliteArtifactStore {
    pool: DatabasePool,
}

impl SqliteArtifactStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain MemoryArtifact.
struct ArtifactRow {
    execution_id: String,
    node_id: String,
    action_index: i64,
    inputs: String,
    processing: String,
    outputs: String,
    forwarding: String,
    created_at: String,
}

impl ArtifactRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            action_index: row.try_get("action_index")?,
            inputs: row.try_get("inputs")?,
            processing: row.try_get("processing")?,
            outputs: row.try_get("outputs")?,
            forwarding: row.try_get("forwarding")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_artifact(self) -> Result<MemoryArtifact, ProviderError> {
        let execution_id = Uuid::parse_str(&self.execution_id)
            .map_err(|e| ProviderError::Storage(format!("invalid execution_id: {e}")))?;
        let inputs = serde_json::from_str(&self.inputs)
            .map_err(|e| ProviderError::Storage(format!("invalid inputs json: {e}")))?;
        let processing = serde_json::from_str(&self.processing)
            .map_err(|e| ProviderError::Storage(format!("invalid processing json: {e}")))?;
        let outputs = serde_json::from_str(&self.outputs)
            .map_err(|e| ProviderError::Storage(format!("invalid outputs json: {e}")))?;
        let forwarding = serde_json::from_str(&self.forwarding)
            .map_err(|e| ProviderError::Storage(format!("invalid forwarding json: {e}")))?;
        let created_at = parse_datetime(&self.created_at)?;

        Ok(MemoryArtifact {
            execution_id,
            node_id: self.node_id,
            action_index: self.action_index as u32,
            inputs,
            processing,
            outputs,
            forwarding,
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProviderError::Storage(format!("invalid datetime: {e}")))
}

fn phase_json<T: serde::Serialize>(phase: &T) -> Result<String, ProviderError> {
    serde_json::to_string(phase).map_err(ProviderError::Serialization)
}

// ---------------------------------------------------------------------------
// ArtifactStore implementation
// ---------------------------------------------------------------------------

impl ArtifactStore for SqliteArtifactStore {
    async fn append(&self, artifact: &MemoryArtifact) -> Result<(), ProviderError> {
        let result = sqlx::query(
            r#"INSERT INTO artifacts (execution_id, node_id, action_index, inputs, processing, outputs, forwarding, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(artifact.execution_id.to_string())
        .bind(&artifact.node_id)
        .bind(artifact.action_index as i64)
        .bind(phase_json(&artifact.inputs)?)
        .bind(phase_json(&artifact.processing)?)
        .bind(phase_json(&artifact.outputs)?)
        .bind(phase_json(&artifact.forwarding)?)
        .bind(artifact.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e
                .as_database_error()
                .map_or(false, |d| d.is_unique_violation()) =>
            {
                Err(ProviderError::Storage(format!(
                    "duplicate artifact for {}/{}/{}",
                    artifact.execution_id, artifact.node_id, artifact.action_index
                )))
            }
            Err(e) => Err(ProviderError::Storage(e.to_string())),
        }
    }

    async fn query(
        &self,
        execution_id: Uuid,
        node_id: Option<&str>,
    ) -> Result<Vec<MemoryArtifact>, ProviderError> {
        let rows = match node_id {
            Some(node_id) => {
                sqlx::query(
                    "SELECT * FROM artifacts WHERE execution_id = ? AND node_id = ? ORDER BY id",
                )
                .bind(execution_id.to_string())
                .bind(node_id)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM artifacts WHERE execution_id = ? ORDER BY id")
                    .bind(execution_id.to_string())
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| ProviderError::Storage(e.to_string()))?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let artifact_row =
                ArtifactRow::from_row(row).map_err(|e| ProviderError::Storage(e.to_string()))?;
            artifacts.push(artifact_row.into_artifact()?);
        }

        Ok(artifacts)
    }
}
