//! Artifact store port.
//!
//! Append-only storage for memory artifacts. The memory pipeline blocks on
//! `append` -- a node is not complete until the store acknowledges the write.

use std::future::Future;

use uuid::Uuid;

use pagewright_types::artifact::MemoryArtifact;
use pagewright_types::error::ProviderError;

/// Async port for the artifact store. The store must reject a second append
/// for the same `(execution_id, node_id, action_index)`; artifacts are
/// immutable once written.
pub trait ArtifactStore: Send + Sync {
    /// Persist one artifact. Returning `Ok(())` is the acknowledgement the
    /// pipeline blocks on.
    fn append(
        &self,
        artifact: &MemoryArtifact,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// All artifacts for an execution, optionally narrowed to one node,
    /// ordered by creation.
    fn query(
        &self,
        execution_id: Uuid,
        node_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<MemoryArtifact>, ProviderError>> + Send;
}
