use thiserror::Error;

use serde::{Deserialize, Serialize};

/// Errors from collaborator providers (browser, cognition, secrets, storage,
/// session, source). Port trait definitions in `pagewright-core` use this as
/// their shared error type.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

/// One problem found while validating a workflow document. The validator
/// accumulates all of these instead of stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Stable machine-readable code (e.g. "duplicate-node-id").
    pub code: String,
    /// Offending node, when the issue is node-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            node_id: None,
            message: message.into(),
        }
    }

    pub fn for_node(
        code: impl Into<String>,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            node_id: Some(node_id.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "[{}] node '{}': {}", self.code, node, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}
