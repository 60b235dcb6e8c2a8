//! Run and node outcome types.
//!
//! Outcomes are plain values the engine branches on -- failure and escalation
//! travel as data, never as unwound panics or error-typed control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::artifact::ArtifactRef;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Terminal status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Stopped by the external abort signal or the execution-timeout ceiling.
    Aborted,
    /// Paused for human input (e.g. a second factor); not a failure, and the
    /// outcome carries everything needed to pick the run back up.
    Escalated,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
            RunStatus::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Terminal status of a single node pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Escalated,
}

/// Lifecycle phases of one node execution. Capture is a real phase the engine
/// awaits, not a side effect of dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Running,
    Capturing,
    Succeeded,
    Failed,
}

impl NodePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePhase::Running => "running",
            NodePhase::Capturing => "capturing",
            NodePhase::Succeeded => "succeeded",
            NodePhase::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result value of one node pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn succeeded(output: Option<Value>) -> Self {
        Self {
            status: NodeStatus::Succeeded,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn escalated(reason: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Escalated,
            output: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub execution_id: Uuid,
    /// `meta.id` of the executed document.
    pub workflow_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Node where the run stopped, for failed/escalated/aborted outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
    /// Last captured artifact, the debugging entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_artifact: Option<ArtifactRef>,
    /// Node IDs in visitation order.
    pub visited: Vec<String>,
    /// Final context snapshot (secrets never enter the context, so this is
    /// safe to persist and display).
    pub context: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
