//! Memory artifact types: the persisted audit record of one dispatched
//! action. Exactly one artifact exists per `(executionId, nodeId,
//! actionIndex)` and it is never partially written -- all four phases are
//! populated before the owning node is considered complete, which is what
//! makes a run replayable from its artifacts alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::selector::SelectorTier;

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// The full audit record of one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryArtifact {
    pub execution_id: Uuid,
    pub node_id: String,
    /// Position of the action within its node, 0-based.
    pub action_index: u32,
    pub inputs: ArtifactInputs,
    pub processing: ArtifactProcessing,
    pub outputs: ArtifactOutputs,
    pub forwarding: ForwardingDecision,
    pub created_at: DateTime<Utc>,
}

impl MemoryArtifact {
    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            execution_id: self.execution_id,
            node_id: self.node_id.clone(),
            action_index: self.action_index,
        }
    }
}

/// Pointer to one artifact, carried on user-visible failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub execution_id: Uuid,
    pub node_id: String,
    pub action_index: u32,
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.execution_id, self.node_id, self.action_index)
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Phase 1: what went in. Instructions and data are recorded in template form
/// -- credential placeholders stay as `{{token}}`, never cleartext.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInputs {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Context keys visible to the action when it started.
    #[serde(default)]
    pub context_keys: Vec<String>,
}

/// Phase 2: how it ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactProcessing {
    /// Which resolution path produced the final result.
    pub path: ResolutionPath,
    /// Dispatch attempts within this action (primary + fallback each count).
    pub attempts: u32,
    pub duration_ms: u64,
    /// Selector actually dispatched, when the path was deterministic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_used: Option<String>,
    /// Present when a fallback success fed the selector cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned: Option<LearnedSelector>,
}

/// Which arm of the hybrid resolver settled the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Author-provided selector worked.
    Primary,
    /// A cached selector was substituted and worked.
    Cached,
    /// The AI fallback was engaged.
    Fallback,
    /// No dispatch happened (e.g. aborted before the provider call).
    None,
}

/// Cache write performed by a learning fallback success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedSelector {
    pub selector: String,
    pub tier: SelectorTier,
    pub reliability: f64,
}

/// Phase 3: what came out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactOutputs {
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Page URL after the action, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

/// Terminal status of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// The run was aborted mid-flight; this artifact is the forensic flush.
    Aborted,
}

/// Phase 4: the memory-hygiene decision applied after capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardingDecision {
    /// Keys carried to the next node.
    pub propagated: Vec<String>,
    /// Keys dropped (declared clears plus oversized values).
    pub cleared: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_artifact() -> MemoryArtifact {
        MemoryArtifact {
            execution_id: Uuid::now_v7(),
            node_id: "do-archive".to_string(),
            action_index: 0,
            inputs: ArtifactInputs {
                instruction: "type {{mail.password}} into the password field".to_string(),
                selector: Some("input[name='password']".to_string()),
                data: None,
                context_keys: vec!["threads".to_string(), "currentItem".to_string()],
            },
            processing: ArtifactProcessing {
                path: ResolutionPath::Fallback,
                attempts: 2,
                duration_ms: 840,
                selector_used: None,
                learned: Some(LearnedSelector {
                    selector: "input[name='password']".to_string(),
                    tier: SelectorTier::Name,
                    reliability: 1.0,
                }),
            },
            outputs: ArtifactOutputs {
                status: ActionStatus::Succeeded,
                data: Some(json!({"typed": true})),
                error: None,
                page_url: Some("https://mail.example.com/login".to_string()),
            },
            forwarding: ForwardingDecision {
                propagated: vec!["currentItem".to_string()],
                cleared: vec!["domSnapshot".to_string()],
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_artifact_json_roundtrip() {
        let artifact = sample_artifact();
        let text = serde_json::to_string(&artifact).unwrap();
        assert!(text.contains("\"executionId\""));
        assert!(text.contains("\"actionIndex\":0"));
        let parsed: MemoryArtifact = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.node_id, "do-archive");
        assert_eq!(parsed.processing.path, ResolutionPath::Fallback);
        assert_eq!(parsed.outputs.status, ActionStatus::Succeeded);
    }

    #[test]
    fn test_inputs_keep_placeholders_verbatim() {
        let artifact = sample_artifact();
        assert!(artifact.inputs.instruction.contains("{{mail.password}}"));
    }

    #[test]
    fn test_reference_display() {
        let artifact = sample_artifact();
        let reference = artifact.reference();
        let shown = reference.to_string();
        assert!(shown.contains("do-archive"));
        assert!(shown.ends_with("/0"));
    }

    #[test]
    fn test_resolution_path_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&ResolutionPath::Cached).unwrap(),
            "\"cached\""
        );
    }
}
