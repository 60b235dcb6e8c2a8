//! Memory pipeline: staged artifact assembly, blocking persistence, and the
//! forwarding pass that keeps run context from bloating.
//!
//! An [`ArtifactDraft`] accumulates the four phases of one action while it
//! executes. Persistence is part of the node lifecycle, not a background
//! task: the node stays in its capturing state until [`MemoryPipeline::commit`]
//! acknowledges the append, retrying transient store failures on a short
//! schedule before declaring the run unsound. An aborted run flushes its
//! in-flight draft so the partial record survives for forensics.

use std::time::Duration;

use pagewright_types::artifact::{
    ActionStatus, ArtifactInputs, ArtifactOutputs, ArtifactProcessing, ForwardingDecision,
    MemoryArtifact, ResolutionPath,
};
use pagewright_types::error::ProviderError;
use pagewright_types::workflow::ForwardingRules;
use thiserror::Error;
use uuid::Uuid;

use crate::provider::ArtifactStore;
use crate::workflow::context::{ExecutionContext, FORWARD_SIZE_LIMIT};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The store refused the artifact through the whole retry schedule. The
    /// run cannot continue: an unrecorded action would leave a hole in the
    /// audit trail.
    #[error("artifact persistence failed after {attempts} attempt(s): {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("artifact query failed: {0}")]
    Query(#[from] ProviderError),
}

// ---------------------------------------------------------------------------
// ArtifactDraft
// ---------------------------------------------------------------------------

/// In-flight artifact for one action, filled phase by phase.
#[derive(Debug)]
pub struct ArtifactDraft {
    execution_id: Uuid,
    node_id: String,
    action_index: u32,
    inputs: ArtifactInputs,
    processing: ArtifactProcessing,
    outputs: Option<ArtifactOutputs>,
    forwarding: ForwardingDecision,
}

impl ArtifactDraft {
    /// Open a draft with the inputs phase. Inputs are recorded before
    /// dispatch, in template form.
    pub fn begin(
        execution_id: Uuid,
        node_id: impl Into<String>,
        action_index: u32,
        inputs: ArtifactInputs,
    ) -> Self {
        Self {
            execution_id,
            node_id: node_id.into(),
            action_index,
            inputs,
            processing: ArtifactProcessing {
                path: ResolutionPath::None,
                attempts: 0,
                duration_ms: 0,
                selector_used: None,
                learned: None,
            },
            outputs: None,
            forwarding: ForwardingDecision::default(),
        }
    }

    pub fn record_processing(&mut self, processing: ArtifactProcessing) {
        self.processing = processing;
    }

    pub fn record_outputs(&mut self, outputs: ArtifactOutputs) {
        self.outputs = Some(outputs);
    }

    pub fn record_forwarding(&mut self, decision: ForwardingDecision) {
        self.forwarding = decision;
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Seal the draft. A draft sealed without outputs records a failure, so
    /// an artifact can never claim success it did not observe.
    pub fn finish(self) -> MemoryArtifact {
        let outputs = self.outputs.unwrap_or_else(|| ArtifactOutputs {
            status: ActionStatus::Failed,
            data: None,
            error: Some("action did not complete".to_string()),
            page_url: None,
        });
        MemoryArtifact {
            execution_id: self.execution_id,
            node_id: self.node_id,
            action_index: self.action_index,
            inputs: self.inputs,
            processing: self.processing,
            outputs,
            forwarding: self.forwarding,
            created_at: chrono::Utc::now(),
        }
    }

    /// Seal the draft as the forensic flush of an aborted run, overriding
    /// whatever status the action had reached.
    pub fn finish_aborted(mut self, reason: &str) -> MemoryArtifact {
        let outputs = match self.outputs.take() {
            Some(mut outputs) => {
                outputs.status = ActionStatus::Aborted;
                outputs.error.get_or_insert_with(|| reason.to_string());
                outputs
            }
            None => ArtifactOutputs {
                status: ActionStatus::Aborted,
                data: None,
                error: Some(reason.to_string()),
                page_url: None,
            },
        };
        self.outputs = Some(outputs);
        self.finish()
    }
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Apply a node's forwarding rules plus the oversize sweep to the context.
///
/// Declared clears always win. Values whose serialized form exceeds
/// [`FORWARD_SIZE_LIMIT`] are cleared unless explicitly propagated; everything
/// else survives untouched.
pub fn apply_forwarding(
    ctx: &mut ExecutionContext,
    rules: Option<&ForwardingRules>,
) -> ForwardingDecision {
    let empty = ForwardingRules::default();
    let rules = rules.unwrap_or(&empty);

    let mut decision = ForwardingDecision::default();
    for key in ctx.keys() {
        if rules.clear.contains(&key) {
            ctx.remove(&key);
            decision.cleared.push(key);
            continue;
        }

        let oversized = ctx
            .get(&key)
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0) > FORWARD_SIZE_LIMIT)
            .unwrap_or(false);
        if oversized && !rules.propagate.contains(&key) {
            tracing::debug!(key = %key, "clearing oversized context value");
            ctx.remove(&key);
            decision.cleared.push(key);
        } else if rules.propagate.contains(&key) {
            decision.propagated.push(key);
        }
    }
    decision
}

// ---------------------------------------------------------------------------
// MemoryPipeline
// ---------------------------------------------------------------------------

/// Default backoff between persistence retries, in milliseconds.
const DEFAULT_RETRY_MS: [u64; 3] = [100, 500, 1000];

/// Blocking write path to the artifact store.
#[derive(Debug, Clone)]
pub struct MemoryPipeline<S> {
    store: S,
    retry_ms: Vec<u64>,
}

impl<S: ArtifactStore> MemoryPipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry_ms: DEFAULT_RETRY_MS.to_vec(),
        }
    }

    pub fn with_retry_schedule(store: S, retry_ms: Vec<u64>) -> Self {
        Self { store, retry_ms }
    }

    /// Swap the retry schedule on an existing pipeline.
    pub fn set_retry_schedule(&mut self, retry_ms: Vec<u64>) {
        self.retry_ms = retry_ms;
    }

    /// Persist one artifact, retrying transient failures on the schedule.
    /// Returns only once the store has acknowledged (or the schedule is
    /// exhausted).
    pub async fn commit(&self, artifact: MemoryArtifact) -> Result<(), MemoryError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.store.append(&artifact).await {
                Ok(()) => {
                    tracing::debug!(
                        node = %artifact.node_id,
                        action = artifact.action_index,
                        attempts,
                        "artifact committed"
                    );
                    return Ok(());
                }
                Err(source) => {
                    let retry_index = (attempts - 1) as usize;
                    if retry_index >= self.retry_ms.len() {
                        return Err(MemoryError::Persistence { attempts, source });
                    }
                    let delay = self.retry_ms[retry_index];
                    tracing::warn!(
                        node = %artifact.node_id,
                        action = artifact.action_index,
                        attempt = attempts,
                        retry_in_ms = delay,
                        error = %source,
                        "artifact persistence failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// Read back artifacts for an execution, optionally narrowed to a node.
    pub async fn query(
        &self,
        execution_id: Uuid,
        node_id: Option<&str>,
    ) -> Result<Vec<MemoryArtifact>, MemoryError> {
        Ok(self.store.query(execution_id, node_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    // -----------------------------------------------------------------------
    // Mock store
    // -----------------------------------------------------------------------

    /// In-memory store that fails the first `fail_first` appends.
    struct FlakyStore {
        artifacts: Mutex<Vec<MemoryArtifact>>,
        fail_first: Mutex<u32>,
    }

    impl FlakyStore {
        fn new(fail_first: u32) -> Self {
            Self {
                artifacts: Mutex::new(Vec::new()),
                fail_first: Mutex::new(fail_first),
            }
        }

        fn stored(&self) -> usize {
            self.artifacts.lock().unwrap().len()
        }
    }

    impl ArtifactStore for &FlakyStore {
        async fn append(&self, artifact: &MemoryArtifact) -> Result<(), ProviderError> {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Storage("disk full".to_string()));
            }
            self.artifacts.lock().unwrap().push(artifact.clone());
            Ok(())
        }

        async fn query(
            &self,
            execution_id: Uuid,
            node_id: Option<&str>,
        ) -> Result<Vec<MemoryArtifact>, ProviderError> {
            Ok(self
                .artifacts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| {
                    a.execution_id == execution_id
                        && node_id.map_or(true, |n| a.node_id == n)
                })
                .cloned()
                .collect())
        }
    }

    fn draft() -> ArtifactDraft {
        ArtifactDraft::begin(
            Uuid::now_v7(),
            "do-archive",
            0,
            ArtifactInputs {
                instruction: "click the archive button".to_string(),
                selector: Some("button[name='archive']".to_string()),
                data: None,
                context_keys: vec!["threads".to_string()],
            },
        )
    }

    // -----------------------------------------------------------------------
    // Draft assembly
    // -----------------------------------------------------------------------

    #[test]
    fn test_draft_full_assembly() {
        let mut d = draft();
        d.record_processing(ArtifactProcessing {
            path: ResolutionPath::Primary,
            attempts: 1,
            duration_ms: 120,
            selector_used: Some("button[name='archive']".to_string()),
            learned: None,
        });
        d.record_outputs(ArtifactOutputs {
            status: ActionStatus::Succeeded,
            data: None,
            error: None,
            page_url: Some("https://mail.example.com/inbox".to_string()),
        });
        d.record_forwarding(ForwardingDecision {
            propagated: vec!["threads".to_string()],
            cleared: vec![],
        });

        let artifact = d.finish();
        assert_eq!(artifact.processing.path, ResolutionPath::Primary);
        assert_eq!(artifact.outputs.status, ActionStatus::Succeeded);
        assert_eq!(artifact.forwarding.propagated, vec!["threads"]);
    }

    #[test]
    fn test_draft_without_outputs_records_failure() {
        let artifact = draft().finish();
        assert_eq!(artifact.outputs.status, ActionStatus::Failed);
        assert_eq!(
            artifact.outputs.error.as_deref(),
            Some("action did not complete")
        );
    }

    #[test]
    fn test_abort_flush_overrides_status() {
        let mut d = draft();
        d.record_outputs(ArtifactOutputs {
            status: ActionStatus::Succeeded,
            data: Some(json!({"clicked": true})),
            error: None,
            page_url: None,
        });
        let artifact = d.finish_aborted("run aborted by operator");
        assert_eq!(artifact.outputs.status, ActionStatus::Aborted);
        // Data observed before the abort is kept.
        assert_eq!(artifact.outputs.data, Some(json!({"clicked": true})));
    }

    #[test]
    fn test_abort_flush_without_outputs() {
        let artifact = draft().finish_aborted("run aborted by operator");
        assert_eq!(artifact.outputs.status, ActionStatus::Aborted);
        assert_eq!(
            artifact.outputs.error.as_deref(),
            Some("run aborted by operator")
        );
    }

    // -----------------------------------------------------------------------
    // Forwarding
    // -----------------------------------------------------------------------

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test-flow", Uuid::now_v7())
    }

    #[test]
    fn test_forwarding_clears_declared_keys() {
        let mut ctx = ctx();
        ctx.set("domSnapshot", json!("<html>")).unwrap();
        ctx.set("threads", json!(["a"])).unwrap();

        let rules = ForwardingRules {
            propagate: vec!["threads".to_string()],
            clear: vec!["domSnapshot".to_string()],
        };
        let decision = apply_forwarding(&mut ctx, Some(&rules));

        assert!(ctx.get("domSnapshot").is_none());
        assert_eq!(ctx.get("threads"), Some(&json!(["a"])));
        assert_eq!(decision.cleared, vec!["domSnapshot"]);
        assert_eq!(decision.propagated, vec!["threads"]);
    }

    #[test]
    fn test_forwarding_clear_wins_over_propagate() {
        let mut ctx = ctx();
        ctx.set("both", json!(1)).unwrap();
        let rules = ForwardingRules {
            propagate: vec!["both".to_string()],
            clear: vec!["both".to_string()],
        };
        let decision = apply_forwarding(&mut ctx, Some(&rules));
        assert!(ctx.get("both").is_none());
        assert_eq!(decision.cleared, vec!["both"]);
        assert!(decision.propagated.is_empty());
    }

    #[test]
    fn test_forwarding_sweeps_oversized_values() {
        let mut ctx = ctx();
        ctx.set("pageDump", json!("x".repeat(FORWARD_SIZE_LIMIT + 10)))
            .unwrap();
        ctx.set("small", json!("ok")).unwrap();

        let decision = apply_forwarding(&mut ctx, None);
        assert!(ctx.get("pageDump").is_none());
        assert_eq!(ctx.get("small"), Some(&json!("ok")));
        assert_eq!(decision.cleared, vec!["pageDump"]);
    }

    #[test]
    fn test_propagate_exempts_oversized_value() {
        let mut ctx = ctx();
        ctx.set("bigList", json!("x".repeat(FORWARD_SIZE_LIMIT + 10)))
            .unwrap();
        let rules = ForwardingRules {
            propagate: vec!["bigList".to_string()],
            clear: vec![],
        };
        let decision = apply_forwarding(&mut ctx, Some(&rules));
        assert!(ctx.get("bigList").is_some());
        assert_eq!(decision.propagated, vec!["bigList"]);
        assert!(decision.cleared.is_empty());
    }

    // -----------------------------------------------------------------------
    // Pipeline commit
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_commit_first_try() {
        let store = FlakyStore::new(0);
        let pipeline = MemoryPipeline::new(&store);
        pipeline.commit(draft().finish()).await.unwrap();
        assert_eq!(store.stored(), 1);
    }

    #[tokio::test]
    async fn test_commit_retries_then_succeeds() {
        let store = FlakyStore::new(2);
        let pipeline = MemoryPipeline::with_retry_schedule(&store, vec![1, 1, 1]);
        pipeline.commit(draft().finish()).await.unwrap();
        assert_eq!(store.stored(), 1);
    }

    #[tokio::test]
    async fn test_commit_exhausts_schedule() {
        let store = FlakyStore::new(10);
        let pipeline = MemoryPipeline::with_retry_schedule(&store, vec![1, 1, 1]);
        let err = pipeline.commit(draft().finish()).await.unwrap_err();
        match err {
            MemoryError::Persistence { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.stored(), 0);
    }

    #[tokio::test]
    async fn test_query_narrows_by_node() {
        let store = FlakyStore::new(0);
        let pipeline = MemoryPipeline::new(&store);

        let execution_id = Uuid::now_v7();
        for (node, index) in [("a", 0), ("a", 1), ("b", 0)] {
            let d = ArtifactDraft::begin(execution_id, node, index, ArtifactInputs::default());
            pipeline.commit(d.finish()).await.unwrap();
        }

        let all = pipeline.query(execution_id, None).await.unwrap();
        assert_eq!(all.len(), 3);
        let only_a = pipeline.query(execution_id, Some("a")).await.unwrap();
        assert_eq!(only_a.len(), 2);
    }
}
