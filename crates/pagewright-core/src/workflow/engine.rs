//! The workflow engine: one document in, one [`RunOutcome`] out.
//!
//! A run is strictly sequential. The engine walks the graph from the entry
//! node, following plain edges for completed nodes and path-map jumps for
//! route nodes, until a node fails, a node escalates, the run is aborted, or
//! there is no successor left. `run` itself never returns `Err`: every
//! terminal condition is folded into the outcome's status so callers always
//! get the visited trail, the final context snapshot, and the last artifact
//! reference.
//!
//! Cancellation is cooperative. `abort` cancels the run's token; in-flight
//! action drafts are flushed with aborted status before the walk unwinds, so
//! the artifact trail never ends mid-action.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pagewright_types::run::{NodeStatus, RunOutcome, RunStatus};
use pagewright_types::workflow::WorkflowDocument;

use crate::credential::{CredentialError, CredentialInjector};
use crate::memory::{MemoryError, MemoryPipeline};
use crate::provider::{
    ArtifactStore, DynBrowserProvider, DynCognitionProvider, DynSecretResolver, DynSessionProvider,
};
use crate::resolver::ActionResolver;
use crate::selector::SelectorCache;
use crate::workflow::context::{ContextError, ExecutionContext};
use crate::workflow::graph::WorkflowIndex;
use crate::workflow::node_runner::{NodePass, NodeRunner, RunState};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Run-terminating conditions. Ordinary node failures stay inside
/// [`NodeOutcome`](pagewright_types::run::NodeOutcome) values; whatever
/// reaches this type stops the walk.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("workflow references unknown node \"{0}\"")]
    UnknownNode(String),

    #[error("node {node_id} failed: {reason}")]
    NodeFailed { node_id: String, reason: String },

    #[error("circuit breaker tripped in {node_id} after {failures} consecutive failures")]
    CircuitBreakerTripped { node_id: String, failures: u32 },

    #[error("node {node_id} escalated: {reason}")]
    Escalation { node_id: String, reason: String },

    #[error("execution timeout after {timeout_ms} ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("run aborted")]
    Aborted,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns the provider handles and the process-wide selector cache; executes
/// one document at a time per call, any number of calls concurrently.
pub struct WorkflowEngine<S> {
    browser: DynBrowserProvider,
    cognition: DynCognitionProvider,
    secrets: DynSecretResolver,
    session: DynSessionProvider,
    pipeline: MemoryPipeline<S>,
    cache: SelectorCache,
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<S: ArtifactStore> WorkflowEngine<S> {
    pub fn new(
        browser: DynBrowserProvider,
        cognition: DynCognitionProvider,
        secrets: DynSecretResolver,
        session: DynSessionProvider,
        store: S,
    ) -> Self {
        Self {
            browser,
            cognition,
            secrets,
            session,
            pipeline: MemoryPipeline::new(store),
            cache: SelectorCache::new(),
            cancellations: DashMap::new(),
        }
    }

    /// Replace the selector cache, e.g. to apply a configured reliability
    /// floor before the first run.
    pub fn with_selector_cache(mut self, cache: SelectorCache) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the artifact-store retry schedule with a configured one.
    pub fn with_artifact_retry(mut self, retry_ms: Vec<u64>) -> Self {
        self.pipeline.set_retry_schedule(retry_ms);
        self
    }

    /// The selector cache shared across every run of this engine.
    pub fn selector_cache(&self) -> &SelectorCache {
        &self.cache
    }

    /// Artifact pipeline, for post-run queries.
    pub fn pipeline(&self) -> &MemoryPipeline<S> {
        &self.pipeline
    }

    /// Execution IDs currently in flight.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellations.iter().map(|entry| *entry.key()).collect()
    }

    /// Request cancellation of a running execution. Returns false when the
    /// execution is unknown or already finished. The run winds down
    /// cooperatively; in-flight artifacts are flushed before it reports
    /// [`RunStatus::Aborted`].
    pub fn abort(&self, execution_id: Uuid) -> bool {
        match self.cancellations.get(&execution_id) {
            Some(entry) => {
                tracing::info!(execution = %execution_id, "abort requested");
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute one document to completion.
    pub async fn run(
        &self,
        document: &WorkflowDocument,
        initial: HashMap<String, Value>,
    ) -> RunOutcome {
        let execution_id = Uuid::now_v7();
        let started_at = Utc::now();
        let token = CancellationToken::new();
        self.cancellations.insert(execution_id, token.clone());
        tracing::info!(
            workflow = %document.meta.id,
            execution = %execution_id,
            "run started"
        );

        let outcome = self
            .run_inner(document, initial, execution_id, started_at, &token)
            .await;
        self.cancellations.remove(&execution_id);

        tracing::info!(
            workflow = %document.meta.id,
            execution = %execution_id,
            status = %outcome.status,
            nodes = outcome.visited.len(),
            "run finished"
        );
        outcome
    }

    async fn run_inner(
        &self,
        document: &WorkflowDocument,
        initial: HashMap<String, Value>,
        execution_id: Uuid,
        started_at: DateTime<Utc>,
        token: &CancellationToken,
    ) -> RunOutcome {
        let workflow_id = document.meta.id.as_str();
        let ctx = ExecutionContext::with_initial(workflow_id, execution_id, initial);

        let index = WorkflowIndex::build(&document.workflow);
        let entry = index.entry().to_string();
        if !index.contains(&entry) {
            return self.failed_before_start(
                execution_id,
                workflow_id,
                started_at,
                &ctx,
                EngineError::UnknownNode(entry).to_string(),
            );
        }

        // Required credentials must resolve before anything touches a page.
        let injector = CredentialInjector::new(self.secrets.clone(), &document.credentials);
        if let Err(err) = injector.check_required().await {
            return self.failed_before_start(
                execution_id,
                workflow_id,
                started_at,
                &ctx,
                err.to_string(),
            );
        }

        let handle = match self.session.acquire_boxed(execution_id).await {
            Ok(handle) => handle,
            Err(err) => {
                return self.failed_before_start(
                    execution_id,
                    workflow_id,
                    started_at,
                    &ctx,
                    format!("session unavailable: {err}"),
                );
            }
        };
        tracing::debug!(endpoint = %handle.endpoint, "session acquired");

        let resolver = ActionResolver::new(self.browser.clone(), self.cache.clone());
        let runner = NodeRunner {
            index,
            config: &document.config,
            resolver: &resolver,
            injector: &injector,
            browser: &self.browser,
            cognition: &self.cognition,
            pipeline: &self.pipeline,
        };
        let mut state = RunState::new(ctx, token.clone());

        // The whole-run ceiling races the walk. On expiry the token is
        // cancelled and the walk is awaited to completion so in-flight
        // artifact drafts land in the store before the outcome is built.
        let ceiling = document.config.execution_timeout_ms;
        let mut timed_out = false;
        let walked = {
            let walk = walk_graph(&runner, &entry, &mut state);
            tokio::pin!(walk);
            tokio::select! {
                walked = &mut walk => walked,
                _ = tokio::time::sleep(Duration::from_millis(ceiling)) => {
                    tracing::warn!(
                        execution = %execution_id,
                        timeout_ms = ceiling,
                        "execution timeout, cancelling run"
                    );
                    timed_out = true;
                    token.cancel();
                    walk.await
                }
            }
        };

        let (status, error, failed_node) = match walked {
            Ok(()) => (RunStatus::Succeeded, None, None),
            Err(EngineError::Aborted) => {
                let error = if timed_out {
                    EngineError::ExecutionTimeout { timeout_ms: ceiling }.to_string()
                } else {
                    EngineError::Aborted.to_string()
                };
                (RunStatus::Aborted, Some(error), None)
            }
            Err(EngineError::Escalation { node_id, reason }) => {
                (RunStatus::Escalated, Some(reason), Some(node_id))
            }
            Err(EngineError::NodeFailed { node_id, reason }) => {
                (RunStatus::Failed, Some(reason), Some(node_id))
            }
            Err(EngineError::CircuitBreakerTripped { node_id, failures }) => {
                let message =
                    format!("circuit breaker tripped after {failures} consecutive failures");
                (RunStatus::Failed, Some(message), Some(node_id))
            }
            Err(other) => (RunStatus::Failed, Some(other.to_string()), None),
        };

        if status == RunStatus::Aborted {
            if let Err(err) = self.browser.close_boxed().await {
                tracing::warn!(error = %err, "browser close failed during abort");
            }
        }
        if let Err(err) = self.session.release_boxed(execution_id).await {
            tracing::warn!(execution = %execution_id, error = %err, "session release failed");
        }

        RunOutcome {
            execution_id,
            workflow_id: workflow_id.to_string(),
            status,
            error,
            failed_node,
            last_artifact: state.last_artifact,
            visited: state.visited,
            context: state.ctx.snapshot(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Outcome for failures before the walk starts (no nodes visited, no
    /// session held).
    fn failed_before_start(
        &self,
        execution_id: Uuid,
        workflow_id: &str,
        started_at: DateTime<Utc>,
        ctx: &ExecutionContext,
        error: String,
    ) -> RunOutcome {
        tracing::warn!(workflow = workflow_id, error = %error, "run refused");
        RunOutcome {
            execution_id,
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Failed,
            error: Some(error),
            failed_node: None,
            last_artifact: None,
            visited: Vec::new(),
            context: ctx.snapshot(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph walk
// ---------------------------------------------------------------------------

async fn walk_graph<S: ArtifactStore>(
    runner: &NodeRunner<'_, S>,
    entry: &str,
    state: &mut RunState,
) -> Result<(), EngineError> {
    let mut current = Some(entry.to_string());
    while let Some(id) = current {
        let pass = runner.run_node(&id, state).await?;
        current = match pass {
            NodePass::Completed(outcome) => match outcome.status {
                NodeStatus::Succeeded => runner.index.successor(&id).map(str::to_string),
                NodeStatus::Failed => {
                    return Err(EngineError::NodeFailed {
                        node_id: id,
                        reason: outcome
                            .error
                            .unwrap_or_else(|| "node failed".to_string()),
                    });
                }
                NodeStatus::Escalated => {
                    return Err(EngineError::Escalation {
                        node_id: id,
                        reason: outcome
                            .error
                            .unwrap_or_else(|| "human attention required".to_string()),
                    });
                }
            },
            NodePass::Routed { next } => Some(next),
        };
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use secrecy::SecretString;
    use serde_json::json;

    use pagewright_types::action::{
        ActionKind, ActionReceipt, ActionRequest, ElementFingerprint, ElementState, Observation,
        PageState,
    };
    use pagewright_types::artifact::{ActionStatus, MemoryArtifact, ResolutionPath};
    use pagewright_types::error::ProviderError;

    use crate::provider::{
        BrowserProvider, CognitionProvider, SecretResolver, SessionHandle, SessionProvider,
    };

    // -----------------------------------------------------------------------
    // Stub providers
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct StubBrowser {
        /// Selectors that fail act/extract dispatches.
        dead_selectors: Vec<String>,
        /// Instruction substring -> extraction payload.
        extract_data: Vec<(String, Value)>,
        /// Selector -> element states for assert queries.
        elements: Vec<(String, Vec<ElementState>)>,
        fingerprint: Option<ElementFingerprint>,
        /// Scripted observe responses, consumed front to back.
        observations: Mutex<VecDeque<Vec<Observation>>>,
        /// Delay injected into every act/extract dispatch.
        stall_ms: u64,
        url: Mutex<String>,
        calls: Mutex<Vec<(ActionKind, Option<String>)>>,
        closed: AtomicBool,
    }

    impl StubBrowser {
        fn at(url: &str) -> Self {
            let browser = Self::default();
            *browser.url.lock().unwrap() = url.to_string();
            browser
        }

        fn note(&self, kind: ActionKind, selector: Option<String>) {
            self.calls.lock().unwrap().push((kind, selector));
        }

        fn kinds(&self) -> Vec<ActionKind> {
            self.calls.lock().unwrap().iter().map(|(k, _)| *k).collect()
        }

        fn receipt(&self) -> ActionReceipt {
            ActionReceipt {
                current_url: Some(self.url.lock().unwrap().clone()),
                navigated: false,
                element_changed: true,
                data: None,
                fingerprint: self.fingerprint.clone(),
            }
        }
    }

    impl BrowserProvider for Arc<StubBrowser> {
        async fn act(&self, request: &ActionRequest) -> Result<ActionReceipt, ProviderError> {
            self.note(request.kind, request.selector.clone());
            if self.stall_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.stall_ms)).await;
            }
            if let Some(selector) = &request.selector {
                if self.dead_selectors.contains(selector) {
                    return Err(ProviderError::NotFound(selector.clone()));
                }
            }
            Ok(self.receipt())
        }

        async fn extract(&self, request: &ActionRequest) -> Result<ActionReceipt, ProviderError> {
            self.note(request.kind, request.selector.clone());
            if let Some(selector) = &request.selector {
                if self.dead_selectors.contains(selector) {
                    return Err(ProviderError::NotFound(selector.clone()));
                }
            }
            let data = self
                .extract_data
                .iter()
                .find(|(needle, _)| request.instruction.contains(needle.as_str()))
                .map(|(_, payload)| payload.clone());
            Ok(ActionReceipt {
                data,
                ..self.receipt()
            })
        }

        async fn observe(
            &self,
            _instruction: &str,
            _timeout_ms: u64,
        ) -> Result<Vec<Observation>, ProviderError> {
            self.note(ActionKind::Observe, None);
            Ok(self
                .observations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn navigate(
            &self,
            url: &str,
            _timeout_ms: u64,
        ) -> Result<ActionReceipt, ProviderError> {
            self.note(ActionKind::Navigate, None);
            *self.url.lock().unwrap() = url.to_string();
            Ok(ActionReceipt {
                navigated: true,
                ..self.receipt()
            })
        }

        async fn page(&self) -> Result<PageState, ProviderError> {
            Ok(PageState {
                url: self.url.lock().unwrap().clone(),
                title: "Stub page".to_string(),
            })
        }

        async fn query(&self, selector: &str) -> Result<Vec<ElementState>, ProviderError> {
            Ok(self
                .elements
                .iter()
                .find(|(s, _)| s == selector)
                .map(|(_, states)| states.clone())
                .unwrap_or_default())
        }

        async fn close(&self) -> Result<(), ProviderError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubCognition {
        /// Scripted complete() results, consumed front to back.
        completions: Mutex<VecDeque<Value>>,
        verdicts: Vec<bool>,
        complete_calls: AtomicU32,
    }

    impl StubCognition {
        fn completing(values: Vec<Value>) -> Self {
            Self {
                completions: Mutex::new(values.into()),
                ..Self::default()
            }
        }
    }

    impl CognitionProvider for Arc<StubCognition> {
        async fn complete(
            &self,
            _prompt: &str,
            _schema: Option<&Value>,
            _timeout_ms: u64,
        ) -> Result<Value, ProviderError> {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            self.completions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Unavailable("no completion scripted".to_string()))
        }

        async fn classify(
            &self,
            _instruction: &str,
            _items: &[Value],
        ) -> Result<Vec<bool>, ProviderError> {
            if self.verdicts.is_empty() {
                return Err(ProviderError::Unavailable("no verdicts scripted".to_string()));
            }
            Ok(self.verdicts.clone())
        }
    }

    struct MapSecrets {
        entries: HashMap<(String, String), String>,
    }

    impl MapSecrets {
        fn with(entries: &[(&str, &str, &str)]) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(s, f, v)| ((s.to_string(), f.to_string()), v.to_string()))
                    .collect(),
            }
        }
    }

    impl SecretResolver for MapSecrets {
        async fn get_secret(
            &self,
            service: &str,
            field: &str,
        ) -> Result<Option<SecretString>, ProviderError> {
            Ok(self
                .entries
                .get(&(service.to_string(), field.to_string()))
                .map(|value| SecretString::from(value.clone())))
        }
    }

    #[derive(Default)]
    struct CountingSession {
        acquired: AtomicU32,
        released: AtomicU32,
    }

    impl SessionProvider for Arc<CountingSession> {
        async fn acquire(&self, _execution_id: Uuid) -> Result<SessionHandle, ProviderError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(SessionHandle {
                endpoint: "stub://session".to_string(),
                tabs: Vec::new(),
            })
        }

        async fn release(&self, _execution_id: Uuid) -> Result<(), ProviderError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStore {
        artifacts: Mutex<Vec<MemoryArtifact>>,
    }

    impl ArtifactStore for Arc<MemStore> {
        async fn append(&self, artifact: &MemoryArtifact) -> Result<(), ProviderError> {
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
                    a.execution_id == execution_id && node_id.map_or(true, |n| a.node_id == n)
                })
                .cloned()
                .collect())
        }
    }

    // -----------------------------------------------------------------------
    // Harness
    // -----------------------------------------------------------------------

    struct Harness {
        engine: Arc<WorkflowEngine<Arc<MemStore>>>,
        browser: Arc<StubBrowser>,
        cognition: Arc<StubCognition>,
        session: Arc<CountingSession>,
        store: Arc<MemStore>,
    }

    impl Harness {
        fn artifacts_for(&self, node_id: &str) -> Vec<MemoryArtifact> {
            self.store
                .artifacts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.node_id == node_id)
                .cloned()
                .collect()
        }
    }

    fn harness(browser: StubBrowser) -> Harness {
        harness_with(browser, StubCognition::default(), &[])
    }

    fn harness_with(
        browser: StubBrowser,
        cognition: StubCognition,
        secrets: &[(&str, &str, &str)],
    ) -> Harness {
        let browser = Arc::new(browser);
        let cognition = Arc::new(cognition);
        let session = Arc::new(CountingSession::default());
        let store = Arc::new(MemStore::default());
        let engine = Arc::new(WorkflowEngine::new(
            Arc::new(browser.clone()),
            Arc::new(cognition.clone()),
            Arc::new(MapSecrets::with(secrets)),
            Arc::new(session.clone()),
            store.clone(),
        ));
        Harness {
            engine,
            browser,
            cognition,
            session,
            store,
        }
    }

    fn document(nodes: Value, edges: Value, entry: &str) -> WorkflowDocument {
        serde_json::from_value(json!({
            "meta": {"id": "test-flow", "title": "Test flow", "version": "1.0.0"},
            "workflow": {"nodes": nodes, "edges": edges, "entry": entry},
        }))
        .unwrap()
    }

    fn initial(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Straight-line execution
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_straight_line_run_succeeds() {
        let h = harness(StubBrowser::at("https://mail.google.com/mail/u/0"));
        let doc = document(
            json!([
                {"id": "open", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "act", "selector": "#inbox", "instruction": "open the inbox"}}
                ]},
                {"id": "refresh", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "act", "selector": "#refresh", "instruction": "click refresh"}}
                ]},
            ]),
            json!([{"from": "open", "to": "refresh"}]),
            "open",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.visited, vec!["open", "refresh"]);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.workflow_id, "test-flow");
        assert!(outcome.started_at <= outcome.finished_at);

        let last = outcome.last_artifact.unwrap();
        assert_eq!(last.node_id, "refresh");
        assert_eq!(last.execution_id, outcome.execution_id);

        assert_eq!(h.store.artifacts.lock().unwrap().len(), 2);
        assert_eq!(h.session.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequence_runs_children_in_order() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([
                {"id": "steps", "type": "sequence", "children": ["first", "second"]},
                {"id": "first", "type": "atomic_task", "reachableViaRouting": true, "actions": [
                    {"primary": {"kind": "act", "selector": "#a", "instruction": "step one"}}
                ]},
                {"id": "second", "type": "atomic_task", "reachableViaRouting": true, "actions": [
                    {"primary": {"kind": "act", "selector": "#b", "instruction": "step two"}}
                ]},
            ]),
            json!([]),
            "steps",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.visited, vec!["steps", "first", "second"]);
    }

    // -----------------------------------------------------------------------
    // Routing on extracted state
    // -----------------------------------------------------------------------

    fn two_factor_document() -> WorkflowDocument {
        document(
            json!([
                {"id": "check", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "extract", "instruction": "check whether the two-factor prompt is shown"}}
                ]},
                {"id": "gate", "type": "route", "value": "twoFactorRequired",
                 "paths": {"Y": "manual"}, "default": "auto"},
                {"id": "manual", "type": "atomic_task", "reachableViaRouting": true},
                {"id": "auto", "type": "atomic_task", "reachableViaRouting": true},
            ]),
            json!([{"from": "check", "to": "gate"}]),
            "check",
        )
    }

    #[tokio::test]
    async fn test_route_follows_extracted_true_to_mapped_label() {
        let mut browser = StubBrowser::at("https://accounts.google.com");
        browser.extract_data = vec![(
            "two-factor".to_string(),
            json!({"twoFactorRequired": true}),
        )];
        let h = harness(browser);

        let outcome = h.engine.run(&two_factor_document(), HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert!(outcome.visited.contains(&"manual".to_string()));
        assert!(!outcome.visited.contains(&"auto".to_string()));
        assert_eq!(outcome.context["twoFactorRequired"], json!(true));
    }

    #[tokio::test]
    async fn test_route_falls_through_to_default_on_false() {
        let mut browser = StubBrowser::at("https://accounts.google.com");
        browser.extract_data = vec![(
            "two-factor".to_string(),
            json!({"twoFactorRequired": false}),
        )];
        let h = harness(browser);

        let outcome = h.engine.run(&two_factor_document(), HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert!(outcome.visited.contains(&"auto".to_string()));
        assert!(!outcome.visited.contains(&"manual".to_string()));
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_iterate_runs_once_per_item_and_tracks_index() {
        let h = harness(StubBrowser::at("https://mail.google.com/mail/u/0"));
        let doc = document(
            json!([
                {"id": "drain", "type": "iterate", "iteratorConfig": {
                    "queueKey": "emails", "maxIterations": 10, "body": ["touch"]
                }},
                {"id": "touch", "type": "atomic_task", "reachableViaRouting": true, "actions": [
                    {"primary": {"kind": "act", "selector": "#row", "instruction": "open the email"}}
                ]},
            ]),
            json!([]),
            "drain",
        );

        let outcome = h
            .engine
            .run(
                &doc,
                initial(&[("emails", json!(["a@x.test", "b@x.test", "c@x.test"]))]),
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        let touches = outcome.visited.iter().filter(|id| *id == "touch").count();
        assert_eq!(touches, 3);
        assert_eq!(outcome.context["index"], json!(3));
        assert_eq!(outcome.context["length"], json!(3));
        // Loop scope variables never leak into the final snapshot.
        assert!(outcome.context.get("currentItem").is_none());

        let artifacts = h.artifacts_for("touch");
        let indices: Vec<u32> = artifacts.iter().map(|a| a.action_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_iterate_exit_condition_stops_early() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([
                {"id": "drain", "type": "iterate", "iteratorConfig": {
                    "queueKey": "items", "body": ["touch"], "exitWhen": "currentIndex == 0"
                }},
                {"id": "touch", "type": "atomic_task", "reachableViaRouting": true, "actions": [
                    {"primary": {"kind": "act", "selector": "#row", "instruction": "touch the row"}}
                ]},
            ]),
            json!([]),
            "drain",
        );

        let outcome = h
            .engine
            .run(&doc, initial(&[("items", json!([1, 2, 3]))]))
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(
            outcome.visited.iter().filter(|id| *id == "touch").count(),
            1
        );
        assert_eq!(outcome.context["index"], json!(1));
    }

    #[tokio::test]
    async fn test_iterate_stops_at_iteration_cap() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([
                {"id": "drain", "type": "iterate", "iteratorConfig": {
                    "queueKey": "items", "maxIterations": 2, "body": ["touch"]
                }},
                {"id": "touch", "type": "atomic_task", "reachableViaRouting": true, "actions": [
                    {"primary": {"kind": "act", "selector": "#row", "instruction": "touch the row"}}
                ]},
            ]),
            json!([]),
            "drain",
        );

        let outcome = h
            .engine
            .run(&doc, initial(&[("items", json!([1, 2, 3, 4, 5]))]))
            .await;

        // No exit condition ever fires; the cap alone bounds the walk.
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(
            outcome.visited.iter().filter(|id| *id == "touch").count(),
            2
        );
        assert_eq!(outcome.context["index"], json!(2));
        assert_eq!(outcome.context["length"], json!(5));
    }

    #[tokio::test]
    async fn test_iterate_missing_queue_fails_node() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([
                {"id": "drain", "type": "iterate", "iteratorConfig": {
                    "queueKey": "absent", "body": ["touch"]
                }},
                {"id": "touch", "type": "atomic_task", "reachableViaRouting": true},
            ]),
            json!([]),
            "drain",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failed_node.as_deref(), Some("drain"));
        assert!(outcome.error.unwrap().contains("absent"));
    }

    // -----------------------------------------------------------------------
    // Assertions against page state
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_url_assert_passes_on_substring_match() {
        let h = harness(StubBrowser::at("https://mail.google.com/mail/u/0"));
        let doc = document(
            json!([
                {"id": "checkpoint", "type": "assert", "conditions": [
                    {"type": "urlMatch", "value": "mail.google.com/mail"}
                ]},
            ]),
            json!([]),
            "checkpoint",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_url_assert_fails_on_other_origin() {
        let h = harness(StubBrowser::at("https://accounts.google.com"));
        let doc = document(
            json!([
                {"id": "checkpoint", "type": "assert", "conditions": [
                    {"type": "urlMatch", "value": "mail.google.com/mail"}
                ]},
            ]),
            json!([]),
            "checkpoint",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failed_node.as_deref(), Some("checkpoint"));
        assert!(outcome.error.unwrap().contains("mail.google.com/mail"));
    }

    #[tokio::test]
    async fn test_assert_escalate_pauses_run() {
        let mut browser = StubBrowser::at("https://example.com");
        browser.elements = vec![("#captcha".to_string(), vec![ElementState {
            visible: true,
            enabled: true,
            text: String::new(),
        }])];
        let h = harness(browser);
        let doc = document(
            json!([
                {"id": "guard", "type": "assert", "failureAction": "escalate", "conditions": [
                    {"type": "elementHidden", "selector": "#captcha"}
                ]},
            ]),
            json!([]),
            "guard",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Escalated);
        assert_eq!(outcome.failed_node.as_deref(), Some("guard"));
    }

    // -----------------------------------------------------------------------
    // Selector healing across runs
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fallback_heals_selector_and_repeat_run_uses_cache() {
        let mut browser = StubBrowser::at("https://mail.google.com/mail/u/0");
        browser.dead_selectors = vec!["#old-button".to_string()];
        browser.fingerprint = Some(ElementFingerprint {
            tag: Some("button".to_string()),
            name: Some("archive".to_string()),
            ..ElementFingerprint::default()
        });
        let h = harness(browser);
        let doc = document(
            json!([
                {"id": "archive", "type": "atomic_task", "actions": [
                    {
                        "primary": {"kind": "act", "selector": "#old-button",
                                    "instruction": "click the archive button"},
                        "fallback": {"kind": "ai-act",
                                     "instruction": "find and click the archive button"},
                        "monitoring": {"learnSelectors": true}
                    }
                ]},
            ]),
            json!([]),
            "archive",
        );

        let first = h.engine.run(&doc, HashMap::new()).await;
        assert_eq!(first.status, RunStatus::Succeeded);
        let healed = h.artifacts_for("archive");
        assert!(matches!(healed[0].processing.path, ResolutionPath::Fallback));
        assert!(healed[0].processing.learned.is_some());
        assert_eq!(h.engine.selector_cache().len(), 1);

        let second = h.engine.run(&doc, HashMap::new()).await;
        assert_eq!(second.status, RunStatus::Succeeded);
        let repeat = h.artifacts_for("archive");
        assert!(matches!(repeat[1].processing.path, ResolutionPath::Cached));
        assert_eq!(
            repeat[1].processing.selector_used.as_deref(),
            Some("button[name=\"archive\"]")
        );

        // The AI path ran exactly once, in the first run.
        let ai_dispatches = h
            .browser
            .kinds()
            .iter()
            .filter(|k| **k == ActionKind::AiAct)
            .count();
        assert_eq!(ai_dispatches, 1);
    }

    // -----------------------------------------------------------------------
    // Circuit breaker
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_circuit_breaker_trips_after_five_consecutive_failures() {
        let mut browser = StubBrowser::at("https://example.com");
        browser.dead_selectors = vec!["#gone".to_string()];
        let h = harness(browser);
        let doc = document(
            json!([
                {"id": "drain", "type": "iterate", "iteratorConfig": {
                    "queueKey": "jobs", "body": ["flaky"]
                }},
                {"id": "flaky", "type": "atomic_task", "reachableViaRouting": true,
                 "retryPolicy": {"maxAttempts": 1, "backoffMs": [0]},
                 "actions": [
                    {"primary": {"kind": "act", "selector": "#gone", "instruction": "click the ghost"}}
                ]},
                {"id": "after", "type": "atomic_task"},
            ]),
            json!([{"from": "drain", "to": "after"}]),
            "drain",
        );

        let outcome = h
            .engine
            .run(&doc, initial(&[("jobs", json!([1, 2, 3, 4, 5, 6, 7]))]))
            .await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failed_node.as_deref(), Some("drain"));
        assert!(outcome.error.unwrap().contains("circuit breaker"));
        // Five body passes, then the breaker stops the walk cold.
        assert_eq!(
            outcome.visited.iter().filter(|id| *id == "flaky").count(),
            5
        );
        assert!(!outcome.visited.contains(&"after".to_string()));
    }

    // -----------------------------------------------------------------------
    // try/catch/finally
    // -----------------------------------------------------------------------

    fn handle_document(escalate: bool, catch: Option<&str>) -> WorkflowDocument {
        let mut handle = json!({
            "id": "guard", "type": "handle", "try": "brittle", "escalate": escalate
        });
        if let Some(catch) = catch {
            handle["catch"] = json!(catch);
        }
        document(
            json!([
                handle,
                {"id": "brittle", "type": "atomic_task", "reachableViaRouting": true,
                 "retryPolicy": {"maxAttempts": 1, "backoffMs": [0]},
                 "actions": [
                    {"primary": {"kind": "act", "selector": "#broken", "instruction": "press the broken button"}}
                ]},
                {"id": "rescue", "type": "atomic_task", "reachableViaRouting": true},
                {"id": "after", "type": "atomic_task"},
            ]),
            json!([{"from": "guard", "to": "after"}]),
            "guard",
        )
    }

    #[tokio::test]
    async fn test_handle_catch_recovers_and_run_continues() {
        let mut browser = StubBrowser::at("https://example.com");
        browser.dead_selectors = vec!["#broken".to_string()];
        let h = harness(browser);

        let outcome = h
            .engine
            .run(&handle_document(false, Some("rescue")), HashMap::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert!(outcome.visited.contains(&"rescue".to_string()));
        assert!(outcome.visited.contains(&"after".to_string()));
    }

    #[tokio::test]
    async fn test_handle_escalate_surfaces_escalated_status() {
        let mut browser = StubBrowser::at("https://example.com");
        browser.dead_selectors = vec!["#broken".to_string()];
        let h = harness(browser);

        let outcome = h
            .engine
            .run(&handle_document(true, None), HashMap::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Escalated);
        assert_eq!(outcome.failed_node.as_deref(), Some("guard"));
        assert!(outcome.error.unwrap().contains("brittle"));
        assert!(!outcome.visited.contains(&"after".to_string()));
    }

    // -----------------------------------------------------------------------
    // Transform / cognition / filter
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_transform_writes_expression_result() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([
                {"id": "summarize", "type": "transform",
                 "expression": "total * 2", "outputKey": "doubled"},
            ]),
            json!([]),
            "summarize",
        );

        let outcome = h.engine.run(&doc, initial(&[("total", json!(7))])).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.context["doubled"].as_f64(), Some(14.0));
    }

    #[tokio::test]
    async fn test_cognition_retries_until_schema_valid() {
        let cognition = StubCognition::completing(vec![
            json!({"wrong": "shape"}),
            json!({"category": "urgent"}),
        ]);
        let h = harness_with(StubBrowser::at("https://example.com"), cognition, &[]);
        let doc = document(
            json!([
                {"id": "classify", "type": "cognition",
                 "prompt": "Classify the email: {{ subject }}",
                 "outputKey": "verdict",
                 "schema": {"type": "object", "required": ["category"]},
                 "retryPolicy": {"maxAttempts": 3, "backoffMs": [0, 0, 0]}},
            ]),
            json!([]),
            "classify",
        );

        let outcome = h
            .engine
            .run(&doc, initial(&[("subject", json!("Invoice overdue"))]))
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.context["verdict"], json!({"category": "urgent"}));
        assert_eq!(h.cognition.complete_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_filter_list_keeps_classified_items() {
        let cognition = StubCognition {
            verdicts: vec![true, false, true],
            ..StubCognition::default()
        };
        let h = harness_with(StubBrowser::at("https://example.com"), cognition, &[]);
        let doc = document(
            json!([
                {"id": "sift", "type": "filter_list",
                 "listKey": "emails", "instruction": "keep emails needing a reply",
                 "outputKey": "actionable"},
            ]),
            json!([]),
            "sift",
        );

        let outcome = h
            .engine
            .run(
                &doc,
                initial(&[("emails", json!(["urgent", "newsletter", "invoice"]))]),
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.context["actionable"], json!(["urgent", "invoice"]));
    }

    // -----------------------------------------------------------------------
    // Explore
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_explore_acts_until_goal_reached() {
        let browser = StubBrowser::at("https://example.com");
        browser.observations.lock().unwrap().push_back(vec![Observation {
            instruction: "click the next-page arrow".to_string(),
            selector: None,
            goal_reached: false,
        }]);
        browser.observations.lock().unwrap().push_back(vec![Observation {
            instruction: String::new(),
            selector: None,
            goal_reached: true,
        }]);
        let h = harness(browser);
        let doc = document(
            json!([
                {"id": "wander", "type": "explore",
                 "goal": "find the settings page", "maxActions": 5},
            ]),
            json!([]),
            "wander",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(h.artifacts_for("wander").len(), 1);
        let kinds = h.browser.kinds();
        assert_eq!(
            kinds.iter().filter(|k| **k == ActionKind::AiAct).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_explore_fails_when_budget_exhausted() {
        let browser = StubBrowser::at("https://example.com");
        for _ in 0..4 {
            browser.observations.lock().unwrap().push_back(vec![Observation {
                instruction: "scroll further".to_string(),
                selector: None,
                goal_reached: false,
            }]);
        }
        let h = harness(browser);
        let doc = document(
            json!([
                {"id": "wander", "type": "explore",
                 "goal": "find a link that does not exist", "maxActions": 2},
            ]),
            json!([]),
            "wander",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("2 actions"));
        assert_eq!(h.artifacts_for("wander").len(), 2);
    }

    // -----------------------------------------------------------------------
    // Credentials and preflight
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_required_credential_refuses_run_before_dispatch() {
        let h = harness(StubBrowser::at("https://accounts.google.com"));
        let doc: WorkflowDocument = serde_json::from_value(json!({
            "meta": {"id": "login-flow", "title": "Login", "version": "1.0.0"},
            "credentials": {"required": ["gmail.password"]},
            "workflow": {
                "nodes": [{"id": "login", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "act", "selector": "#pw",
                                 "instruction": "type {{gmail.password}} into the password field"}}
                ]}],
                "edges": [],
                "entry": "login"
            },
        }))
        .unwrap();

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("gmail.password"));
        assert!(outcome.visited.is_empty());
        assert!(h.browser.kinds().is_empty());
        assert_eq!(h.session.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_injected_secret_absent_from_context_and_artifacts() {
        let h = harness_with(
            StubBrowser::at("https://accounts.google.com"),
            StubCognition::default(),
            &[("gmail", "password", "hunter2")],
        );
        let doc: WorkflowDocument = serde_json::from_value(json!({
            "meta": {"id": "login-flow", "title": "Login", "version": "1.0.0"},
            "credentials": {"required": ["gmail.password"]},
            "workflow": {
                "nodes": [{"id": "login", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "act", "selector": "#pw",
                                 "instruction": "type {{gmail.password}} into the password field"}}
                ]}],
                "edges": [],
                "entry": "login"
            },
        }))
        .unwrap();

        let outcome = h.engine.run(&doc, HashMap::new()).await;
        assert_eq!(outcome.status, RunStatus::Succeeded);

        // The cleartext lives only for the span of the dispatch; neither the
        // final context snapshot nor the audit trail may carry it.
        let snapshot = serde_json::to_string(&outcome.context).unwrap();
        assert!(!snapshot.contains("hunter2"));

        let artifacts = h.artifacts_for("login");
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].inputs.instruction.contains("{{gmail.password}}"));
        let stored = serde_json::to_string(&artifacts[0]).unwrap();
        assert!(!stored.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unknown_entry_node_refuses_run() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([{"id": "real", "type": "atomic_task"}]),
            json!([]),
            "phantom",
        );

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("phantom"));
        assert_eq!(h.session.acquired.load(Ordering::SeqCst), 0);
    }

    // -----------------------------------------------------------------------
    // Forwarding
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_forwarding_clears_declared_keys() {
        let h = harness(StubBrowser::at("https://example.com"));
        let doc = document(
            json!([
                {"id": "consume", "type": "atomic_task",
                 "forward": {"propagate": [], "clear": ["scratch"]},
                 "actions": [
                    {"primary": {"kind": "act", "selector": "#go", "instruction": "press go"}}
                ]},
            ]),
            json!([]),
            "consume",
        );

        let outcome = h
            .engine
            .run(&doc, initial(&[("scratch", json!("temporary"))]))
            .await;

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert!(outcome.context.get("scratch").is_none());
        let artifacts = h.artifacts_for("consume");
        assert!(artifacts[0]
            .forwarding
            .cleared
            .contains(&"scratch".to_string()));
    }

    // -----------------------------------------------------------------------
    // Abort and timeout
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_abort_flushes_inflight_artifact() {
        let mut browser = StubBrowser::at("https://example.com");
        browser.stall_ms = 60_000;
        let h = harness(browser);
        let doc = document(
            json!([
                {"id": "slow", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "act", "selector": "#slow", "instruction": "wait forever"}}
                ]},
                {"id": "after", "type": "atomic_task"},
            ]),
            json!([{"from": "slow", "to": "after"}]),
            "slow",
        );

        let run_engine = h.engine.clone();
        let run_doc = doc.clone();
        let run = tokio::spawn(async move { run_engine.run(&run_doc, HashMap::new()).await });

        let abort_engine = h.engine.clone();
        let aborter = tokio::spawn(async move {
            loop {
                if let Some(id) = abort_engine.active_runs().first().copied() {
                    assert!(abort_engine.abort(id));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let outcome = run.await.unwrap();
        aborter.await.unwrap();

        assert_eq!(outcome.status, RunStatus::Aborted);
        assert!(!outcome.visited.contains(&"after".to_string()));
        let artifacts = h.artifacts_for("slow");
        assert_eq!(artifacts.len(), 1);
        assert!(matches!(artifacts[0].outputs.status, ActionStatus::Aborted));
        assert!(h.browser.closed.load(Ordering::SeqCst));
        assert_eq!(h.session.released.load(Ordering::SeqCst), 1);
        // Once finished the run can no longer be aborted.
        assert!(!h.engine.abort(outcome.execution_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout_aborts_run() {
        let mut browser = StubBrowser::at("https://example.com");
        browser.stall_ms = 60_000;
        let h = harness(browser);
        let doc: WorkflowDocument = serde_json::from_value(json!({
            "meta": {"id": "slow-flow", "title": "Slow", "version": "1.0.0"},
            "config": {"executionTimeoutMs": 100},
            "workflow": {
                "nodes": [{"id": "slow", "type": "atomic_task", "actions": [
                    {"primary": {"kind": "act", "selector": "#slow", "instruction": "wait forever"}}
                ]}],
                "edges": [],
                "entry": "slow"
            },
        }))
        .unwrap();

        let outcome = h.engine.run(&doc, HashMap::new()).await;

        assert_eq!(outcome.status, RunStatus::Aborted);
        assert!(outcome
            .error
            .unwrap()
            .contains("execution timeout after 100 ms"));
        let artifacts = h.artifacts_for("slow");
        assert_eq!(artifacts.len(), 1);
        assert!(matches!(artifacts[0].outputs.status, ActionStatus::Aborted));
    }
}
