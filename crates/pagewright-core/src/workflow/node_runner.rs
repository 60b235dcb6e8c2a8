//! Per-kind node handlers.
//!
//! One [`NodeRunner`] executes a node (and, for structural kinds, the nodes it
//! references) against the collaborator ports. Failure and escalation travel
//! as [`NodeOutcome`] values; only run-terminating conditions -- abort, a
//! tripped circuit breaker, an artifact store that will not acknowledge --
//! surface as [`EngineError`].
//!
//! Iteration is a first-class construct here, never a graph cycle: the iterate
//! handler owns its child scope, its breaker, and its termination cap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pagewright_types::action::{ActionKind, ActionRequest, WorkflowAction};
use pagewright_types::artifact::{
    ActionStatus, ArtifactInputs, ArtifactOutputs, ArtifactProcessing, ArtifactRef, ResolutionPath,
};
use pagewright_types::run::{NodeOutcome, NodePhase, NodeStatus};
use pagewright_types::workflow::{
    AssertCondition, FailureAction, IteratorConfig, NodeConfig, RetryPolicy, RunConfig,
    WorkflowNode,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::credential::CredentialInjector;
use crate::memory::{apply_forwarding, ArtifactDraft, MemoryPipeline};
use crate::provider::{ArtifactStore, DynBrowserProvider, DynCognitionProvider};
use crate::resolver::ActionResolver;
use crate::workflow::context::ExecutionContext;
use crate::workflow::engine::EngineError;
use crate::workflow::expression::ExpressionEngine;
use crate::workflow::graph::WorkflowIndex;
use crate::workflow::retry::{CircuitBreaker, RetryHandler};

/// Timeout for explore-loop observe/act dispatches, which carry no per-action
/// configuration of their own.
const EXPLORE_DISPATCH_TIMEOUT_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Mutable per-run state threaded through every handler.
pub struct RunState {
    pub ctx: ExecutionContext,
    pub cancel: CancellationToken,
    /// Node IDs in visitation order, body repeats included.
    pub visited: Vec<String>,
    /// Most recently committed artifact, the debugging entry point on failure.
    pub last_artifact: Option<ArtifactRef>,
    /// Per-node dispatch counters. A body node revisited by an iteration gets
    /// a fresh index each pass, keeping `(execution, node, index)` unique.
    action_counters: HashMap<String, u32>,
}

impl RunState {
    pub fn new(ctx: ExecutionContext, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            visited: Vec::new(),
            last_artifact: None,
            action_counters: HashMap::new(),
        }
    }

    fn next_action_index(&mut self, node_id: &str) -> u32 {
        let counter = self.action_counters.entry(node_id.to_string()).or_insert(0);
        let index = *counter;
        *counter += 1;
        index
    }
}

/// What a single node pass produced: a terminal outcome, or a routing jump
/// the engine must follow instead of the plain successor edge.
#[derive(Debug)]
pub enum NodePass {
    Completed(NodeOutcome),
    Routed { next: String },
}

/// How one loop iteration's body went.
enum IterationVerdict {
    Clean,
    Failed(String),
    Escalated(String),
}

// ---------------------------------------------------------------------------
// NodeRunner
// ---------------------------------------------------------------------------

/// Executes nodes for one run. Borrowed collaborators are owned by the engine;
/// everything mutable lives in [`RunState`].
pub struct NodeRunner<'a, S> {
    pub(crate) index: WorkflowIndex<'a>,
    pub(crate) config: &'a RunConfig,
    pub(crate) resolver: &'a ActionResolver,
    pub(crate) injector: &'a CredentialInjector,
    pub(crate) browser: &'a DynBrowserProvider,
    pub(crate) cognition: &'a DynCognitionProvider,
    pub(crate) pipeline: &'a MemoryPipeline<S>,
}

impl<'a, S: ArtifactStore> NodeRunner<'a, S> {
    /// Execute one node to its outcome.
    pub async fn run_node(&self, id: &str, state: &mut RunState) -> Result<NodePass, EngineError> {
        if state.cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }
        let node = self
            .index
            .node(id)
            .ok_or_else(|| EngineError::UnknownNode(id.to_string()))?;
        state.visited.push(id.to_string());
        tracing::info!(
            node = %node.id,
            kind = node.kind(),
            phase = NodePhase::Running.as_str(),
            "node dispatch"
        );

        let pass = match &node.config {
            NodeConfig::AtomicTask {} => NodePass::Completed(self.run_atomic(node, state).await?),
            NodeConfig::Sequence { children } => {
                NodePass::Completed(self.run_sequence(children, state).await?)
            }
            NodeConfig::Iterate { iterator_config } => {
                NodePass::Completed(self.run_iterate(node, iterator_config, state).await?)
            }
            NodeConfig::Route {
                value,
                paths,
                default,
            } => self.run_route(node, value, paths, default, state)?,
            NodeConfig::Assert {
                conditions,
                failure_action,
            } => NodePass::Completed(
                self.run_assert(node, conditions, *failure_action, state).await?,
            ),
            NodeConfig::Handle {
                try_node,
                catch_node,
                finally_node,
                escalate,
            } => NodePass::Completed(
                self.run_handle(
                    try_node,
                    catch_node.as_deref(),
                    finally_node.as_deref(),
                    *escalate,
                    state,
                )
                .await?,
            ),
            NodeConfig::Transform {
                expression,
                output_key,
            } => NodePass::Completed(self.run_transform(expression, output_key, state)),
            NodeConfig::Cognition {
                prompt,
                output_key,
                schema,
                timeout_ms,
            } => NodePass::Completed(
                self.run_cognition(node, prompt, output_key, schema.as_ref(), *timeout_ms, state)
                    .await?,
            ),
            NodeConfig::FilterList {
                list_key,
                instruction,
                output_key,
            } => NodePass::Completed(
                self.run_filter(node, list_key, instruction, output_key, state)
                    .await?,
            ),
            NodeConfig::Explore { goal, max_actions } => {
                NodePass::Completed(self.run_explore(node, goal, *max_actions, state).await?)
            }
        };

        // Action-dispatching kinds record forwarding in their artifacts; for
        // everything else the decision is applied here and logged.
        let dispatching = matches!(
            node.config,
            NodeConfig::AtomicTask {} | NodeConfig::Explore { .. }
        );
        let completed_ok = match &pass {
            NodePass::Completed(outcome) => outcome.is_success(),
            NodePass::Routed { .. } => true,
        };
        if completed_ok && !dispatching {
            let decision = apply_forwarding(&mut state.ctx, node.forward.as_ref());
            if !decision.cleared.is_empty() {
                tracing::debug!(node = %node.id, cleared = ?decision.cleared, "context keys cleared");
            }
        }

        if let NodePass::Completed(outcome) = &pass {
            match outcome.status {
                NodeStatus::Succeeded => {
                    tracing::info!(node = %node.id, phase = NodePhase::Succeeded.as_str(), "node done")
                }
                NodeStatus::Failed => {
                    tracing::warn!(
                        node = %node.id,
                        phase = NodePhase::Failed.as_str(),
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "node failed"
                    )
                }
                NodeStatus::Escalated => {
                    tracing::warn!(
                        node = %node.id,
                        reason = outcome.error.as_deref().unwrap_or("unspecified"),
                        "node escalated to a human"
                    )
                }
            }
        }
        Ok(pass)
    }

    /// Node retry policy, falling back to the document-level attempt count.
    fn effective_policy(&self, node: &WorkflowNode) -> RetryPolicy {
        node.retry_policy.clone().unwrap_or(RetryPolicy {
            max_attempts: self.config.retry_attempts,
            ..RetryPolicy::default()
        })
    }

    // -----------------------------------------------------------------------
    // atomic_task
    // -----------------------------------------------------------------------

    async fn run_atomic(
        &self,
        node: &WorkflowNode,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let policy = self.effective_policy(node);
        let mut last_data = None;
        for action in &node.actions {
            let outcome = self.run_action(node, action, &policy, state).await?;
            if !outcome.is_success() {
                return Ok(outcome);
            }
            last_data = outcome.output;
        }
        Ok(NodeOutcome::succeeded(last_data))
    }

    /// Dispatch one action through the resolver, retrying per policy, and
    /// commit its artifact before returning. This is the capture-blocking
    /// heart of the engine: the action is not done until the store acks.
    async fn run_action(
        &self,
        node: &WorkflowNode,
        action: &WorkflowAction,
        policy: &RetryPolicy,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let action_index = state.next_action_index(&node.id);
        let mut draft = ArtifactDraft::begin(
            state.ctx.execution_id(),
            &node.id,
            action_index,
            ArtifactInputs {
                instruction: action.primary.instruction.clone(),
                selector: action.primary.selector.clone(),
                data: action.primary.data.clone(),
                context_keys: state.ctx.keys(),
            },
        );
        let artifact_ref = ArtifactRef {
            execution_id: state.ctx.execution_id(),
            node_id: node.id.clone(),
            action_index,
        };

        let effective = if self.config.hybrid_mode {
            action.clone()
        } else {
            WorkflowAction {
                fallback: None,
                ..action.clone()
            }
        };

        let started = Instant::now();
        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            let delay = RetryHandler::backoff_delay(policy, attempts);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = state.cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let turn = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => None,
                resolved = self.resolver.resolve(&effective, &state.ctx, self.injector) => {
                    Some(resolved)
                }
            };
            let Some(resolved) = turn else {
                // Abort: flush what we have for forensics, then stop.
                draft.record_processing(ArtifactProcessing {
                    path: ResolutionPath::None,
                    attempts,
                    duration_ms: started.elapsed().as_millis() as u64,
                    selector_used: None,
                    learned: None,
                });
                state.last_artifact = Some(artifact_ref);
                self.pipeline
                    .commit(draft.finish_aborted("run aborted"))
                    .await?;
                return Err(EngineError::Aborted);
            };

            match resolved {
                Ok(resolution) => break Ok(resolution),
                Err(err) => {
                    tracing::warn!(
                        node = %node.id,
                        action = action_index,
                        attempt = attempts,
                        error = %err,
                        "action attempt failed"
                    );
                    if RetryHandler::should_retry(policy, attempts) {
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        tracing::debug!(node = %node.id, phase = NodePhase::Capturing.as_str(), "capturing artifact");
        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome = match result {
            Ok(resolution) => {
                draft.record_processing(ArtifactProcessing {
                    path: resolution.path,
                    attempts,
                    duration_ms,
                    selector_used: resolution.selector_used.clone(),
                    learned: resolution.learned.clone(),
                });

                // Extraction results land in context: object payloads merge
                // key-by-key (this is how routes see extracted state), other
                // shapes go under "lastResult".
                let mut merge_error = None;
                if let Some(data) = &resolution.receipt.data {
                    let merged = match data {
                        Value::Object(map) => {
                            let mut result = Ok(());
                            for (key, value) in map {
                                if let Err(err) = state.ctx.set(key, value.clone()) {
                                    result = Err(err);
                                    break;
                                }
                            }
                            result
                        }
                        other => state.ctx.set("lastResult", other.clone()),
                    };
                    if let Err(err) = merged {
                        merge_error = Some(err.to_string());
                    }
                }

                match merge_error {
                    None => {
                        draft.record_outputs(ArtifactOutputs {
                            status: ActionStatus::Succeeded,
                            data: resolution.receipt.data.clone(),
                            error: None,
                            page_url: resolution.receipt.current_url.clone(),
                        });
                        let decision = apply_forwarding(&mut state.ctx, node.forward.as_ref());
                        draft.record_forwarding(decision);
                        NodeOutcome::succeeded(resolution.receipt.data)
                    }
                    Some(err) => {
                        draft.record_outputs(ArtifactOutputs {
                            status: ActionStatus::Failed,
                            data: resolution.receipt.data.clone(),
                            error: Some(err.clone()),
                            page_url: resolution.receipt.current_url.clone(),
                        });
                        NodeOutcome::failed(err)
                    }
                }
            }
            Err(err) => {
                draft.record_processing(ArtifactProcessing {
                    path: ResolutionPath::None,
                    attempts,
                    duration_ms,
                    selector_used: None,
                    learned: None,
                });
                draft.record_outputs(ArtifactOutputs {
                    status: ActionStatus::Failed,
                    data: None,
                    error: Some(err.to_string()),
                    page_url: None,
                });
                NodeOutcome::failed(format!("action {action_index} failed: {err}"))
            }
        };

        state.last_artifact = Some(ArtifactRef {
            execution_id: state.ctx.execution_id(),
            node_id: node.id.clone(),
            action_index,
        });
        self.pipeline.commit(draft.finish()).await?;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // sequence
    // -----------------------------------------------------------------------

    async fn run_sequence(
        &self,
        children: &[String],
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        for child in children {
            match Box::pin(self.run_node(child, state)).await? {
                NodePass::Completed(outcome) if outcome.is_success() => {}
                NodePass::Completed(outcome) => return Ok(outcome),
                NodePass::Routed { .. } => {
                    return Ok(NodeOutcome::failed(format!(
                        "node {child} routed inside a sequence"
                    )));
                }
            }
        }
        Ok(NodeOutcome::succeeded(None))
    }

    // -----------------------------------------------------------------------
    // iterate
    // -----------------------------------------------------------------------

    async fn run_iterate(
        &self,
        node: &WorkflowNode,
        cfg: &IteratorConfig,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let queue = match state.ctx.get(&cfg.queue_key) {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Ok(NodeOutcome::failed(format!(
                    "context key \"{}\" is not an array",
                    cfg.queue_key
                )));
            }
            None => {
                return Ok(NodeOutcome::failed(format!(
                    "context key \"{}\" is not set",
                    cfg.queue_key
                )));
            }
        };

        let length = queue.len();
        let policy = self.effective_policy(node);
        let mut breaker = CircuitBreaker::new(policy.circuit_breaker_threshold);
        state.ctx.set("length", json!(length))?;
        state.ctx.set("index", json!(0))?;

        let cap = cfg.max_iterations as usize;
        let mut completed = 0usize;
        for (position, item) in queue.iter().enumerate() {
            if position >= cap {
                tracing::warn!(
                    node = %node.id,
                    cap = cfg.max_iterations,
                    remaining = length - position,
                    "iteration cap reached"
                );
                break;
            }
            if state.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            // Each iteration gets a child scope: currentItem/currentIndex
            // shadow anything outer and vanish with the scope.
            state.ctx.push_scope();
            state.ctx.set_local("currentItem", item.clone());
            state.ctx.set_local("currentIndex", json!(position));

            let body_result = self.run_iteration_body(&cfg.body, state).await;
            let exit = match (&body_result, &cfg.exit_when) {
                (Ok(IterationVerdict::Clean), Some(expr)) => {
                    let evaluator = ExpressionEngine::new();
                    Some(evaluator.evaluate_bool(expr, &state.ctx.to_expression_context()))
                }
                _ => None,
            };
            state.ctx.pop_scope();

            completed = position + 1;
            state.ctx.set("index", json!(completed))?;

            match body_result? {
                IterationVerdict::Clean => breaker.record_success(),
                IterationVerdict::Escalated(reason) => {
                    return Ok(NodeOutcome::escalated(reason));
                }
                IterationVerdict::Failed(error) => {
                    tracing::warn!(
                        node = %node.id,
                        iteration = position,
                        consecutive = breaker.consecutive_failures() + 1,
                        error = %error,
                        "iteration body failed"
                    );
                    if breaker.record_failure() {
                        return Err(EngineError::CircuitBreakerTripped {
                            node_id: node.id.clone(),
                            failures: breaker.consecutive_failures(),
                        });
                    }
                }
            }

            match exit {
                Some(Ok(true)) => {
                    tracing::info!(node = %node.id, iteration = position, "exit condition satisfied");
                    break;
                }
                Some(Ok(false)) | None => {}
                Some(Err(err)) => {
                    return Ok(NodeOutcome::failed(format!(
                        "exit condition evaluation failed: {err}"
                    )));
                }
            }
        }

        Ok(NodeOutcome::succeeded(Some(json!({
            "iterations": completed,
            "length": length,
        }))))
    }

    async fn run_iteration_body(
        &self,
        body: &[String],
        state: &mut RunState,
    ) -> Result<IterationVerdict, EngineError> {
        for child in body {
            match Box::pin(self.run_node(child, state)).await? {
                NodePass::Completed(outcome) if outcome.is_success() => {}
                NodePass::Completed(outcome) => {
                    let error = outcome.error.unwrap_or_else(|| "body node failed".to_string());
                    return Ok(match outcome.status {
                        NodeStatus::Escalated => IterationVerdict::Escalated(error),
                        _ => IterationVerdict::Failed(error),
                    });
                }
                NodePass::Routed { .. } => {
                    return Ok(IterationVerdict::Failed(format!(
                        "node {child} routed inside an iteration body"
                    )));
                }
            }
        }
        Ok(IterationVerdict::Clean)
    }

    // -----------------------------------------------------------------------
    // route
    // -----------------------------------------------------------------------

    fn run_route(
        &self,
        node: &WorkflowNode,
        value_expr: &str,
        paths: &std::collections::BTreeMap<String, String>,
        default: &str,
        state: &mut RunState,
    ) -> Result<NodePass, EngineError> {
        let evaluator = ExpressionEngine::new();
        let value = match evaluator.evaluate(value_expr, &state.ctx.to_expression_context()) {
            Ok(value) => value,
            Err(err) => {
                return Ok(NodePass::Completed(NodeOutcome::failed(format!(
                    "route value evaluation failed: {err}"
                ))));
            }
        };

        let next = route_target(&value, paths).unwrap_or(default);
        if !self.index.contains(next) {
            return Err(EngineError::UnknownNode(next.to_string()));
        }
        tracing::info!(node = %node.id, value = %value, next, "route taken");
        Ok(NodePass::Routed {
            next: next.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // assert
    // -----------------------------------------------------------------------

    async fn run_assert(
        &self,
        node: &WorkflowNode,
        conditions: &[AssertCondition],
        failure_action: FailureAction,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let policy = self.effective_policy(node);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > 1 {
                let delay = RetryHandler::backoff_delay(&policy, attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            if state.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            let Some(failed) = self.first_failed_condition(conditions).await else {
                return Ok(NodeOutcome::succeeded(None));
            };

            match failure_action {
                FailureAction::Stop => return Ok(NodeOutcome::failed(failed)),
                FailureAction::Continue => {
                    tracing::warn!(node = %node.id, condition = %failed, "assertion failed, continuing");
                    return Ok(NodeOutcome::succeeded(None));
                }
                FailureAction::Escalate => return Ok(NodeOutcome::escalated(failed)),
                FailureAction::Retry => {
                    if RetryHandler::should_retry(&policy, attempts) {
                        tracing::debug!(node = %node.id, attempt = attempts, "assertion retry");
                        continue;
                    }
                    return Ok(NodeOutcome::failed(failed));
                }
            }
        }
    }

    /// Description of the first condition that does not hold, if any.
    /// Inspection errors count as failures of the condition being checked.
    async fn first_failed_condition(&self, conditions: &[AssertCondition]) -> Option<String> {
        for condition in conditions {
            match self.condition_holds(condition).await {
                Ok(true) => {}
                Ok(false) => return Some(describe_condition(condition)),
                Err(err) => {
                    return Some(format!(
                        "{}: page inspection failed: {err}",
                        describe_condition(condition)
                    ));
                }
            }
        }
        None
    }

    async fn condition_holds(
        &self,
        condition: &AssertCondition,
    ) -> Result<bool, pagewright_types::error::ProviderError> {
        Ok(match condition {
            AssertCondition::UrlMatch { value } => {
                self.browser.page_boxed().await?.url.contains(value)
            }
            AssertCondition::ElementVisible { selector } => self
                .browser
                .query_boxed(selector)
                .await?
                .iter()
                .any(|e| e.visible),
            AssertCondition::ElementHidden { selector } => self
                .browser
                .query_boxed(selector)
                .await?
                .iter()
                .all(|e| !e.visible),
            AssertCondition::ElementEnabled { selector } => self
                .browser
                .query_boxed(selector)
                .await?
                .iter()
                .any(|e| e.enabled),
            AssertCondition::TextPresent { value } => self
                .browser
                .query_boxed("body")
                .await?
                .iter()
                .any(|e| e.text.contains(value.as_str())),
            AssertCondition::ElementCount { selector, expected } => {
                self.browser.query_boxed(selector).await?.len() == *expected
            }
        })
    }

    // -----------------------------------------------------------------------
    // handle
    // -----------------------------------------------------------------------

    async fn run_handle(
        &self,
        try_node: &str,
        catch_node: Option<&str>,
        finally_node: Option<&str>,
        escalate: bool,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let try_outcome = match Box::pin(self.run_node(try_node, state)).await? {
            NodePass::Completed(outcome) => outcome,
            NodePass::Routed { .. } => {
                NodeOutcome::failed(format!("node {try_node} routed inside a handle"))
            }
        };

        let outcome = if try_outcome.is_success() || try_outcome.status == NodeStatus::Escalated {
            try_outcome
        } else {
            let error = try_outcome
                .error
                .clone()
                .unwrap_or_else(|| "try node failed".to_string());
            tracing::warn!(try_node, error = %error, "try node failed, handling");

            let caught = match catch_node {
                Some(catch) => match Box::pin(self.run_node(catch, state)).await? {
                    NodePass::Completed(outcome) => Some(outcome),
                    NodePass::Routed { .. } => Some(NodeOutcome::failed(format!(
                        "node {catch} routed inside a handle"
                    ))),
                },
                None => None,
            };

            if escalate {
                NodeOutcome::escalated(format!("{try_node} failed: {error}"))
            } else {
                match caught {
                    Some(outcome) if outcome.is_success() => NodeOutcome::succeeded(None),
                    Some(outcome) => outcome,
                    None => try_outcome,
                }
            }
        };

        if let Some(finally) = finally_node {
            match Box::pin(self.run_node(finally, state)).await? {
                NodePass::Completed(fin) if fin.is_success() => {}
                NodePass::Completed(fin) => {
                    return Ok(NodeOutcome::failed(format!(
                        "finally node {finally} failed: {}",
                        fin.error.unwrap_or_default()
                    )));
                }
                NodePass::Routed { .. } => {
                    return Ok(NodeOutcome::failed(format!(
                        "node {finally} routed inside a handle"
                    )));
                }
            }
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // transform
    // -----------------------------------------------------------------------

    fn run_transform(
        &self,
        expression: &str,
        output_key: &str,
        state: &mut RunState,
    ) -> NodeOutcome {
        let evaluator = ExpressionEngine::new();
        match evaluator.evaluate(expression, &state.ctx.to_expression_context()) {
            Ok(value) => {
                if let Err(err) = state.ctx.set(output_key, value.clone()) {
                    return NodeOutcome::failed(err.to_string());
                }
                NodeOutcome::succeeded(Some(value))
            }
            Err(err) => NodeOutcome::failed(format!("transform evaluation failed: {err}")),
        }
    }

    // -----------------------------------------------------------------------
    // cognition
    // -----------------------------------------------------------------------

    async fn run_cognition(
        &self,
        node: &WorkflowNode,
        prompt: &str,
        output_key: &str,
        schema: Option<&Value>,
        timeout_ms: u64,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let policy = self.effective_policy(node);
        // Context rendering only: credential placeholders must never reach
        // the reasoning provider.
        let rendered = state.ctx.render_template(prompt);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > 1 {
                let delay = RetryHandler::backoff_delay(&policy, attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            if state.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            let dispatched = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.cognition.complete_boxed(&rendered, schema, timeout_ms),
            )
            .await;

            let failure = match dispatched {
                Ok(Ok(value)) => match schema_errors(schema, &value) {
                    None => {
                        if let Err(err) = state.ctx.set(output_key, value.clone()) {
                            return Ok(NodeOutcome::failed(err.to_string()));
                        }
                        return Ok(NodeOutcome::succeeded(Some(value)));
                    }
                    Some(message) => message,
                },
                Ok(Err(err)) => format!("cognition dispatch failed: {err}"),
                Err(_) => format!("cognition timed out after {timeout_ms} ms"),
            };

            tracing::warn!(node = %node.id, attempt = attempts, error = %failure, "cognition attempt failed");
            if !RetryHandler::should_retry(&policy, attempts) {
                return Ok(NodeOutcome::failed(failure));
            }
        }
    }

    // -----------------------------------------------------------------------
    // filter_list
    // -----------------------------------------------------------------------

    async fn run_filter(
        &self,
        node: &WorkflowNode,
        list_key: &str,
        instruction: &str,
        output_key: &str,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let items = match state.ctx.get(list_key) {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Ok(NodeOutcome::failed(format!(
                    "context key \"{list_key}\" is not an array"
                )));
            }
            None => {
                return Ok(NodeOutcome::failed(format!(
                    "context key \"{list_key}\" is not set"
                )));
            }
        };

        let policy = self.effective_policy(node);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if attempts > 1 {
                let delay = RetryHandler::backoff_delay(&policy, attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            if state.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            let failure = match self.cognition.classify_boxed(instruction, &items).await {
                Ok(verdicts) if verdicts.len() == items.len() => {
                    let filtered: Vec<Value> = items
                        .iter()
                        .zip(verdicts.iter())
                        .filter(|(_, keep)| **keep)
                        .map(|(item, _)| item.clone())
                        .collect();
                    let kept = filtered.len();
                    if let Err(err) = state.ctx.set(output_key, Value::Array(filtered)) {
                        return Ok(NodeOutcome::failed(err.to_string()));
                    }
                    tracing::info!(node = %node.id, total = items.len(), kept, "list filtered");
                    return Ok(NodeOutcome::succeeded(Some(json!({
                        "total": items.len(),
                        "kept": kept,
                    }))));
                }
                Ok(verdicts) => format!(
                    "classifier returned {} verdicts for {} items",
                    verdicts.len(),
                    items.len()
                ),
                Err(err) => format!("classification dispatch failed: {err}"),
            };

            tracing::warn!(node = %node.id, attempt = attempts, error = %failure, "filter attempt failed");
            if !RetryHandler::should_retry(&policy, attempts) {
                return Ok(NodeOutcome::failed(failure));
            }
        }
    }

    // -----------------------------------------------------------------------
    // explore
    // -----------------------------------------------------------------------

    async fn run_explore(
        &self,
        node: &WorkflowNode,
        goal: &str,
        max_actions: u32,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let rendered_goal = state.ctx.render_template(goal);
        for step in 0..max_actions {
            if state.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            let observations = match self
                .browser
                .observe_boxed(&rendered_goal, EXPLORE_DISPATCH_TIMEOUT_MS)
                .await
            {
                Ok(observations) => observations,
                Err(err) => {
                    return Ok(NodeOutcome::failed(format!(
                        "observe dispatch failed: {err}"
                    )));
                }
            };

            if observations.iter().any(|o| o.goal_reached) {
                tracing::info!(node = %node.id, steps = step, "explore goal reached");
                return Ok(NodeOutcome::succeeded(Some(json!({"steps": step}))));
            }
            let Some(observation) = observations.into_iter().next() else {
                return Ok(NodeOutcome::failed(
                    "observer proposed no step toward the goal".to_string(),
                ));
            };

            let outcome = self.run_explore_step(node, &observation, state).await?;
            if !outcome.is_success() {
                return Ok(outcome);
            }
        }
        Ok(NodeOutcome::failed(format!(
            "goal not reached within {max_actions} actions"
        )))
    }

    /// One observe-suggested act, captured like any other dispatched action.
    async fn run_explore_step(
        &self,
        node: &WorkflowNode,
        observation: &pagewright_types::action::Observation,
        state: &mut RunState,
    ) -> Result<NodeOutcome, EngineError> {
        let action_index = state.next_action_index(&node.id);
        let mut draft = ArtifactDraft::begin(
            state.ctx.execution_id(),
            &node.id,
            action_index,
            ArtifactInputs {
                instruction: observation.instruction.clone(),
                selector: observation.selector.clone(),
                data: None,
                context_keys: state.ctx.keys(),
            },
        );

        let kind = if observation.selector.is_some() {
            ActionKind::Act
        } else {
            ActionKind::AiAct
        };
        let request = ActionRequest {
            kind,
            instruction: observation.instruction.clone(),
            selector: observation.selector.clone(),
            data: None,
            schema: None,
            timeout_ms: EXPLORE_DISPATCH_TIMEOUT_MS,
        };

        let started = Instant::now();
        let turn = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => None,
            dispatched = async {
                tokio::time::timeout(
                    Duration::from_millis(EXPLORE_DISPATCH_TIMEOUT_MS),
                    self.browser.act_boxed(&request),
                )
                .await
            } => Some(dispatched),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        draft.record_processing(ArtifactProcessing {
            path: ResolutionPath::Primary,
            attempts: 1,
            duration_ms,
            selector_used: observation.selector.clone(),
            learned: None,
        });

        let artifact_ref = ArtifactRef {
            execution_id: state.ctx.execution_id(),
            node_id: node.id.clone(),
            action_index,
        };
        let Some(dispatched) = turn else {
            state.last_artifact = Some(artifact_ref);
            self.pipeline
                .commit(draft.finish_aborted("run aborted"))
                .await?;
            return Err(EngineError::Aborted);
        };

        let outcome = match dispatched {
            Ok(Ok(receipt)) => {
                draft.record_outputs(ArtifactOutputs {
                    status: ActionStatus::Succeeded,
                    data: receipt.data.clone(),
                    error: None,
                    page_url: receipt.current_url.clone(),
                });
                let decision = apply_forwarding(&mut state.ctx, node.forward.as_ref());
                draft.record_forwarding(decision);
                NodeOutcome::succeeded(None)
            }
            Ok(Err(err)) => {
                draft.record_outputs(ArtifactOutputs {
                    status: ActionStatus::Failed,
                    data: None,
                    error: Some(err.to_string()),
                    page_url: None,
                });
                NodeOutcome::failed(format!("explore step failed: {err}"))
            }
            Err(_) => {
                draft.record_outputs(ArtifactOutputs {
                    status: ActionStatus::Failed,
                    data: None,
                    error: Some(format!(
                        "explore step timed out after {EXPLORE_DISPATCH_TIMEOUT_MS} ms"
                    )),
                    page_url: None,
                });
                NodeOutcome::failed("explore step timed out".to_string())
            }
        };

        state.last_artifact = Some(ArtifactRef {
            execution_id: state.ctx.execution_id(),
            node_id: node.id.clone(),
            action_index,
        });
        self.pipeline.commit(draft.finish()).await?;
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pick the routed successor for an evaluated value. Booleans match their
/// literal spelling and the conventional `Y`/`N` labels.
fn route_target<'p>(
    value: &Value,
    paths: &'p std::collections::BTreeMap<String, String>,
) -> Option<&'p str> {
    for candidate in route_candidates(value) {
        if let Some(target) = paths.get(&candidate) {
            return Some(target);
        }
    }
    None
}

fn route_candidates(value: &Value) -> Vec<String> {
    match value {
        Value::Bool(true) => vec!["true".to_string(), "Y".to_string()],
        Value::Bool(false) => vec!["false".to_string(), "N".to_string()],
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Null => vec!["null".to_string()],
        other => vec![other.to_string()],
    }
}

/// Validate a cognition result against its declared schema, describing every
/// violation at once.
fn schema_errors(schema: Option<&Value>, value: &Value) -> Option<String> {
    let schema = schema?;
    match jsonschema::validator_for(schema) {
        Ok(validator) => {
            let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
            if errors.is_empty() {
                None
            } else {
                Some(format!(
                    "output failed schema validation: {}",
                    errors.join("; ")
                ))
            }
        }
        Err(err) => Some(format!("schema does not compile: {err}")),
    }
}

fn describe_condition(condition: &AssertCondition) -> String {
    match condition {
        AssertCondition::UrlMatch { value } => format!("url does not contain \"{value}\""),
        AssertCondition::ElementVisible { selector } => {
            format!("no visible element matches \"{selector}\"")
        }
        AssertCondition::ElementHidden { selector } => {
            format!("a visible element matches \"{selector}\"")
        }
        AssertCondition::ElementEnabled { selector } => {
            format!("no enabled element matches \"{selector}\"")
        }
        AssertCondition::TextPresent { value } => format!("page text does not contain \"{value}\""),
        AssertCondition::ElementCount { selector, expected } => {
            format!("element count for \"{selector}\" is not {expected}")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
