//! Workflow document types for Pagewright.
//!
//! Defines the on-disk JSON representation of a workflow: document metadata,
//! run configuration, credential requirements, and the node/edge graph. Every
//! node kind is a variant of the closed [`NodeConfig`] union, so a node
//! declaring one type can never smuggle another type's configuration past the
//! loader.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::WorkflowAction;

// ---------------------------------------------------------------------------
// Workflow Document
// ---------------------------------------------------------------------------

/// A complete workflow document, loaded once per run and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    /// Document identity and versioning.
    pub meta: WorkflowMeta,
    /// Run-level configuration (timeout ceiling, retry default, hybrid toggle).
    #[serde(default)]
    pub config: RunConfig,
    /// Credential requirements, validated at run start before any dispatch.
    #[serde(default)]
    pub credentials: CredentialSpec,
    /// The node/edge graph.
    pub workflow: WorkflowGraph,
}

/// Document identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMeta {
    /// Stable workflow ID (e.g. "gmail-triage").
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Author-managed version string.
    pub version: String,
}

/// Run-level configuration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Whole-run ceiling in milliseconds; once exceeded the run is aborted
    /// regardless of node-level state.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Default max attempts for nodes without an explicit retry policy.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// When false, the AI fallback path is never engaged and a primary
    /// failure is final.
    #[serde(default = "default_hybrid_mode")]
    pub hybrid_mode: bool,
}

fn default_execution_timeout_ms() -> u64 {
    1_800_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_hybrid_mode() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: default_execution_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            hybrid_mode: default_hybrid_mode(),
        }
    }
}

/// Credential tokens a workflow declares up front.
///
/// Entries use the placeholder grammar without braces: `service.field`
/// (e.g. "gmail.password"). Required entries are resolved once at run start
/// and the run fails fast if any is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSpec {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

/// The node/edge graph of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Flat, ID-indexed node list. Children/branches refer to entries here by
    /// ID; nodes are never embedded inside other nodes.
    pub nodes: Vec<WorkflowNode>,
    /// Plain sequencing edges between top-level nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// ID of the node where execution starts.
    pub entry: String,
}

/// A plain sequencing edge. Route nodes do not use edges; their successor
/// comes from the path map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Optional display label; never used for routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ---------------------------------------------------------------------------
// Workflow Node
// ---------------------------------------------------------------------------

/// One step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    /// Author-chosen ID, unique within the document.
    pub id: String,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Actions dispatched by task-like nodes, in order.
    #[serde(default)]
    pub actions: Vec<WorkflowAction>,
    /// Retry policy for this node; absent = document default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Context keys to propagate/clear after this node completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<ForwardingRules>,
    /// Marks a node as intentionally detached from the entry graph, which
    /// suppresses the orphan validation error.
    #[serde(default)]
    pub reachable_via_routing: bool,
    /// The type-specific configuration block, discriminated by `type`.
    #[serde(flatten)]
    pub config: NodeConfig,
}

impl WorkflowNode {
    /// Canonical kind string for logging and artifacts.
    pub fn kind(&self) -> &'static str {
        self.config.kind()
    }
}

/// Closed union of node kinds. Each variant carries only its own
/// configuration; the legacy spellings parse via aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Run this node's actions in order via the hybrid resolver; the node
    /// succeeds iff all actions succeed.
    AtomicTask {},

    /// Run child nodes in declared order.
    #[serde(alias = "compound_task")]
    Sequence { children: Vec<String> },

    /// First-class iteration over a queue held in context. Never modeled as a
    /// graph cycle.
    #[serde(alias = "list_iterator", rename_all = "camelCase")]
    Iterate { iterator_config: IteratorConfig },

    /// Evaluate a state value and pick the successor from a path map.
    #[serde(alias = "decision")]
    Route {
        /// JEXL expression (or bare context key) producing the routed value.
        value: String,
        /// Match value -> successor node ID. Boolean results additionally
        /// match the conventional `Y`/`N` labels.
        paths: BTreeMap<String, String>,
        /// Successor when no path matches.
        default: String,
    },

    /// Evaluate page-state conditions; on failure apply `failureAction`.
    #[serde(rename_all = "camelCase")]
    Assert {
        conditions: Vec<AssertCondition>,
        #[serde(default)]
        failure_action: FailureAction,
    },

    /// try/catch/finally over other nodes.
    #[serde(alias = "error_handler")]
    Handle {
        /// Node to attempt.
        #[serde(rename = "try")]
        try_node: String,
        /// Node to run when the try-node fails.
        #[serde(default, rename = "catch", skip_serializing_if = "Option::is_none")]
        catch_node: Option<String>,
        /// Node to run unconditionally afterwards.
        #[serde(default, rename = "finally", skip_serializing_if = "Option::is_none")]
        finally_node: Option<String>,
        /// When true, a caught failure escalates to a human instead of
        /// continuing.
        #[serde(default)]
        escalate: bool,
    },

    /// Pure sandboxed expression from one state slice to another.
    #[serde(alias = "data_transform", rename_all = "camelCase")]
    Transform {
        /// JEXL expression evaluated against the context.
        expression: String,
        /// Context key receiving the result.
        output_key: String,
    },

    /// Invoke the external reasoning capability. Non-idempotent by definition.
    #[serde(alias = "generator", alias = "llm_call", rename_all = "camelCase")]
    Cognition {
        /// Prompt template; `{{ key }}` placeholders are rendered from
        /// context before dispatch.
        prompt: String,
        /// Context key receiving the (schema-validated) result.
        output_key: String,
        /// Optional JSON Schema the result must satisfy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
        #[serde(default = "default_cognition_timeout_ms")]
        timeout_ms: u64,
    },

    /// Batch-classify an array held in context; the classifier must return
    /// one boolean per item.
    #[serde(rename_all = "camelCase")]
    FilterList {
        /// Context key holding the input array.
        list_key: String,
        /// Classification instruction.
        instruction: String,
        /// Context key receiving the filtered array.
        output_key: String,
    },

    /// Bounded observe/act loop.
    #[serde(rename_all = "camelCase")]
    Explore {
        goal: String,
        #[serde(default = "default_max_actions")]
        max_actions: u32,
    },
}

fn default_cognition_timeout_ms() -> u64 {
    60_000
}

fn default_max_actions() -> u32 {
    10
}

impl NodeConfig {
    /// Canonical kind string (the primary wire spelling).
    pub fn kind(&self) -> &'static str {
        match self {
            NodeConfig::AtomicTask {} => "atomic_task",
            NodeConfig::Sequence { .. } => "sequence",
            NodeConfig::Iterate { .. } => "iterate",
            NodeConfig::Route { .. } => "route",
            NodeConfig::Assert { .. } => "assert",
            NodeConfig::Handle { .. } => "handle",
            NodeConfig::Transform { .. } => "transform",
            NodeConfig::Cognition { .. } => "cognition",
            NodeConfig::FilterList { .. } => "filter_list",
            NodeConfig::Explore { .. } => "explore",
        }
    }
}

/// Configuration for the iterate node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IteratorConfig {
    /// Context key holding the queue (a JSON array) to iterate over.
    pub queue_key: String,
    /// Hard iteration cap; guarantees termination even if the natural exit
    /// never fires.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Child node IDs run in order once per iteration.
    pub body: Vec<String>,
    /// Optional boolean JEXL expression checked after each iteration; truthy
    /// means exit early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_when: Option<String>,
}

fn default_max_iterations() -> u32 {
    100
}

/// One assertable condition over live page state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssertCondition {
    /// Substring match against the current URL.
    UrlMatch { value: String },
    ElementVisible { selector: String },
    ElementHidden { selector: String },
    ElementEnabled { selector: String },
    /// Substring match against visible page text.
    TextPresent { value: String },
    ElementCount { selector: String, expected: usize },
}

/// What an assert node does when a condition fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Fail the node (and, absent a handler, the run).
    #[default]
    Stop,
    /// Log and keep going.
    Continue,
    /// Fail the attempt so the node's retry policy re-runs it.
    Retry,
    /// Pause the run for human input.
    Escalate,
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Per-node retry/backoff policy plus the run-level breaker threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum attempts, 1-based (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Sleep before attempt n is `backoffMs[n-1]`, clamped to the last entry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    /// Consecutive node failures that abort the whole run.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> Vec<u64> {
    vec![0, 1000, 3000]
}

fn default_breaker_threshold() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            circuit_breaker_threshold: default_breaker_threshold(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given 1-based attempt, clamped to the last entry.
    /// Attempt 1 runs immediately when the schedule starts with 0.
    pub fn backoff_before(&self, attempt: u32) -> u64 {
        if self.backoff_ms.is_empty() {
            return 0;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff_ms.len() - 1);
        self.backoff_ms[idx]
    }
}

/// Context keys to propagate or clear once a node's artifact is captured.
///
/// Clearing wins over propagating when a key appears in both lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardingRules {
    #[serde(default)]
    pub propagate: Vec<String>,
    #[serde(default)]
    pub clear: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
