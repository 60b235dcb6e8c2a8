//! Execution context: the per-run variable state that flows through node
//! handlers.
//!
//! The context is a stack of scopes. A loop iteration pushes a child scope
//! (where `currentItem`/`currentIndex` live) that shadows the parent and is
//! discarded when the iteration ends, so long iterations cannot accumulate
//! unbounded state. Reads walk innermost-out; writes update an existing
//! binding wherever it lives, and otherwise insert into the innermost scope
//! -- that way accumulators initialized before a loop survive it while loop
//! temporaries do not.

use std::collections::HashMap;

use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single context value (1 MB).
pub const MAX_VALUE_SIZE: usize = 1_048_576;

/// Maximum total serialized size of the context (10 MB).
pub const MAX_CONTEXT_SIZE: usize = 10_485_760;

/// Values larger than this are cleared by the memory pipeline after capture
/// unless a forwarding rule explicitly propagates them (64 KiB).
pub const FORWARD_SIZE_LIMIT: usize = 65_536;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("total context size ({actual} bytes) exceeds maximum ({max} bytes)")]
    Oversize { actual: usize, max: usize },

    #[error("context serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable, scoped variable state for one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Scope stack; index 0 is the run scope, the last entry the innermost.
    scopes: Vec<HashMap<String, Value>>,
    workflow_id: String,
    execution_id: Uuid,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            scopes: vec![HashMap::new()],
            workflow_id: workflow_id.into(),
            execution_id,
        }
    }

    /// Seed the run scope with initial variables.
    pub fn with_initial(
        workflow_id: impl Into<String>,
        execution_id: Uuid,
        initial: HashMap<String, Value>,
    ) -> Self {
        let mut ctx = Self::new(workflow_id, execution_id);
        ctx.scopes[0] = initial;
        ctx
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Open a child scope. Every push is paired with a `pop_scope` when the
    /// iteration ends.
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Discard the innermost scope. The run scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Innermost-out lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key))
    }

    /// Update an existing binding wherever it lives; insert into the
    /// innermost scope when the key is new. Oversized values are truncated
    /// to a marker object; a context past `MAX_CONTEXT_SIZE` is an error.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ContextError> {
        let serialized_len = serde_json::to_string(&value)?.len();
        let value = if serialized_len > MAX_VALUE_SIZE {
            tracing::warn!(
                key,
                size = serialized_len,
                max = MAX_VALUE_SIZE,
                "context value exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_originalSize": serialized_len,
            })
        } else {
            value
        };

        match self
            .scopes
            .iter_mut()
            .rev()
            .find(|scope| scope.contains_key(key))
        {
            Some(scope) => {
                scope.insert(key.to_string(), value);
            }
            None => {
                let innermost = self
                    .scopes
                    .last_mut()
                    .unwrap_or_else(|| unreachable!("context always has a run scope"));
                innermost.insert(key.to_string(), value);
            }
        }

        let total = self.total_size();
        if total > MAX_CONTEXT_SIZE {
            return Err(ContextError::Oversize {
                actual: total,
                max: MAX_CONTEXT_SIZE,
            });
        }
        Ok(())
    }

    /// Force a binding into the innermost scope even when an outer binding
    /// exists. Used for the per-iteration `currentItem`/`currentIndex`
    /// injection, which must shadow rather than overwrite.
    pub fn set_local(&mut self, key: &str, value: Value) {
        if let Some(innermost) = self.scopes.last_mut() {
            innermost.insert(key.to_string(), value);
        }
    }

    /// Remove a binding from every scope. Used by forwarding clears.
    pub fn remove(&mut self, key: &str) {
        for scope in &mut self.scopes {
            scope.remove(key);
        }
    }

    /// All visible keys, innermost shadowing applied, sorted for stable
    /// artifact capture.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|scope| scope.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Serialized size of every binding in every scope.
    pub fn total_size(&self) -> usize {
        self.scopes
            .iter()
            .flat_map(|scope| scope.values())
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum()
    }

    /// Flattened snapshot with shadowing applied. Safe to persist: secrets
    /// never enter the context.
    pub fn snapshot(&self) -> Value {
        let mut merged = serde_json::Map::new();
        for scope in &self.scopes {
            for (k, v) in scope {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::Object(merged)
    }

    /// Context object handed to the JEXL evaluator: the flattened variables
    /// plus a `workflow` block for expressions that want run metadata.
    pub fn to_expression_context(&self) -> Value {
        let mut merged = match self.snapshot() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        merged.insert(
            "workflow".to_string(),
            json!({
                "id": self.workflow_id,
                "executionId": self.execution_id.to_string(),
            }),
        );
        Value::Object(merged)
    }

    /// Resolve `{{ key }}` placeholders against visible bindings. Unknown
    /// references (including `{{service.field}}` credential tokens, which the
    /// injector owns) are left verbatim.
    pub fn render_template(&self, template: &str) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let end = start + 2 + len + 2;
            let key = rest[start + 2..end - 2].trim();

            result.push_str(&rest[..start]);
            match self.get(key) {
                Some(value) => result.push_str(&value_to_string(value)),
                None => result.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        result.push_str(rest);
        result
    }
}

/// Display form of a JSON value for template rendering.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
