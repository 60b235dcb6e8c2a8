//! Workflow document parsing and validation.
//!
//! Validation accumulates every issue instead of stopping at the first, so a
//! document author sees the whole damage report in one pass. Structural
//! checks (unknown IDs, cycles, orphans) come from [`WorkflowIndex`]; the
//! raw-JSON key check catches configuration smuggled from another node kind,
//! which serde's flattened union would otherwise silently drop.

use std::collections::{HashMap, HashSet};

use pagewright_types::error::ValidationIssue;
use pagewright_types::workflow::{AssertCondition, NodeConfig, WorkflowDocument, WorkflowNode};
use serde_json::Value;
use thiserror::Error;

use super::graph::WorkflowIndex;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("document failed validation with {} issue(s)", .0.len())]
    Invalid(Vec<ValidationIssue>),
}

impl DocumentError {
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            DocumentError::Invalid(issues) => issues,
            DocumentError::Parse(_) => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a workflow document from JSON text. The returned
/// document is guaranteed structurally valid.
pub fn parse_document(text: &str) -> Result<WorkflowDocument, DocumentError> {
    let raw: Value =
        serde_json::from_str(text).map_err(|e| DocumentError::Parse(e.to_string()))?;
    let doc: WorkflowDocument =
        serde_json::from_value(raw.clone()).map_err(|e| DocumentError::Parse(e.to_string()))?;

    let issues = validate_document(&doc, &raw);
    if issues.is_empty() {
        Ok(doc)
    } else {
        Err(DocumentError::Invalid(issues))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed document against its raw JSON form, accumulating every
/// issue found.
pub fn validate_document(doc: &WorkflowDocument, raw: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    check_meta(doc, &mut issues);
    check_config(doc, &mut issues);
    check_credentials(doc, &mut issues);
    check_structure(doc, &mut issues);

    let by_id: HashMap<&str, &WorkflowNode> = doc
        .workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n))
        .collect();
    for node in &doc.workflow.nodes {
        check_node(node, &by_id, &mut issues);
    }
    check_raw_node_keys(raw, &mut issues);

    issues
}

fn check_meta(doc: &WorkflowDocument, issues: &mut Vec<ValidationIssue>) {
    if doc.meta.id.is_empty() {
        issues.push(ValidationIssue::new("empty-id", "meta.id must not be empty"));
    } else if !doc
        .meta
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        issues.push(ValidationIssue::new(
            "bad-id",
            format!(
                "meta.id '{}' may only contain alphanumerics and hyphens",
                doc.meta.id
            ),
        ));
    }
    if doc.meta.version.is_empty() {
        issues.push(ValidationIssue::new(
            "empty-version",
            "meta.version must not be empty",
        ));
    }
}

fn check_config(doc: &WorkflowDocument, issues: &mut Vec<ValidationIssue>) {
    if doc.config.execution_timeout_ms == 0 {
        issues.push(ValidationIssue::new(
            "zero-timeout",
            "config.executionTimeoutMs must be greater than zero",
        ));
    }
    if doc.config.retry_attempts == 0 {
        issues.push(ValidationIssue::new(
            "zero-retries",
            "config.retryAttempts must be at least 1",
        ));
    }
}

fn check_credentials(doc: &WorkflowDocument, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for entry in doc
        .credentials
        .required
        .iter()
        .chain(doc.credentials.optional.iter())
    {
        if !valid_credential_entry(entry) {
            issues.push(ValidationIssue::new(
                "bad-credential",
                format!("credential entry '{entry}' is not of the form service.field"),
            ));
        }
        if !seen.insert(entry.as_str()) {
            issues.push(ValidationIssue::new(
                "duplicate-credential",
                format!("credential entry '{entry}' is declared more than once"),
            ));
        }
    }
}

/// `service.field` with one dot, or a bare field name; segments are
/// alphanumeric plus underscore and hyphen.
fn valid_credential_entry(entry: &str) -> bool {
    if entry.is_empty() || entry.matches('.').count() > 1 {
        return false;
    }
    entry.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

fn check_structure(doc: &WorkflowDocument, issues: &mut Vec<ValidationIssue>) {
    if doc.workflow.nodes.is_empty() {
        issues.push(ValidationIssue::new(
            "empty-workflow",
            "workflow must have at least one node",
        ));
        return;
    }

    let mut seen = HashSet::new();
    for node in &doc.workflow.nodes {
        if node.id.is_empty() {
            issues.push(ValidationIssue::new("empty-node-id", "node ID must not be empty"));
        }
        if !seen.insert(node.id.as_str()) {
            issues.push(ValidationIssue::for_node(
                "duplicate-node",
                &node.id,
                "node ID is declared more than once",
            ));
        }
    }

    let index = WorkflowIndex::build(&doc.workflow);

    if !index.contains(doc.workflow.entry.as_str()) {
        issues.push(ValidationIssue::new(
            "unknown-entry",
            format!("entry node '{}' does not exist", doc.workflow.entry),
        ));
    }

    for (from, target) in index.unknown_references() {
        issues.push(ValidationIssue::for_node(
            "unknown-reference",
            from,
            format!("references unknown node '{target}'"),
        ));
    }

    for id in index.ambiguous_successors() {
        issues.push(ValidationIssue::for_node(
            "ambiguous-successor",
            id,
            "node has more than one outgoing edge; control flow is sequential",
        ));
    }

    if let Some(on_cycle) = index.find_cycle() {
        issues.push(ValidationIssue::for_node(
            "cycle",
            on_cycle,
            "node participates in a reference cycle; iteration must use an iterate node",
        ));
    }

    for id in index.unreachable() {
        let tolerated = index.node(id).is_some_and(|n| n.reachable_via_routing);
        if !tolerated {
            issues.push(ValidationIssue::for_node(
                "unreachable-node",
                id,
                "node cannot be reached from the entry (set reachableViaRouting to allow)",
            ));
        }
    }

    // Routes pick their successor from the path map, so a plain outgoing
    // edge would be a second, conflicting successor.
    for node in &doc.workflow.nodes {
        if matches!(node.config, NodeConfig::Route { .. })
            && index.successor(&node.id).is_some()
        {
            issues.push(ValidationIssue::for_node(
                "route-with-edge",
                &node.id,
                "route nodes must not have an outgoing edge; successors come from paths",
            ));
        }
    }
}

fn check_node(
    node: &WorkflowNode,
    by_id: &HashMap<&str, &WorkflowNode>,
    issues: &mut Vec<ValidationIssue>,
) {
    match &node.config {
        NodeConfig::AtomicTask {} => {
            if node.actions.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "no-actions",
                    &node.id,
                    "atomic task declares no actions",
                ));
            }
        }
        NodeConfig::Sequence { children } => {
            if children.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-sequence",
                    &node.id,
                    "sequence has no children",
                ));
            }
            reject_route_members(&node.id, children, by_id, "sequence child", issues);
        }
        NodeConfig::Iterate { iterator_config } => {
            if iterator_config.queue_key.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-queue-key",
                    &node.id,
                    "iterator queueKey must not be empty",
                ));
            }
            if iterator_config.max_iterations == 0 {
                issues.push(ValidationIssue::for_node(
                    "zero-iterations",
                    &node.id,
                    "maxIterations must be at least 1",
                ));
            }
            if iterator_config.body.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-body",
                    &node.id,
                    "iterator body has no nodes",
                ));
            }
            reject_route_members(&node.id, &iterator_config.body, by_id, "iterator body", issues);
        }
        NodeConfig::Route { value, paths, .. } => {
            if value.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-route-value",
                    &node.id,
                    "route value expression must not be empty",
                ));
            }
            if paths.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-paths",
                    &node.id,
                    "route declares no paths",
                ));
            }
        }
        NodeConfig::Assert { conditions, .. } => {
            if conditions.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "no-conditions",
                    &node.id,
                    "assert declares no conditions",
                ));
            }
            for condition in conditions {
                let bad = match condition {
                    AssertCondition::UrlMatch { value }
                    | AssertCondition::TextPresent { value } => value.is_empty(),
                    AssertCondition::ElementVisible { selector }
                    | AssertCondition::ElementHidden { selector }
                    | AssertCondition::ElementEnabled { selector }
                    | AssertCondition::ElementCount { selector, .. } => selector.is_empty(),
                };
                if bad {
                    issues.push(ValidationIssue::for_node(
                        "empty-condition",
                        &node.id,
                        "assert condition has an empty value or selector",
                    ));
                }
            }
        }
        NodeConfig::Handle { try_node, .. } => {
            if try_node.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-try",
                    &node.id,
                    "handler try target must not be empty",
                ));
            }
        }
        NodeConfig::Transform {
            expression,
            output_key,
        } => {
            if expression.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-expression",
                    &node.id,
                    "transform expression must not be empty",
                ));
            }
            if output_key.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-output-key",
                    &node.id,
                    "transform outputKey must not be empty",
                ));
            }
        }
        NodeConfig::Cognition {
            prompt,
            output_key,
            schema,
            timeout_ms,
        } => {
            if prompt.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-prompt",
                    &node.id,
                    "cognition prompt must not be empty",
                ));
            }
            if output_key.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-output-key",
                    &node.id,
                    "cognition outputKey must not be empty",
                ));
            }
            if *timeout_ms == 0 {
                issues.push(ValidationIssue::for_node(
                    "zero-timeout",
                    &node.id,
                    "cognition timeoutMs must be greater than zero",
                ));
            }
            if let Some(schema) = schema {
                if let Err(e) = jsonschema::validator_for(schema) {
                    issues.push(ValidationIssue::for_node(
                        "invalid-schema",
                        &node.id,
                        format!("cognition schema is not a valid JSON Schema: {e}"),
                    ));
                }
            }
        }
        NodeConfig::FilterList {
            list_key,
            instruction,
            output_key,
        } => {
            for (value, what) in [
                (list_key, "listKey"),
                (instruction, "instruction"),
                (output_key, "outputKey"),
            ] {
                if value.is_empty() {
                    issues.push(ValidationIssue::for_node(
                        "empty-field",
                        &node.id,
                        format!("filter {what} must not be empty"),
                    ));
                }
            }
        }
        NodeConfig::Explore { goal, max_actions } => {
            if goal.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-goal",
                    &node.id,
                    "explore goal must not be empty",
                ));
            }
            if *max_actions == 0 {
                issues.push(ValidationIssue::for_node(
                    "zero-actions",
                    &node.id,
                    "explore maxActions must be at least 1",
                ));
            }
        }
    }

    // Actions on non-task nodes are never dispatched.
    if !matches!(node.config, NodeConfig::AtomicTask {}) && !node.actions.is_empty() {
        issues.push(ValidationIssue::for_node(
            "unused-actions",
            &node.id,
            format!("{} nodes do not dispatch actions", node.kind()),
        ));
    }

    for (i, action) in node.actions.iter().enumerate() {
        if action.primary.instruction.is_empty() {
            issues.push(ValidationIssue::for_node(
                "empty-instruction",
                &node.id,
                format!("action {i} has an empty primary instruction"),
            ));
        }
        if action.primary.timeout_ms == 0 {
            issues.push(ValidationIssue::for_node(
                "zero-timeout",
                &node.id,
                format!("action {i} has a zero primary timeout"),
            ));
        }
        if let Some(fallback) = &action.fallback {
            if fallback.instruction.is_empty() {
                issues.push(ValidationIssue::for_node(
                    "empty-instruction",
                    &node.id,
                    format!("action {i} has an empty fallback instruction"),
                ));
            }
        }
    }
}

fn reject_route_members(
    parent: &str,
    members: &[String],
    by_id: &HashMap<&str, &WorkflowNode>,
    what: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    for member in members {
        if let Some(node) = by_id.get(member.as_str()) {
            if matches!(node.config, NodeConfig::Route { .. }) {
                issues.push(ValidationIssue::for_node(
                    "route-in-body",
                    parent,
                    format!("{what} '{member}' is a route; routes may only appear at the top level"),
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raw key check
// ---------------------------------------------------------------------------

/// Keys shared by all node kinds.
const BASE_KEYS: &[&str] = &[
    "id",
    "label",
    "type",
    "actions",
    "retryPolicy",
    "forward",
    "reachableViaRouting",
];

fn allowed_keys_for(kind: &str) -> Option<&'static [&'static str]> {
    Some(match kind {
        "atomic_task" => &[],
        "sequence" | "compound_task" => &["children"],
        "iterate" | "list_iterator" => &["iteratorConfig"],
        "route" | "decision" => &["value", "paths", "default"],
        "assert" => &["conditions", "failureAction"],
        "handle" | "error_handler" => &["try", "catch", "finally", "escalate"],
        "transform" | "data_transform" => &["expression", "outputKey"],
        "cognition" | "generator" | "llm_call" => &["prompt", "outputKey", "schema", "timeoutMs"],
        "filter_list" => &["listKey", "instruction", "outputKey"],
        "explore" => &["goal", "maxActions"],
        _ => return None,
    })
}

/// Reject node objects carrying keys that belong to a different kind.
/// Deserialization cannot do this: the flattened union ignores keys it does
/// not recognize.
fn check_raw_node_keys(raw: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(nodes) = raw
        .get("workflow")
        .and_then(|w| w.get("nodes"))
        .and_then(Value::as_array)
    else {
        return;
    };

    for raw_node in nodes {
        let Some(object) = raw_node.as_object() else {
            continue;
        };
        let id = object.get("id").and_then(Value::as_str).unwrap_or("?");
        let Some(kind) = object.get("type").and_then(Value::as_str) else {
            continue;
        };
        let Some(allowed) = allowed_keys_for(kind) else {
            continue;
        };

        for key in object.keys() {
            if !BASE_KEYS.contains(&key.as_str()) && !allowed.contains(&key.as_str()) {
                issues.push(ValidationIssue::for_node(
                    "foreign-key",
                    id,
                    format!("key '{key}' does not belong to node type '{kind}'"),
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_json(nodes: Value, edges: Value, entry: &str) -> Value {
        json!({
            "meta": {"id": "test-flow", "title": "Test", "version": "1.0"},
            "workflow": {"entry": entry, "nodes": nodes, "edges": edges}
        })
    }

    fn validate(raw: Value) -> Vec<ValidationIssue> {
        let doc: WorkflowDocument = serde_json::from_value(raw.clone()).unwrap();
        validate_document(&doc, &raw)
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    fn task(id: &str) -> Value {
        json!({
            "id": id,
            "type": "atomic_task",
            "actions": [{
                "primary": {"kind": "act", "instruction": "click the button"}
            }]
        })
    }

    // -----------------------------------------------------------------------
    // parse_document
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_valid_document() {
        let raw = doc_json(
            json!([task("a"), task("b")]),
            json!([{"from": "a", "to": "b"}]),
            "a",
        );
        let doc = parse_document(&raw.to_string()).unwrap();
        assert_eq!(doc.meta.id, "test-flow");
        assert_eq!(doc.workflow.nodes.len(), 2);
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_document("{not json").unwrap_err();
        assert!(matches!(err, DocumentError::Parse(_)));
    }

    #[test]
    fn test_parse_collects_all_issues() {
        // Empty workflow AND zero timeout: both must be reported.
        let raw = json!({
            "meta": {"id": "test-flow", "title": "T", "version": "1.0"},
            "config": {"executionTimeoutMs": 0},
            "workflow": {"entry": "a", "nodes": [], "edges": []}
        });
        let err = parse_document(&raw.to_string()).unwrap_err();
        let issue_codes: Vec<&str> = err.issues().iter().map(|i| i.code.as_str()).collect();
        assert!(issue_codes.contains(&"zero-timeout"));
        assert!(issue_codes.contains(&"empty-workflow"));
    }

    // -----------------------------------------------------------------------
    // Meta and config
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_bad_meta_id() {
        let mut raw = doc_json(json!([task("a")]), json!([]), "a");
        raw["meta"]["id"] = json!("has spaces!");
        assert!(codes(&validate(raw)).contains(&"bad-id"));
    }

    #[test]
    fn test_rejects_bad_credential_grammar() {
        let mut raw = doc_json(json!([task("a")]), json!([]), "a");
        raw["credentials"] = json!({"required": ["mail.password", "too.many.dots"]});
        assert!(codes(&validate(raw)).contains(&"bad-credential"));
    }

    #[test]
    fn test_rejects_duplicate_credential() {
        let mut raw = doc_json(json!([task("a")]), json!([]), "a");
        raw["credentials"] = json!({"required": ["mail.password"], "optional": ["mail.password"]});
        assert!(codes(&validate(raw)).contains(&"duplicate-credential"));
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_duplicate_node_ids() {
        let raw = doc_json(json!([task("a"), task("a")]), json!([]), "a");
        assert!(codes(&validate(raw)).contains(&"duplicate-node"));
    }

    #[test]
    fn test_rejects_unknown_entry() {
        let raw = doc_json(json!([task("a")]), json!([]), "ghost");
        assert!(codes(&validate(raw)).contains(&"unknown-entry"));
    }

    #[test]
    fn test_rejects_unknown_edge_target() {
        let raw = doc_json(json!([task("a")]), json!([{"from": "a", "to": "ghost"}]), "a");
        assert!(codes(&validate(raw)).contains(&"unknown-reference"));
    }

    #[test]
    fn test_rejects_cycle() {
        let raw = doc_json(
            json!([task("a"), task("b")]),
            json!([{"from": "a", "to": "b"}, {"from": "b", "to": "a"}]),
            "a",
        );
        assert!(codes(&validate(raw)).contains(&"cycle"));
    }

    #[test]
    fn test_rejects_unreachable_node() {
        let raw = doc_json(json!([task("a"), task("island")]), json!([]), "a");
        assert!(codes(&validate(raw)).contains(&"unreachable-node"));
    }

    #[test]
    fn test_reachable_via_routing_suppresses_orphan() {
        let mut island = task("island");
        island["reachableViaRouting"] = json!(true);
        let raw = doc_json(json!([task("a"), island]), json!([]), "a");
        assert!(!codes(&validate(raw)).contains(&"unreachable-node"));
    }

    #[test]
    fn test_rejects_route_with_plain_edge() {
        let raw = doc_json(
            json!([
                {"id": "r", "type": "route", "value": "x", "paths": {"a": "t"}, "default": "t"},
                task("t")
            ]),
            json!([{"from": "r", "to": "t"}]),
            "r",
        );
        assert!(codes(&validate(raw)).contains(&"route-with-edge"));
    }

    #[test]
    fn test_rejects_route_inside_iterator_body() {
        let raw = doc_json(
            json!([
                {"id": "loop", "type": "iterate", "iteratorConfig": {
                    "queueKey": "items", "body": ["branch"]
                }},
                {"id": "branch", "type": "route", "value": "x", "paths": {"a": "t"}, "default": "t"},
                task("t")
            ]),
            json!([]),
            "loop",
        );
        assert!(codes(&validate(raw)).contains(&"route-in-body"));
    }

    // -----------------------------------------------------------------------
    // Per-kind checks
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_task_without_actions() {
        let raw = doc_json(json!([{"id": "a", "type": "atomic_task"}]), json!([]), "a");
        assert!(codes(&validate(raw)).contains(&"no-actions"));
    }

    #[test]
    fn test_rejects_actions_on_non_task() {
        let raw = doc_json(
            json!([{
                "id": "t",
                "type": "transform",
                "expression": "a + b",
                "outputKey": "sum",
                "actions": [{"primary": {"kind": "act", "instruction": "click"}}]
            }]),
            json!([]),
            "t",
        );
        assert!(codes(&validate(raw)).contains(&"unused-actions"));
    }

    #[test]
    fn test_rejects_empty_action_instruction() {
        let raw = doc_json(
            json!([{
                "id": "a",
                "type": "atomic_task",
                "actions": [{"primary": {"kind": "act", "instruction": ""}}]
            }]),
            json!([]),
            "a",
        );
        assert!(codes(&validate(raw)).contains(&"empty-instruction"));
    }

    #[test]
    fn test_rejects_invalid_cognition_schema() {
        let raw = doc_json(
            json!([{
                "id": "c",
                "type": "cognition",
                "prompt": "classify {{ currentItem }}",
                "outputKey": "result",
                "schema": {"type": "not-a-real-type"}
            }]),
            json!([]),
            "c",
        );
        assert!(codes(&validate(raw)).contains(&"invalid-schema"));
    }

    #[test]
    fn test_rejects_empty_assert_conditions() {
        let raw = doc_json(
            json!([{"id": "a", "type": "assert", "conditions": []}]),
            json!([]),
            "a",
        );
        assert!(codes(&validate(raw)).contains(&"no-conditions"));
    }

    #[test]
    fn test_rejects_zero_max_iterations() {
        let raw = doc_json(
            json!([
                {"id": "loop", "type": "iterate", "iteratorConfig": {
                    "queueKey": "items", "maxIterations": 0, "body": ["b"]
                }},
                {"id": "b", "type": "transform", "expression": "1", "outputKey": "one"}
            ]),
            json!([]),
            "loop",
        );
        assert!(codes(&validate(raw)).contains(&"zero-iterations"));
    }

    // -----------------------------------------------------------------------
    // Raw key check (cross-type configuration)
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejects_foreign_config_key() {
        // An atomic task carrying route configuration: serde would silently
        // drop the extra keys, the raw check must not.
        let raw = doc_json(
            json!([{
                "id": "sneaky",
                "type": "atomic_task",
                "actions": [{"primary": {"kind": "act", "instruction": "click"}}],
                "paths": {"Y": "somewhere"}
            }]),
            json!([]),
            "sneaky",
        );
        assert!(codes(&validate(raw)).contains(&"foreign-key"));
    }

    #[test]
    fn test_alias_spelling_keeps_its_own_keys() {
        let raw = doc_json(
            json!([
                {"id": "loop", "type": "list_iterator", "iteratorConfig": {
                    "queueKey": "items", "body": ["b"]
                }},
                {"id": "b", "type": "transform", "expression": "1", "outputKey": "one"}
            ]),
            json!([]),
            "loop",
        );
        assert!(!codes(&validate(raw)).contains(&"foreign-key"));
    }

    #[test]
    fn test_clean_document_has_no_issues() {
        let raw = doc_json(
            json!([
                task("a"),
                {"id": "branch", "type": "route", "value": "twoFactorRequired",
                 "paths": {"Y": "b", "N": "c"}, "default": "c"},
                task("b"),
                task("c")
            ]),
            json!([{"from": "a", "to": "branch"}]),
            "a",
        );
        let issues = validate(raw);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }
}
