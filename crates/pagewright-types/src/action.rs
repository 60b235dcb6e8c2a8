//! Action types: the hybrid primary/fallback pair a node dispatches, the
//! request/receipt shapes exchanged with the browser-primitive provider, and
//! the element fingerprint that selector learning ranks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow Action (document wire shape)
// ---------------------------------------------------------------------------

/// One atomic operation a node performs: a deterministic primary path, an
/// optional AI-driven fallback, and monitoring that decides when the fallback
/// engages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub primary: PrimaryAction,
    /// Absent fallback means a primary failure is final for this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackAction>,
    #[serde(default)]
    pub monitoring: Monitoring,
}

/// The deterministic path: dispatch by selector (provided or cached).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryAction {
    pub kind: ActionKind,
    /// CSS-ish selector; absent means the resolver may substitute a cached
    /// one, and instruction-only dispatch otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Human-readable instruction; may contain `{{token}}` credential
    /// placeholders resolved just-in-time.
    pub instruction: String,
    /// Payload for type/fill style actions; string leaves may also carry
    /// placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default = "default_action_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

/// The AI-driven path, engaged when the primary fails its success criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAction {
    #[serde(default = "default_fallback_kind")]
    pub kind: ActionKind,
    pub instruction: String,
}

fn default_fallback_kind() -> ActionKind {
    ActionKind::AiAct
}

/// Kinds of browser-primitive dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Act,
    Extract,
    Observe,
    Navigate,
    AiAct,
    AiExtract,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Act => "act",
            ActionKind::Extract => "extract",
            ActionKind::Observe => "observe",
            ActionKind::Navigate => "navigate",
            ActionKind::AiAct => "ai-act",
            ActionKind::AiExtract => "ai-extract",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success criteria and selector-learning toggle for one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitoring {
    /// Evaluated against the receipt after the primary attempt. Empty means
    /// `no-error` only.
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    /// When true, a fallback success feeds the selector cache.
    #[serde(default)]
    pub learn_selectors: bool,
}

/// One success criterion, serialized as a plain string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuccessCriterion {
    /// The provider returned a receipt at all.
    NoError,
    /// The dispatch caused a navigation.
    NavigationOccurred,
    /// The targeted element changed state.
    ElementStateChanged,
}

// ---------------------------------------------------------------------------
// Provider request / receipt
// ---------------------------------------------------------------------------

/// A single dispatch sent to the browser-primitive provider. Selector present
/// means deterministic dispatch; absent means AI-driven.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    pub timeout_ms: u64,
}

/// What the provider reports back for a successful dispatch. Failures are
/// errors, not receipts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReceipt {
    /// URL after the dispatch, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    /// The dispatch caused a navigation.
    #[serde(default)]
    pub navigated: bool,
    /// The targeted element visibly changed state.
    #[serde(default)]
    pub element_changed: bool,
    /// Extraction payload for extract-kind dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Attributes of the element acted on, when the provider can identify it;
    /// feeds selector learning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<ElementFingerprint>,
}

/// Raw attributes of one page element, from which the most stable selector is
/// derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementFingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_test: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    /// Positional CSS path, the least stable fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
    /// Element tag name, used to scope attribute selectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Deterministic page snapshot used by assert conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// State of one queried element, used by assert conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementState {
    pub visible: bool,
    pub enabled: bool,
    #[serde(default)]
    pub text: String,
}

/// One candidate step suggested by an observe dispatch, consumed by the
/// explore node's bounded loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// True when the observer judges the goal already satisfied.
    #[serde(default)]
    pub goal_reached: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_kind_wire_spellings() {
        assert_eq!(serde_json::to_string(&ActionKind::AiAct).unwrap(), "\"ai-act\"");
        assert_eq!(serde_json::to_string(&ActionKind::Act).unwrap(), "\"act\"");
        let parsed: ActionKind = serde_json::from_str("\"ai-extract\"").unwrap();
        assert_eq!(parsed, ActionKind::AiExtract);
    }

    #[test]
    fn test_workflow_action_minimal_parse() {
        let action: WorkflowAction = serde_json::from_value(json!({
            "primary": {"kind": "act", "instruction": "click the compose button"}
        }))
        .unwrap();
        assert_eq!(action.primary.timeout_ms, 30_000);
        assert!(action.primary.selector.is_none());
        assert!(action.fallback.is_none());
        assert!(action.monitoring.success_criteria.is_empty());
        assert!(!action.monitoring.learn_selectors);
    }

    #[test]
    fn test_fallback_defaults_to_ai_act() {
        let fallback: FallbackAction =
            serde_json::from_value(json!({"instruction": "click compose"})).unwrap();
        assert_eq!(fallback.kind, ActionKind::AiAct);
    }

    #[test]
    fn test_success_criteria_parse_as_plain_strings() {
        let monitoring: Monitoring = serde_json::from_value(json!({
            "successCriteria": ["no-error", "navigation-occurred", "element-state-changed"],
            "learnSelectors": true
        }))
        .unwrap();
        assert_eq!(
            monitoring.success_criteria,
            vec![
                SuccessCriterion::NoError,
                SuccessCriterion::NavigationOccurred,
                SuccessCriterion::ElementStateChanged,
            ]
        );
        assert!(monitoring.learn_selectors);
    }

    #[test]
    fn test_action_receipt_roundtrip() {
        let receipt = ActionReceipt {
            current_url: Some("https://mail.example.com/inbox".to_string()),
            navigated: true,
            element_changed: false,
            data: Some(json!({"count": 3})),
            fingerprint: Some(ElementFingerprint {
                name: Some("archive".to_string()),
                tag: Some("button".to_string()),
                ..ElementFingerprint::default()
            }),
        };
        let text = serde_json::to_string(&receipt).unwrap();
        assert!(text.contains("\"currentUrl\""));
        let parsed: ActionReceipt = serde_json::from_str(&text).unwrap();
        assert!(parsed.navigated);
        assert_eq!(parsed.fingerprint.unwrap().name.as_deref(), Some("archive"));
    }

    #[test]
    fn test_element_fingerprint_defaults_empty() {
        let fp: ElementFingerprint = serde_json::from_value(json!({})).unwrap();
        assert!(fp.name.is_none());
        assert!(fp.classes.is_empty());
    }
}
