//! Scripted providers for offline replay.
//!
//! A replay script is a JSON file describing what the browser and the
//! reasoning provider would have returned, step by step. Feeding it to the
//! engine executes a workflow end to end with no live browser, which is how
//! document authors smoke-test control flow and how a recorded incident is
//! reproduced from its artifact trail.
//!
//! The browser side is strict: every dispatch consumes the next scripted step
//! and the step's recorded kind must match what the engine dispatched, so a
//! run that resolves differently (say, primary instead of fallback) fails
//! loudly instead of drifting.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;

use pagewright_core::provider::{
    BrowserProvider, CognitionProvider, DynBrowserProvider, DynCognitionProvider,
};
use pagewright_types::action::{
    ActionKind, ActionReceipt, ActionRequest, ElementState, Observation, PageState,
};
use pagewright_types::error::ProviderError;

// ---------------------------------------------------------------------------
// Script format
// ---------------------------------------------------------------------------

/// One scripted browser dispatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStep {
    /// Kind the engine is expected to dispatch at this point.
    pub kind: ActionKind,
    /// Receipt returned on success.
    #[serde(default)]
    pub receipt: ActionReceipt,
    /// When present, the dispatch fails with this message instead.
    #[serde(default)]
    pub fail: Option<String>,
    /// Proposed steps, for observe dispatches.
    #[serde(default)]
    pub observations: Vec<Observation>,
}

/// A full replay script: browser steps plus canned reasoning output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    /// URL the page reports before the first navigation.
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
    /// One entry per cognition completion, consumed in order.
    #[serde(default)]
    pub completions: Vec<Value>,
    /// One batch per filter classification, consumed in order.
    #[serde(default)]
    pub verdicts: Vec<Vec<bool>>,
    /// Element states returned by deterministic queries, keyed by selector.
    #[serde(default)]
    pub elements: HashMap<String, Vec<ElementState>>,
}

fn default_start_url() -> String {
    "about:blank".to_string()
}

impl ReplayScript {
    /// Parse a script from a JSON file.
    pub async fn load(path: &Path) -> Result<Self, ProviderError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Split the script into the provider pair the engine consumes.
    pub fn into_providers(self) -> (DynBrowserProvider, DynCognitionProvider) {
        let browser = ReplayBrowser {
            steps: Mutex::new(self.steps.into()),
            page: Mutex::new(PageState {
                url: self.start_url,
                title: String::new(),
            }),
            elements: self.elements,
        };
        let cognition = ReplayCognition {
            completions: Mutex::new(self.completions.into()),
            verdicts: Mutex::new(self.verdicts.into()),
        };
        (std::sync::Arc::new(browser), std::sync::Arc::new(cognition))
    }
}

// ---------------------------------------------------------------------------
// Browser side
// ---------------------------------------------------------------------------

/// Browser provider that replays scripted steps in order.
pub struct ReplayBrowser {
    steps: Mutex<VecDeque<ReplayStep>>,
    page: Mutex<PageState>,
    elements: HashMap<String, Vec<ElementState>>,
}

impl ReplayBrowser {
    /// Scripted steps not yet consumed. Non-zero after a run usually means
    /// the workflow took a shorter path than the script anticipated.
    pub fn remaining_steps(&self) -> usize {
        self.steps.lock().map_or(0, |steps| steps.len())
    }

    fn next_step(&self, dispatched: ActionKind) -> Result<ReplayStep, ProviderError> {
        let mut steps = self
            .steps
            .lock()
            .map_err(|_| ProviderError::Unavailable("replay script poisoned".to_string()))?;
        let step = steps.pop_front().ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "replay script exhausted, engine dispatched {dispatched}"
            ))
        })?;
        if step.kind != dispatched {
            return Err(ProviderError::InvalidResponse(format!(
                "replay script expected {}, engine dispatched {dispatched}",
                step.kind
            )));
        }
        if let Some(message) = step.fail {
            return Err(ProviderError::Unavailable(message));
        }
        Ok(step)
    }

    fn apply_receipt(&self, receipt: &ActionReceipt) {
        if let Some(url) = &receipt.current_url {
            if let Ok(mut page) = self.page.lock() {
                page.url = url.clone();
            }
        }
    }
}

impl BrowserProvider for ReplayBrowser {
    async fn act(&self, request: &ActionRequest) -> Result<ActionReceipt, ProviderError> {
        let step = self.next_step(request.kind)?;
        self.apply_receipt(&step.receipt);
        Ok(step.receipt)
    }

    async fn extract(&self, request: &ActionRequest) -> Result<ActionReceipt, ProviderError> {
        let step = self.next_step(request.kind)?;
        self.apply_receipt(&step.receipt);
        Ok(step.receipt)
    }

    async fn observe(
        &self,
        _instruction: &str,
        _timeout_ms: u64,
    ) -> Result<Vec<Observation>, ProviderError> {
        let step = self.next_step(ActionKind::Observe)?;
        Ok(step.observations)
    }

    async fn navigate(&self, url: &str, _timeout_ms: u64) -> Result<ActionReceipt, ProviderError> {
        let mut step = self.next_step(ActionKind::Navigate)?;
        if step.receipt.current_url.is_none() {
            step.receipt.current_url = Some(url.to_string());
        }
        step.receipt.navigated = true;
        self.apply_receipt(&step.receipt);
        Ok(step.receipt)
    }

    async fn page(&self) -> Result<PageState, ProviderError> {
        self.page
            .lock()
            .map(|page| page.clone())
            .map_err(|_| ProviderError::Unavailable("replay script poisoned".to_string()))
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementState>, ProviderError> {
        Ok(self.elements.get(selector).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cognition side
// ---------------------------------------------------------------------------

/// Cognition provider that replays canned completions and verdicts.
pub struct ReplayCognition {
    completions: Mutex<VecDeque<Value>>,
    verdicts: Mutex<VecDeque<Vec<bool>>>,
}

impl CognitionProvider for ReplayCognition {
    async fn complete(
        &self,
        _prompt: &str,
        _schema: Option<&Value>,
        _timeout_ms: u64,
    ) -> Result<Value, ProviderError> {
        self.completions
            .lock()
            .map_err(|_| ProviderError::Unavailable("replay script poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| {
                ProviderError::Unavailable("replay script has no more completions".to_string())
            })
    }

    async fn classify(
        &self,
        _instruction: &str,
        _items: &[Value],
    ) -> Result<Vec<bool>, ProviderError> {
        self.verdicts
            .lock()
            .map_err(|_| ProviderError::Unavailable("replay script poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| {
                ProviderError::Unavailable("replay script has no more verdicts".to_string())
            })
    }
}
