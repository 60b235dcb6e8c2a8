//! Hybrid action resolution.
//!
//! One call resolves one [`WorkflowAction`]: the deterministic primary path is
//! tried first (cached selector, then the document's own selector, then
//! instruction-only dispatch), its receipt is judged against the action's
//! success criteria, and only an unmet primary engages the AI fallback. A
//! fallback that finds the element feeds the selector cache, so the next
//! equivalent action takes the deterministic path again.
//!
//! Cache keys are derived from the primary instruction *template*, before
//! context rendering, so logically-identical actions collide across loop
//! iterations regardless of the data flowing through them.

use std::time::Instant;

use pagewright_types::action::{
    ActionKind, ActionReceipt, ActionRequest, Monitoring, SuccessCriterion, WorkflowAction,
};
use pagewright_types::artifact::ResolutionPath;
use pagewright_types::error::ProviderError;
use pagewright_types::selector::CacheKey;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Duration;

use crate::credential::{CredentialError, CredentialInjector};
use crate::provider::DynBrowserProvider;
use crate::selector::{cache_key, SelectorCache};
use crate::workflow::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("action timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("{kind} dispatch failed: {source}")]
    Dispatch {
        kind: ActionKind,
        #[source]
        source: ProviderError,
    },

    #[error("receipt did not satisfy criterion {0}")]
    CriteriaUnmet(&'static str),
}

// ---------------------------------------------------------------------------
// Resolution report
// ---------------------------------------------------------------------------

/// How an action was ultimately satisfied. Feeds the artifact's processing
/// phase.
#[derive(Debug, Clone)]
pub struct ActionResolution {
    pub receipt: ActionReceipt,
    pub path: ResolutionPath,
    /// Selector the winning dispatch carried, if any.
    pub selector_used: Option<String>,
    /// Selector learned into the cache by this resolution, if any.
    pub learned: Option<String>,
}

// ---------------------------------------------------------------------------
// Payload rendering
// ---------------------------------------------------------------------------

/// Instruction and data after context rendering and credential injection.
/// Confined to the resolver so substituted cleartext never outlives the
/// dispatch that consumes it; callers only ever see the receipt.
struct ResolvedPayload {
    instruction: SecretString,
    data: Option<Value>,
}

impl ResolvedPayload {
    async fn render(
        template: &str,
        data: Option<&Value>,
        ctx: &ExecutionContext,
        injector: &CredentialInjector,
    ) -> Result<Self, CredentialError> {
        let instruction = injector.render(&ctx.render_template(template)).await?;
        let data = match data {
            Some(value) => Some(Box::pin(render_value(value, ctx, injector)).await?),
            None => None,
        };
        Ok(Self { instruction, data })
    }

    /// Build the transient wire request. The returned request holds cleartext
    /// and must be dropped as soon as the dispatch completes.
    fn request(&self, kind: ActionKind, selector: Option<String>, timeout_ms: u64) -> ActionRequest {
        ActionRequest {
            kind,
            instruction: self.instruction.expose_secret().to_string(),
            selector,
            data: self.data.clone(),
            schema: None,
            timeout_ms,
        }
    }
}

/// Recursively render string leaves of a JSON payload: context first, then
/// declared credential placeholders.
async fn render_value(
    value: &Value,
    ctx: &ExecutionContext,
    injector: &CredentialInjector,
) -> Result<Value, CredentialError> {
    Ok(match value {
        Value::String(text) => {
            let rendered = injector.render(&ctx.render_template(text)).await?;
            Value::String(rendered.expose_secret().to_string())
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(Box::pin(render_value(item, ctx, injector)).await?);
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), Box::pin(render_value(item, ctx, injector)).await?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

// ---------------------------------------------------------------------------
// Success criteria
// ---------------------------------------------------------------------------

/// First criterion the receipt fails, if any. An empty criteria list means
/// `no-error` only, which a receipt satisfies by existing.
fn unmet_criterion(monitoring: &Monitoring, receipt: &ActionReceipt) -> Option<&'static str> {
    for criterion in &monitoring.success_criteria {
        let met = match criterion {
            SuccessCriterion::NoError => true,
            SuccessCriterion::NavigationOccurred => receipt.navigated,
            SuccessCriterion::ElementStateChanged => receipt.element_changed,
        };
        if !met {
            return Some(match criterion {
                SuccessCriterion::NoError => "no-error",
                SuccessCriterion::NavigationOccurred => "navigation-occurred",
                SuccessCriterion::ElementStateChanged => "element-state-changed",
            });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// ActionResolver
// ---------------------------------------------------------------------------

/// Resolves actions against the browser provider, consulting and feeding the
/// process-wide selector cache.
#[derive(Clone)]
pub struct ActionResolver {
    browser: DynBrowserProvider,
    cache: SelectorCache,
}

impl ActionResolver {
    pub fn new(browser: DynBrowserProvider, cache: SelectorCache) -> Self {
        Self { browser, cache }
    }

    pub fn cache(&self) -> &SelectorCache {
        &self.cache
    }

    /// Resolve one action to a receipt, or exhaust both paths trying.
    pub async fn resolve(
        &self,
        action: &WorkflowAction,
        ctx: &ExecutionContext,
        injector: &CredentialInjector,
    ) -> Result<ActionResolution, ResolveError> {
        let primary = &action.primary;
        let payload =
            ResolvedPayload::render(&primary.instruction, primary.data.as_ref(), ctx, injector)
                .await?;

        // Key off the instruction template and the page the action starts on.
        let page_url = match self.browser.page_boxed().await {
            Ok(page) => page.url,
            Err(_) => "about:blank".to_string(),
        };
        let key = cache_key(&page_url, primary.kind, &primary.instruction);

        let cached = if cacheable(primary.kind) {
            self.cache.lookup(&key)
        } else {
            None
        };

        // A learned selector outranks the document's: the document one is
        // whatever the author wrote, the cached one is what last worked here.
        let (selector, path) = match &cached {
            Some(entry) => (Some(entry.selector.clone()), ResolutionPath::Cached),
            None => (primary.selector.clone(), ResolutionPath::Primary),
        };

        let started = Instant::now();
        let request = payload.request(primary.kind, selector.clone(), primary.timeout_ms);
        let attempt = self.dispatch(&request).await;
        drop(request);

        match attempt {
            Ok(receipt) => match unmet_criterion(&action.monitoring, &receipt) {
                None => {
                    if path == ResolutionPath::Cached {
                        self.cache.record_outcome(&key, true);
                    }
                    let learned = if selector.is_none() {
                        self.learn(&action.monitoring, &key, &receipt)
                    } else {
                        None
                    };
                    tracing::debug!(
                        kind = %primary.kind,
                        path = ?path,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "primary dispatch satisfied"
                    );
                    Ok(ActionResolution {
                        receipt,
                        path,
                        selector_used: selector,
                        learned,
                    })
                }
                Some(criterion) => {
                    tracing::debug!(
                        kind = %primary.kind,
                        criterion,
                        "primary receipt unmet, engaging fallback"
                    );
                    self.note_primary_failure(path, &key);
                    self.fallback(
                        action,
                        &payload,
                        ctx,
                        injector,
                        &key,
                        ResolveError::CriteriaUnmet(criterion),
                    )
                    .await
                }
            },
            Err(err) => {
                tracing::debug!(
                    kind = %primary.kind,
                    error = %err,
                    "primary dispatch failed, engaging fallback"
                );
                self.note_primary_failure(path, &key);
                self.fallback(action, &payload, ctx, injector, &key, err).await
            }
        }
    }

    /// Decay the cache entry that just let us down.
    fn note_primary_failure(&self, path: ResolutionPath, key: &CacheKey) {
        if path == ResolutionPath::Cached {
            self.cache.record_outcome(key, false);
        }
    }

    async fn fallback(
        &self,
        action: &WorkflowAction,
        primary_payload: &ResolvedPayload,
        ctx: &ExecutionContext,
        injector: &CredentialInjector,
        key: &CacheKey,
        primary_err: ResolveError,
    ) -> Result<ActionResolution, ResolveError> {
        let Some(fallback) = &action.fallback else {
            return Err(primary_err);
        };

        // The fallback instruction is its own template; already-rendered data
        // rides along from the primary so type/fill fallbacks still know what
        // to enter.
        let payload = ResolvedPayload {
            instruction: injector
                .render(&ctx.render_template(&fallback.instruction))
                .await?,
            data: primary_payload.data.clone(),
        };
        let request = payload.request(fallback.kind, None, action.primary.timeout_ms);
        let receipt = self.dispatch(&request).await?;
        drop(request);

        if let Some(criterion) = unmet_criterion(&action.monitoring, &receipt) {
            return Err(ResolveError::CriteriaUnmet(criterion));
        }

        let learned = self.learn(&action.monitoring, key, &receipt);
        tracing::info!(
            kind = %fallback.kind,
            learned = learned.as_deref().unwrap_or("-"),
            "fallback dispatch satisfied"
        );
        Ok(ActionResolution {
            receipt,
            path: ResolutionPath::Fallback,
            selector_used: None,
            learned,
        })
    }

    /// Feed a successful AI-found element into the cache.
    fn learn(
        &self,
        monitoring: &Monitoring,
        key: &CacheKey,
        receipt: &ActionReceipt,
    ) -> Option<String> {
        if !monitoring.learn_selectors {
            return None;
        }
        let fingerprint = receipt.fingerprint.as_ref()?;
        self.cache
            .learn(key.clone(), fingerprint)
            .map(|entry| entry.selector)
    }

    /// One wire dispatch with the action's own timeout.
    async fn dispatch(&self, request: &ActionRequest) -> Result<ActionReceipt, ResolveError> {
        let window = Duration::from_millis(request.timeout_ms);
        let outcome = match request.kind {
            ActionKind::Act | ActionKind::AiAct => {
                tokio::time::timeout(window, self.browser.act_boxed(request)).await
            }
            ActionKind::Extract | ActionKind::AiExtract => {
                tokio::time::timeout(window, self.browser.extract_boxed(request)).await
            }
            ActionKind::Navigate => {
                tokio::time::timeout(
                    window,
                    self.browser
                        .navigate_boxed(&request.instruction, request.timeout_ms),
                )
                .await
            }
            ActionKind::Observe => {
                let observed = tokio::time::timeout(
                    window,
                    self.browser
                        .observe_boxed(&request.instruction, request.timeout_ms),
                )
                .await;
                return match observed {
                    Ok(Ok(observations)) => {
                        let data = serde_json::to_value(observations).map_err(|e| {
                            ResolveError::Dispatch {
                                kind: request.kind,
                                source: ProviderError::Serialization(e),
                            }
                        })?;
                        Ok(ActionReceipt {
                            data: Some(data),
                            ..ActionReceipt::default()
                        })
                    }
                    Ok(Err(source)) => Err(ResolveError::Dispatch {
                        kind: request.kind,
                        source,
                    }),
                    Err(_) => Err(ResolveError::Timeout {
                        timeout_ms: request.timeout_ms,
                    }),
                };
            }
        };
        match outcome {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(source)) => Err(ResolveError::Dispatch {
                kind: request.kind,
                source,
            }),
            Err(_) => Err(ResolveError::Timeout {
                timeout_ms: request.timeout_ms,
            }),
        }
    }
}

/// Selector caching only makes sense for element-targeting dispatch.
fn cacheable(kind: ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::Act | ActionKind::Extract | ActionKind::AiAct | ActionKind::AiExtract
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
