//! Cognition provider port.
//!
//! External reasoning capability consumed by cognition and filter_list nodes.
//! Schema validation of completions happens on the engine side; the provider
//! just returns JSON.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use pagewright_types::error::ProviderError;

/// Async port for the reasoning capability.
pub trait CognitionProvider: Send + Sync {
    /// Complete a rendered prompt into a JSON value.
    fn complete(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        timeout_ms: u64,
    ) -> impl Future<Output = Result<Value, ProviderError>> + Send;

    /// Classify a batch of items against an instruction, one verdict per item.
    fn classify(
        &self,
        instruction: &str,
        items: &[Value],
    ) -> impl Future<Output = Result<Vec<bool>, ProviderError>> + Send;
}

/// Object-safe version of [`CognitionProvider`] with boxed futures.
pub trait CognitionProviderDyn: Send + Sync {
    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
        schema: Option<&'a Value>,
        timeout_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ProviderError>> + Send + 'a>>;

    fn classify_boxed<'a>(
        &'a self,
        instruction: &'a str,
        items: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<bool>, ProviderError>> + Send + 'a>>;
}

impl<T: CognitionProvider> CognitionProviderDyn for T {
    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
        schema: Option<&'a Value>,
        timeout_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ProviderError>> + Send + 'a>> {
        Box::pin(self.complete(prompt, schema, timeout_ms))
    }

    fn classify_boxed<'a>(
        &'a self,
        instruction: &'a str,
        items: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<bool>, ProviderError>> + Send + 'a>> {
        Box::pin(self.classify(instruction, items))
    }
}

/// Shared handle to a type-erased cognition provider.
pub type DynCognitionProvider = Arc<dyn CognitionProviderDyn>;
