//! Browser primitive provider port.
//!
//! The contract the engine expects from whatever drives the actual browser:
//! act/extract/observe/navigate dispatch plus the deterministic inspection
//! surface (`page`, `query`) that assert conditions read. A request carrying
//! a selector is deterministic dispatch; one without a selector asks the
//! provider's AI layer to find the target from the instruction alone.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pagewright_types::action::{ActionReceipt, ActionRequest, ElementState, Observation, PageState};
use pagewright_types::error::ProviderError;

/// Async port for browser primitives.
pub trait BrowserProvider: Send + Sync {
    /// Perform a page interaction (click, type, select, ...).
    fn act(
        &self,
        request: &ActionRequest,
    ) -> impl Future<Output = Result<ActionReceipt, ProviderError>> + Send;

    /// Extract structured data from the page.
    fn extract(
        &self,
        request: &ActionRequest,
    ) -> impl Future<Output = Result<ActionReceipt, ProviderError>> + Send;

    /// Ask the provider to propose next steps toward an instruction.
    fn observe(
        &self,
        instruction: &str,
        timeout_ms: u64,
    ) -> impl Future<Output = Result<Vec<Observation>, ProviderError>> + Send;

    /// Load a URL.
    fn navigate(
        &self,
        url: &str,
        timeout_ms: u64,
    ) -> impl Future<Output = Result<ActionReceipt, ProviderError>> + Send;

    /// Current page snapshot (URL + title). Deterministic, no AI involved.
    fn page(&self) -> impl Future<Output = Result<PageState, ProviderError>> + Send;

    /// All elements matching a selector. Deterministic, no AI involved.
    fn query(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<ElementState>, ProviderError>> + Send;

    /// Tear down the in-flight tab state (called on abort).
    fn close(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// Object-safe version of [`BrowserProvider`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation covers
/// every `BrowserProvider`.
pub trait BrowserProviderDyn: Send + Sync {
    fn act_boxed<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReceipt, ProviderError>> + Send + 'a>>;

    fn extract_boxed<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReceipt, ProviderError>> + Send + 'a>>;

    fn observe_boxed<'a>(
        &'a self,
        instruction: &'a str,
        timeout_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Observation>, ProviderError>> + Send + 'a>>;

    fn navigate_boxed<'a>(
        &'a self,
        url: &'a str,
        timeout_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReceipt, ProviderError>> + Send + 'a>>;

    fn page_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<PageState, ProviderError>> + Send + 'a>>;

    fn query_boxed<'a>(
        &'a self,
        selector: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ElementState>, ProviderError>> + Send + 'a>>;

    fn close_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>>;
}

impl<T: BrowserProvider> BrowserProviderDyn for T {
    fn act_boxed<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReceipt, ProviderError>> + Send + 'a>> {
        Box::pin(self.act(request))
    }

    fn extract_boxed<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReceipt, ProviderError>> + Send + 'a>> {
        Box::pin(self.extract(request))
    }

    fn observe_boxed<'a>(
        &'a self,
        instruction: &'a str,
        timeout_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Observation>, ProviderError>> + Send + 'a>> {
        Box::pin(self.observe(instruction, timeout_ms))
    }

    fn navigate_boxed<'a>(
        &'a self,
        url: &'a str,
        timeout_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReceipt, ProviderError>> + Send + 'a>> {
        Box::pin(self.navigate(url, timeout_ms))
    }

    fn page_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<PageState, ProviderError>> + Send + 'a>> {
        Box::pin(self.page())
    }

    fn query_boxed<'a>(
        &'a self,
        selector: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ElementState>, ProviderError>> + Send + 'a>> {
        Box::pin(self.query(selector))
    }

    fn close_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>> {
        Box::pin(self.close())
    }
}

/// Shared handle to a type-erased browser provider.
pub type DynBrowserProvider = Arc<dyn BrowserProviderDyn>;
