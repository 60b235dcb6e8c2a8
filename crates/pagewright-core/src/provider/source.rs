//! Workflow source port.
//!
//! Where raw workflow JSON comes from. The loader in `workflow::validate`
//! turns the raw text into a validated [`WorkflowDocument`]; the engine never
//! accepts unvalidated input.
//!
//! [`WorkflowDocument`]: pagewright_types::workflow::WorkflowDocument

use std::future::Future;

use pagewright_types::error::ProviderError;

/// Async port for loading raw workflow documents by ID.
pub trait WorkflowSource: Send + Sync {
    fn load(&self, id: &str) -> impl Future<Output = Result<String, ProviderError>> + Send;
}
