//! Session provider port.
//!
//! Hands out the exclusive browser session a run works against. The engine
//! acquires at run start (after credential validation) and releases in every
//! terminal path, abort included.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use uuid::Uuid;

use pagewright_types::error::ProviderError;

/// A live browser session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Endpoint the browser provider connects through (e.g. a CDP URL).
    pub endpoint: String,
    /// Open tab identifiers; index 0 is the active tab.
    pub tabs: Vec<String>,
}

/// Async port for session acquisition.
pub trait SessionProvider: Send + Sync {
    fn acquire(
        &self,
        execution_id: Uuid,
    ) -> impl Future<Output = Result<SessionHandle, ProviderError>> + Send;

    fn release(
        &self,
        execution_id: Uuid,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// Object-safe version of [`SessionProvider`] with boxed futures.
pub trait SessionProviderDyn: Send + Sync {
    fn acquire_boxed(
        &self,
        execution_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<SessionHandle, ProviderError>> + Send + '_>>;

    fn release_boxed(
        &self,
        execution_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + '_>>;
}

impl<T: SessionProvider> SessionProviderDyn for T {
    fn acquire_boxed(
        &self,
        execution_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<SessionHandle, ProviderError>> + Send + '_>> {
        Box::pin(self.acquire(execution_id))
    }

    fn release_boxed(
        &self,
        execution_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + '_>> {
        Box::pin(self.release(execution_id))
    }
}

/// Shared handle to a type-erased session provider.
pub type DynSessionProvider = Arc<dyn SessionProviderDyn>;
