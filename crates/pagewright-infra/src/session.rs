//! Static session provider.
//!
//! Hands out sessions against one fixed browser endpoint (a local CDP URL by
//! default). Tracks which executions currently hold a session so a
//! double-acquire or an unmatched release surfaces as an error instead of
//! silently sharing a browser between runs.

use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

use pagewright_core::provider::{SessionHandle, SessionProvider};
use pagewright_types::error::ProviderError;

/// Session provider over a single fixed endpoint.
pub struct StaticSessionProvider {
    endpoint: String,
    active: Mutex<HashSet<Uuid>>,
}

impl StaticSessionProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Number of executions currently holding a session.
    pub fn active_count(&self) -> usize {
        self.active.lock().map_or(0, |active| active.len())
    }
}

impl SessionProvider for StaticSessionProvider {
    async fn acquire(&self, execution_id: Uuid) -> Result<SessionHandle, ProviderError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| ProviderError::Unavailable("session registry poisoned".to_string()))?;
        if !active.insert(execution_id) {
            return Err(ProviderError::Storage(format!(
                "execution {execution_id} already holds a session"
            )));
        }
        Ok(SessionHandle {
            endpoint: self.endpoint.clone(),
            tabs: Vec::new(),
        })
    }

    async fn release(&self, execution_id: Uuid) -> Result<(), ProviderError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| ProviderError::Unavailable("session registry poisoned".to_string()))?;
        if !active.remove(&execution_id) {
            return Err(ProviderError::NotFound(execution_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release_pairing() {
        let provider = StaticSessionProvider::new("http://127.0.0.1:9222");
        let execution_id = Uuid::now_v7();

        let handle = provider.acquire(execution_id).await.unwrap();
        assert_eq!(handle.endpoint, "http://127.0.0.1:9222");
        assert_eq!(provider.active_count(), 1);

        provider.release(execution_id).await.unwrap();
        assert_eq!(provider.active_count(), 0);
    }

    #[tokio::test]
    async fn test_double_acquire_rejected() {
        let provider = StaticSessionProvider::new("http://127.0.0.1:9222");
        let execution_id = Uuid::now_v7();

        provider.acquire(execution_id).await.unwrap();
        let err = provider.acquire(execution_id).await.unwrap_err();
        assert!(err.to_string().contains("already holds a session"));
    }

    #[tokio::test]
    async fn test_release_without_acquire_rejected() {
        let provider = StaticSessionProvider::new("http://127.0.0.1:9222");
        let err = provider.release(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_independent_executions_coexist() {
        let provider = StaticSessionProvider::new("http://127.0.0.1:9222");
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        provider.acquire(first).await.unwrap();
        provider.acquire(second).await.unwrap();
        assert_eq!(provider.active_count(), 2);

        provider.release(first).await.unwrap();
        provider.release(second).await.unwrap();
        assert_eq!(provider.active_count(), 0);
    }
}
