//! Secret chain -- wires concrete resolvers in priority order.
//!
//! This module lives in `pagewright-infra` because it assembles concrete
//! resolver implementations. The resulting chain is handed to the credential
//! injector in `pagewright-core` via the `DynSecretResolver` abstraction.
//!
//! Default chain order: `[EnvSecretResolver, FileSecretResolver]`.

use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;

use pagewright_core::provider::{DynSecretResolver, SecretResolver};
use pagewright_types::error::ProviderError;

use crate::secret::env::EnvSecretResolver;
use crate::secret::file::FileSecretResolver;

/// Ordered chain of secret resolvers. The first resolver returning `Some`
/// wins; a hard error from any resolver aborts the lookup.
pub struct SecretChain {
    resolvers: Vec<DynSecretResolver>,
}

impl SecretChain {
    /// Chain over explicit resolvers, highest priority first.
    pub fn new(resolvers: Vec<DynSecretResolver>) -> Self {
        Self { resolvers }
    }
}

impl SecretResolver for SecretChain {
    async fn get_secret(
        &self,
        service: &str,
        field: &str,
    ) -> Result<Option<SecretString>, ProviderError> {
        for resolver in &self.resolvers {
            if let Some(secret) = resolver.get_secret_boxed(service, field).await? {
                return Ok(Some(secret));
            }
        }
        Ok(None)
    }
}

/// Build the default secret resolution chain.
///
/// The chain is ordered by precedence (first match wins):
/// 1. Environment variables (`PAGEWRIGHT_{SERVICE}_{FIELD}`)
/// 2. `{data_dir}/credentials.toml`
pub async fn build_secret_chain(data_dir: &Path) -> SecretChain {
    let resolvers: Vec<DynSecretResolver> = vec![
        Arc::new(EnvSecretResolver::new()),
        Arc::new(FileSecretResolver::load(data_dir).await),
    ];
    SecretChain::new(resolvers)
}
