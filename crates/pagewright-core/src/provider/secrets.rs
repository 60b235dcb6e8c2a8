//! Secret resolver port.
//!
//! Values come back wrapped in [`SecretString`] so cleartext never sits in an
//! unguarded `String`; the credential injector is the only consumer and it
//! exposes the value for exactly the span of one dispatch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use secrecy::SecretString;

use pagewright_types::error::ProviderError;

/// Async port for secret lookup. `Ok(None)` means this resolver does not
/// know the secret -- a chain moves on to the next resolver, while the
/// injector treats an all-`None` chain result as a missing credential.
pub trait SecretResolver: Send + Sync {
    fn get_secret(
        &self,
        service: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<SecretString>, ProviderError>> + Send;
}

/// Object-safe version of [`SecretResolver`] with boxed futures.
pub trait SecretResolverDyn: Send + Sync {
    fn get_secret_boxed<'a>(
        &'a self,
        service: &'a str,
        field: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SecretString>, ProviderError>> + Send + 'a>>;
}

impl<T: SecretResolver> SecretResolverDyn for T {
    fn get_secret_boxed<'a>(
        &'a self,
        service: &'a str,
        field: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SecretString>, ProviderError>> + Send + 'a>>
    {
        Box::pin(self.get_secret(service, field))
    }
}

/// Shared handle to a type-erased secret resolver.
pub type DynSecretResolver = Arc<dyn SecretResolverDyn>;
