//! Environment variable secret resolver.
//!
//! A read-only resolver that checks environment variables. This is the
//! highest-priority resolver in the chain: env vars override the credential
//! file, which keeps CI and container deployments file-free.
//!
//! Key resolution: `{{gmail.password}}` looks up `PAGEWRIGHT_GMAIL_PASSWORD`.
//! Non-alphanumeric characters in the service or field name map to `_`.

use secrecy::SecretString;

use pagewright_core::provider::SecretResolver;
use pagewright_types::error::ProviderError;

/// Environment variable secret resolver.
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    /// Create a new environment variable secret resolver.
    pub fn new() -> Self {
        Self
    }

    /// Env var name for a `service.field` pair: `PAGEWRIGHT_{SERVICE}_{FIELD}`
    /// uppercased, with anything outside `[A-Za-z0-9]` replaced by `_`.
    fn var_name(service: &str, field: &str) -> String {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        };
        format!("PAGEWRIGHT_{}_{}", sanitize(service), sanitize(field))
    }
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretResolver for EnvSecretResolver {
    async fn get_secret(
        &self,
        service: &str,
        field: &str,
    ) -> Result<Option<SecretString>, ProviderError> {
        let name = Self::var_name(service, field);
        match std::env::var(&name) {
            Ok(val) => Ok(Some(SecretString::from(val))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => {
                // Env var exists but has invalid Unicode -- treat as not found
                // rather than erroring, since credentials must be valid strings
                Ok(None)
            }
        }
    }
}
