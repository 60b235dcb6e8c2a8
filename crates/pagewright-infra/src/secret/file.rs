//! Credential file secret resolver.
//!
//! Reads `credentials.toml` from the data directory once at startup. The file
//! holds one table per service with string fields:
//!
//! ```toml
//! [gmail]
//! username = "ops@example.com"
//! password = "hunter2"
//! ```
//!
//! Values are wrapped in [`SecretString`] as soon as they are parsed so the
//! cleartext does not linger in plain `String`s.

use std::collections::HashMap;
use std::path::Path;

use secrecy::SecretString;

use pagewright_core::provider::SecretResolver;
use pagewright_types::error::ProviderError;

/// Secret resolver backed by a `credentials.toml` file.
pub struct FileSecretResolver {
    secrets: HashMap<String, HashMap<String, SecretString>>,
}

impl FileSecretResolver {
    /// Load `{data_dir}/credentials.toml`. A missing file yields an empty
    /// resolver; a malformed file is logged and also yields an empty resolver
    /// so env-only deployments keep working.
    pub async fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("credentials.toml");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no credentials.toml at {}", path.display());
                return Self { secrets: HashMap::new() };
            }
            Err(err) => {
                tracing::warn!("failed to read {}: {err}", path.display());
                return Self { secrets: HashMap::new() };
            }
        };

        match toml::from_str::<HashMap<String, HashMap<String, String>>>(&content) {
            Ok(parsed) => {
                let secrets = parsed
                    .into_iter()
                    .map(|(service, fields)| {
                        let fields = fields
                            .into_iter()
                            .map(|(field, value)| (field, SecretString::from(value)))
                            .collect();
                        (service, fields)
                    })
                    .collect();
                Self { secrets }
            }
            Err(err) => {
                tracing::warn!("failed to parse {}: {err}", path.display());
                Self { secrets: HashMap::new() }
            }
        }
    }

    /// Resolver over an in-memory table, for composition in tests.
    #[cfg(test)]
    fn from_entries(entries: &[(&str, &str, &str)]) -> Self {
        let mut secrets: HashMap<String, HashMap<String, SecretString>> = HashMap::new();
        for (service, field, value) in entries {
            secrets
                .entry((*service).to_string())
                .or_default()
                .insert((*field).to_string(), SecretString::from(*value));
        }
        Self { secrets }
    }
}

impl SecretResolver for FileSecretResolver {
    async fn get_secret(
        &self,
        service: &str,
        field: &str,
    ) -> Result<Option<SecretString>, ProviderError> {
        Ok(self
            .secrets
            .get(service)
            .and_then(|fields| fields.get(field))
            .cloned())
    }
}
