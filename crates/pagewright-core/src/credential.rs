//! Credential placeholders and just-in-time injection.
//!
//! Workflow documents never carry secret values; they carry `{{service.field}}`
//! placeholders and declare the placeholders they use. Required entries are
//! resolved once at run start so a missing secret fails the run before any
//! browser traffic. At dispatch, declared placeholders in an action template
//! are replaced just-in-time; the rendered text lives in a [`SecretString`]
//! that zeroizes when the dispatch scope drops it. Artifacts and context only
//! ever see the template form.

use std::collections::HashSet;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use pagewright_types::error::ProviderError;
use pagewright_types::workflow::CredentialSpec;

use crate::provider::DynSecretResolver;

// ---------------------------------------------------------------------------
// Placeholder grammar
// ---------------------------------------------------------------------------

/// Service a bare `{{field}}` placeholder belongs to.
pub const DEFAULT_SERVICE: &str = "default";

/// Parsed `service.field` credential reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub service: String,
    pub field: String,
}

impl CredentialKey {
    /// Parse a placeholder body or declaration entry. At most one dot;
    /// segments are alphanumeric plus underscore and hyphen. A bare field
    /// maps to the `default` service.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() || token.matches('.').count() > 1 {
            return None;
        }
        let valid = |segment: &str| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        match token.split_once('.') {
            Some((service, field)) if valid(service) && valid(field) => Some(Self {
                service: service.to_string(),
                field: field.to_string(),
            }),
            None if valid(token) => Some(Self {
                service: DEFAULT_SERVICE.to_string(),
                field: token.to_string(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.service, self.field)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("missing credential(s): {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("secret backend failure: {0}")]
    Backend(#[from] ProviderError),
}

// ---------------------------------------------------------------------------
// CredentialInjector
// ---------------------------------------------------------------------------

/// Resolves declared credential placeholders against the secret backend.
///
/// Only placeholders the document declares are ever treated as credentials;
/// anything else inside double braces passes through verbatim, so context
/// templates and credentials share a syntax without colliding.
pub struct CredentialInjector {
    resolver: DynSecretResolver,
    /// Canonical `service.field` strings the document declares.
    declared: HashSet<String>,
    required: Vec<CredentialKey>,
}

impl CredentialInjector {
    pub fn new(resolver: DynSecretResolver, spec: &CredentialSpec) -> Self {
        let declared = spec
            .required
            .iter()
            .chain(spec.optional.iter())
            .filter_map(|entry| CredentialKey::parse(entry))
            .map(|key| key.to_string())
            .collect();
        let required = spec
            .required
            .iter()
            .filter_map(|entry| CredentialKey::parse(entry))
            .collect();
        Self {
            resolver,
            declared,
            required,
        }
    }

    /// Resolve every required entry, collecting all misses so the failure
    /// names the complete list. Runs before any node executes.
    pub async fn check_required(&self) -> Result<(), CredentialError> {
        let mut missing = Vec::new();
        for key in &self.required {
            match self
                .resolver
                .get_secret_boxed(&key.service, &key.field)
                .await?
            {
                Some(_) => {}
                None => missing.push(key.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::Missing(missing))
        }
    }

    /// Whether the template contains at least one declared placeholder.
    /// Drives the artifact's injection flag without exposing a value.
    pub fn mentions_credentials(&self, template: &str) -> bool {
        scan_placeholders(template)
            .iter()
            .any(|key| self.declared.contains(&key.to_string()))
    }

    /// Replace declared placeholders with their secret values. The result is
    /// wrapped so it zeroizes when the dispatch scope ends. Declared
    /// placeholders whose secret is absent fail the render; undeclared
    /// placeholders pass through untouched.
    pub async fn render(&self, template: &str) -> Result<SecretString, CredentialError> {
        let mut result = String::with_capacity(template.len());
        let mut missing = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let end = start + 2 + len + 2;
            let body = &rest[start + 2..end - 2];

            result.push_str(&rest[..start]);
            match CredentialKey::parse(body) {
                Some(key) if self.declared.contains(&key.to_string()) => {
                    match self
                        .resolver
                        .get_secret_boxed(&key.service, &key.field)
                        .await?
                    {
                        Some(secret) => result.push_str(secret.expose_secret()),
                        None => {
                            missing.push(key.to_string());
                        }
                    }
                }
                _ => result.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        result.push_str(rest);

        if missing.is_empty() {
            Ok(SecretString::from(result))
        } else {
            Err(CredentialError::Missing(missing))
        }
    }
}

/// Every well-formed placeholder in a template, declared or not.
pub fn scan_placeholders(template: &str) -> Vec<CredentialKey> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        if let Some(key) = CredentialKey::parse(&rest[start + 2..end - 2]) {
            keys.push(key);
        }
        rest = &rest[end..];
    }
    keys
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
