//! Application configuration for Pagewright.
//!
//! `AppConfig` represents the top-level `config.toml` under the data
//! directory. All fields have sensible defaults so a missing file is fine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Overrides the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// SQLite URL for the artifact store; default derives from the data dir.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Cached selectors below this reliability are skipped by lookup.
    #[serde(default = "default_selector_floor")]
    pub selector_floor: f64,

    /// Endpoint handed out by the static session provider.
    #[serde(default = "default_session_endpoint")]
    pub session_endpoint: String,

    /// Backoff schedule for artifact-store retries, in milliseconds.
    #[serde(default = "default_artifact_retry_ms")]
    pub artifact_retry_ms: Vec<u64>,
}

fn default_selector_floor() -> f64 {
    0.5
}

fn default_session_endpoint() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_artifact_retry_ms() -> Vec<u64> {
    vec![100, 500, 1000]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_url: None,
            selector_floor: default_selector_floor(),
            session_endpoint: default_session_endpoint(),
            artifact_retry_ms: default_artifact_retry_ms(),
        }
    }
}
