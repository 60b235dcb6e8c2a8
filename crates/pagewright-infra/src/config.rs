//! Application configuration loader.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`AppConfig`]. Falls back to defaults when the file is missing or
//! malformed -- a broken config file must never stop a run that would work
//! with defaults.

use std::path::{Path, PathBuf};

use pagewright_types::config::AppConfig;

/// Resolve the data directory: `PAGEWRIGHT_DATA_DIR` when set, otherwise the
/// platform data directory joined with `pagewright`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PAGEWRIGHT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagewright")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: returns [`AppConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_app_config(data_dir: &Path) -> AppConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config.toml at {}, using defaults", config_path.display());
            return AppConfig::default();
        }
        Err(err) => {
            tracing::warn!("failed to read {}: {err}, using defaults", config_path.display());
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            AppConfig::default()
        }
    }
}

/// SQLite URL for the artifact store: the configured override when present,
/// otherwise `artifacts.db` under the data directory.
pub fn database_url(config: &AppConfig, data_dir: &Path) -> String {
    match &config.database_url {
        Some(url) => url.clone(),
        None => format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("artifacts.db").display()
        ),
    }
}
