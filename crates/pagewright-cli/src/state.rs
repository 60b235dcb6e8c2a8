//! Application state wiring the infra adapters together.
//!
//! AppState holds the concrete pieces every command shares: the data
//! directory, the loaded config, the artifact database pool, and the secret
//! and session providers. The engine itself is assembled per `run` invocation
//! because the browser/cognition pair comes from the replay script.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use pagewright_core::provider::{DynSecretResolver, DynSessionProvider};
use pagewright_core::selector::SelectorCache;
use pagewright_core::workflow::engine::WorkflowEngine;
use pagewright_infra::config::{database_url, default_data_dir, load_app_config};
use pagewright_infra::secret::build_secret_chain;
use pagewright_infra::session::StaticSessionProvider;
use pagewright_infra::sqlite::{DatabasePool, SqliteArtifactStore};
use pagewright_types::config::AppConfig;

/// Engine pinned to the SQLite artifact store.
pub type ConcreteEngine = WorkflowEngine<SqliteArtifactStore>;

/// Shared application state holding the wired adapters.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: AppConfig,
    pub db_pool: DatabasePool,
    pub secrets: DynSecretResolver,
    pub session: DynSessionProvider,
}

impl AppState {
    /// Initialize the application state: resolve the data directory, load
    /// config, open the artifact database, build the secret chain.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = default_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let config = load_app_config(&data_dir).await;

        let db_url = database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("opening artifact database at {db_url}"))?;

        let secrets: DynSecretResolver = Arc::new(build_secret_chain(&data_dir).await);
        let session: DynSessionProvider =
            Arc::new(StaticSessionProvider::new(&config.session_endpoint));

        Ok(Self {
            data_dir,
            config,
            db_pool,
            secrets,
            session,
        })
    }

    /// Artifact store over the shared pool.
    pub fn artifact_store(&self) -> SqliteArtifactStore {
        SqliteArtifactStore::new(self.db_pool.clone())
    }

    /// Assemble an engine around the given browser/cognition pair, with the
    /// configured selector floor and artifact retry schedule applied.
    pub fn engine(
        &self,
        browser: pagewright_core::provider::DynBrowserProvider,
        cognition: pagewright_core::provider::DynCognitionProvider,
    ) -> Arc<ConcreteEngine> {
        Arc::new(
            WorkflowEngine::new(
                browser,
                cognition,
                self.secrets.clone(),
                self.session.clone(),
                self.artifact_store(),
            )
            .with_selector_cache(SelectorCache::with_floor(self.config.selector_floor))
            .with_artifact_retry(self.config.artifact_retry_ms.clone()),
        )
    }
}
