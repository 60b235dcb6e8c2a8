//! Filesystem workflow source.
//!
//! Loads workflow documents from `{dir}/workflows/{id}.json`. IDs are plain
//! file stems; anything that could escape the workflows directory is rejected
//! before touching the filesystem.

use std::path::PathBuf;

use pagewright_core::provider::WorkflowSource;
use pagewright_types::error::ProviderError;

/// Workflow source reading JSON documents from a directory.
pub struct FsWorkflowSource {
    dir: PathBuf,
}

impl FsWorkflowSource {
    /// Source rooted at `dir`; documents live in `{dir}/workflows/`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn document_path(&self, id: &str) -> Result<PathBuf, ProviderError> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(ProviderError::InvalidResponse(format!(
                "invalid workflow id: {id:?}"
            )));
        }
        Ok(self.dir.join("workflows").join(format!("{id}.json")))
    }

    /// IDs of all workflow documents in the directory, sorted. Non-JSON files
    /// are ignored. An absent workflows directory yields an empty list.
    pub async fn list(&self) -> Result<Vec<String>, ProviderError> {
        let workflows = self.dir.join("workflows");
        let mut entries = match tokio::fs::read_dir(&workflows).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ProviderError::Io(err)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl WorkflowSource for FsWorkflowSource {
    async fn load(&self, id: &str) -> Result<String, ProviderError> {
        let path = self.document_path(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ProviderError::NotFound(format!("workflow {id}")))
            }
            Err(err) => Err(ProviderError::Io(err)),
        }
    }
}
