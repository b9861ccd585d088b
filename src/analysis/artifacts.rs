//! Filesystem-backed artifact store

use super::ArtifactStore;
use crate::error::PipelineError;
use crate::types::Subject;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves subject artifact paths under a root directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute paths are used as-is; relative ones are joined to the root
    pub fn resolve(&self, artifact_path: &Path) -> PathBuf {
        if artifact_path.is_absolute() {
            artifact_path.to_path_buf()
        } else {
            self.root.join(artifact_path)
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn load_processed_artifact(&self, subject: &Subject) -> Result<Vec<u8>, PipelineError> {
        let path = self.resolve(&subject.artifact_path);
        debug!("Loading artifact for subject {} from {:?}", subject.id, path);

        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Err(PipelineError::ArtifactRead(format!(
                "{} is empty",
                path.display()
            ))),
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::ArtifactNotFound(path.display().to_string()))
            }
            Err(e) => Err(PipelineError::ArtifactRead(format!("{}: {}", path.display(), e))),
        }
    }
}
