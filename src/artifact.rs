use async_trait::async_trait;
use thiserror::Error;

use crate::provider::GenerationArtifact;
use crate::queue::job::JobId;

/// Copying the finished result into durable storage failed. Logged by the
/// runner; never changes a completed job's outcome.
#[derive(Error, Debug, Clone)]
#[error("artifact persistence failed: {0}")]
pub struct ArtifactPersistError(pub String);

/// Durable references to a persisted generation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub video_url: String,
    pub thumbnail_url: Option<String>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Transfer the provider's result into durable storage and return the
    /// references to serve from.
    async fn persist(
        &self,
        job_id: JobId,
        artifact: &GenerationArtifact,
    ) -> Result<StoredArtifact, ArtifactPersistError>;
}

/// Keeps the provider's own URLs as the durable references. Useful when the
/// provider hosts results long enough, and as the fallback shape the runner
/// builds when a real transfer fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughArtifactStore;

#[async_trait]
impl ArtifactStore for PassthroughArtifactStore {
    async fn persist(
        &self,
        _job_id: JobId,
        artifact: &GenerationArtifact,
    ) -> Result<StoredArtifact, ArtifactPersistError> {
        Ok(StoredArtifact {
            video_url: artifact.result_url.clone(),
            thumbnail_url: artifact.thumbnail_url.clone(),
        })
    }
}
