use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

const MAX_DURATION_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    Landscape,
    Portrait,
    Square,
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AspectRatio::Landscape => write!(f, "16:9"),
            AspectRatio::Portrait => write!(f, "9:16"),
            AspectRatio::Square => write!(f, "1:1"),
        }
    }
}

/// A generation request, one variant per task kind the providers support.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationTask {
    TextToVideo {
        prompt: String,
        duration_secs: u32,
        aspect_ratio: AspectRatio,
    },
    ImageToVideo {
        image_url: String,
        #[serde(default)]
        prompt: Option<String>,
        duration_secs: u32,
    },
}

impl GenerationTask {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationTask::TextToVideo { .. } => "text_to_video",
            GenerationTask::ImageToVideo { .. } => "image_to_video",
        }
    }

    pub fn validate(&self) -> Result<(), TaskValidationError> {
        match self {
            GenerationTask::TextToVideo {
                prompt,
                duration_secs,
                ..
            } => {
                if prompt.trim().is_empty() {
                    return Err(TaskValidationError::EmptyPrompt);
                }
                Self::check_duration(*duration_secs)
            }
            GenerationTask::ImageToVideo {
                image_url,
                duration_secs,
                ..
            } => {
                if image_url.trim().is_empty() {
                    return Err(TaskValidationError::EmptyImageUrl);
                }
                Self::check_duration(*duration_secs)
            }
        }
    }

    fn check_duration(duration_secs: u32) -> Result<(), TaskValidationError> {
        if duration_secs == 0 || duration_secs > MAX_DURATION_SECS {
            return Err(TaskValidationError::InvalidDuration(duration_secs));
        }
        Ok(())
    }

    /// Provider-facing parameter map for this task.
    pub fn provider_params(&self) -> serde_json::Value {
        match self {
            GenerationTask::TextToVideo {
                prompt,
                duration_secs,
                aspect_ratio,
            } => json!({
                "prompt": prompt,
                "duration_secs": duration_secs,
                "aspect_ratio": aspect_ratio.to_string(),
            }),
            GenerationTask::ImageToVideo {
                image_url,
                prompt,
                duration_secs,
            } => json!({
                "image_url": image_url,
                "prompt": prompt,
                "duration_secs": duration_secs,
            }),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("image_url must not be empty")]
    EmptyImageUrl,

    #[error("duration must be between 1 and {MAX_DURATION_SECS} seconds, got {0}")]
    InvalidDuration(u32),
}

/// Opaque identifier for an in-progress provider operation, used for polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// References to a finished generation, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationArtifact {
    pub result_url: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Processing,
    Completed(GenerationArtifact),
    Failed { error: String },
}

/// The provider rejected the job at creation. Retryable up to the configured
/// submission retry budget.
#[derive(Error, Debug, Clone)]
#[error("submission rejected: {0}")]
pub struct SubmitError(pub String);

/// A status check failed for infrastructure reasons; the operation itself may
/// still be running. Retried with backoff, never counted against the poll
/// budget.
#[derive(Error, Debug, Clone)]
#[error("status poll failed: {0}")]
pub struct TransientPollError(pub String);

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn submit(&self, task: &GenerationTask) -> Result<OperationHandle, SubmitError>;

    async fn poll(&self, operation: &OperationHandle) -> Result<PollOutcome, TransientPollError>;
}
