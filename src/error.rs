use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::TaskValidationError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid generation task: {0}")]
    InvalidTask(#[from] TaskValidationError),

    #[error("too many requests, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("generation queue is full")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Machine-readable code persisted alongside the human-readable message of a
/// failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    SubmissionFailed,
    ProviderFailed,
    TimedOut,
    Cancelled,
    Stuck,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::SubmissionFailed => "submission_failed",
            FailureCode::ProviderFailed => "provider_failed",
            FailureCode::TimedOut => "timed_out",
            FailureCode::Cancelled => "cancelled",
            FailureCode::Stuck => "stuck",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
