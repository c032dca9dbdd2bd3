use async_trait::async_trait;
use thiserror::Error;

use crate::models::job::Job;

#[derive(Debug, Error)]
pub enum JobRunnerError {
    #[error("job runner request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("job runner responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("job runner returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// Handle of a run started on the external worker platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRun {
    pub run_id: String,
}

/// Starts scraping runs on the external worker platform. Completion is reported back
/// asynchronously through the job runner webhook.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn submit(&self, job: &Job) -> Result<SubmittedRun, JobRunnerError>;
}

mod http;
#[cfg(test)]
mod mock;

pub use http::HttpJobRunner;
#[cfg(test)]
pub use mock::MockJobRunner;
