use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{JobRunner, JobRunnerError, SubmittedRun};
use crate::models::job::Job;

#[derive(Clone, Default)]
pub struct MockJobRunner {
    pub submissions: Arc<Mutex<Vec<Job>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl MockJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let runner = Self::default();
        *runner.fail.lock().unwrap() = true;
        runner
    }

    pub fn submitted(&self) -> Vec<Job> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobRunner for MockJobRunner {
    async fn submit(&self, job: &Job) -> Result<SubmittedRun, JobRunnerError> {
        if *self.fail.lock().unwrap() {
            return Err(JobRunnerError::Status {
                status: 502,
                body: "runner unavailable".into(),
            });
        }
        self.submissions.lock().unwrap().push(job.clone());
        Ok(SubmittedRun {
            run_id: format!("run_{}", Uuid::new_v4().simple()),
        })
    }
}
