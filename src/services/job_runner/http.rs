use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobRunner, JobRunnerError, SubmittedRun};
use crate::config::JobRunnerSettings;
use crate::models::job::Job;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    job_id: Uuid,
    organization_id: Uuid,
    keyword: &'a str,
    limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    run_id: String,
}

#[derive(Clone)]
pub struct HttpJobRunner {
    settings: JobRunnerSettings,
    http: Client,
}

impl HttpJobRunner {
    pub fn new(settings: JobRunnerSettings, http: &Client) -> Self {
        Self {
            settings,
            http: http.clone(),
        }
    }

    fn runs_url(&self) -> String {
        format!("{}/runs", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl JobRunner for HttpJobRunner {
    async fn submit(&self, job: &Job) -> Result<SubmittedRun, JobRunnerError> {
        let payload = RunRequest {
            job_id: job.id,
            organization_id: job.organization_id,
            keyword: &job.keyword,
            limit: job.result_limit,
            webhook_url: self.settings.callback_url.as_deref(),
        };

        let resp = self
            .http
            .post(self.runs_url())
            .bearer_auth(&self.settings.api_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(JobRunnerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let run: RunResponse = resp
            .json()
            .await
            .map_err(|e| JobRunnerError::InvalidResponse(e.to_string()))?;
        if run.run_id.trim().is_empty() {
            return Err(JobRunnerError::InvalidResponse("empty runId".into()));
        }
        Ok(SubmittedRun { run_id: run.run_id })
    }
}
