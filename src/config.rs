use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_FREE_PLAN_CODE: &str = "free";
pub const DEFAULT_MAX_RESULTS_PER_JOB: i32 = 500;
pub const DEFAULT_RECONCILE_INTERVAL_SECONDS: u64 = 24 * 60 * 60;
pub const DEFAULT_RECONCILE_CANDIDATE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_WEBHOOK_TOLERANCE_SECONDS: i64 = 300;
pub const DEFAULT_WEBHOOK_EVENT_RETENTION_DAYS: i32 = 90;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("free plan `{0}` is missing from the plans table")]
    MissingFreePlan(String),
    #[error("failed to load plan reference data: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct JobRunnerSettings {
    pub base_url: String,
    pub api_token: String,
    /// Shared secret the runner signs its completion webhooks with.
    pub webhook_secret: String,
    /// Public URL the runner should call back; passed along with every submission.
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub frontend_origin: String,
    pub upgrade_url: String,
    pub free_plan_code: String,
    pub max_results_per_job: i32,
    pub billing_webhook_secret: String,
    pub webhook_tolerance_seconds: i64,
    pub webhook_event_retention_days: i32,
    pub job_runner: JobRunnerSettings,
    pub admin_api_token: String,
    pub reconcile_interval: Duration,
    pub reconcile_candidate_timeout: Duration,
    pub reconcile_dry_run: bool,
    pub rate_limit_ms: u64,
    pub rate_limit_burst: u32,
    pub sentry_dsn: Option<String>,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            bind_addr: parsed("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            upgrade_url: required("UPGRADE_URL")?,
            free_plan_code: optional("FREE_PLAN_CODE")
                .unwrap_or_else(|| DEFAULT_FREE_PLAN_CODE.to_string()),
            max_results_per_job: parsed("MAX_RESULTS_PER_JOB", DEFAULT_MAX_RESULTS_PER_JOB)?,
            billing_webhook_secret: required("BILLING_WEBHOOK_SECRET")?,
            webhook_tolerance_seconds: parsed(
                "WEBHOOK_TOLERANCE_SECONDS",
                DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            )?,
            webhook_event_retention_days: positive(
                "WEBHOOK_EVENT_RETENTION_DAYS",
                DEFAULT_WEBHOOK_EVENT_RETENTION_DAYS,
            )?,
            job_runner: JobRunnerSettings {
                base_url: required("JOB_RUNNER_URL")?,
                api_token: required("JOB_RUNNER_TOKEN")?,
                webhook_secret: required("JOB_RUNNER_WEBHOOK_SECRET")?,
                callback_url: optional("JOB_RUNNER_CALLBACK_URL"),
            },
            admin_api_token: required("ADMIN_API_TOKEN")?,
            reconcile_interval: Duration::from_secs(positive(
                "RECONCILE_INTERVAL_SECONDS",
                DEFAULT_RECONCILE_INTERVAL_SECONDS,
            )?),
            reconcile_candidate_timeout: Duration::from_millis(positive(
                "RECONCILE_CANDIDATE_TIMEOUT_MS",
                DEFAULT_RECONCILE_CANDIDATE_TIMEOUT_MS,
            )?),
            reconcile_dry_run: flag("RECONCILE_DRY_RUN"),
            // Default: 200ms/token (~5 req/sec)
            rate_limit_ms: parsed("RATE_LIMITER_MILLISECONDS", 200)?,
            rate_limit_burst: parsed("RATE_LIMITER_BURST", 20)?,
            sentry_dsn: optional("SENTRY_DSN"),
            log_json: optional("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

/// Like `parsed`, but zero and negative values are rejected.
fn positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parsed(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn flag(key: &'static str) -> bool {
    optional(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: String::new(),
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        frontend_origin: "http://localhost".into(),
        upgrade_url: "https://app.example.test/billing/upgrade".into(),
        free_plan_code: DEFAULT_FREE_PLAN_CODE.into(),
        max_results_per_job: DEFAULT_MAX_RESULTS_PER_JOB,
        billing_webhook_secret: "whsec_test_billing".into(),
        webhook_tolerance_seconds: DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
        webhook_event_retention_days: DEFAULT_WEBHOOK_EVENT_RETENTION_DAYS,
        job_runner: JobRunnerSettings {
            base_url: "http://runner.test".into(),
            api_token: "runner-token".into(),
            webhook_secret: "whsec_test_runner".into(),
            callback_url: None,
        },
        admin_api_token: "admin-token".into(),
        reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECONDS),
        reconcile_candidate_timeout: Duration::from_millis(200),
        reconcile_dry_run: false,
        rate_limit_ms: 200,
        rate_limit_burst: 20,
        sentry_dsn: None,
        log_json: false,
    }
}
