use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{error, info};

use crate::reconciler::{run_reconciliation, ReconcileOptions};
use crate::state::AppState;

const PURGE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const TICK: Duration = Duration::from_secs(30);

pub async fn start_background_workers(state: AppState) {
    tokio::spawn(async move {
        let reconcile_interval = state.config.reconcile_interval;
        let mut last_reconcile: Option<Instant> = None;
        let mut last_purge: Option<Instant> = None;

        loop {
            if last_reconcile.map_or(true, |at| at.elapsed() >= reconcile_interval) {
                reconcile_once(&state).await;
                last_reconcile = Some(Instant::now());
            }

            if last_purge.map_or(true, |at| at.elapsed() >= PURGE_INTERVAL) {
                purge_old_events(&state).await;
                last_purge = Some(Instant::now());
            }

            sleep(TICK.min(reconcile_interval)).await;
        }
    });
}

async fn reconcile_once(state: &AppState) {
    let options = ReconcileOptions {
        dry_run: state.config.reconcile_dry_run,
        now: None,
    };
    match run_reconciliation(state, options).await {
        Ok(report) => info!(
            candidates = report.candidates,
            downgraded = report.downgraded,
            conflicts = report.conflicts,
            failures = report.failures,
            dry_run = report.dry_run,
            "scheduled reconciliation complete"
        ),
        Err(err) => error!(%err, "scheduled reconciliation aborted"),
    }
}

async fn purge_old_events(state: &AppState) {
    let days = state.config.webhook_event_retention_days;
    match state.webhook_events.purge_events_older_than(days).await {
        Ok(0) => {}
        Ok(purged) => info!(purged, retention_days = days, "purged old webhook events"),
        Err(err) => error!(?err, "failed to purge old webhook events"),
    }
}
