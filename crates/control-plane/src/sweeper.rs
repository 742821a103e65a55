//! Background reconciliation for builds whose webhook never arrived.
//!
//! A dispatched build normally terminates through the CI webhook. When the
//! provider drops the callback, the row would sit in `queued`/`building`
//! forever; the sweeper asks the provider directly once the row is older than
//! the stuck timeout and force-terminates it.

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::models::{AppBuild, BuildType};
use crate::reconcile::{with_tracker, BuildRecord};
use crate::services;
use crate::telemetry::STUCK_BUILDS_SWEPT;
use crate::AppState;

pub async fn run_sweeper(state: AppState) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(state.config.sweep_interval_secs));
    loop {
        ticker.tick().await;
        match sweep_once(&state).await {
            Ok(0) => {}
            Ok(n) => info!(swept = n, "sweeper.terminated_stuck_builds"),
            Err(e) => error!(error = %e, "sweeper.pass_failed"),
        }
    }
}

/// Outcome decided for a single stuck row.
struct Verdict {
    status: &'static str,
    progress: i32,
    download_url: Option<String>,
    message: String,
}

pub async fn sweep_once(state: &AppState) -> anyhow::Result<usize> {
    let cutoff = Utc::now() - Duration::minutes(state.config.stuck_build_timeout_mins);
    let rows = services::builds::stuck(&state.db, cutoff).await?;
    let mut swept = 0usize;
    for row in rows {
        let verdict = match row.ci_run_id {
            Some(run_id) => match state.ci.run_status(run_id).await {
                Ok(run) if run.status == "completed" => match run.conclusion.as_deref() {
                    Some("success") => Verdict {
                        status: "ready",
                        progress: 100,
                        download_url: None,
                        message: "Build completed".to_string(),
                    },
                    Some("cancelled") => Verdict {
                        status: "cancelled",
                        progress: row.progress,
                        download_url: None,
                        message: "Build cancelled".to_string(),
                    },
                    other => Verdict {
                        status: "failed",
                        progress: row.progress,
                        download_url: None,
                        message: format!("CI run finished: {}", other.unwrap_or("failure")),
                    },
                },
                // Provider still reports the run in flight; not stuck after all.
                Ok(_) => continue,
                Err(e) => {
                    warn!(build_id = %row.id, run_id, error = %e, "sweeper.run_status_failed");
                    Verdict {
                        status: "failed",
                        progress: row.progress,
                        download_url: None,
                        message: "Timed out waiting for CI".to_string(),
                    }
                }
            },
            None => Verdict {
                status: "failed",
                progress: row.progress,
                download_url: None,
                message: "Timed out waiting for CI".to_string(),
            },
        };
        if let Err(e) = terminate(state, &row, &verdict).await {
            error!(build_id = %row.id, error = %e, "sweeper.terminate_failed");
            continue;
        }
        STUCK_BUILDS_SWEPT.inc();
        swept += 1;
    }
    Ok(swept)
}

async fn terminate(state: &AppState, row: &AppBuild, verdict: &Verdict) -> anyhow::Result<()> {
    let updated = services::builds::terminate(
        &state.db,
        row.id,
        verdict.status,
        verdict.progress,
        verdict.download_url.as_deref(),
        &verdict.message,
        None,
    )
    .await?;
    // If a webhook won the race the row carries its status, not ours; the
    // mirror column must not be overwritten in that case.
    let applied = updated.as_ref().is_some_and(|u| u.status == verdict.status);
    if applied {
        if let Some(build_type) = BuildType::parse(&row.build_type) {
            services::apps::mark_track(
                &state.db,
                row.app_id,
                build_type,
                verdict.status,
                verdict.progress,
                &verdict.message,
            )
            .await?;
        }
    }
    if let Some(updated) = updated {
        if let Some(record) = BuildRecord::from_row(&updated) {
            with_tracker(&state.trackers, row.app_id, |t| t.apply_update(record));
        }
    }
    Ok(())
}
