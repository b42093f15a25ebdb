//! Periodic maintenance: expire stale suggestions, then auto-apply whatever
//! a promoted pattern now vouches for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::engine::SuggestionEngine;
use crate::error::SuggestError;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired: usize,
    pub auto_applied: usize,
    pub auto_apply_failures: usize,
}

/// One maintenance pass. Expiry runs first so a suggestion past its TTL is
/// never auto-applied.
pub fn run_maintenance(engine: &SuggestionEngine, now: DateTime<Utc>) -> Result<MaintenanceReport, SuggestError> {
    let expired = engine.expire_stale(now)?;
    let auto = engine.auto_apply_sweep(now)?;
    Ok(MaintenanceReport {
        expired,
        auto_applied: auto.applied.len(),
        auto_apply_failures: auto.failed.len(),
    })
}

/// Run `run_maintenance` every `maintenance.sweep_interval_secs` until
/// `shutdown` flips to true (or its sender goes away).
pub async fn run_maintenance_loop(engine: Arc<SuggestionEngine>, shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(engine.config().maintenance.sweep_interval_secs.max(1));
    run_every(engine, interval, shutdown).await;
}

async fn run_every(engine: Arc<SuggestionEngine>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    log::info!("MaintenanceSweep: started (every {}s)", interval.as_secs_f64());
    let mut last_run = Utc::now();

    loop {
        let now = Utc::now();
        // Laptop sleep or a stalled runtime: the sweep is simply late, but
        // say so since a long gap means a burst of expiries.
        let gap = (now - last_run).num_milliseconds();
        if gap > 2 * interval.as_millis() as i64 {
            log::info!("MaintenanceSweep: resumed after {}s gap", gap / 1000);
        }
        last_run = now;

        let worker = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || run_maintenance(&worker, now)).await {
            Ok(Ok(report)) => {
                if report.expired > 0 || report.auto_applied > 0 || report.auto_apply_failures > 0 {
                    log::info!(
                        "MaintenanceSweep: expired {}, auto-applied {}, {} auto-apply failures",
                        report.expired,
                        report.auto_applied,
                        report.auto_apply_failures
                    );
                }
            }
            Ok(Err(e)) if e.is_fatal() => {
                log::error!("FATAL: MaintenanceSweep halted: {}", e);
                break;
            }
            Ok(Err(e)) => log::warn!("MaintenanceSweep: pass failed: {}", e),
            Err(e) => log::error!("MaintenanceSweep: pass panicked: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("MaintenanceSweep: stopped");
}
