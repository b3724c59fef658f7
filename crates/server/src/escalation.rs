use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spendgate_core::config::EscalationConfig;
use spendgate_core::EscalationScheduler;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Runs `EscalationScheduler::run_once` on a fixed interval until `shutdown`
/// flips to true. Returns `None` when escalation is turned off.
pub fn spawn(
    config: &EscalationConfig,
    scheduler: Arc<EscalationScheduler>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        info!(
            event_name = "escalation.scanner.disabled",
            correlation_id = "bootstrap",
            "escalation scanner disabled by configuration"
        );
        return None;
    }

    let period = Duration::from_secs(config.scan_interval_secs);
    info!(
        event_name = "escalation.scanner.start",
        correlation_id = "bootstrap",
        scan_interval_secs = config.scan_interval_secs,
        batch_limit = config.batch_limit,
        "escalation scanner started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => scan(&scheduler).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            event_name = "escalation.scanner.stopped",
            correlation_id = "shutdown",
            "escalation scanner stopped"
        );
    }))
}

async fn scan(scheduler: &EscalationScheduler) {
    if let Err(scan_error) = scheduler.run_once(Utc::now()).await {
        error!(
            event_name = "escalation.scan.failed",
            error = %scan_error,
            "escalation scan failed"
        );
    }
}
