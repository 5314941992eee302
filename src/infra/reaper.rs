//! Background ticker that periodically runs every registered [`Sweeper`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::traits::{Sweeper, TickResult};

/// Handle to a running reaper task. Dropping the handle without calling
/// [`shutdown`](Self::shutdown) leaves the task running until the runtime
/// stops.
pub struct Reaper {
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Spawn the reaper on the current Tokio runtime.
    ///
    /// The first sweep happens one full `interval` after start, not
    /// immediately.
    pub fn start(interval: Duration, sweepers: Vec<Arc<dyn Sweeper>>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = run_once(&sweepers);
                        for (name, report) in &result.reports {
                            tracing::info!(
                                sweeper = %name,
                                retired = report.retired,
                                removed = report.removed,
                                remaining = report.remaining,
                                skipped = report.skipped,
                                "Reaper sweep completed"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::debug!("Reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            interval,
            shutdown_tx,
            task,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the ticker and wait for the task to exit. A sweep already in
    /// progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Reaper task ended abnormally: {e}");
        }
    }
}

/// Run every sweeper once, in registration order.
pub fn run_once(sweepers: &[Arc<dyn Sweeper>]) -> TickResult {
    let reports = sweepers
        .iter()
        .map(|s| (s.name().to_string(), s.sweep()))
        .collect();

    TickResult {
        checked_at: chrono::Utc::now(),
        reports,
    }
}
