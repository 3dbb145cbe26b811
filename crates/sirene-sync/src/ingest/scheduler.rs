//! Periodic update trigger
//!
//! Fires a planner cycle once at start-up and then on a fixed interval. A
//! tick that arrives while the previous cycle still runs is skipped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::planner::UpdatePlanner;

/// Counters reported when the scheduler stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: usize,
    pub skipped: usize,
}

/// Update scheduler
pub struct Scheduler {
    planner: Arc<UpdatePlanner>,
    interval: Duration,
    busy: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(planner: Arc<UpdatePlanner>, interval: Duration) -> Self {
        Self {
            planner,
            interval,
            busy: Arc::new(Mutex::new(())),
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// Cancelling also cancels the running cycle, which is awaited before
    /// returning.
    pub async fn run(self, shutdown: CancellationToken) -> SchedulerStats {
        info!(interval = ?self.interval, "Starting update scheduler");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats = SchedulerStats::default();
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match Arc::clone(&self.busy).try_lock_owned() {
                        Ok(guard) => {
                            stats.started += 1;
                            let planner = Arc::clone(&self.planner);
                            let cancel = shutdown.child_token();
                            in_flight = Some(tokio::spawn(async move {
                                let _guard = guard;
                                if let Err(err) = planner.run_cycle(&cancel).await {
                                    error!(error = %err, "Update cycle abandoned");
                                }
                            }));
                            info!(next_in = ?self.interval, "Update cycle started");
                        },
                        Err(_) => {
                            stats.skipped += 1;
                            warn!("Previous update cycle still running, skipping tick");
                        },
                    }
                },
            }
        }

        if let Some(handle) = in_flight {
            info!("Waiting for the running update cycle to stop");
            if let Err(err) = handle.await {
                error!(error = %err, "Update cycle task failed");
            }
        }

        info!(started = stats.started, skipped = stats.skipped, "Update scheduler stopped");
        stats
    }
}
