//! Async tick loop for hosts that run on tokio.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::scheduler::TimerFramework;

/// Call `process_timers` every `period` until `cancel` fires.
pub async fn drive(timers: Arc<Mutex<TimerFramework>>, period: Duration, cancel: CancellationToken) {
    info!(period_ms = period.as_millis() as u64, "Timer driver started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let report = timers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .process_timers();
                if !report.fired.is_empty() || !report.finished.is_empty() {
                    debug!(fired = ?report.fired, finished = ?report.finished, "Timer tick");
                }
            }
        }
    }
    info!("Timer driver stopped");
}
