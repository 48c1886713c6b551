//! Recurring expiration sweep.
//!
//! The timer fires once per period, starting one period after it is armed.
//! Each tick spawns the sweep as its own task, so a slow sweep can overlap
//! the next one. Deletes of expired rows are idempotent, so overlap only
//! costs a redundant statement.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::Result;

/// A running sweep schedule. Dropping it cancels the schedule; sweeps
/// already in flight run to completion.
#[derive(Debug)]
pub struct ExpirationTimer {
    handle: JoinHandle<()>,
    period: Duration,
}

impl ExpirationTimer {
    /// Arm the timer.
    ///
    /// `sweep` is called on every tick; returning `None` (the store is
    /// gone) ends the schedule.
    pub fn start<F, Fut>(period: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = Result<u64>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(run) = sweep() else {
                    debug!("Session store dropped, stopping expiration timer");
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = run.await {
                        error!(error = %e, "Scheduled expiration sweep failed");
                    }
                });
            }
        });

        info!(period_ms = period.as_millis() as u64, "Expiration timer started");
        Self { handle, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancel the schedule.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
