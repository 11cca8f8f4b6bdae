//! Daily run loop
//!
//! Waits until the configured local wall-clock time, runs the job, and waits
//! for the next day. Cancellation interrupts the wait immediately; a running
//! job sees the same token and stops at its next checkpoint.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct DailyScheduler {
    time: NaiveTime,
    cancel: CancellationToken,
}

impl DailyScheduler {
    pub fn new(time: NaiveTime, cancel: CancellationToken) -> Self {
        Self { time, cancel }
    }

    /// Next occurrence of the run time strictly after `now`
    pub fn next_run(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.time);
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    /// Run `job` every day until cancelled; `run_now` adds an immediate run
    pub async fn run<F, Fut>(&self, run_now: bool, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("Scheduler started, daily run at {}", self.time.format("%H:%M"));

        if run_now {
            info!("Running immediately");
            job().await;
        }

        loop {
            let now = Local::now().naive_local();
            let next = self.next_run(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next run at {} (in {}s)", next.format("%Y-%m-%d %H:%M"), wait.as_secs());

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("Scheduler cancelled");
                    return;
                },
                _ = tokio::time::sleep(wait) => {},
            }

            job().await;

            if self.cancel.is_cancelled() {
                warn!("Scheduler cancelled");
                return;
            }
        }
    }
}
