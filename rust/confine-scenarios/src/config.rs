//! Lab configuration.

use std::time::Duration;

use confine_common::{Result, verify_arg};

/// Settings for a [`Lab`](crate::lab::Lab).
///
/// Only `workers` affects the executors; the delays shape the scenarios and `timeout` bounds
/// how long the harness waits before declaring a run hung.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabConfig {
    /// Number of pool workers. A single worker still reproduces every scenario.
    pub workers: usize,
    /// Simulated work performed by each pool item.
    pub work_delay: Duration,
    /// Duration of each timer-backed delay.
    pub timer_delay: Duration,
    /// External bound on a run; a run that has not returned by then is reported as hung.
    pub timeout: Duration,
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            workers: 2,
            work_delay: Duration::from_millis(100),
            timer_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
        }
    }
}

impl LabConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_work_delay(mut self, work_delay: Duration) -> Self {
        self.work_delay = work_delay;
        self
    }

    pub fn with_timer_delay(mut self, timer_delay: Duration) -> Self {
        self.timer_delay = timer_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        verify_arg!(workers, self.workers >= 1);
        verify_arg!(timeout, !self.timeout.is_zero());
        Ok(())
    }
}
