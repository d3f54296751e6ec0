//! Run-wide context shared by the coordinator and both workers.
//!
//! Built once per run and handed out by `Arc`; holds the event log, the live
//! metrics and the run clock so nothing in the pipeline reaches for a global.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::utils::{
    event_log::EventLog,
    metrics::{Metrics, SharedMetrics},
};

pub struct RuntimeContext {
    pub event_log: EventLog,
    pub metrics: SharedMetrics,
    run_start: Instant,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            event_log: EventLog::new(),
            metrics: Arc::new(Mutex::new(Metrics::default())),
            run_start: Instant::now(),
        }
    }
}

impl RuntimeContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Time since the context was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.run_start.elapsed()
    }

    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}
