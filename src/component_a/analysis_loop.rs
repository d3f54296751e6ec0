//! Analysis loop: keeps one analyzer fed with the newest available frame.
//!
//! Pipeline: wait for frame (push slot or pull poll) → analyze under the analyzer lock →
//! per-frame event log + statistics.
//! Backpressure: frames are never queued. If several arrive while an analysis is running,
//! only the newest is picked up next; the rest are skipped.
//! Faults: acquisition errors are logged (loudly once, then at debug level) and retried
//! after a short delay. A closed source ends the loop.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::component_a::{
    analyzer::SharedAnalyzer,
    frame::{Frame, Roi},
    frame_slot::{FrameReceiver, FrameSource},
};
use crate::context::RuntimeContext;
use crate::error::AcquisitionError;
use crate::utils::{
    event_log::{BATCHED_OUTPUT, FRAME_TIMESTAMP_MS, INTERMITTENT_OUTPUT},
    metrics::{FaultSource, lock_metrics},
};

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Where frames come from.
pub enum FrameFeed {
    /// Woken by the camera through a latest-frame slot.
    Push(FrameReceiver),
    /// Polls a device for its last image and compares leading pixels to spot new ones.
    Pull(Box<dyn FrameSource>),
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisTiming {
    /// Longest single wait for a frame before the stop flag is checked again.
    pub wait_slice: Duration,
    /// Sleep between polls of a pull source.
    pub poll_interval: Duration,
    /// Back-off after an acquisition error.
    pub retry_delay: Duration,
}

impl Default for AnalysisTiming {
    fn default() -> Self {
        Self {
            wait_slice: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            retry_delay: Duration::from_millis(10),
        }
    }
}

/// Throughput counters, written by the analysis worker only.
#[derive(Default, Debug)]
pub struct LoopStatistics {
    frames: AtomicU64,
    fps: AtomicU64,
    last_analysis_us: AtomicU64,
    acquisition_faults: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStats {
    pub frames: u64,
    pub fps: u64,
    pub last_analysis: Duration,
    pub acquisition_faults: u64,
}

impl LoopStatistics {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LoopStats {
        LoopStats {
            frames: self.frames(),
            fps: self.fps.load(Ordering::Relaxed),
            last_analysis: Duration::from_micros(self.last_analysis_us.load(Ordering::Relaxed)),
            acquisition_faults: self.acquisition_faults.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable view used by the control loop, the monitor and the coordinator.
#[derive(Clone)]
pub struct AnalysisHandle {
    analyzer: SharedAnalyzer,
    stats: Arc<LoopStatistics>,
    ctx: Arc<RuntimeContext>,
}

impl AnalysisHandle {
    /// Batch output accumulated since the previous drain, `None` if no frame was analyzed.
    pub fn drain_batch_output(&self) -> Option<f64> {
        let out = self.analyzer.batch_output();
        if let Some(value) = out {
            self.ctx
                .event_log
                .record(self.stats.frames(), BATCHED_OUTPUT, value);
        }
        out
    }

    pub fn intermittent_output(&self) -> f64 {
        self.analyzer.intermittent_output()
    }

    /// Takes effect on the next analyzed frame.
    pub fn set_roi(&self, roi: Option<Roi>) {
        self.analyzer.set_roi(roi);
    }

    pub fn frame_count(&self) -> u64 {
        self.stats.frames()
    }

    pub fn current_fps(&self) -> u64 {
        self.stats.fps.load(Ordering::Relaxed)
    }

    pub fn last_analysis_time(&self) -> Duration {
        self.stats.snapshot().last_analysis
    }

    pub fn stats(&self) -> LoopStats {
        self.stats.snapshot()
    }

    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }
}

pub struct AnalysisLoop {
    analyzer: SharedAnalyzer,
    feed: FrameFeed,
    stats: Arc<LoopStatistics>,
    running: Arc<AtomicBool>,
    ctx: Arc<RuntimeContext>,
    timing: AnalysisTiming,
    core: Option<usize>,
    last_frame: Option<Arc<Frame>>,
    fps_window_start: Instant,
    fps_count: u64,
    fault_reported: bool,
}

impl AnalysisLoop {
    pub fn new(
        analyzer: SharedAnalyzer,
        feed: FrameFeed,
        running: Arc<AtomicBool>,
        ctx: Arc<RuntimeContext>,
        timing: AnalysisTiming,
    ) -> Self {
        Self {
            analyzer,
            feed,
            stats: Arc::new(LoopStatistics::default()),
            running,
            ctx,
            timing,
            core: None,
            last_frame: None,
            fps_window_start: Instant::now(),
            fps_count: 0,
            fault_reported: false,
        }
    }

    /// Pins the worker thread to `core` when `run` starts.
    pub fn with_core(mut self, core: Option<usize>) -> Self {
        self.core = core;
        self
    }

    pub fn handle(&self) -> AnalysisHandle {
        AnalysisHandle {
            analyzer: self.analyzer.clone(),
            stats: self.stats.clone(),
            ctx: self.ctx.clone(),
        }
    }

    /// Waits for a frame newer than the last analyzed one and analyzes it.
    ///
    /// Returns `Ok(false)` when no new frame showed up within one wait slice (or a stop
    /// was requested while polling), so the caller can re-check its stop flag.
    pub fn process_next(&mut self) -> Result<bool, AcquisitionError> {
        let frame = match self.next_frame()? {
            Some(frame) => frame,
            None => {
                self.roll_fps_window();
                return Ok(false);
            }
        };

        let started = Instant::now();
        self.analyzer.process(&frame);
        let elapsed = started.elapsed();

        let frame_no = self.stats.frames.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats
            .last_analysis_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);

        let log = &self.ctx.event_log;
        log.record(frame_no, INTERMITTENT_OUTPUT, self.analyzer.intermittent_output());
        log.record(
            frame_no,
            FRAME_TIMESTAMP_MS,
            frame.timestamp.as_secs_f64() * 1_000.0,
        );

        self.fps_count += 1;
        self.roll_fps_window();

        self.last_frame = Some(frame);
        Ok(true)
    }

    /// Publishes the frame count of the elapsed one-second window. Also called on empty
    /// wait slices so a stalled camera reads as 0 fps.
    fn roll_fps_window(&mut self) {
        if self.fps_window_start.elapsed() >= FPS_WINDOW {
            self.stats.fps.store(self.fps_count, Ordering::Relaxed);
            self.fps_count = 0;
            self.fps_window_start = Instant::now();
        }
    }

    fn next_frame(&mut self) -> Result<Option<Arc<Frame>>, AcquisitionError> {
        match &mut self.feed {
            FrameFeed::Push(rx) => rx.wait_next(self.timing.wait_slice),
            FrameFeed::Pull(source) => {
                let deadline = Instant::now() + self.timing.wait_slice;
                loop {
                    if !self.running.load(Ordering::Acquire) {
                        return Ok(None);
                    }
                    if let Some(frame) = source.latest_frame()? {
                        let is_new = self
                            .last_frame
                            .as_ref()
                            .is_none_or(|last| !last.same_leading_pixels(&frame));
                        if is_new {
                            return Ok(Some(frame));
                        }
                    }
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(self.timing.poll_interval);
                }
            }
        }
    }

    /// Runs until the shared running flag is cleared or the frame source closes.
    /// Disposes the analyzer on exit.
    pub fn run(mut self) {
        if let Some(core) = self.core {
            let core_ids = core_affinity::get_core_ids().unwrap_or_default();
            match core_ids.get(core) {
                Some(core_id) if core_affinity::set_for_current(*core_id) => {
                    info!("[AnalysisLoop] pinned to core {}", core);
                }
                Some(_) => error!("[AnalysisLoop] failed to pin to core {}", core),
                None => error!("[AnalysisLoop] core {} not found among available cores", core),
            }
        }

        info!("[AnalysisLoop] started analyzer='{}'", self.analyzer.name());

        while self.running.load(Ordering::Acquire) {
            match self.process_next() {
                Ok(_) => self.fault_reported = false,
                Err(AcquisitionError::Closed) => {
                    info!("[AnalysisLoop] frame source closed; exiting");
                    break;
                }
                Err(e) => {
                    self.stats.acquisition_faults.fetch_add(1, Ordering::Relaxed);
                    lock_metrics(&self.ctx.metrics).record_fault(FaultSource::Acquisition);
                    if self.fault_reported {
                        debug!("[AnalysisLoop] acquisition failed: {}", e);
                    } else {
                        warn!("[AnalysisLoop] acquisition failed: {}; retrying", e);
                        self.fault_reported = true;
                    }
                    thread::sleep(self.timing.retry_delay);
                }
            }
        }

        self.analyzer.dispose();
        debug!(
            "[AnalysisLoop] stopped after {} frames",
            self.stats.frames()
        );
    }
}
