//! control_loop.rs
//! Fixed-period control: drain analyzer → controller → actuator, once per tick.
//!
//! - Release: coarse cancellable wait on the cancel channel, then SpinSleeper for the last
//!   millisecond so ticks land on schedule.
//! - Ticks never overlap. A tick that runs past the next release counts as an overrun and
//!   the schedule restarts from now instead of firing a burst of catch-up ticks.
//! - Actuator faults are logged (loudly once per streak) and the loop keeps ticking.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, error, info};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::component_a::analysis_loop::AnalysisHandle;
use crate::component_b::{actuator::Actuator, controller::ControllerHandle};
use crate::context::RuntimeContext;
use crate::utils::{
    event_log::CONTROLLER_OUTPUT,
    metrics::{FaultSource, lock_metrics},
};

/// Remaining time before a release that is spent spinning rather than blocking.
const SPIN_MARGIN: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct ControlTiming {
    pub period: Duration,
    /// Delay before the first tick.
    pub start_delay: Duration,
}

impl Default for ControlTiming {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            start_delay: Duration::ZERO,
        }
    }
}

/// Counters written by the control worker; f64 values are stored as bits.
#[derive(Default, Debug)]
pub struct ControlStatistics {
    ticks: AtomicU64,
    overruns: AtomicU64,
    actuator_faults: AtomicU64,
    last_input: AtomicU64,
    last_output: AtomicU64,
    last_power: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlStats {
    pub ticks: u64,
    pub overruns: u64,
    pub actuator_faults: u64,
    /// Analyzer value fed to the controller on the last tick.
    pub last_input: f64,
    pub last_output: f64,
    /// Power the actuator last reported as applied.
    pub last_power: f64,
}

impl ControlStatistics {
    pub fn snapshot(&self) -> ControlStats {
        ControlStats {
            ticks: self.ticks.load(Ordering::Acquire),
            overruns: self.overruns.load(Ordering::Relaxed),
            actuator_faults: self.actuator_faults.load(Ordering::Relaxed),
            last_input: f64::from_bits(self.last_input.load(Ordering::Relaxed)),
            last_output: f64::from_bits(self.last_output.load(Ordering::Relaxed)),
            last_power: f64::from_bits(self.last_power.load(Ordering::Relaxed)),
        }
    }

    pub fn last_output(&self) -> f64 {
        f64::from_bits(self.last_output.load(Ordering::Relaxed))
    }

    pub fn last_power(&self) -> f64 {
        f64::from_bits(self.last_power.load(Ordering::Relaxed))
    }
}

/// One tick's worth of work. Public so it can be driven without a thread.
pub struct ControlTask {
    analysis: AnalysisHandle,
    controller: ControllerHandle,
    actuator: Box<dyn Actuator>,
    ctx: Arc<RuntimeContext>,
    stats: Arc<ControlStatistics>,
    last_value: f64,
    fault_reported: bool,
}

impl ControlTask {
    pub fn new(
        analysis: AnalysisHandle,
        controller: ControllerHandle,
        actuator: Box<dyn Actuator>,
        ctx: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            analysis,
            controller,
            actuator,
            ctx,
            stats: Arc::new(ControlStatistics::default()),
            last_value: 0.0,
            fault_reported: false,
        }
    }

    pub fn stats(&self) -> Arc<ControlStatistics> {
        self.stats.clone()
    }

    /// Runs one control step and returns the controller's command.
    pub fn tick(&mut self) -> f64 {
        // a quiet analyzer is "no data", not zero
        if let Some(value) = self.analysis.drain_batch_output().filter(|v| v.is_finite()) {
            self.last_value = value;
        }
        let command = self.controller.next_value(self.last_value);

        self.ctx
            .event_log
            .record(self.analysis.frame_count(), CONTROLLER_OUTPUT, command);

        match self.actuator.set_power(command) {
            Ok(applied) => {
                self.stats.last_power.store(applied.to_bits(), Ordering::Relaxed);
                if self.fault_reported {
                    info!("[ControlLoop] {} responding again", self.actuator.name());
                    self.fault_reported = false;
                }
            }
            Err(e) => {
                self.stats.actuator_faults.fetch_add(1, Ordering::Relaxed);
                lock_metrics(&self.ctx.metrics).record_fault(FaultSource::Actuator);
                if self.fault_reported {
                    debug!("[ControlLoop] actuator fault: {}", e);
                } else {
                    error!("[ControlLoop] actuator fault: {}; keeping previous power", e);
                    self.fault_reported = true;
                }
            }
        }

        self.stats
            .last_input
            .store(self.last_value.to_bits(), Ordering::Relaxed);
        self.stats.last_output.store(command.to_bits(), Ordering::Relaxed);
        self.stats.ticks.fetch_add(1, Ordering::AcqRel);
        lock_metrics(&self.ctx.metrics).total_ticks += 1;
        command
    }
}

/// Periodic driver for a [`ControlTask`]. Stops when the cancel channel fires or
/// its sender is dropped.
pub struct ControlLoop {
    task: ControlTask,
    timing: ControlTiming,
    cancel: Receiver<()>,
}

impl ControlLoop {
    pub fn new(task: ControlTask, timing: ControlTiming, cancel: Receiver<()>) -> Self {
        Self {
            task,
            timing,
            cancel,
        }
    }

    pub fn stats(&self) -> Arc<ControlStatistics> {
        self.task.stats()
    }

    /// Blocks until `release`. Returns false if cancelled first.
    fn wait_for_release(&self, release: Instant, sleeper: &SpinSleeper) -> bool {
        let coarse = release
            .checked_duration_since(Instant::now())
            .and_then(|left| left.checked_sub(SPIN_MARGIN));

        let cancelled = match coarse {
            Some(wait) => !matches!(
                self.cancel.recv_timeout(wait),
                Err(RecvTimeoutError::Timeout)
            ),
            None => !matches!(self.cancel.try_recv(), Err(TryRecvError::Empty)),
        };
        if cancelled {
            return false;
        }

        let now = Instant::now();
        if now < release {
            sleeper.sleep(release - now);
        }
        true
    }

    pub fn run(mut self) {
        let period = self.timing.period;
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_release = Instant::now() + self.timing.start_delay;

        info!(
            "[ControlLoop] started period={:?} delay={:?}",
            period, self.timing.start_delay
        );

        while self.wait_for_release(next_release, &sleeper) {
            self.task.tick();

            next_release += period;
            let now = Instant::now();
            if now > next_release {
                let late = now - next_release;
                self.task.stats.overruns.fetch_add(1, Ordering::Relaxed);
                lock_metrics(&self.task.ctx.metrics).record_fault(FaultSource::TickOverrun);
                debug!("[ControlLoop] tick overran by {:?}", late);
                next_release = now;
            }
        }

        debug!(
            "[ControlLoop] stopped after {} ticks",
            self.task.stats.snapshot().ticks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_a::{
        analysis_loop::{AnalysisLoop, AnalysisTiming, FrameFeed},
        analyzer::{Analyzer, SharedAnalyzer},
        frame::{Frame, Roi},
        frame_slot::{FramePublisher, frame_slot},
    };
    use crate::component_b::{
        actuator::{Actuator, PowerBounds, SimulatedLaser},
        controller::{Controller, PiController},
    };
    use crate::error::ActuatorError;
    use crate::utils::event_log::LogValue;
    use crossbeam::channel::bounded;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    /// Batch output is the mean of the first pixel of every frame since the last read.
    struct FirstPixel {
        last: f64,
        pending: Vec<f64>,
    }

    impl Analyzer for FirstPixel {
        fn process_image(&mut self, frame: &Frame) {
            self.last = frame.pixels[0] as f64;
            self.pending.push(self.last);
        }
        fn intermittent_output(&self) -> f64 {
            self.last
        }
        fn batch_output(&mut self) -> Option<f64> {
            if self.pending.is_empty() {
                return None;
            }
            let n = self.pending.len() as f64;
            Some(self.pending.drain(..).sum::<f64>() / n)
        }
        fn set_roi(&mut self, _roi: Option<Roi>) {}
        fn name(&self) -> &str {
            "first-pixel"
        }
    }

    struct Rig {
        worker: AnalysisLoop,
        tx: FramePublisher,
        ctx: Arc<RuntimeContext>,
    }

    fn rig() -> Rig {
        let (tx, rx) = frame_slot();
        let ctx = RuntimeContext::new();
        let worker = AnalysisLoop::new(
            SharedAnalyzer::new(Box::new(FirstPixel {
                last: 0.0,
                pending: Vec::new(),
            })),
            FrameFeed::Push(rx),
            Arc::new(AtomicBool::new(true)),
            ctx.clone(),
            AnalysisTiming::default(),
        );
        Rig { worker, tx, ctx }
    }

    fn proportional(setpoint: f64) -> ControllerHandle {
        let mut pi = PiController::new(1.0, 0.0, 100.0, 0.1).unwrap();
        pi.set_setpoint(setpoint).unwrap();
        ControllerHandle::new(Box::new(pi))
    }

    fn laser() -> SimulatedLaser {
        SimulatedLaser::new("laser", PowerBounds::new(0.0, 100.0).unwrap())
    }

    #[test]
    fn quiet_analyzer_reuses_previous_value() {
        let mut rig = rig();
        let mut task = ControlTask::new(
            rig.worker.handle(),
            proportional(10.0),
            Box::new(laser()),
            rig.ctx.clone(),
        );

        // no frame yet: previous value starts at 0
        assert_eq!(task.tick(), 10.0);

        rig.tx.publish(Frame::uniform(2, 2, 4, 1));
        rig.worker.process_next().unwrap();
        assert_eq!(task.tick(), 6.0);
        // nothing analyzed since: 4 again, not 0 and not counted twice
        assert_eq!(task.tick(), 6.0);

        let stats = task.stats().snapshot();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.last_input, 4.0);
        assert_eq!(stats.last_power, 6.0);
        assert_eq!(
            rig.ctx.event_log.get(1, CONTROLLER_OUTPUT),
            Some(LogValue::Number(6.0))
        );
    }

    #[test]
    fn actuator_faults_do_not_stop_ticking() {
        let rig = rig();
        let laser = laser();
        let probe = laser.probe();
        let faults = laser.fault_switch();
        let mut task = ControlTask::new(
            rig.worker.handle(),
            proportional(3.0),
            Box::new(laser),
            rig.ctx.clone(),
        );

        task.tick();
        assert_eq!(probe.read(), 3.0);

        faults.engage();
        task.controller.set_setpoint(7.0).unwrap();
        for _ in 0..3 {
            assert_eq!(task.tick(), 7.0);
        }
        assert_eq!(probe.read(), 3.0);
        assert_eq!(task.stats().snapshot().actuator_faults, 3);
        assert_eq!(lock_metrics(&rig.ctx.metrics).actuator_faults, 3);

        faults.release();
        task.tick();
        assert_eq!(probe.read(), 7.0);
    }

    #[test]
    fn loop_ticks_until_cancelled() {
        let rig = rig();
        let task = ControlTask::new(
            rig.worker.handle(),
            proportional(1.0),
            Box::new(laser()),
            rig.ctx.clone(),
        );
        let (cancel_tx, cancel_rx) = bounded(1);
        let control = ControlLoop::new(
            task,
            ControlTiming {
                period: Duration::from_millis(5),
                start_delay: Duration::ZERO,
            },
            cancel_rx,
        );
        let stats = control.stats();
        let join = thread::spawn(move || control.run());

        thread::sleep(Duration::from_millis(60));
        let started = Instant::now();
        cancel_tx.send(()).unwrap();
        join.join().unwrap();

        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(stats.snapshot().ticks >= 2);
    }

    struct SlowLaser;

    impl Actuator for SlowLaser {
        fn set_power(&mut self, requested: f64) -> Result<f64, ActuatorError> {
            thread::sleep(Duration::from_millis(12));
            Ok(requested)
        }
        fn power(&self) -> Result<f64, ActuatorError> {
            Ok(0.0)
        }
        fn min_power(&self) -> f64 {
            0.0
        }
        fn max_power(&self) -> f64 {
            1.0
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn slow_ticks_are_counted_as_overruns() {
        let rig = rig();
        let task = ControlTask::new(
            rig.worker.handle(),
            proportional(1.0),
            Box::new(SlowLaser),
            rig.ctx.clone(),
        );
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let control = ControlLoop::new(
            task,
            ControlTiming {
                period: Duration::from_millis(4),
                start_delay: Duration::ZERO,
            },
            cancel_rx,
        );
        let stats = control.stats();
        let join = thread::spawn(move || control.run());

        thread::sleep(Duration::from_millis(80));
        drop(cancel_tx);
        join.join().unwrap();

        let snap = stats.snapshot();
        assert!(snap.overruns >= 1);
        // never more ticks than the slow actuator can serve back to back
        assert!(snap.ticks <= 80 / 12 + 2);
    }
}
