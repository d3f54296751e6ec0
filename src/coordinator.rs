//! Coordinator: wires one analysis loop and one control loop around caller-supplied
//! collaborators, runs them on their own threads and owns the stop protocol.
//!
//! Threads:
//! - `analysis-loop`: frames → analyzer (optionally pinned to a core)
//! - `control-loop`: fixed-period ticks at raised priority (best effort)
//! - `status-monitor`: periodic [`StatusSnapshot`]s over a bounded channel, never blocking
//!
//! Stop: clear the running flag, drop the cancel sender (wakes the control loop and the
//! monitor), then wait for each worker's exit notice up to a shared deadline. A worker
//! still alive after that is interrupted (the analysis slot is closed) and, failing
//! that, detached with an error log. `request_stop` never blocks past the deadline
//! plus a short grace period.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::component_a::{
    analysis_loop::{AnalysisHandle, AnalysisLoop, AnalysisTiming, FrameFeed, LoopStats},
    analyzer::{Analyzer, SharedAnalyzer},
    frame::Roi,
    frame_slot::FrameInterrupt,
};
use crate::component_b::{
    actuator::Actuator,
    control_loop::{ControlLoop, ControlStatistics, ControlStats, ControlTask, ControlTiming},
    controller::{Controller, ControllerHandle},
    self_tuning::{CalibrationPhase, TuningParams},
};
use crate::context::RuntimeContext;
use crate::error::{ConfigResult, SetupError};
use crate::utils::{
    event_log::SETPOINT,
    metrics::{lock_metrics, push_capped, push_capped_u64},
};

const STATUS_CAPACITY: usize = 16;
/// Extra wait after interrupting a worker that missed the stop deadline.
pub const INTERRUPT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorTiming {
    pub control: ControlTiming,
    pub analysis: AnalysisTiming,
    pub monitor_period: Duration,
    /// Upper bound on how long `request_stop` waits for the workers.
    pub stop_timeout: Duration,
}

impl Default for CoordinatorTiming {
    fn default() -> Self {
        Self {
            control: ControlTiming::default(),
            analysis: AnalysisTiming::default(),
            monitor_period: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// One status refresh, for whatever presents the run to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub elapsed: Duration,
    pub laser_power: f64,
    pub controller_output: f64,
    pub intermittent_output: f64,
    pub setpoint: f64,
    pub fps: u64,
    pub last_analysis: Duration,
    pub frames: u64,
    pub calibration: Option<(CalibrationPhase, f64)>,
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
    interrupt: Option<FrameInterrupt>,
}

fn spawn_worker<F>(
    name: &'static str,
    priority: Option<ThreadPriority>,
    body: F,
) -> Result<Worker, SetupError>
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done_rx) = bounded::<()>(1);
    let run = move || {
        body();
        let _ = done_tx.send(());
    };
    let builder = thread::Builder::new().name(name.to_string());
    let handle = match priority {
        Some(priority) => builder.spawn_with_priority(priority, move |raised| {
            if let Err(e) = raised {
                warn!("[Coordinator] could not raise {} priority: {:?}", name, e);
            }
            run()
        }),
        None => builder.spawn(run),
    }
    .map_err(|source| SetupError::Spawn { name, source })?;

    Ok(Worker {
        name,
        handle,
        done: done_rx,
        interrupt: None,
    })
}

pub struct CoordinatorBuilder {
    ctx: Arc<RuntimeContext>,
    analyzer: Option<Box<dyn Analyzer>>,
    controller: Option<Box<dyn Controller>>,
    actuator: Option<Box<dyn Actuator>>,
    feed: Option<FrameFeed>,
    roi: Option<Roi>,
    timing: CoordinatorTiming,
    analysis_core: Option<usize>,
}

impl CoordinatorBuilder {
    pub fn analyzer(mut self, analyzer: Box<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn controller(mut self, controller: Box<dyn Controller>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn actuator(mut self, actuator: Box<dyn Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn feed(mut self, feed: FrameFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn roi(mut self, roi: Option<Roi>) -> Self {
        self.roi = roi;
        self
    }

    pub fn timing(mut self, timing: CoordinatorTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn analysis_core(mut self, core: Option<usize>) -> Self {
        self.analysis_core = core;
        self
    }

    /// Validates the collaborators and starts all workers.
    pub fn start(self) -> Result<Coordinator, SetupError> {
        let analyzer = self
            .analyzer
            .ok_or(SetupError::MissingCollaborator("analyzer"))?;
        let controller = self
            .controller
            .ok_or(SetupError::MissingCollaborator("controller"))?;
        let actuator = self
            .actuator
            .ok_or(SetupError::MissingCollaborator("actuator"))?;
        let feed = self
            .feed
            .ok_or(SetupError::MissingCollaborator("frame feed"))?;

        let ctx = self.ctx;
        let timing = self.timing;
        let analyzer = SharedAnalyzer::new(analyzer);
        if self.roi.is_some() {
            analyzer.set_roi(self.roi);
        }
        let interrupt = match &feed {
            FrameFeed::Push(rx) => Some(rx.interrupter()),
            FrameFeed::Pull(_) => None,
        };

        let running = Arc::new(AtomicBool::new(true));
        let analysis_loop = AnalysisLoop::new(
            analyzer,
            feed,
            running.clone(),
            ctx.clone(),
            timing.analysis,
        )
        .with_core(self.analysis_core);
        let analysis = analysis_loop.handle();

        let controller = ControllerHandle::new(controller);
        let task = ControlTask::new(analysis.clone(), controller.clone(), actuator, ctx.clone());
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let control_loop = ControlLoop::new(task, timing.control, cancel_rx.clone());
        let control_stats = control_loop.stats();
        let (status_tx, status_rx) = bounded(STATUS_CAPACITY);

        let coordinator = Coordinator {
            ctx,
            state: Mutex::new(CoordinatorState::Created),
            running,
            analysis,
            controller,
            control_stats,
            cancel: Mutex::new(Some(cancel_tx)),
            workers: Mutex::new(Vec::new()),
            status_rx,
            started_at: Instant::now(),
            stop_timeout: timing.stop_timeout,
        };

        info!(
            "[Coordinator] starting analyzer='{}' controller='{}' period={:?}",
            coordinator.analysis.analyzer_name(),
            coordinator.controller.name(),
            timing.control.period
        );

        // a failed spawn stops whatever already runs, through Drop
        let mut analysis_worker = spawn_worker("analysis-loop", None, move || analysis_loop.run())?;
        analysis_worker.interrupt = interrupt;
        coordinator.workers.lock().push(analysis_worker);

        let control_worker = spawn_worker("control-loop", Some(ThreadPriority::Max), move || {
            control_loop.run()
        })?;
        coordinator.workers.lock().push(control_worker);

        let monitor = StatusMonitor {
            analysis: coordinator.analysis.clone(),
            controller: coordinator.controller.clone(),
            control_stats: coordinator.control_stats.clone(),
            ctx: coordinator.ctx.clone(),
            status_tx,
            cancel: cancel_rx,
            period: timing.monitor_period,
            started_at: coordinator.started_at,
        };
        let monitor_worker = spawn_worker("status-monitor", None, move || monitor.run())?;
        coordinator.workers.lock().push(monitor_worker);

        *coordinator.state.lock() = CoordinatorState::Running;
        Ok(coordinator)
    }
}

pub struct Coordinator {
    ctx: Arc<RuntimeContext>,
    state: Mutex<CoordinatorState>,
    running: Arc<AtomicBool>,
    analysis: AnalysisHandle,
    controller: ControllerHandle,
    control_stats: Arc<ControlStatistics>,
    cancel: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<Worker>>,
    status_rx: Receiver<StatusSnapshot>,
    started_at: Instant,
    stop_timeout: Duration,
}

impl Coordinator {
    pub fn builder(ctx: Arc<RuntimeContext>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            ctx,
            analyzer: None,
            controller: None,
            actuator: None,
            feed: None,
            roi: None,
            timing: CoordinatorTiming::default(),
            analysis_core: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Running
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Forwards to the controller; takes effect on the next tick.
    pub fn set_setpoint(&self, value: f64) -> ConfigResult<()> {
        self.controller.set_setpoint(value)?;
        self.ctx
            .event_log
            .record(self.analysis.frame_count(), SETPOINT, value);
        info!("[Coordinator] setpoint set to {}", value);
        Ok(())
    }

    pub fn setpoint(&self) -> f64 {
        self.controller.setpoint()
    }

    /// Takes effect on the next analyzed frame. `None` analyzes the whole frame.
    pub fn set_roi(&self, roi: Option<Roi>) {
        self.analysis.set_roi(roi);
    }

    pub fn recalibrate(&self, params: TuningParams) -> ConfigResult<()> {
        self.controller.recalibrate(params)
    }

    pub fn calibration(&self) -> Option<(CalibrationPhase, f64)> {
        self.controller.calibration()
    }

    pub fn status_receiver(&self) -> Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    pub fn control_stats(&self) -> ControlStats {
        self.control_stats.snapshot()
    }

    pub fn analysis_stats(&self) -> LoopStats {
        self.analysis.stats()
    }

    pub fn analysis(&self) -> &AnalysisHandle {
        &self.analysis
    }

    /// Stops all workers. Later calls return immediately.
    pub fn request_stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                CoordinatorState::Stopping | CoordinatorState::Stopped => return,
                CoordinatorState::Created | CoordinatorState::Running => {
                    *state = CoordinatorState::Stopping
                }
            }
        }
        info!("[Coordinator] stop requested after {:?}", self.elapsed());

        self.running.store(false, Ordering::Release);
        // dropping the sender wakes every receiver
        drop(self.cancel.lock().take());

        let deadline = Instant::now() + self.stop_timeout;
        let workers: Vec<Worker> = self.workers.lock().drain(..).collect();
        for worker in workers {
            Self::join_worker(worker, deadline);
        }

        *self.state.lock() = CoordinatorState::Stopped;
        info!("[Coordinator] stopped");
    }

    fn join_worker(worker: Worker, deadline: Instant) {
        let left = deadline.saturating_duration_since(Instant::now());
        let mut exited = !matches!(worker.done.recv_timeout(left), Err(RecvTimeoutError::Timeout));

        if !exited {
            if let Some(interrupt) = &worker.interrupt {
                warn!("[Coordinator] {} missed the stop deadline; interrupting", worker.name);
                interrupt.interrupt();
                exited = !matches!(
                    worker.done.recv_timeout(INTERRUPT_GRACE),
                    Err(RecvTimeoutError::Timeout)
                );
            }
        }

        if !exited {
            error!(
                "[Coordinator] {} did not stop in time; detaching thread",
                worker.name
            );
            return;
        }
        if worker.handle.join().is_err() {
            error!("[Coordinator] {} panicked", worker.name);
        } else {
            debug!("[Coordinator] {} joined", worker.name);
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.request_stop();
    }
}

struct StatusMonitor {
    analysis: AnalysisHandle,
    controller: ControllerHandle,
    control_stats: Arc<ControlStatistics>,
    ctx: Arc<RuntimeContext>,
    status_tx: Sender<StatusSnapshot>,
    cancel: Receiver<()>,
    period: Duration,
    started_at: Instant,
}

impl StatusMonitor {
    fn snapshot(&self) -> StatusSnapshot {
        let loop_stats = self.analysis.stats();
        StatusSnapshot {
            elapsed: self.started_at.elapsed(),
            laser_power: self.control_stats.last_power(),
            controller_output: self.control_stats.last_output(),
            intermittent_output: self.analysis.intermittent_output(),
            setpoint: self.controller.setpoint(),
            fps: loop_stats.fps,
            last_analysis: loop_stats.last_analysis,
            frames: loop_stats.frames,
            calibration: self.controller.calibration(),
        }
    }

    fn run(self) {
        while let Err(RecvTimeoutError::Timeout) = self.cancel.recv_timeout(self.period) {
            let status = self.snapshot();
            {
                let mut m = lock_metrics(&self.ctx.metrics);
                push_capped(&mut m.analyzer_output, status.intermittent_output);
                push_capped(&mut m.laser_power, status.laser_power);
                push_capped_u64(&mut m.analysis_us, status.last_analysis.as_micros() as u64);
                push_capped_u64(&mut m.fps, status.fps);
            }
            match self.status_tx.try_send(status) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("[StatusMonitor] observer lagging; status dropped"),
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_a::{frame_slot::frame_slot, integrator::Integrator};
    use crate::component_b::{
        actuator::{PowerBounds, SimulatedLaser},
        controller::PiController,
    };
    use crate::error::ConfigError;

    fn laser() -> Box<dyn Actuator> {
        Box::new(SimulatedLaser::new("laser", PowerBounds::new(0.0, 5.0).unwrap()))
    }

    fn pi() -> Box<dyn Controller> {
        Box::new(PiController::new(0.5, 0.1, 5.0, 0.01).unwrap())
    }

    #[test]
    fn missing_collaborators_are_rejected() {
        let (_tx, rx) = frame_slot();
        let err = Coordinator::builder(RuntimeContext::new())
            .analyzer(Box::new(Integrator::new()))
            .actuator(laser())
            .feed(FrameFeed::Push(rx))
            .start()
            .err();
        assert!(matches!(err, Some(SetupError::MissingCollaborator("controller"))));

        let err = Coordinator::builder(RuntimeContext::new())
            .controller(pi())
            .start()
            .err();
        assert!(matches!(err, Some(SetupError::MissingCollaborator("analyzer"))));
    }

    #[test]
    fn stop_is_idempotent() {
        let (_tx, rx) = frame_slot();
        let coordinator = Coordinator::builder(RuntimeContext::new())
            .analyzer(Box::new(Integrator::new()))
            .controller(pi())
            .actuator(laser())
            .feed(FrameFeed::Push(rx))
            .start()
            .unwrap();
        assert!(coordinator.is_running());

        coordinator.request_stop();
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        let again = Instant::now();
        coordinator.request_stop();
        assert!(again.elapsed() < Duration::from_millis(10));
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    }

    #[test]
    fn setpoint_changes_are_validated_and_logged() {
        let (_tx, rx) = frame_slot();
        let ctx = RuntimeContext::new();
        let coordinator = Coordinator::builder(ctx.clone())
            .analyzer(Box::new(Integrator::new()))
            .controller(pi())
            .actuator(laser())
            .feed(FrameFeed::Push(rx))
            .start()
            .unwrap();

        assert_eq!(coordinator.set_setpoint(-1.0), Err(ConfigError::InvalidSetpoint(-1.0)));
        coordinator.set_setpoint(12.0).unwrap();
        assert_eq!(coordinator.setpoint(), 12.0);
        assert_eq!(
            ctx.event_log.get(0, SETPOINT),
            Some(crate::utils::event_log::LogValue::Number(12.0))
        );
        assert!(matches!(
            coordinator.recalibrate(TuningParams::default()),
            Err(ConfigError::Unsupported(_))
        ));
    }
}
