//! Self-tuning PI controller.
//!
//! Before closed-loop control starts, the controller runs an open-loop step test:
//!
//! ```text
//! k < 0                      Settling        output 0
//! 0 <= k < nb                BaselineSample  accumulate signal at zero power
//! k == nb                    BaselineCommit  average baseline, command the step
//! nb < k < nb+nr             StepSample      accumulate signal under the step
//! k == nb+nr                 StepCommit      average (incl. this sample), compute gains
//! afterwards                 Normal          delegate to the PI law
//! ```
//!
//! Gains: `P = step * p_factor / delta`, `I = P * period * i_factor` (per tick), where
//! `delta` is the step response minus the baseline. A non-positive or non-finite
//! result zeroes both gains, so the laser stays off instead of running an unstable loop.

use average::{Estimate, Mean};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::component_b::controller::{
    Controller, PiController, validate_positive, validate_setpoint,
};
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Settling,
    BaselineSample,
    BaselineCommit,
    StepSample,
    StepCommit,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningParams {
    /// Open-loop power step, in actuator units.
    pub step_height: f64,
    pub p_factor: f64,
    pub i_factor: f64,
    pub settle_ticks: u32,
    pub baseline_ticks: u32,
    pub response_ticks: u32,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            step_height: 1.0,
            p_factor: 0.5,
            i_factor: 0.5,
            settle_ticks: 5,
            baseline_ticks: 7,
            response_ticks: 7,
        }
    }
}

impl TuningParams {
    pub fn new(step_height: f64, p_factor: f64, i_factor: f64) -> Self {
        Self {
            step_height,
            p_factor,
            i_factor,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_positive("step_height", self.step_height)?;
        validate_positive("p_factor", self.p_factor)?;
        validate_positive("i_factor", self.i_factor)?;
        if self.baseline_ticks == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "baseline_ticks",
                value: 0.0,
            });
        }
        if self.response_ticks == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "response_ticks",
                value: 0.0,
            });
        }
        Ok(())
    }

    fn total_ticks(&self) -> i64 {
        self.settle_ticks as i64 + self.baseline_ticks as i64 + self.response_ticks as i64 + 1
    }
}

/// Scratch state of one calibration run.
struct Calibration {
    k: i64,
    baseline: Mean,
    response: Mean,
    baseline_signal: f64,
}

impl Calibration {
    fn new(settle_ticks: u32) -> Self {
        Self {
            k: -(settle_ticks as i64),
            baseline: Mean::new(),
            response: Mean::new(),
            baseline_signal: 0.0,
        }
    }
}

pub struct SelfTuningController {
    pi: PiController,
    sampling_period_s: f64,
    params: TuningParams,
    calibration: Option<Calibration>,
    phase: CalibrationPhase,
}

impl SelfTuningController {
    /// Builds the controller and starts calibrating right away.
    pub fn new(max_output: f64, sampling_period_s: f64, params: TuningParams) -> ConfigResult<Self> {
        let mut controller = Self {
            pi: PiController::new(0.0, 0.0, max_output, sampling_period_s)?,
            sampling_period_s,
            params,
            calibration: None,
            phase: CalibrationPhase::Normal,
        };
        controller.recalibrate(params)?;
        Ok(controller)
    }

    pub fn calibration_phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Fraction of the calibration schedule already run, 1.0 in normal operation.
    pub fn calibration_progress(&self) -> f64 {
        match &self.calibration {
            Some(cal) => {
                let done = cal.k + self.params.settle_ticks as i64;
                (done as f64 / self.params.total_ticks() as f64).clamp(0.0, 1.0)
            }
            None => 1.0,
        }
    }

    /// Committed `(P, I per tick)`; both 0 until a calibration succeeds.
    pub fn gains(&self) -> (f64, f64) {
        self.pi.gains()
    }

    pub fn params(&self) -> TuningParams {
        self.params
    }

    fn phase_at(params: &TuningParams, k: i64) -> CalibrationPhase {
        let nb = params.baseline_ticks as i64;
        let nr = params.response_ticks as i64;
        if k < 0 {
            CalibrationPhase::Settling
        } else if k < nb {
            CalibrationPhase::BaselineSample
        } else if k == nb {
            CalibrationPhase::BaselineCommit
        } else if k < nb + nr {
            CalibrationPhase::StepSample
        } else {
            CalibrationPhase::StepCommit
        }
    }

    fn commit_gains(&mut self, baseline: f64, response: f64) {
        let delta = response - baseline;
        let mut p = self.params.step_height * self.params.p_factor / delta;
        let mut i = p * self.sampling_period_s * self.params.i_factor;

        if !(p.is_finite() && i.is_finite()) || p < 0.0 || i < 0.0 {
            warn!(
                "[SelfTuning] calibration failed: baseline={:e} response={:e} gave P={} I={}; output held at 0",
                baseline, response, p, i
            );
            p = 0.0;
            i = 0.0;
        } else {
            info!(
                "[SelfTuning] calibrated: baseline={:e} response={:e} P={} I={}",
                baseline, response, p, i
            );
        }
        self.pi.arm(p, i);
    }

    fn calibration_step(&mut self, value: f64) -> f64 {
        let Some(cal) = self.calibration.as_mut() else {
            return self.pi.next_value(value);
        };
        let k = cal.k;
        cal.k += 1;
        let phase = Self::phase_at(&self.params, k);
        debug!("[SelfTuning] k={} phase={:?} signal={}", k, phase, value);

        let output = match phase {
            CalibrationPhase::Settling => 0.0,
            CalibrationPhase::BaselineSample => {
                cal.baseline.add(value);
                0.0
            }
            CalibrationPhase::BaselineCommit => {
                cal.baseline_signal = cal.baseline.mean();
                debug!(
                    "[SelfTuning] signal at zero power: {:e}",
                    cal.baseline_signal
                );
                self.params.step_height
            }
            CalibrationPhase::StepSample => {
                cal.response.add(value);
                self.params.step_height
            }
            CalibrationPhase::StepCommit | CalibrationPhase::Normal => {
                cal.response.add(value);
                let baseline = cal.baseline_signal;
                let response = cal.response.mean();
                self.calibration = None;
                self.commit_gains(baseline, response);
                0.0
            }
        };

        self.phase = if self.calibration.is_some() {
            phase
        } else {
            CalibrationPhase::Normal
        };
        self.pi.force_output(output);
        output
    }
}

impl Controller for SelfTuningController {
    /// Stored right away; only affects the output once calibration is over.
    fn set_setpoint(&mut self, target: f64) -> ConfigResult<()> {
        validate_setpoint(target)?;
        self.pi.set_setpoint(target)
    }

    fn setpoint(&self) -> f64 {
        self.pi.setpoint()
    }

    fn next_value(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.pi.current_output();
        }
        self.calibration_step(value)
    }

    fn current_output(&self) -> f64 {
        self.pi.current_output()
    }

    fn name(&self) -> &str {
        "Self-tuning PI"
    }

    fn recalibrate(&mut self, params: TuningParams) -> ConfigResult<()> {
        params.validate()?;
        // the step must be applied unclamped for the gain estimate to hold
        if params.step_height > self.pi.max_output() {
            return Err(ConfigError::InvalidParameter {
                name: "step_height",
                value: params.step_height,
            });
        }
        self.params = params;
        let calibration = Calibration::new(params.settle_ticks);
        self.phase = Self::phase_at(&params, calibration.k);
        self.calibration = Some(calibration);
        self.pi.force_output(0.0);
        info!(
            "[SelfTuning] calibration started: step={} p_factor={} i_factor={}",
            params.step_height, params.p_factor, params.i_factor
        );
        Ok(())
    }

    fn calibration(&self) -> Option<(CalibrationPhase, f64)> {
        Some((self.phase, self.calibration_progress()))
    }
}
