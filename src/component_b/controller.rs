//! controller.rs
//! Controller contract and the proportional-integral controller.
//!
//! The PI law runs once per control tick on the analyzer's batch output:
//! `error = setpoint - value`, `output = P*error + integral`, with the integral
//! back-calculated every tick so the output stays inside `[min_output, max_output]`
//! without clamping after the fact (anti-windup).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::component_b::self_tuning::{CalibrationPhase, TuningParams};
use crate::error::{ConfigError, ConfigResult};

pub trait Controller: Send {
    /// Fails on negative or NaN targets.
    fn set_setpoint(&mut self, target: f64) -> ConfigResult<()>;

    fn setpoint(&self) -> f64;

    /// Advances the controller by one tick and returns the new command.
    fn next_value(&mut self, value: f64) -> f64;

    fn current_output(&self) -> f64;

    fn name(&self) -> &str;

    /// Restarts the open-loop calibration, for controllers that have one.
    fn recalibrate(&mut self, _params: TuningParams) -> ConfigResult<()> {
        Err(ConfigError::Unsupported(self.name().to_string()))
    }

    /// Calibration phase and progress in `[0, 1]`, for controllers that calibrate.
    fn calibration(&self) -> Option<(CalibrationPhase, f64)> {
        None
    }
}

pub(crate) fn validate_setpoint(target: f64) -> ConfigResult<()> {
    if target.is_nan() || target < 0.0 {
        return Err(ConfigError::InvalidSetpoint(target));
    }
    Ok(())
}

pub(crate) fn validate_non_negative(name: &'static str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidParameter { name, value });
    }
    Ok(())
}

pub(crate) fn validate_positive(name: &'static str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidParameter { name, value });
    }
    Ok(())
}

/// PI controller with output constraining and back-calculation anti-windup.
#[derive(Debug, Clone)]
pub struct PiController {
    p: f64,
    /// Integral gain per tick (`I_per_second * sampling_period_s`).
    i: f64,
    min_output: f64,
    max_output: f64,
    setpoint: f64,
    integral: f64,
    current_output: f64,
}

impl PiController {
    /// `i_per_second` is scaled by the tick period into a per-tick gain.
    pub fn new(p: f64, i_per_second: f64, max_output: f64, sampling_period_s: f64) -> ConfigResult<Self> {
        validate_non_negative("P", p)?;
        validate_non_negative("I", i_per_second)?;
        validate_positive("max_output", max_output)?;
        validate_positive("sampling_period_s", sampling_period_s)?;
        Ok(Self {
            p,
            i: i_per_second * sampling_period_s,
            min_output: 0.0,
            max_output,
            setpoint: 0.0,
            integral: 0.0,
            current_output: 0.0,
        })
    }

    /// Installs new gains (`i_per_tick` is already scaled) and starts from a clean state.
    pub fn arm(&mut self, p: f64, i_per_tick: f64) {
        self.p = p;
        self.i = i_per_tick;
        self.integral = 0.0;
        self.current_output = 0.0;
    }

    pub fn gains(&self) -> (f64, f64) {
        (self.p, self.i)
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn max_output(&self) -> f64 {
        self.max_output
    }

    /// Overrides the reported output without running the control law.
    pub(crate) fn force_output(&mut self, output: f64) {
        self.current_output = output;
    }
}

impl Controller for PiController {
    fn set_setpoint(&mut self, target: f64) -> ConfigResult<()> {
        validate_setpoint(target)?;
        if target == 0.0 && self.integral > 0.0 {
            // wind down immediately instead of decaying
            self.integral = 0.0;
        }
        self.setpoint = target;
        Ok(())
    }

    fn setpoint(&self) -> f64 {
        self.setpoint
    }

    fn next_value(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.current_output;
        }
        let error = self.setpoint - value;
        let p_term = self.p * error;

        self.integral += self.i * error;
        // back-calculation: keep p_term + integral inside the output range
        let i_max = self.max_output - p_term;
        let i_min = self.min_output - p_term;
        if self.integral > i_max {
            self.integral = i_max;
        }
        if self.integral < i_min {
            self.integral = i_min;
        }

        self.current_output = p_term + self.integral;
        self.current_output
    }

    fn current_output(&self) -> f64 {
        self.current_output
    }

    fn name(&self) -> &str {
        "PI controller"
    }
}

/// A controller behind one lock shared by the control loop and the coordinator.
#[derive(Clone)]
pub struct ControllerHandle {
    inner: Arc<Mutex<Box<dyn Controller>>>,
    name: Arc<str>,
}

impl ControllerHandle {
    pub fn new(controller: Box<dyn Controller>) -> Self {
        let name: Arc<str> = controller.name().into();
        Self {
            inner: Arc::new(Mutex::new(controller)),
            name,
        }
    }

    pub fn next_value(&self, value: f64) -> f64 {
        self.inner.lock().next_value(value)
    }

    pub fn set_setpoint(&self, target: f64) -> ConfigResult<()> {
        self.inner.lock().set_setpoint(target)
    }

    pub fn setpoint(&self) -> f64 {
        self.inner.lock().setpoint()
    }

    pub fn current_output(&self) -> f64 {
        self.inner.lock().current_output()
    }

    pub fn recalibrate(&self, params: TuningParams) -> ConfigResult<()> {
        self.inner.lock().recalibrate(params)
    }

    pub fn calibration(&self) -> Option<(CalibrationPhase, f64)> {
        self.inner.lock().calibration()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
