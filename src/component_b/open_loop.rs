//! Controllers that do not close the loop on the setpoint.

use crate::component_b::controller::{Controller, validate_positive, validate_setpoint};
use crate::error::ConfigResult;

/// Outputs the setpoint itself as laser power, capped at `max_output`. Input is ignored.
pub struct ManualController {
    max_output: f64,
    setpoint: f64,
}

impl ManualController {
    pub fn new(max_output: f64) -> ConfigResult<Self> {
        validate_positive("max_output", max_output)?;
        Ok(Self {
            max_output,
            setpoint: 0.0,
        })
    }
}

impl Controller for ManualController {
    fn set_setpoint(&mut self, target: f64) -> ConfigResult<()> {
        validate_setpoint(target)?;
        self.setpoint = target;
        Ok(())
    }

    fn setpoint(&self) -> f64 {
        self.setpoint
    }

    fn next_value(&mut self, _value: f64) -> f64 {
        self.current_output()
    }

    fn current_output(&self) -> f64 {
        self.setpoint.min(self.max_output)
    }

    fn name(&self) -> &str {
        "Manual"
    }
}

/// Power inversely proportional to the measured signal: `value_at_1_mw / signal`.
pub struct InverterController {
    max_output: f64,
    value_at_1_mw: f64,
    setpoint: f64,
    last_input: f64,
}

impl InverterController {
    pub fn new(max_output: f64, value_at_1_mw: f64) -> ConfigResult<Self> {
        validate_positive("max_output", max_output)?;
        validate_positive("value_at_1_mw", value_at_1_mw)?;
        Ok(Self {
            max_output,
            value_at_1_mw,
            setpoint: 0.0,
            last_input: 1.0,
        })
    }
}

impl Controller for InverterController {
    fn set_setpoint(&mut self, target: f64) -> ConfigResult<()> {
        validate_setpoint(target)?;
        self.setpoint = target;
        Ok(())
    }

    fn setpoint(&self) -> f64 {
        self.setpoint
    }

    fn next_value(&mut self, value: f64) -> f64 {
        if value.is_finite() {
            self.last_input = value;
        }
        self.current_output()
    }

    fn current_output(&self) -> f64 {
        if self.last_input <= 0.0 {
            return self.max_output;
        }
        (self.value_at_1_mw / self.last_input).min(self.max_output)
    }

    fn name(&self) -> &str {
        "Inverter"
    }
}
