//! actuator.rs
//! Laser actuator contract and a simulated laser.
//!
//! Every actuator clamps the requested power into `[min_power, max_power]` and
//! reports what it actually applied. The simulated laser also publishes the applied
//! power through a lock-free [`PowerProbe`] so a synthetic camera can respond to it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use log::debug;

use crate::error::{ActuatorError, ConfigError, ConfigResult};

pub trait Actuator: Send {
    /// Applies `requested` (clamped) and returns the power actually set.
    fn set_power(&mut self, requested: f64) -> Result<f64, ActuatorError>;

    fn power(&self) -> Result<f64, ActuatorError>;

    fn min_power(&self) -> f64;

    fn max_power(&self) -> f64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerBounds {
    min: f64,
    max: f64,
}

impl PowerBounds {
    pub fn new(min: f64, max: f64) -> ConfigResult<Self> {
        if !(min.is_finite() && max.is_finite()) || min < 0.0 || max <= 0.0 || min >= max {
            return Err(ConfigError::InvalidPowerBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// NaN maps to the lower bound.
    pub fn clamp(&self, requested: f64) -> f64 {
        if requested.is_nan() {
            return self.min;
        }
        requested.clamp(self.min, self.max)
    }
}

/// Read-only view of the power last applied by a [`SimulatedLaser`].
#[derive(Clone, Debug, Default)]
pub struct PowerProbe(Arc<AtomicU64>);

impl PowerProbe {
    pub fn read(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, power: f64) {
        self.0.store(power.to_bits(), Ordering::Release);
    }
}

/// Makes the simulated laser fail its writes while engaged.
#[derive(Clone, Debug, Default)]
pub struct FaultSwitch(Arc<AtomicBool>);

impl FaultSwitch {
    pub fn engage(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_engaged(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct SimulatedLaser {
    name: String,
    bounds: PowerBounds,
    probe: PowerProbe,
    faults: FaultSwitch,
    writes: u64,
}

impl SimulatedLaser {
    pub fn new(name: impl Into<String>, bounds: PowerBounds) -> Self {
        let probe = PowerProbe::default();
        probe.store(bounds.min());
        Self {
            name: name.into(),
            bounds,
            probe,
            faults: FaultSwitch::default(),
            writes: 0,
        }
    }

    pub fn probe(&self) -> PowerProbe {
        self.probe.clone()
    }

    pub fn fault_switch(&self) -> FaultSwitch {
        self.faults.clone()
    }

    /// Successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl Actuator for SimulatedLaser {
    fn set_power(&mut self, requested: f64) -> Result<f64, ActuatorError> {
        if self.faults.is_engaged() {
            return Err(ActuatorError::Hardware {
                device: self.name.clone(),
                reason: "injected fault".into(),
            });
        }
        let applied = self.bounds.clamp(requested);
        self.probe.store(applied);
        self.writes += 1;
        debug!("[{}] power set to {:8.4} (requested {})", self.name, applied, requested);
        Ok(applied)
    }

    fn power(&self) -> Result<f64, ActuatorError> {
        if self.faults.is_engaged() {
            return Err(ActuatorError::Disconnected(self.name.clone()));
        }
        Ok(self.probe.read())
    }

    fn min_power(&self) -> f64 {
        self.bounds.min()
    }

    fn max_power(&self) -> f64 {
        self.bounds.max()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_validation() {
        assert!(PowerBounds::new(0.0, 10.0).is_ok());
        assert!(PowerBounds::new(-1.0, 10.0).is_err());
        assert!(PowerBounds::new(5.0, 5.0).is_err());
        assert!(PowerBounds::new(0.0, 0.0).is_err());
        assert!(PowerBounds::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn simulated_laser_clamps_and_publishes() {
        let mut laser = SimulatedLaser::new("laser-405", PowerBounds::new(0.5, 10.0).unwrap());
        let probe = laser.probe();
        assert_eq!(probe.read(), 0.5);

        assert_eq!(laser.set_power(12.0), Ok(10.0));
        assert_eq!(probe.read(), 10.0);
        assert_eq!(laser.set_power(-3.0), Ok(0.5));
        assert_eq!(laser.set_power(f64::NAN), Ok(0.5));
        assert_eq!(laser.set_power(4.25), Ok(4.25));
        assert_eq!(laser.power(), Ok(4.25));
        assert_eq!(laser.writes(), 4);
    }

    #[test]
    fn fault_switch_fails_writes_and_keeps_last_power() {
        let mut laser = SimulatedLaser::new("laser-405", PowerBounds::new(0.0, 10.0).unwrap());
        let faults = laser.fault_switch();
        laser.set_power(2.0).unwrap();

        faults.engage();
        assert!(matches!(laser.set_power(5.0), Err(ActuatorError::Hardware { .. })));
        assert_eq!(laser.probe().read(), 2.0);

        faults.release();
        assert_eq!(laser.set_power(5.0), Ok(5.0));
    }
}
