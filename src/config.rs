//! TOML configuration for a run.
//!
//! Every section is optional; missing keys fall back to a working simulated setup.
//! `Config::load` parses and validates in one go so a bad file is rejected before
//! any thread starts.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::component_a::{analysis_loop::AnalysisTiming, camera::CameraSettings, frame::Roi};
use crate::component_b::{
    actuator::PowerBounds,
    control_loop::ControlTiming,
    controller::{validate_non_negative, validate_positive, validate_setpoint},
    self_tuning::TuningParams,
};
use crate::coordinator::CoordinatorTiming;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timing: TimingConfig,
    pub controller: ControllerConfig,
    pub analyzer: AnalyzerConfig,
    pub laser: LaserConfig,
    pub camera: CameraConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub control_period_ms: u64,
    pub control_start_delay_ms: u64,
    pub monitor_period_ms: u64,
    pub stop_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub wait_slice_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 100,
            control_start_delay_ms: 0,
            monitor_period_ms: 250,
            stop_timeout_ms: 1_000,
            retry_delay_ms: 10,
            poll_interval_ms: 1,
            wait_slice_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn sampling_period_s(&self) -> f64 {
        self.control_period_ms as f64 / 1_000.0
    }

    pub fn coordinator_timing(&self) -> CoordinatorTiming {
        CoordinatorTiming {
            control: ControlTiming {
                period: Duration::from_millis(self.control_period_ms),
                start_delay: Duration::from_millis(self.control_start_delay_ms),
            },
            analysis: AnalysisTiming {
                wait_slice: Duration::from_millis(self.wait_slice_ms),
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            monitor_period: Duration::from_millis(self.monitor_period_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Registry name, e.g. `pi` or `self_tuning`.
    pub kind: String,
    pub max_output: f64,
    pub p: f64,
    pub i_per_second: f64,
    pub setpoint: f64,
    /// Inverter only.
    pub value_at_1_mw: f64,
    #[serde(flatten)]
    pub tuning: TuningParams,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: "self_tuning".into(),
            max_output: 10.0,
            p: 0.05,
            i_per_second: 0.2,
            setpoint: 60.0,
            value_at_1_mw: 20.0,
            tuning: TuningParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub kind: String,
    pub roi: Option<Roi>,
    /// Pin the analysis thread to this core index.
    pub core: Option<usize>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            kind: "integrator".into(),
            roi: None,
            core: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    pub name: String,
    pub min_power: f64,
    pub max_power: f64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            name: "laser-405".into(),
            min_power: 0.0,
            max_power: 10.0,
        }
    }
}

impl LaserConfig {
    pub fn bounds(&self) -> ConfigResult<PowerBounds> {
        PowerBounds::new(self.min_power, self.max_power)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Frame-ready notifications through the latest-frame slot.
    #[default]
    Live,
    /// Poll the camera's last image and compare leading pixels.
    Grab,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub mode: AcquisitionMode,
    #[serde(flatten)]
    pub settings: CameraSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub event_log_csv: PathBuf,
    pub summary_csv: PathBuf,
    pub run_duration_s: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            event_log_csv: PathBuf::from("laser_feedback_log.csv"),
            summary_csv: PathBuf::from("laser_feedback_summary.csv"),
            run_duration_s: 15.0,
        }
    }
}

fn require_nonzero(name: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Validation(format!("{} must be greater than 0", name)));
    }
    Ok(())
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let t = &self.timing;
        require_nonzero("timing.control_period_ms", t.control_period_ms)?;
        require_nonzero("timing.monitor_period_ms", t.monitor_period_ms)?;
        require_nonzero("timing.stop_timeout_ms", t.stop_timeout_ms)?;
        require_nonzero("timing.wait_slice_ms", t.wait_slice_ms)?;

        let c = &self.controller;
        validate_positive("max_output", c.max_output)?;
        validate_non_negative("P", c.p)?;
        validate_non_negative("I", c.i_per_second)?;
        validate_setpoint(c.setpoint)?;
        validate_positive("value_at_1_mw", c.value_at_1_mw)?;
        c.tuning.validate()?;
        if c.tuning.step_height > c.max_output {
            return Err(ConfigError::InvalidParameter {
                name: "step_height",
                value: c.tuning.step_height,
            });
        }

        self.laser.bounds()?;

        let cam = &self.camera.settings;
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Validation(format!(
                "camera size must be non-zero, got {}x{}",
                cam.width, cam.height
            )));
        }
        require_nonzero("camera.frame_interval_ms", cam.frame_interval_ms)?;

        if !(self.output.run_duration_s.is_finite() && self.output.run_duration_s > 0.0) {
            return Err(ConfigError::Validation(format!(
                "output.run_duration_s must be positive, got {}",
                self.output.run_duration_s
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [timing]
            control_period_ms = 50

            [controller]
            kind = "pi"
            p = 0.2
            step_height = 2.5
            baseline_ticks = 10

            [analyzer]
            roi = { x = 4, y = 4, width = 16, height = 8 }

            [camera]
            mode = "grab"
            width = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.timing.control_period_ms, 50);
        assert_eq!(config.timing.sampling_period_s(), 0.05);
        assert_eq!(config.controller.kind, "pi");
        assert_eq!(config.controller.tuning.step_height, 2.5);
        assert_eq!(config.controller.tuning.baseline_ticks, 10);
        assert_eq!(config.controller.tuning.response_ticks, 7);
        assert_eq!(config.analyzer.roi, Some(Roi::new(4, 4, 16, 8)));
        assert_eq!(config.camera.mode, AcquisitionMode::Grab);
        assert_eq!(config.camera.settings.width, 32);
        assert_eq!(config.camera.settings.height, 64);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Config::from_toml_str("[controller]\nsetpoint = -3.0\n").unwrap_err();
        assert_eq!(err, ConfigError::InvalidSetpoint(-3.0));

        let err = Config::from_toml_str("[laser]\nmin_power = 5.0\nmax_power = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPowerBounds { .. }));

        let err = Config::from_toml_str("[timing]\ncontrol_period_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = Config::from_toml_str("[controller]\nmax_output = 4.0\nstep_height = 5.0\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidParameter {
                name: "step_height",
                value: 5.0
            }
        );

        let err = Config::from_toml_str("[camera]\nmode = \"burst\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nrun_duration_s = 2.5").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.output.run_duration_s, 2.5);

        assert!(matches!(
            Config::load("/definitely/not/here.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
