//! Name → builder registry for analyzers and controllers.
//!
//! Built-ins are registered by `with_builtins`; extra implementations are added by
//! calling `register_*` at startup before the coordinator is built.

use std::collections::BTreeMap;

use crate::component_a::{analyzer::Analyzer, integrator::Integrator};
use crate::component_b::{
    controller::{Controller, PiController},
    open_loop::{InverterController, ManualController},
    self_tuning::SelfTuningController,
};
use crate::config::Config;
use crate::error::{ConfigError, ConfigResult};

pub type AnalyzerBuilder = fn(&Config) -> ConfigResult<Box<dyn Analyzer>>;
pub type ControllerBuilder = fn(&Config) -> ConfigResult<Box<dyn Controller>>;

#[derive(Clone, Default)]
pub struct Registry {
    analyzers: BTreeMap<String, AnalyzerBuilder>,
    controllers: BTreeMap<String, ControllerBuilder>,
}

fn integrator(_config: &Config) -> ConfigResult<Box<dyn Analyzer>> {
    Ok(Box::new(Integrator::new()))
}

fn pi(config: &Config) -> ConfigResult<Box<dyn Controller>> {
    let c = &config.controller;
    Ok(Box::new(PiController::new(
        c.p,
        c.i_per_second,
        c.max_output,
        config.timing.sampling_period_s(),
    )?))
}

fn self_tuning(config: &Config) -> ConfigResult<Box<dyn Controller>> {
    let c = &config.controller;
    Ok(Box::new(SelfTuningController::new(
        c.max_output,
        config.timing.sampling_period_s(),
        c.tuning,
    )?))
}

fn manual(config: &Config) -> ConfigResult<Box<dyn Controller>> {
    Ok(Box::new(ManualController::new(config.controller.max_output)?))
}

fn inverter(config: &Config) -> ConfigResult<Box<dyn Controller>> {
    let c = &config.controller;
    Ok(Box::new(InverterController::new(c.max_output, c.value_at_1_mw)?))
}

impl Registry {
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register_analyzer("integrator", integrator);
        registry.register_controller("pi", pi);
        registry.register_controller("self_tuning", self_tuning);
        registry.register_controller("manual", manual);
        registry.register_controller("inverter", inverter);
        registry
    }

    /// Replaces any builder already registered under `name`.
    pub fn register_analyzer(&mut self, name: &str, builder: AnalyzerBuilder) {
        self.analyzers.insert(name.to_string(), builder);
    }

    pub fn register_controller(&mut self, name: &str, builder: ControllerBuilder) {
        self.controllers.insert(name.to_string(), builder);
    }

    pub fn analyzer_names(&self) -> impl Iterator<Item = &str> {
        self.analyzers.keys().map(String::as_str)
    }

    pub fn controller_names(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }

    pub fn build_analyzer(&self, name: &str, config: &Config) -> ConfigResult<Box<dyn Analyzer>> {
        let builder = self
            .analyzers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: "analyzer",
                name: name.to_string(),
            })?;
        builder(config)
    }

    /// Builds the controller and applies the configured initial setpoint.
    pub fn build_controller(&self, name: &str, config: &Config) -> ConfigResult<Box<dyn Controller>> {
        let builder = self
            .controllers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind: "controller",
                name: name.to_string(),
            })?;
        let mut controller = builder(config)?;
        controller.set_setpoint(config.controller.setpoint)?;
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.analyzer_names().collect::<Vec<_>>(), vec!["integrator"]);
        assert_eq!(
            registry.controller_names().collect::<Vec<_>>(),
            vec!["inverter", "manual", "pi", "self_tuning"]
        );

        let config = Config::default();
        for name in ["pi", "self_tuning", "manual", "inverter"] {
            let controller = registry.build_controller(name, &config).unwrap();
            assert_eq!(controller.setpoint(), config.controller.setpoint);
        }
        let analyzer = registry.build_analyzer("integrator", &config).unwrap();
        assert_eq!(analyzer.name(), "Brightness integrator");
    }

    #[test]
    fn unknown_names_are_rejected() {
        let registry = Registry::with_builtins();
        let err = registry.build_controller("pid", &Config::default()).err();
        assert_eq!(
            err,
            Some(ConfigError::UnknownComponent {
                kind: "controller",
                name: "pid".into()
            })
        );
    }

    #[test]
    fn explicit_registration_adds_entries() {
        fn fixed(_config: &Config) -> ConfigResult<Box<dyn Controller>> {
            Ok(Box::new(ManualController::new(1.0)?))
        }
        let mut registry = Registry::with_builtins();
        registry.register_controller("fixed", fixed);
        let controller = registry.build_controller("fixed", &Config::default()).unwrap();
        assert_eq!(controller.name(), "Manual");
    }
}
