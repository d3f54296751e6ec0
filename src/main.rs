//! # Laser Feedback Simulation Entry Point
//!
//! Runs the closed loop against a simulated microscope: a synthetic camera whose
//! brightness follows the simulated laser power, the brightness integrator, and the
//! controller picked from the menu.
//!
//! ## Modes
//! - **Self-tuning:** open-loop step calibration, then PI control with the measured gains.
//! - **PI:** PI control with the gains from the configuration.
//!
//! ## Outputs
//! - Event log CSV (`#frame_no,...` one row per analyzed frame).
//! - Run summary CSV (totals, fault counters, min/max/avg of the live histories).
//!
//! Usage: `laser_feedback [config.toml]`. Verbosity via `RUST_LOG`.

use std::{
    io::{Write, stdin, stdout},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel::RecvTimeoutError;
use log::{error, info};

use laser_feedback::{
    component_a::{
        analysis_loop::FrameFeed,
        camera::SyntheticCamera,
        frame_slot::frame_slot,
    },
    component_b::actuator::SimulatedLaser,
    config::{AcquisitionMode, Config},
    context::RuntimeContext,
    coordinator::{Coordinator, StatusSnapshot},
    error::SetupError,
    registry::Registry,
    utils::export::{RunSummary, export_summary_csv},
};

fn main() {
    env_logger::init();
    info!("=== LASER FEEDBACK START ===");

    let mut config = match std::env::args().nth(1) {
        Some(path) => match Config::load(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path);
                config
            }
            Err(e) => {
                error!("Could not load {}: {}", path, e);
                return;
            }
        },
        None => Config::default(),
    };
    let registry = Registry::with_builtins();

    loop {
        let choice = prompt_menu(config.controller.setpoint);
        match choice.as_str() {
            "1" | "" => run_and_report(&registry, &config, "self_tuning"),
            "2" => run_and_report(&registry, &config, "pi"),
            "3" => {
                if let Some(value) = prompt_setpoint() {
                    let mut candidate = config.clone();
                    candidate.controller.setpoint = value;
                    match candidate.validate() {
                        Ok(()) => {
                            config = candidate;
                            println!("Setpoint for the next run: {}", value);
                        }
                        Err(e) => println!("Rejected: {}", e),
                    }
                }
            }
            "4" => {
                println!("Exiting. Goodbye!");
                info!("=== LASER FEEDBACK FINISHED ===");
                return;
            }
            other => println!("Unrecognized option '{}', please try again.", other),
        }
    }
}

fn prompt_menu(setpoint: f64) -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT RUN MODE                         │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Self-tuning PI run                      │");
    println!("│  2) PI run (configured gains)               │");
    println!("│  3) Change setpoint (now {:<10})         │", setpoint);
    println!("│  4) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3/4] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_setpoint() -> Option<f64> {
    print!("Enter new setpoint (analyzer units): ");
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    match input.trim().parse::<f64>() {
        Ok(value) => Some(value),
        Err(_) => {
            println!("Not a number: '{}'", input.trim());
            None
        }
    }
}

fn run_and_report(registry: &Registry, config: &Config, controller_kind: &str) {
    match run_experiment(registry, config, controller_kind) {
        Ok(summary) => {
            println!(
                "\n Run completed: {} frames, {} ticks, final power {:.3}. Returning to menu...\n",
                summary.frames, summary.ticks, summary.final_power
            );
        }
        Err(e) => error!("Run failed: {}", e),
    }
}

fn print_status(status: &StatusSnapshot) {
    let calibration = match status.calibration {
        Some((phase, progress)) if progress < 1.0 => {
            format!("calibrating {:?} {:>3.0}%", phase, progress * 100.0)
        }
        _ => "closed loop".to_string(),
    };
    println!(
        "[{:>6.1}s] power {:>7.3} | signal {:>8.2} | setpoint {:>6.1} | fps {:>4} | frame {:>6} | {}",
        status.elapsed.as_secs_f64(),
        status.laser_power,
        status.intermittent_output,
        status.setpoint,
        status.fps,
        status.frames,
        calibration
    );
}

fn run_experiment(
    registry: &Registry,
    config: &Config,
    controller_kind: &str,
) -> Result<RunSummary, SetupError> {
    let ctx = RuntimeContext::new();
    let analyzer = registry.build_analyzer(&config.analyzer.kind, config)?;
    let controller = registry.build_controller(controller_kind, config)?;
    let laser = SimulatedLaser::new(config.laser.name.clone(), config.laser.bounds()?);

    let (publisher, receiver) = frame_slot();
    let feed = match config.camera.mode {
        AcquisitionMode::Live => FrameFeed::Push(receiver),
        AcquisitionMode::Grab => FrameFeed::Pull(Box::new(publisher.source())),
    };

    let camera_running = Arc::new(AtomicBool::new(true));
    let camera = SyntheticCamera::new(
        config.camera.settings,
        publisher,
        laser.probe(),
        camera_running.clone(),
    )
    .spawn()
    .map_err(|source| SetupError::Spawn {
        name: "camera",
        source,
    })?;

    let coordinator = Coordinator::builder(ctx.clone())
        .analyzer(analyzer)
        .controller(controller)
        .actuator(Box::new(laser))
        .feed(feed)
        .roi(config.analyzer.roi)
        .timing(config.timing.coordinator_timing())
        .analysis_core(config.analyzer.core)
        .start();
    let coordinator = match coordinator {
        Ok(coordinator) => coordinator,
        Err(e) => {
            camera_running.store(false, Ordering::Release);
            let _ = camera.join();
            return Err(e);
        }
    };
    if let Err(e) = coordinator.set_setpoint(config.controller.setpoint) {
        error!("Setpoint rejected: {}", e);
    }

    let run_for = Duration::from_secs_f64(config.output.run_duration_s);
    let deadline = Instant::now() + run_for;
    let status = coordinator.status_receiver();
    info!("Running for {:?}", run_for);

    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        match status.recv_timeout(left) {
            Ok(snapshot) => print_status(&snapshot),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    coordinator.request_stop();
    camera_running.store(false, Ordering::Release);
    if camera.join().is_err() {
        error!("Camera thread panicked");
    }

    let control = coordinator.control_stats();
    let summary = RunSummary {
        controller: controller_kind.to_string(),
        analyzer: coordinator.analysis().analyzer_name().to_string(),
        duration_s: coordinator.elapsed().as_secs_f64(),
        frames: coordinator.analysis_stats().frames,
        ticks: control.ticks,
        final_setpoint: coordinator.setpoint(),
        final_power: control.last_power,
    };

    if let Err(e) = ctx.event_log.save_csv(&config.output.event_log_csv) {
        error!(
            "Failed to write event log {}: {}",
            config.output.event_log_csv.display(),
            e
        );
    } else {
        info!("Event log written to {}", config.output.event_log_csv.display());
    }
    if let Err(e) = export_summary_csv(&config.output.summary_csv, &summary, &ctx.metrics) {
        error!(
            "Failed to write summary {}: {}",
            config.output.summary_csv.display(),
            e
        );
    }

    Ok(summary)
}
