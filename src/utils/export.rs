//! End-of-run summary export.
//!
//! One `metric,value,description` row per figure: run totals from the coordinator,
//! fault counters, and min/max/avg over the live histories kept by the status monitor.

use std::{
    fs::{File, create_dir_all},
    io::Write,
    path::Path,
};

use log::info;

use crate::utils::metrics::{SharedMetrics, calculate_stats, calculate_stats_u64, lock_metrics};

/// Totals gathered by the caller when a run ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub controller: String,
    pub analyzer: String,
    pub duration_s: f64,
    pub frames: u64,
    pub ticks: u64,
    pub final_setpoint: f64,
    pub final_power: f64,
}

pub fn write_summary<W: Write>(
    writer: W,
    summary: &RunSummary,
    metrics: &SharedMetrics,
) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["metric", "value", "description"])?;

    let m = lock_metrics(metrics);
    let mut row = |metric: &str, value: String, description: &str| {
        wtr.write_record([metric, value.as_str(), description])
    };

    row("controller", summary.controller.clone(), "Controller used for the run")?;
    row("analyzer", summary.analyzer.clone(), "Analyzer used for the run")?;
    row("duration_s", format!("{:.3}", summary.duration_s), "Wall-clock run time")?;
    row("frames", summary.frames.to_string(), "Frames analyzed")?;
    row("ticks", summary.ticks.to_string(), "Control ticks run")?;
    row("final_setpoint", format!("{}", summary.final_setpoint), "Setpoint at stop")?;
    row("final_power", format!("{:.4}", summary.final_power), "Last applied laser power")?;

    row("acquisition_faults", m.acquisition_faults.to_string(), "Frame acquisition errors")?;
    row("actuator_faults", m.actuator_faults.to_string(), "Failed laser writes")?;
    row("tick_overruns", m.tick_overruns.to_string(), "Ticks that ran past their period")?;

    if let Some(s) = calculate_stats(&m.analyzer_output) {
        row("analyzer_output_min", format!("{:.4}", s.min), "Minimum analyzer output")?;
        row("analyzer_output_max", format!("{:.4}", s.max), "Maximum analyzer output")?;
        row("analyzer_output_avg", format!("{:.4}", s.mean), "Average analyzer output")?;
    }
    if let Some(s) = calculate_stats(&m.laser_power) {
        row("laser_power_min", format!("{:.4}", s.min), "Minimum laser power")?;
        row("laser_power_max", format!("{:.4}", s.max), "Maximum laser power")?;
        row("laser_power_avg", format!("{:.4}", s.mean), "Average laser power")?;
    }
    if let Some(s) = calculate_stats_u64(&m.analysis_us) {
        row("analysis_max_us", format!("{:.0}", s.max), "Slowest frame analysis")?;
        row("analysis_avg_us", format!("{:.1}", s.mean), "Average frame analysis")?;
    }
    if let Some(s) = calculate_stats_u64(&m.fps) {
        row("fps_avg", format!("{:.1}", s.mean), "Average analyzed frames per second")?;
    }

    drop(m);
    wtr.flush()?;
    Ok(())
}

/// Writes the summary to `path`, creating parent directories.
pub fn export_summary_csv(
    path: impl AsRef<Path>,
    summary: &RunSummary,
    metrics: &SharedMetrics,
) -> Result<(), csv::Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    write_summary(File::create(path)?, summary, metrics)?;
    info!("[Export] summary written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::{Metrics, push_capped};
    use std::sync::{Arc, Mutex};

    #[test]
    fn summary_lists_totals_and_stats() {
        let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
        {
            let mut m = lock_metrics(&metrics);
            push_capped(&mut m.laser_power, 1.0);
            push_capped(&mut m.laser_power, 3.0);
            m.actuator_faults = 2;
        }
        let summary = RunSummary {
            controller: "PI controller".into(),
            frames: 42,
            ..RunSummary::default()
        };

        let mut out = Vec::new();
        write_summary(&mut out, &summary, &metrics).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("metric,value,description\n"));
        assert!(text.contains("frames,42,Frames analyzed"));
        assert!(text.contains("actuator_faults,2,"));
        assert!(text.contains("laser_power_avg,2.0000,"));
        assert!(!text.contains("analyzer_output_avg"));
    }

    #[test]
    fn export_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("summary.csv");
        let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
        export_summary_csv(&path, &RunSummary::default(), &metrics).unwrap();
        assert!(path.exists());
    }
}
