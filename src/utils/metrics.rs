
//! Live metrics for monitoring the feedback pipeline.
//!
//! Shared mutex buffer updated by the status monitor (bounded to 1000 points per metric)
//! plus fault counters bumped by the workers. Read by the binary's status output and
//! the end-of-run summary export.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// Live histories and counters.
#[derive(Default, Clone, Debug)]
pub struct Metrics {
    /// Analyzer intermittent output (last 1000 monitor refreshes)
    pub analyzer_output: VecDeque<f64>,
    /// Laser power commanded by the controller
    pub laser_power: VecDeque<f64>,
    /// Analysis duration per refresh (microseconds)
    pub analysis_us: VecDeque<u64>,
    /// Frames analyzed per second
    pub fps: VecDeque<u64>,

    pub acquisition_faults: u64,
    pub actuator_faults: u64,
    pub tick_overruns: u64,
    pub total_ticks: u64,
}

/// Fault attribution for counter updates.
pub enum FaultSource {
    Acquisition,
    Actuator,
    TickOverrun,
}

impl Metrics {
    pub fn record_fault(&mut self, source: FaultSource) {
        match source {
            FaultSource::Acquisition => self.acquisition_faults += 1,
            FaultSource::Actuator => self.actuator_faults += 1,
            FaultSource::TickOverrun => self.tick_overruns += 1,
        }
    }
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub const MAX_POINTS: usize = 1_000;

/// Locks the metrics, recovering the data if a writer panicked.
pub fn lock_metrics(metrics: &SharedMetrics) -> std::sync::MutexGuard<'_, Metrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Appends value to metrics buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for float buffer. Non-finite samples are skipped.
pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    let count = finite.len();
    let min = finite.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = finite.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = finite.iter().sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

/// Computes min, max, mean for u64 buffer (cast to f64).
pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_buffer_drops_oldest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS + 5) {
            push_capped(&mut buf, i as f64);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front().copied(), Some(5.0));
    }

    #[test]
    fn stats_skip_non_finite_samples() {
        let data: VecDeque<f64> = vec![1.0, f64::NAN, 3.0].into();
        let stats = calculate_stats(&data).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 2.0);
        assert!(calculate_stats(&VecDeque::new()).is_none());
    }
}
