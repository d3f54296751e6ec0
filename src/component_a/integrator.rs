//! Brightness integrator: mean pixel value inside the region of interest.
//!
//! The darkest pixel of the first analyzed frame is taken as the camera floor and
//! subtracted from every estimate, so a dark sample reads close to zero.

use average::{Estimate, Mean};
use log::debug;

use crate::component_a::{
    analyzer::Analyzer,
    frame::{Frame, Roi},
};

pub struct Integrator {
    roi: Option<Roi>,
    floor: Option<f64>,
    intermittent: f64,
    batch: Mean,
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Integrator {
    pub fn new() -> Self {
        Self {
            roi: None,
            floor: None,
            intermittent: 0.0,
            batch: Mean::new(),
        }
    }
}

impl Analyzer for Integrator {
    fn process_image(&mut self, frame: &Frame) {
        if frame.width * frame.height == 0 || frame.pixels.len() < frame.width * frame.height {
            debug!(
                "[Integrator] malformed frame {} ({}x{}, {} px); skipped",
                frame.seq,
                frame.width,
                frame.height,
                frame.pixels.len()
            );
            return;
        }

        let (x_min, x_max, y_min, y_max) = self
            .roi
            .and_then(|r| r.clip(frame.width, frame.height))
            .unwrap_or((0, frame.width, 0, frame.height));

        let mut sum: u64 = 0;
        let mut darkest = u16::MAX;
        for y in y_min..y_max {
            for x in x_min..x_max {
                let px = frame.pixel(x, y);
                sum += px as u64;
                darkest = darkest.min(px);
            }
        }

        let floor = *self.floor.get_or_insert(darkest as f64);
        let area = ((x_max - x_min) * (y_max - y_min)) as f64;
        self.intermittent = sum as f64 / area - floor;
        self.batch.add(self.intermittent);
    }

    fn intermittent_output(&self) -> f64 {
        self.intermittent
    }

    fn batch_output(&mut self) -> Option<f64> {
        if self.batch.is_empty() {
            return None;
        }
        let mean = self.batch.mean();
        self.batch = Mean::new();
        Some(mean)
    }

    fn set_roi(&mut self, roi: Option<Roi>) {
        self.roi = roi;
    }

    fn name(&self) -> &str {
        "Brightness integrator"
    }
}
