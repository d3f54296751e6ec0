//! Analyzer contract and the lock that guards it.
//!
//! An analyzer turns frames into a scalar activity estimate. It is read two ways:
//! - **Intermittent:** the latest per-frame estimate; reading it has no side effect.
//! - **Batch:** the aggregate since the previous batch read, reset by the read.
//!   `None` means no frame arrived in between, which is not the same as zero.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::component_a::frame::{Frame, Roi};

pub trait Analyzer: Send {
    fn process_image(&mut self, frame: &Frame);

    fn intermittent_output(&self) -> f64;

    /// Aggregate since the last call; resets the accumulator.
    fn batch_output(&mut self) -> Option<f64>;

    fn set_roi(&mut self, roi: Option<Roi>);

    /// Releases resources held by the analyzer. Called once when the pipeline stops.
    fn dispose(&mut self) {}

    fn name(&self) -> &str;
}

/// An analyzer behind a single mutex.
///
/// Processing, intermittent reads and batch reads all go through the same lock, so a
/// batch read never observes a half-updated accumulator.
#[derive(Clone)]
pub struct SharedAnalyzer {
    inner: Arc<Mutex<Box<dyn Analyzer>>>,
    name: Arc<str>,
}

impl SharedAnalyzer {
    pub fn new(analyzer: Box<dyn Analyzer>) -> Self {
        let name: Arc<str> = analyzer.name().into();
        Self {
            inner: Arc::new(Mutex::new(analyzer)),
            name,
        }
    }

    pub fn process(&self, frame: &Frame) {
        self.inner.lock().process_image(frame);
    }

    pub fn intermittent_output(&self) -> f64 {
        self.inner.lock().intermittent_output()
    }

    pub fn batch_output(&self) -> Option<f64> {
        self.inner.lock().batch_output()
    }

    pub fn set_roi(&self, roi: Option<Roi>) {
        self.inner.lock().set_roi(roi);
    }

    pub fn dispose(&self) {
        self.inner.lock().dispose();
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
