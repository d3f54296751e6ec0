//! camera.rs
//! Synthetic camera: periodic frame releases whose brightness follows the laser.
//!
//! - Pixel value = background + response_per_mw * applied laser power + uniform noise
//! - Release timing: SpinSleeper keeps the frame interval steady
//! - Output: latest-frame slot (push), which also serves pull consumers via `source()`

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::debug;
use rand::random_range;
use serde::{Deserialize, Serialize};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::component_a::{frame::Frame, frame_slot::FramePublisher};
use crate::component_b::actuator::PowerProbe;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub width: usize,
    pub height: usize,
    pub pixel_size_um: f64,
    pub frame_interval_ms: u64,
    /// Dark level in counts.
    pub background: f64,
    /// Counts added per mW of laser power.
    pub response_per_mw: f64,
    /// Half-width of the uniform per-pixel noise, in counts.
    pub noise: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            pixel_size_um: 0.1,
            frame_interval_ms: 10,
            background: 100.0,
            response_per_mw: 20.0,
            noise: 2.0,
        }
    }
}

pub struct SyntheticCamera {
    settings: CameraSettings,
    publisher: FramePublisher,
    laser: PowerProbe,
    running: Arc<AtomicBool>,
}

impl SyntheticCamera {
    pub fn new(
        settings: CameraSettings,
        publisher: FramePublisher,
        laser: PowerProbe,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            publisher,
            laser,
            running,
        }
    }

    /// Renders one frame at the current laser power.
    pub fn render(&self, seq: u64, timestamp: Duration) -> Frame {
        let s = &self.settings;
        let level = s.background + s.response_per_mw * self.laser.read();
        let pixels: Vec<u16> = (0..s.width * s.height)
            .map(|_| {
                let noise = if s.noise > 0.0 {
                    random_range(-s.noise..s.noise)
                } else {
                    0.0
                };
                (level + noise).clamp(0.0, u16::MAX as f64) as u16
            })
            .collect();
        Frame::new(pixels, s.width, s.height, s.pixel_size_um, timestamp, seq)
    }

    /// Publishes frames until the running flag clears, then closes the slot.
    pub fn run(&self) {
        let period = Duration::from_millis(self.settings.frame_interval_ms.max(1));
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        let start = Instant::now();
        let mut next_release = start + period;
        let mut seq: u64 = 1;
        let mut late: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_release {
                sleeper.sleep(next_release - now);
            } else {
                late += 1;
            }

            let frame = self.render(seq, start.elapsed());
            if !self.publisher.publish(frame) {
                break;
            }

            next_release += period;
            seq += 1;
        }

        self.publisher.close();
        debug!(
            "[Camera] stopped after {} frames ({} skipped by consumer, {} late releases)",
            seq - 1,
            self.publisher.skipped(),
            late
        );
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("camera".into())
            .spawn(move || self.run())
    }
}
