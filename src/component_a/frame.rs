//! Camera frame and region-of-interest types.

use std::{sync::Arc, time::Duration};

/// Number of leading pixels compared when deciding whether a polled frame is new.
pub const LEADING_PIXELS: usize = 10;

/// One raw 16-bit camera frame.
///
/// The pixel buffer is shared so the frame slot, the pull source and the analyzer
/// can all hold it without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Arc<[u16]>,
    pub width: usize,
    pub height: usize,
    pub pixel_size_um: f64,
    /// Acquisition time relative to the start of the run.
    pub timestamp: Duration,
    pub seq: u64,
}

impl Frame {
    pub fn new(
        pixels: Vec<u16>,
        width: usize,
        height: usize,
        pixel_size_um: f64,
        timestamp: Duration,
        seq: u64,
    ) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            pixel_size_um,
            timestamp,
            seq,
        }
    }

    /// Frame filled with a single value; handy for tests and benches.
    pub fn uniform(width: usize, height: usize, value: u16, seq: u64) -> Self {
        Self::new(
            vec![value; width * height],
            width,
            height,
            0.1,
            Duration::ZERO,
            seq,
        )
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> u16 {
        self.pixels[y * self.width + x]
    }

    /// Compares the leading pixels of two frames.
    ///
    /// Frames shorter than [`LEADING_PIXELS`] are compared over their whole length.
    pub fn same_leading_pixels(&self, other: &Frame) -> bool {
        let n = LEADING_PIXELS.min(self.pixels.len()).min(other.pixels.len());
        self.pixels.len().min(LEADING_PIXELS) == other.pixels.len().min(LEADING_PIXELS)
            && self.pixels[..n] == other.pixels[..n]
    }
}

/// Rectangular region of interest in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Intersects the region with the frame; `None` if nothing is left.
    pub fn clip(&self, width: usize, height: usize) -> Option<(usize, usize, usize, usize)> {
        let x_min = self.x.min(width);
        let y_min = self.y.min(height);
        let x_max = self.x.saturating_add(self.width).min(width);
        let y_max = self.y.saturating_add(self.height).min(height);
        if x_max <= x_min || y_max <= y_min {
            None
        } else {
            Some((x_min, x_max, y_min, y_max))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_pixels_ignore_the_tail() {
        let a = Frame::uniform(4, 4, 7, 1);
        let mut pixels = vec![7u16; 16];
        pixels[15] = 99;
        let b = Frame::new(pixels, 4, 4, 0.1, Duration::ZERO, 2);
        assert!(a.same_leading_pixels(&b));

        let c = Frame::uniform(4, 4, 8, 3);
        assert!(!a.same_leading_pixels(&c));
    }

    #[test]
    fn roi_is_clipped_to_frame() {
        let roi = Roi::new(2, 2, 10, 10);
        assert_eq!(roi.clip(4, 5), Some((2, 4, 2, 5)));
        assert_eq!(Roi::new(8, 0, 2, 2).clip(4, 4), None);
    }

    #[test]
    fn huge_roi_extent_does_not_overflow() {
        let roi = Roi::new(1, usize::MAX, usize::MAX, 3);
        assert_eq!(roi.clip(4, 4), None);
        assert_eq!(Roi::new(1, 1, usize::MAX, usize::MAX).clip(4, 4), Some((1, 4, 1, 4)));
    }
}
