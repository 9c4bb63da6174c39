//! Synthetic test-pattern source
//!
//! Produces an RGB gradient with a bar that moves one step per frame, so
//! consecutive frames always differ. Useful for demos and for exercising the
//! pipeline without a camera.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{FrameSource, PixelFormat, RawFrame};

/// Width of the moving bar in pixels
const BAR_WIDTH: u32 = 8;

/// Pull-based source that renders a moving test pattern on demand
#[derive(Debug)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_counter: AtomicU64,
}

impl TestPatternSource {
    /// Create a source producing frames of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_counter: AtomicU64::new(0),
        }
    }

    /// Number of frames rendered so far
    pub fn frames_rendered(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.width, self.height);
        let bar_start = ((index * 4) % u64::from(w)) as u32;
        let mut pixels = Vec::with_capacity(w as usize * h as usize * 3);

        for y in 0..h {
            for x in 0..w {
                let in_bar = x >= bar_start && x < bar_start + BAR_WIDTH;
                if in_bar {
                    pixels.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / w) as u8;
                    let g = (y * 255 / h) as u8;
                    let b = (index % 256) as u8;
                    pixels.extend_from_slice(&[r, g, b]);
                }
            }
        }

        pixels
    }
}

impl FrameSource for TestPatternSource {
    fn try_get_frame(&self) -> Option<RawFrame> {
        let index = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let pixels = self.render(index);
        Some(RawFrame::new(pixels, self.width, self.height, PixelFormat::Rgb8))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_well_formed() {
        let source = TestPatternSource::new(32, 16);
        let frame = source.try_get_frame().unwrap();

        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 16);
        assert_eq!(frame.format, PixelFormat::Rgb8);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_consecutive_frames_differ() {
        let source = TestPatternSource::new(32, 16);
        let a = source.try_get_frame().unwrap();
        let b = source.try_get_frame().unwrap();

        assert_ne!(a.data, b.data);
        assert_eq!(source.frames_rendered(), 2);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let source = TestPatternSource::new(0, 0);
        assert_eq!(source.dimensions(), (1, 1));
        assert!(source.try_get_frame().unwrap().is_well_formed());
    }
}
