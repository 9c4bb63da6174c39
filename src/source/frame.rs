//! Raw frame type

use std::time::{Duration, Instant};

use bytes::Bytes;

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit grayscale
    Gray8,
    /// Packed 8-bit RGB
    Rgb8,
    /// Packed 8-bit RGBA (alpha ignored when encoding)
    Rgba8,
    /// Packed 8-bit BGRA, as produced by most GPU readbacks
    Bgra8,
}

impl PixelFormat {
    /// Bytes used by a single pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }
}

/// A raw, uncompressed frame
///
/// Never mutated after creation. The pixel buffer is a `Bytes` so handing a
/// frame from the source to the queue and on to an encoder worker never
/// copies the pixels.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Pixel data, row-major, no padding between rows
    pub data: Bytes,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// When the source captured this frame
    pub captured_at: Instant,
}

impl RawFrame {
    /// Create a frame captured now
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with_timestamp(data, width, height, format, Instant::now())
    }

    /// Create a frame with an explicit capture timestamp
    pub fn with_timestamp(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at: Instant,
    ) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            captured_at,
        }
    }

    /// Buffer length implied by the geometry and pixel format
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Whether the buffer length matches the declared geometry
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    /// Age of the frame relative to `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_len() {
        let frame = RawFrame::new(vec![0u8; 4 * 2 * 3], 4, 2, PixelFormat::Rgb8);
        assert_eq!(frame.expected_len(), 24);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_malformed_frame() {
        let frame = RawFrame::new(vec![0u8; 10], 4, 2, PixelFormat::Rgba8);
        assert!(!frame.is_well_formed());

        let empty = RawFrame::new(Vec::new(), 0, 0, PixelFormat::Gray8);
        assert!(!empty.is_well_formed());
    }

    #[test]
    fn test_age_saturates() {
        let now = Instant::now();
        let frame = RawFrame::with_timestamp(vec![0u8; 1], 1, 1, PixelFormat::Gray8, now);

        assert_eq!(frame.age(now), Duration::ZERO);
        assert_eq!(
            frame.age(now + Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }
}
