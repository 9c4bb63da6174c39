//! Current-frame slot
//!
//! Holds the single most recently encoded frame. Encoders publish into it,
//! the broadcast loop reads from it; neither waits on the other. Frames are
//! shared as `Arc<EncodedFrame>` so a reader keeps a complete frame alive
//! even after a newer one has replaced it in the slot.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;

/// A compressed frame ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Monotonically increasing sequence number (first frame is 1)
    pub sequence: u64,
    /// JPEG bytes
    pub data: Bytes,
    /// When the encode completed
    pub encoded_at: Instant,
    /// Encoded width in pixels
    pub width: u32,
    /// Encoded height in pixels
    pub height: u32,
    /// Quality the frame was encoded at
    pub quality: u8,
}

/// Single-frame holder with compare-on-sequence replacement
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Option<Arc<EncodedFrame>>>,
}

impl FrameSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame if it is newer than the current one
    ///
    /// Returns `false` when the slot already holds an equal or higher
    /// sequence number (a late encode finishing after a newer one), or when
    /// the frame carries no data. The slot is left untouched in that case.
    pub fn publish(&self, frame: EncodedFrame) -> bool {
        if frame.data.is_empty() {
            return false;
        }

        let mut current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match current.as_ref() {
            Some(existing) if existing.sequence >= frame.sequence => false,
            _ => {
                *current = Some(Arc::new(frame));
                true
            }
        }
    }

    /// The current frame, if any frame has been published
    pub fn current(&self) -> Option<Arc<EncodedFrame>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence number of the current frame, 0 when empty
    pub fn sequence(&self) -> u64 {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |frame| frame.sequence)
    }

    /// Release the current frame
    pub fn clear(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
