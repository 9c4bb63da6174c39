//! Push-based frame source
//!
//! Bridges callback-style capture (an asynchronous GPU readback, a camera
//! driver thread) into the pull-based capture tick. The producer side only
//! ever replaces the latest frame, so a burst of callbacks between two ticks
//! costs one buffer, not a backlog.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{FrameSource, RawFrame};

#[derive(Debug, Default)]
struct Latest {
    frame: Mutex<Option<RawFrame>>,
    width: AtomicU32,
    height: AtomicU32,
    superseded: AtomicU64,
}

/// Consumer half: handed to the server as its [`FrameSource`]
#[derive(Debug, Clone)]
pub struct PushSource {
    latest: Arc<Latest>,
}

/// Producer half: called from the readback callback
#[derive(Debug, Clone)]
pub struct FramePusher {
    latest: Arc<Latest>,
}

impl PushSource {
    /// Create a connected source/pusher pair
    pub fn new() -> (PushSource, FramePusher) {
        let latest = Arc::new(Latest::default());
        (
            PushSource {
                latest: Arc::clone(&latest),
            },
            FramePusher { latest },
        )
    }

    /// Number of frames replaced before the capture tick picked them up
    pub fn superseded(&self) -> u64 {
        self.latest.superseded.load(Ordering::Relaxed)
    }
}

impl FramePusher {
    /// Publish a newly read-back frame, replacing any frame not yet consumed
    pub fn push(&self, frame: RawFrame) {
        self.latest.width.store(frame.width, Ordering::Relaxed);
        self.latest.height.store(frame.height, Ordering::Relaxed);

        let previous = self
            .latest
            .frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame);

        if previous.is_some() {
            self.latest.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl FrameSource for PushSource {
    fn try_get_frame(&self) -> Option<RawFrame> {
        self.latest
            .frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn dimensions(&self) -> (u32, u32) {
        (
            self.latest.width.load(Ordering::Relaxed),
            self.latest.height.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PixelFormat;

    fn frame(value: u8) -> RawFrame {
        RawFrame::new(vec![value; 4], 2, 2, PixelFormat::Gray8)
    }

    #[test]
    fn test_empty_until_pushed() {
        let (source, _pusher) = PushSource::new();
        assert!(source.try_get_frame().is_none());
        assert_eq!(source.dimensions(), (0, 0));
    }

    #[test]
    fn test_latest_frame_wins() {
        let (source, pusher) = PushSource::new();
        pusher.push(frame(1));
        pusher.push(frame(2));

        let got = source.try_get_frame().unwrap();
        assert_eq!(got.data[0], 2);
        assert_eq!(source.superseded(), 1);
        assert_eq!(source.dimensions(), (2, 2));

        // Taken frames are not handed out twice
        assert!(source.try_get_frame().is_none());
    }

    #[test]
    fn test_push_from_another_thread() {
        let (source, pusher) = PushSource::new();
        std::thread::spawn(move || pusher.push(frame(7)))
            .join()
            .unwrap();

        assert_eq!(source.try_get_frame().unwrap().data[0], 7);
    }
}
