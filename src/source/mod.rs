//! Frame sources
//!
//! A frame source is the upstream producer of raw pixel frames. The pipeline
//! only ever asks it for "the most recent frame, if one is ready"; how the
//! frame was rendered or read back is opaque.
//!
//! Two shapes are supported:
//!
//! - **Pull**: the capture task polls [`FrameSource::try_get_frame`] once per
//!   tick ([`TestPatternSource`] is an example).
//! - **Push**: an asynchronous readback callback hands frames to a
//!   [`FramePusher`] whenever they land, and the capture tick picks up the
//!   latest one ([`PushSource`]).

pub mod frame;
pub mod pattern;
pub mod push;

pub use frame::{PixelFormat, RawFrame};
pub use pattern::TestPatternSource;
pub use push::{FramePusher, PushSource};

/// Producer of raw frames
///
/// Implementations must be cheap to call at the configured capture rate.
/// Returning `None` means "nothing ready this tick"; the pipeline skips the
/// tick silently and asks again on the next one.
pub trait FrameSource: Send + Sync + 'static {
    /// Return the most recent frame, or `None` if no frame is ready
    fn try_get_frame(&self) -> Option<RawFrame>;

    /// Current source resolution as (width, height)
    fn dimensions(&self) -> (u32, u32);
}
