//! Frame pipeline
//!
//! ```text
//! FrameSource --capture--> FrameQueue --EncoderPool--> FrameSlot --> broadcast
//!               (admission)  (bounded,     (bounded        (latest only,
//!                             drop-oldest)  concurrency)    monotonic)
//! ```
//!
//! Every stage hands off without waiting on the next one. Pressure shows up
//! as dropped frames, never as a stalled producer.

pub mod capture;
pub mod encoder;
pub mod queue;
pub mod slot;

pub use capture::{CaptureOutcome, CaptureTask, FrameSkipper};
pub use encoder::{effective_quality, encode_jpeg, EncodeSettings, EncoderPool, JpegImage};
pub use queue::{FrameQueue, PushOutcome, QueuedFrame};
pub use slot::{EncodedFrame, FrameSlot};
