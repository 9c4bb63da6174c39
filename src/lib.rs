//! Low-latency MJPEG streaming server
//!
//! Serves live frames from a [`FrameSource`] as `multipart/x-mixed-replace`
//! JPEG streams over HTTP/1.1. The pipeline is built to shed load rather
//! than queue it:
//!
//! ```text
//!   FrameSource ──capture──► FrameQueue ──encode──► FrameSlot ──broadcast──► clients
//!                 (timer)     (bounded)   (K workers) (latest)   (per-client tasks)
//! ```
//!
//! - capture never waits on encode: a full queue refuses the frame
//! - encode never waits on broadcast: the slot only keeps the newest frame
//! - broadcast never waits on one client: a slow client skips frames
//!
//! Persistent broadcast failure restarts the whole pipeline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mjpeg_rs::{MjpegServer, ServerConfig, TestPatternSource};
//!
//! #[tokio::main]
//! async fn main() -> mjpeg_rs::Result<()> {
//!     let server = MjpegServer::new(
//!         ServerConfig::default(),
//!         Arc::new(TestPatternSource::new(1280, 720)),
//!     );
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await
//! }
//! ```

pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use pipeline::EncodedFrame;
pub use server::{MjpegServer, ServerConfig, ServerState};
pub use source::{FramePusher, FrameSource, PixelFormat, PushSource, RawFrame, TestPatternSource};
pub use stats::{HealthSnapshot, StatsSnapshot};
