//! JPEG encoder pool
//!
//! At most `max_concurrent` encodes run at once, gated by a semaphore that
//! is only ever `try_acquire`d: when every permit is taken the caller simply
//! returns and tries again on its next tick, so capture never waits on
//! encode.
//!
//! Each encode owns one permit, and the permit travels into the blocking
//! job that does the pixel work. Every encode is bounded by a timeout; on
//! expiry the result is abandoned, but the permit stays with the blocking
//! job until it actually returns. A stuck encode therefore keeps its slot
//! busy, and the number of live encode threads never exceeds the pool size.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageBuffer, Luma, Pixel, Rgb};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::source::{PixelFormat, RawFrame};
use crate::stats::PipelineStats;

use super::queue::{FrameQueue, QueuedFrame};
use super::slot::{EncodedFrame, FrameSlot};

/// Initial capacity of the JPEG output buffer
const INITIAL_JPEG_BUFFER: usize = 32 * 1024;

/// Encoder tuning
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    /// Configured JPEG quality (1-100)
    pub quality: u8,
    /// Quality reduction applied while every encode slot is busy
    pub quality_penalty: u8,
    /// Lowest quality the penalty may reduce to
    pub quality_floor: u8,
    /// Per-encode time budget
    pub timeout: Duration,
    /// Output resolution; `None` keeps the source resolution
    pub resolution: Option<(u32, u32)>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            quality: 75,
            quality_penalty: 15,
            quality_floor: 30,
            timeout: Duration::from_secs(1),
            resolution: None,
        }
    }
}

/// Quality to encode at given the current encoder load
///
/// When the number of active encodes meets the pool size the encoder is
/// saturated, and the quality drops by `penalty`, but never below `floor`.
/// A configured quality already under the floor is left alone.
pub fn effective_quality(
    base: u8,
    active: usize,
    max_concurrent: usize,
    penalty: u8,
    floor: u8,
) -> u8 {
    if active < max_concurrent {
        return base;
    }
    base.saturating_sub(penalty).max(floor).min(base)
}

/// Output of a single encode
#[derive(Debug, Clone)]
pub struct JpegImage {
    /// JPEG bytes, SOI through EOI
    pub data: Vec<u8>,
    /// Encoded width in pixels, after any scaling
    pub width: u32,
    /// Encoded height in pixels, after any scaling
    pub height: u32,
}

/// Compress a raw frame to JPEG
///
/// Alpha channels are discarded and BGRA is swizzled to RGB. When a target
/// resolution is given and differs from the frame, the frame is scaled
/// first.
pub fn encode_jpeg(
    frame: &RawFrame,
    quality: u8,
    resolution: Option<(u32, u32)>,
) -> Result<JpegImage> {
    if !frame.is_well_formed() {
        return Err(Error::InvalidFrame {
            expected: frame.expected_len(),
            actual: frame.data.len(),
        });
    }

    let (pixels, color) = match frame.format {
        PixelFormat::Gray8 => (frame.data.to_vec(), ExtendedColorType::L8),
        PixelFormat::Rgb8 => (frame.data.to_vec(), ExtendedColorType::Rgb8),
        PixelFormat::Rgba8 => (
            frame
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            ExtendedColorType::Rgb8,
        ),
        PixelFormat::Bgra8 => (
            frame
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            ExtendedColorType::Rgb8,
        ),
    };

    let (pixels, width, height) = match resolution {
        Some((w, h)) if w > 0 && h > 0 && (w, h) != (frame.width, frame.height) => {
            if color == ExtendedColorType::L8 {
                scale::<Luma<u8>>(pixels, frame.width, frame.height, w, h)?
            } else {
                scale::<Rgb<u8>>(pixels, frame.width, frame.height, w, h)?
            }
        }
        _ => (pixels, frame.width, frame.height),
    };

    let mut data = Vec::with_capacity(INITIAL_JPEG_BUFFER);
    JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100))
        .encode(&pixels, width, height, color)?;

    Ok(JpegImage {
        data,
        width,
        height,
    })
}

fn scale<P>(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    to_w: u32,
    to_h: u32,
) -> Result<(Vec<u8>, u32, u32)>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let expected = width as usize * height as usize * P::CHANNEL_COUNT as usize;
    let actual = pixels.len();
    let buffer = ImageBuffer::<P, Vec<u8>>::from_raw(width, height, pixels)
        .ok_or(Error::InvalidFrame { expected, actual })?;

    let resized = imageops::resize(&buffer, to_w, to_h, FilterType::Triangle);
    Ok((resized.into_raw(), to_w, to_h))
}

/// Bounded pool of JPEG encode workers
#[derive(Debug)]
pub struct EncoderPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    settings: EncodeSettings,
    queue: Arc<FrameQueue>,
    slot: Arc<FrameSlot>,
    stats: Arc<PipelineStats>,
}

impl EncoderPool {
    /// Create a pool draining `queue` into `slot`
    pub fn new(
        max_concurrent: usize,
        settings: EncodeSettings,
        queue: Arc<FrameQueue>,
        slot: Arc<FrameSlot>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            settings,
            queue,
            slot,
            stats,
        }
    }

    /// Encode operations currently in flight
    pub fn active(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    /// Pool size
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Occupy one encode slot, as a long-running encode would
    #[cfg(test)]
    pub(crate) fn occupy_slot(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .expect("free encode slot")
    }

    /// Start encodes for queued frames while slots are free
    ///
    /// Never waits. Returns `false` when nothing was started because the
    /// queue is empty or the pool is saturated or shut down; frames left
    /// queued stay put until the next call.
    pub fn try_dispatch(self: &Arc<Self>) -> bool {
        let mut dispatched = false;

        while !self.queue.is_empty() {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let (sequence, queued) = match self.queue.pop_fresh(Instant::now()) {
                Some(next) => next,
                None => break,
            };

            tokio::spawn(Arc::clone(self).encode_one(sequence, queued, permit));
            dispatched = true;
        }

        dispatched
    }

    async fn encode_one(
        self: Arc<Self>,
        sequence: u64,
        queued: QueuedFrame,
        permit: OwnedSemaphorePermit,
    ) {
        let quality = effective_quality(
            self.settings.quality,
            self.active(),
            self.max_concurrent,
            self.settings.quality_penalty,
            self.settings.quality_floor,
        );
        let resolution = self.settings.resolution;
        let frame = queued.frame;

        // The permit comes back with the result and is held until it is
        // recorded. An abandoned job drops it when it returns.
        let job = tokio::task::spawn_blocking(move || {
            (encode_jpeg(&frame, quality, resolution), permit)
        });

        match tokio::time::timeout(self.settings.timeout, job).await {
            Ok(Ok((Ok(image), _permit))) => {
                let published = self.slot.publish(EncodedFrame {
                    sequence,
                    data: Bytes::from(image.data),
                    encoded_at: Instant::now(),
                    width: image.width,
                    height: image.height,
                    quality,
                });

                if published {
                    self.stats.record_encoded();
                } else {
                    tracing::debug!(
                        sequence = sequence,
                        "Encoded frame superseded before publish"
                    );
                }
            }
            Ok(Ok((Err(e), _permit))) => {
                self.stats.record_encode_failure();
                tracing::warn!(sequence = sequence, error = %e, "Frame encode failed");
            }
            Ok(Err(e)) => {
                self.stats.record_encode_failure();
                tracing::error!(sequence = sequence, error = %e, "Encode task failed");
            }
            Err(_) => {
                self.stats.record_encode_timeout();
                tracing::warn!(
                    sequence = sequence,
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "Frame encode timed out, result abandoned"
                );
            }
        }

        // Keep draining frames that arrived while this slot was busy
        self.try_dispatch();
    }

    /// Stop accepting work and wait (bounded) for in-flight encodes
    ///
    /// Returns `true` if every encode, abandoned ones included, finished
    /// within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let all_permits = tokio::time::timeout(
            timeout,
            self.permits.acquire_many(self.max_concurrent as u32),
        )
        .await;
        // Close while still holding the permits so no worker slips in between
        self.permits.close();
        let drained = matches!(all_permits, Ok(Ok(_)));

        if !drained {
            tracing::warn!(
                active = self.active(),
                "Encoder pool shutdown timed out, abandoning in-flight encodes"
            );
        }
        drained
    }
}
