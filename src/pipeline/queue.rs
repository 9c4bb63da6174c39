//! Bounded frame queue between capture and encode
//!
//! Two levels of load shedding keep the worst-case latency bounded no matter
//! how long an encoder stalls:
//!
//! - **Capacity**: the queue never holds more than `capacity` frames. Pushing
//!   into a full queue evicts the oldest frame; admission through
//!   [`FrameQueue::try_admit`] refuses instead.
//! - **Age**: a frame older than `max_age` when it reaches the head is
//!   discarded rather than encoded.
//!
//! Both paths count the frame as dropped.
//!
//! Frames leaving the queue are numbered under the queue lock, so sequence
//! numbers always follow capture order no matter how many encoders pop
//! concurrently.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::source::RawFrame;
use crate::stats::PipelineStats;

/// A raw frame waiting in the queue
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    /// The captured frame
    pub frame: RawFrame,
    /// When the frame entered the queue
    pub enqueued_at: Instant,
}

/// Result of pushing into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended without displacing anything
    Queued,
    /// Appended after evicting the oldest frame
    EvictedOldest,
}

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<QueuedFrame>,
    last_sequence: u64,
}

/// Bounded FIFO with drop-oldest and max-age eviction
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    max_age: Duration,
    stats: Arc<PipelineStats>,
}

impl FrameQueue {
    /// Create a queue; a capacity of zero is treated as one
    pub fn new(capacity: usize, max_age: Duration, stats: Arc<PipelineStats>) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                last_sequence: 0,
            }),
            capacity,
            max_age,
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame, evicting the oldest one if the queue is full
    ///
    /// Never blocks and never grows past capacity.
    pub fn push(&self, frame: RawFrame) -> PushOutcome {
        let queued = QueuedFrame {
            frame,
            enqueued_at: Instant::now(),
        };

        let mut state = self.lock();
        let outcome = if state.frames.len() >= self.capacity {
            state.frames.pop_front();
            PushOutcome::EvictedOldest
        } else {
            PushOutcome::Queued
        };
        state.frames.push_back(queued);
        drop(state);

        if outcome == PushOutcome::EvictedOldest {
            self.stats.record_evicted();
        }
        outcome
    }

    /// Append a frame only if there is room
    ///
    /// Returns `false` (and counts a drop) when the queue is at capacity.
    /// The check and the insert happen under the same lock.
    pub fn try_admit(&self, frame: RawFrame) -> bool {
        let mut state = self.lock();
        if state.frames.len() >= self.capacity {
            drop(state);
            self.stats.record_queue_full();
            return false;
        }

        state.frames.push_back(QueuedFrame {
            frame,
            enqueued_at: Instant::now(),
        });
        true
    }

    /// Pop the oldest frame that is still within the max age
    ///
    /// The frame is paired with its sequence number, assigned under the
    /// same lock as the pop (the first frame is 1). Stale frames found at
    /// the head are discarded and counted; they consume no number.
    pub fn pop_fresh(&self, now: Instant) -> Option<(u64, QueuedFrame)> {
        let mut stale = 0u64;
        let fresh = {
            let mut state = self.lock();
            loop {
                match state.frames.pop_front() {
                    Some(queued) if queued.frame.age(now) > self.max_age => stale += 1,
                    Some(queued) => {
                        state.last_sequence += 1;
                        break Some((state.last_sequence, queued));
                    }
                    None => break None,
                }
            }
        };

        for _ in 0..stale {
            self.stats.record_stale();
        }
        fresh
    }

    /// Drop every queued frame, returning how many were released
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.frames.len();
        state.frames.clear();
        count
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Whether the queue is at capacity
    pub fn is_full(&self) -> bool {
        self.lock().frames.len() >= self.capacity
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured max age
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PixelFormat;

    fn frame_at(tag: u8, captured_at: Instant) -> RawFrame {
        RawFrame::with_timestamp(vec![tag], 1, 1, PixelFormat::Gray8, captured_at)
    }

    fn queue(capacity: usize, max_age: Duration) -> (FrameQueue, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        (FrameQueue::new(capacity, max_age, Arc::clone(&stats)), stats)
    }

    #[test]
    fn test_push_never_exceeds_capacity() {
        let (queue, stats) = queue(3, Duration::from_secs(10));
        let now = Instant::now();

        for i in 0..50u8 {
            let before = stats.frames_dropped();
            let outcome = queue.push(frame_at(i, now));
            assert!(queue.len() <= 3);

            if i < 3 {
                assert_eq!(outcome, PushOutcome::Queued);
                assert_eq!(stats.frames_dropped(), before);
            } else {
                assert_eq!(outcome, PushOutcome::EvictedOldest);
                assert_eq!(stats.frames_dropped(), before + 1);
            }
        }
    }

    #[test]
    fn test_push_evicts_oldest() {
        let (queue, _stats) = queue(3, Duration::from_secs(10));
        let now = Instant::now();

        for i in 0..4u8 {
            queue.push(frame_at(i, now));
        }

        let order: Vec<u8> = std::iter::from_fn(|| queue.pop_fresh(now))
            .map(|(_, q)| q.frame.data[0])
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_try_admit_refuses_when_full() {
        let (queue, stats) = queue(2, Duration::from_secs(10));
        let now = Instant::now();

        assert!(queue.try_admit(frame_at(0, now)));
        assert!(queue.try_admit(frame_at(1, now)));
        assert!(queue.is_full());
        assert!(!queue.try_admit(frame_at(2, now)));

        assert_eq!(queue.len(), 2);
        assert_eq!(stats.snapshot().dropped_queue_full, 1);
        // The queued frames are the original ones
        assert_eq!(queue.pop_fresh(now).unwrap().1.frame.data[0], 0);
    }

    #[test]
    fn test_stale_frames_never_leave_the_queue() {
        let (queue, stats) = queue(3, Duration::from_millis(500));
        let base = Instant::now();

        queue.push(frame_at(0, base));
        queue.push(frame_at(1, base + Duration::from_millis(100)));
        queue.push(frame_at(2, base + Duration::from_millis(900)));

        // 700ms after base: frames 0 and 1 are older than 500ms
        let now = base + Duration::from_millis(700);
        let (sequence, fresh) = queue.pop_fresh(now).unwrap();

        assert_eq!(fresh.frame.data[0], 2);
        assert_eq!(sequence, 1);
        assert_eq!(stats.snapshot().dropped_stale, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_only_stale_returns_none() {
        let (queue, stats) = queue(3, Duration::from_millis(10));
        let base = Instant::now();
        queue.push(frame_at(0, base));

        assert!(queue.pop_fresh(base + Duration::from_secs(1)).is_none());
        assert_eq!(stats.frames_dropped(), 1);
    }

    #[test]
    fn test_age_at_threshold_is_fresh() {
        let (queue, _stats) = queue(3, Duration::from_millis(500));
        let base = Instant::now();
        queue.push(frame_at(0, base));

        assert!(queue.pop_fresh(base + Duration::from_millis(500)).is_some());
    }

    #[test]
    fn test_sequence_follows_capture_order_across_threads() {
        let (queue, _stats) = queue(64, Duration::from_secs(10));
        let queue = Arc::new(queue);
        let base = Instant::now();

        // Tag each frame with its capture index
        for i in 0..64u32 {
            let tag = i.to_be_bytes().to_vec();
            queue.push(RawFrame::with_timestamp(tag, 4, 1, PixelFormat::Gray8, base));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut popped = Vec::new();
                    while let Some((sequence, queued)) = queue.pop_fresh(base) {
                        let data = &queued.frame.data;
                        let index = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                        popped.push((sequence, index));
                    }
                    popped
                })
            })
            .collect();

        let mut all: Vec<(u64, u32)> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort();

        assert_eq!(all.len(), 64);
        for (sequence, index) in all {
            assert_eq!(sequence, u64::from(index) + 1);
        }
    }

    #[test]
    fn test_clear() {
        let (queue, stats) = queue(3, Duration::from_secs(1));
        let now = Instant::now();
        queue.push(frame_at(0, now));
        queue.push(frame_at(1, now));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        // Draining on shutdown is not a drop
        assert_eq!(stats.frames_dropped(), 0);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let (queue, _stats) = queue(0, Duration::from_secs(1));
        assert_eq!(queue.capacity(), 1);
    }
}
