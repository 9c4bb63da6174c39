//! Capture and admission
//!
//! A plain periodic task paced by its own interval. Each tick decides
//! whether a frame is worth capturing at all, pulls it from the source,
//! admits it to the queue and nudges the encoder pool. Nothing on this path
//! waits on encode or broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::registry::ClientRegistry;
use crate::source::FrameSource;
use crate::stats::PipelineStats;

use super::encoder::EncoderPool;
use super::queue::FrameQueue;

/// What happened on one capture tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// No stream client connected, nothing captured
    NoClients,
    /// Skipped by the performance-mode frame-skip factor
    Skipped,
    /// Queue already at capacity
    QueueFull,
    /// Source had no frame ready
    NotReady,
    /// Frame admitted to the queue
    Admitted,
}

/// Performance-mode frame skipper
///
/// Mode 0 captures every tick; mode N captures every (N+1)-th tick.
#[derive(Debug, Clone)]
pub struct FrameSkipper {
    mode: u8,
    counter: u64,
}

impl FrameSkipper {
    pub fn new(mode: u8) -> Self {
        Self { mode, counter: 0 }
    }

    /// Whether this tick should capture
    pub fn should_capture(&mut self) -> bool {
        if self.mode == 0 {
            return true;
        }
        self.counter += 1;
        self.counter % (u64::from(self.mode) + 1) == 0
    }
}

/// Capture loop state
pub struct CaptureTask {
    source: Arc<dyn FrameSource>,
    queue: Arc<FrameQueue>,
    pool: Arc<EncoderPool>,
    registry: Arc<ClientRegistry>,
    stats: Arc<PipelineStats>,
    interval: Duration,
    skipper: FrameSkipper,
}

impl CaptureTask {
    pub fn new(
        source: Arc<dyn FrameSource>,
        queue: Arc<FrameQueue>,
        pool: Arc<EncoderPool>,
        registry: Arc<ClientRegistry>,
        stats: Arc<PipelineStats>,
        interval: Duration,
        performance_mode: u8,
    ) -> Self {
        Self {
            source,
            queue,
            pool,
            registry,
            stats,
            interval,
            skipper: FrameSkipper::new(performance_mode),
        }
    }

    /// Run one capture tick
    pub fn tick(&mut self) -> CaptureOutcome {
        let outcome = self.admit();

        // Drain whatever is queued, even if nothing new was admitted
        self.pool.try_dispatch();
        outcome
    }

    fn admit(&mut self) -> CaptureOutcome {
        if self.registry.is_empty() {
            self.stats.record_skipped();
            return CaptureOutcome::NoClients;
        }

        if !self.skipper.should_capture() {
            self.stats.record_skipped();
            return CaptureOutcome::Skipped;
        }

        if self.queue.is_full() {
            self.stats.record_queue_full();
            return CaptureOutcome::QueueFull;
        }

        let frame = match self.source.try_get_frame() {
            Some(frame) => frame,
            None => return CaptureOutcome::NotReady,
        };

        if self.queue.try_admit(frame) {
            self.stats.record_captured();
            CaptureOutcome::Admitted
        } else {
            CaptureOutcome::QueueFull
        }
    }

    /// Tick at the configured rate until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            interval_ms = self.interval.as_millis() as u64,
            "Capture task started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        tracing::debug!("Capture task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encoder::EncodeSettings;
    use crate::pipeline::slot::FrameSlot;
    use crate::source::{FramePusher, PixelFormat, PushSource, RawFrame, TestPatternSource};

    struct Fixture {
        task: CaptureTask,
        queue: Arc<FrameQueue>,
        registry: Arc<ClientRegistry>,
        stats: Arc<PipelineStats>,
        pool: Arc<EncoderPool>,
    }

    fn fixture(source: Arc<dyn FrameSource>, performance_mode: u8, max_encodes: usize) -> Fixture {
        let stats = Arc::new(PipelineStats::new());
        let queue = Arc::new(FrameQueue::new(3, Duration::from_secs(5), Arc::clone(&stats)));
        let slot = Arc::new(FrameSlot::new());
        let pool = Arc::new(EncoderPool::new(
            max_encodes,
            EncodeSettings::default(),
            Arc::clone(&queue),
            slot,
            Arc::clone(&stats),
        ));
        let registry = Arc::new(ClientRegistry::new(5));
        let task = CaptureTask::new(
            source,
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&stats),
            Duration::from_millis(10),
            performance_mode,
        );

        Fixture {
            task,
            queue,
            registry,
            stats,
            pool,
        }
    }

    async fn add_client(registry: &ClientRegistry) {
        registry
            .register(None, Box::new(tokio::io::sink()))
            .await
            .unwrap();
    }

    #[test]
    fn test_skipper_disabled() {
        let mut skipper = FrameSkipper::new(0);
        assert!((0..10).all(|_| skipper.should_capture()));
    }

    #[test]
    fn test_skipper_modes() {
        for mode in 1..=3u8 {
            let mut skipper = FrameSkipper::new(mode);
            let captured = (0..12).filter(|_| skipper.should_capture()).count();
            assert_eq!(captured, 12 / (mode as usize + 1), "mode {}", mode);
        }
    }

    #[tokio::test]
    async fn test_no_clients_means_no_capture() {
        let source = Arc::new(TestPatternSource::new(8, 8));
        let mut f = fixture(source.clone(), 0, 2);

        assert_eq!(f.task.tick(), CaptureOutcome::NoClients);
        assert_eq!(source.frames_rendered(), 0);
        assert!(f.queue.is_empty());
        assert_eq!(f.stats.snapshot().frames_skipped, 1);
    }

    #[tokio::test]
    async fn test_admits_when_client_connected() {
        let source = Arc::new(TestPatternSource::new(8, 8));
        let mut f = fixture(source, 0, 2);
        add_client(&f.registry).await;

        assert_eq!(f.task.tick(), CaptureOutcome::Admitted);
        assert_eq!(f.stats.snapshot().frames_captured, 1);
    }

    #[tokio::test]
    async fn test_queue_full_refuses_admission() {
        let source = Arc::new(TestPatternSource::new(8, 8));
        let mut f = fixture(source, 0, 1);
        add_client(&f.registry).await;

        // Hold the only encode slot so nothing drains
        let held = f.pool.occupy_slot();

        for _ in 0..3 {
            assert_eq!(f.task.tick(), CaptureOutcome::Admitted);
        }
        assert_eq!(f.task.tick(), CaptureOutcome::QueueFull);
        assert_eq!(f.queue.len(), 3);
        assert_eq!(f.stats.snapshot().dropped_queue_full, 1);
        drop(held);
    }

    #[tokio::test]
    async fn test_source_not_ready_is_silent() {
        let (source, _pusher): (PushSource, FramePusher) = PushSource::new();
        let mut f = fixture(Arc::new(source), 0, 2);
        add_client(&f.registry).await;

        assert_eq!(f.task.tick(), CaptureOutcome::NotReady);
        let snap = f.stats.snapshot();
        assert_eq!(snap.frames_captured, 0);
        assert_eq!(snap.frames_dropped(), 0);
    }

    #[tokio::test]
    async fn test_push_source_frames_are_admitted() {
        let (source, pusher) = PushSource::new();
        let mut f = fixture(Arc::new(source), 0, 2);
        add_client(&f.registry).await;

        pusher.push(RawFrame::new(vec![0u8; 16 * 3], 4, 4, PixelFormat::Rgb8));
        assert_eq!(f.task.tick(), CaptureOutcome::Admitted);
        assert_eq!(f.task.tick(), CaptureOutcome::NotReady);
    }

    #[tokio::test]
    async fn test_performance_mode_skips_ticks() {
        let source = Arc::new(TestPatternSource::new(8, 8));
        let mut f = fixture(source, 1, 2);
        add_client(&f.registry).await;

        assert_eq!(f.task.tick(), CaptureOutcome::Skipped);
        assert_eq!(f.task.tick(), CaptureOutcome::Admitted);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(TestPatternSource::new(8, 8));
        let f = fixture(source, 0, 2);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(f.task.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
