//! Health sweep
//!
//! Periodically evicts clients that have gone without a successful send for
//! longer than the idle timeout, then logs a one-line health summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::pipeline::EncoderPool;
use crate::registry::ClientRegistry;
use crate::stats::{HealthSnapshot, PipelineStats};

pub(crate) struct HealthMonitor {
    registry: Arc<ClientRegistry>,
    pool: Arc<EncoderPool>,
    stats: Arc<PipelineStats>,
    idle_timeout: Duration,
    interval: Duration,
    started_at: Instant,
}

impl HealthMonitor {
    pub(crate) fn new(
        registry: Arc<ClientRegistry>,
        pool: Arc<EncoderPool>,
        stats: Arc<PipelineStats>,
        idle_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            stats,
            idle_timeout,
            interval,
            started_at: Instant::now(),
        }
    }

    /// Evict idle clients and take a health snapshot
    pub(crate) async fn sweep(&self) -> HealthSnapshot {
        let evicted = self
            .registry
            .evict_idle(self.idle_timeout, Instant::now())
            .await;

        if !evicted.is_empty() {
            let count = evicted.len();
            for record in evicted {
                tracing::info!(
                    client = %record.id,
                    peer = ?record.peer,
                    idle_ms = record.idle_for(Instant::now()).as_millis() as u64,
                    "Evicting idle client"
                );
                record.close();
            }
            self.stats.record_clients_evicted(count);
        }

        self.snapshot()
    }

    pub(crate) fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            uptime: self.started_at.elapsed(),
            clients: self.registry.len(),
            frames_dropped: self.stats.frames_dropped(),
            active_encodes: self.pool.active(),
        }
    }

    /// Sweep every interval until shutdown is signalled
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let health = self.sweep().await;
                    tracing::info!(
                        uptime_secs = health.uptime.as_secs(),
                        clients = health.clients,
                        dropped = health.frames_dropped,
                        active_encodes = health.active_encodes,
                        "Health"
                    );
                }
            }
        }
    }
}
