//! Broadcast loop
//!
//! Fans the latest encoded frame out to every registered client. Each
//! client write runs on its own task inside a [`JoinSet`]; the loop never
//! awaits a socket. A client whose previous send is still in flight is
//! simply skipped this cycle and picks up whatever frame is current once it
//! catches up, so one stalled client never delays the others.
//!
//! Each cycle:
//!
//! 1. reaps finished sends, recording progress or marking failed clients
//! 2. removes and closes failed clients
//! 3. claims every idle client that lacks the current frame and spawns a
//!    send for it
//!
//! Consecutive cycle failures are escalated to the supervisor once they
//! reach the configured threshold.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::pipeline::FrameSlot;
use crate::protocol::mjpeg;
use crate::registry::{ClientId, ClientRegistry, SharedConn};
use crate::server::config::{ServerConfig, BROADCAST_OVERHEAD};
use crate::server::supervisor::SupervisorHandle;
use crate::stats::PipelineStats;

/// Shortest sleep between cycles
const MIN_PACING: Duration = Duration::from_millis(1);

/// Outcome of one client send
#[derive(Debug)]
struct Delivery {
    client: ClientId,
    sequence: u64,
    with_header: bool,
    result: Result<usize>,
}

/// Summary of one broadcast cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CycleReport {
    /// Sends completed since the previous cycle
    pub delivered: usize,
    /// Clients removed after a failed send
    pub removed: usize,
    /// Sends started this cycle
    pub started: usize,
}

/// Broadcast loop state
pub(crate) struct Broadcaster {
    config: ServerConfig,
    slot: Arc<FrameSlot>,
    registry: Arc<ClientRegistry>,
    stats: Arc<PipelineStats>,
    supervisor: SupervisorHandle,
    deliveries: JoinSet<Delivery>,
    consecutive_failures: u32,
    last_dropped: u64,
    #[cfg(test)]
    injected_failures: Arc<std::sync::atomic::AtomicU32>,
}

impl Broadcaster {
    pub(crate) fn new(
        config: ServerConfig,
        slot: Arc<FrameSlot>,
        registry: Arc<ClientRegistry>,
        stats: Arc<PipelineStats>,
        supervisor: SupervisorHandle,
    ) -> Self {
        let last_dropped = stats.frames_dropped();
        Self {
            config,
            slot,
            registry,
            stats,
            supervisor,
            deliveries: JoinSet::new(),
            consecutive_failures: 0,
            last_dropped,
            #[cfg(test)]
            injected_failures: Arc::default(),
        }
    }

    /// Fail the next `n` cycles, as taken from the shared counter
    #[cfg(test)]
    pub(crate) fn with_injected_failures(
        mut self,
        counter: Arc<std::sync::atomic::AtomicU32>,
    ) -> Self {
        self.injected_failures = counter;
        self
    }

    /// Run cycles until shutdown is signalled or the supervisor takes over
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Broadcast loop started");

        loop {
            let pause = match self.cycle().await {
                Ok(_) => {
                    self.consecutive_failures = 0;
                    self.pacing()
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    tracing::warn!(
                        error = %e,
                        failures = self.consecutive_failures,
                        "Broadcast cycle failed"
                    );

                    if self.consecutive_failures >= self.config.failure_threshold {
                        tracing::error!(
                            failures = self.consecutive_failures,
                            "Broadcast loop failing persistently, restarting pipeline"
                        );
                        self.supervisor.request_restart();
                        break;
                    }
                    self.config.failure_backoff
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.deliveries.shutdown().await;
        tracing::debug!("Broadcast loop stopped");
    }

    /// Run one broadcast cycle
    pub(crate) async fn cycle(&mut self) -> Result<CycleReport> {
        #[cfg(test)]
        self.take_injected_failure()?;

        let mut report = CycleReport::default();
        let mut failed = Vec::new();
        let mut task_failure = None;

        while let Some(joined) = self.deliveries.try_join_next() {
            match joined {
                Ok(delivery) => match delivery.result {
                    Ok(bytes) => {
                        report.delivered += 1;
                        self.stats.record_sent(bytes);
                        // A client evicted mid-send is already gone
                        let _ = self
                            .registry
                            .complete_send(
                                delivery.client,
                                delivery.sequence,
                                delivery.with_header,
                                Instant::now(),
                            )
                            .await;
                    }
                    Err(e) => {
                        tracing::debug!(
                            client = %delivery.client,
                            error = %e,
                            "Send to client failed"
                        );
                        failed.push(delivery.client);
                    }
                },
                // Cancelled by eviction
                Err(e) if e.is_cancelled() => {}
                Err(e) => task_failure = Some(Error::from(e)),
            }
        }

        if !failed.is_empty() {
            report.removed = self.remove_clients(&failed).await;
        }

        if let Some(frame) = self.slot.current() {
            for job in self.registry.begin_sends(frame.sequence).await {
                let frame = Arc::clone(&frame);
                let send_timeout = self.config.send_timeout;
                let client = job.client;

                let task = self.deliveries.spawn(async move {
                    let result =
                        deliver(&job.conn, &frame.data, job.send_header, send_timeout).await;
                    Delivery {
                        client: job.client,
                        sequence: frame.sequence,
                        with_header: job.send_header,
                        result,
                    }
                });
                self.registry.attach_send(client, task).await;
                report.started += 1;
            }
        }

        match task_failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn remove_clients(&self, ids: &[ClientId]) -> usize {
        let removed = self.registry.remove(ids).await;
        let count = removed.len();

        for record in removed {
            tracing::info!(
                client = %record.id,
                peer = ?record.peer,
                "Removing disconnected client"
            );
            record.close();
        }

        if count > 0 {
            self.stats.record_clients_evicted(count);
            tracing::info!(
                removed = count,
                remaining = self.registry.len(),
                "Removed disconnected clients"
            );
        }
        count
    }

    /// Sleep before the next cycle
    ///
    /// One frame interval less the fixed overhead while clients are
    /// connected, the idle poll interval otherwise, stretched by a quarter
    /// when frames were dropped since the last cycle.
    fn pacing(&mut self) -> Duration {
        let dropped = self.stats.frames_dropped();
        let overloaded = dropped > self.last_dropped;
        self.last_dropped = dropped;

        let base = if self.registry.is_empty() {
            self.config.idle_poll_interval
        } else {
            self.config
                .frame_interval()
                .saturating_sub(BROADCAST_OVERHEAD)
                .max(MIN_PACING)
        };

        if overloaded {
            base * 5 / 4
        } else {
            base
        }
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> Result<()> {
        use std::sync::atomic::Ordering;

        let taken = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(Error::Task("injected broadcast failure".into())),
            Err(_) => Ok(()),
        }
    }
}

/// Write one frame part to a client, bounded by `timeout`
async fn deliver(
    conn: &SharedConn,
    jpeg: &[u8],
    with_header: bool,
    timeout: Duration,
) -> Result<usize> {
    let mut conn = conn.lock().await;

    match tokio::time::timeout(timeout, mjpeg::write_frame(&mut **conn, jpeg, with_header)).await
    {
        Ok(written) => Ok(written?),
        Err(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "client send timed out",
        ))),
    }
}
