//! Server lifecycle and self-healing
//!
//! [`MjpegServer`] owns one pipeline run at a time: a bound listener, a
//! fresh client registry, frame queue, encoder pool and frame slot, and the
//! four tasks driving them (capture, acceptor, broadcast, health). Start,
//! stop and restart are serialized through a single lock.
//!
//! ```text
//!   Stopped ──start──► Starting ──ok──► Running ──stop──► Stopping ──► Stopped
//!      ▲                  │                │
//!      └──────bind error──┘                │ restart / supervisor
//!                         ▲                ▼
//!                         └────────── Restarting
//! ```
//!
//! The broadcast loop escalates persistent failure through a
//! [`SupervisorHandle`], which tears the whole run down and starts a new one
//! from a detached task. Dropping the last server handle signals every task
//! of the current run to stop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::pipeline::{CaptureTask, EncodedFrame, EncoderPool, FrameQueue, FrameSlot};
use crate::registry::ClientRegistry;
use crate::server::broadcast::Broadcaster;
use crate::server::config::ServerConfig;
use crate::server::health::HealthMonitor;
use crate::server::listener::Acceptor;
use crate::source::FrameSource;
use crate::stats::{HealthSnapshot, PipelineStats, StatsSnapshot};

/// Capacity of the lifecycle event channel
const STATE_EVENT_CAPACITY: usize = 32;

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

/// MJPEG streaming server
///
/// Cheap to clone; every clone controls the same server.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mjpeg_rs::{MjpegServer, ServerConfig, TestPatternSource};
///
/// # async fn run() -> mjpeg_rs::Result<()> {
/// let server = MjpegServer::new(
///     ServerConfig::default().port(8080),
///     Arc::new(TestPatternSource::new(640, 480)),
/// );
/// let addr = server.start().await?;
/// println!("streaming on http://{}/stream", addr);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MjpegServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    source: Arc<dyn FrameSource>,
    stats: Arc<PipelineStats>,
    state: Mutex<ServerState>,
    events: broadcast::Sender<ServerState>,
    pipeline: tokio::sync::Mutex<Option<Pipeline>>,
    generation: AtomicU64,
    #[cfg(test)]
    injected_failures: Arc<std::sync::atomic::AtomicU32>,
}

/// Resources of one pipeline run
struct Pipeline {
    generation: u64,
    local_addr: SocketAddr,
    started_at: Instant,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    registry: Arc<ClientRegistry>,
    queue: Arc<FrameQueue>,
    slot: Arc<FrameSlot>,
    pool: Arc<EncoderPool>,
}

/// Lets the broadcast loop ask for a pipeline restart
///
/// Bound to the pipeline run that created it; a request from a run that
/// has already been replaced or stopped is ignored.
#[derive(Clone)]
pub(crate) struct SupervisorHandle {
    inner: Weak<ServerInner>,
    generation: u64,
}

impl SupervisorHandle {
    /// A handle with no server behind it
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            inner: Weak::new(),
            generation: 0,
        }
    }

    /// Restart the pipeline from a detached task
    pub(crate) fn request_restart(&self) {
        let inner = match self.inner.upgrade() {
            Some(inner) => inner,
            None => {
                tracing::debug!("Server gone, ignoring restart request");
                return;
            }
        };
        let generation = self.generation;

        tokio::spawn(async move {
            inner.supervised_restart(generation).await;
        });
    }
}

impl MjpegServer {
    /// Create a stopped server streaming frames from `source`
    pub fn new(config: ServerConfig, source: Arc<dyn FrameSource>) -> Self {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);

        Self {
            inner: Arc::new(ServerInner {
                config,
                source,
                stats: Arc::new(PipelineStats::new()),
                state: Mutex::new(ServerState::Stopped),
                events,
                pipeline: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                #[cfg(test)]
                injected_failures: Arc::default(),
            }),
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Subscribe to lifecycle transitions
    ///
    /// Every state change is published, including the ones a supervisor
    /// restart goes through.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ServerState> {
        self.inner.events.subscribe()
    }

    /// Cumulative pipeline counters (kept across restarts)
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Address the current run is listening on
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .pipeline
            .lock()
            .await
            .as_ref()
            .map(|p| p.local_addr)
    }

    /// Health summary of the current run
    pub async fn health(&self) -> Option<HealthSnapshot> {
        self.inner.pipeline.lock().await.as_ref().map(|p| HealthSnapshot {
            uptime: p.started_at.elapsed(),
            clients: p.registry.len(),
            frames_dropped: self.inner.stats.frames_dropped(),
            active_encodes: p.pool.active(),
        })
    }

    /// Client registry of the current run
    pub async fn registry(&self) -> Option<Arc<ClientRegistry>> {
        self.inner
            .pipeline
            .lock()
            .await
            .as_ref()
            .map(|p| Arc::clone(&p.registry))
    }

    /// Most recently encoded frame of the current run
    pub async fn current_frame(&self) -> Option<Arc<EncodedFrame>> {
        self.inner
            .pipeline
            .lock()
            .await
            .as_ref()
            .and_then(|p| p.slot.current())
    }

    /// Bind the listener and start streaming
    ///
    /// On failure the server stays [`Stopped`](ServerState::Stopped) with
    /// nothing left running.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut pipeline = self.inner.pipeline.lock().await;
        if pipeline.is_some() {
            return Err(Error::AlreadyRunning);
        }
        self.inner.start_locked(&mut pipeline).await
    }

    /// Stop streaming and release every resource
    pub async fn stop(&self) -> Result<()> {
        let mut pipeline = self.inner.pipeline.lock().await;
        let running = pipeline.take().ok_or(Error::NotRunning)?;

        self.inner.set_state(ServerState::Stopping);
        running.shutdown(self.inner.config.shutdown_timeout).await;
        self.inner.set_state(ServerState::Stopped);

        tracing::info!("MJPEG server stopped");
        Ok(())
    }

    /// Tear the pipeline down and start a fresh one
    pub async fn restart(&self) -> Result<SocketAddr> {
        let mut pipeline = self.inner.pipeline.lock().await;
        let running = pipeline.take().ok_or(Error::NotRunning)?;

        tracing::info!("Restarting MJPEG server");
        self.inner.restart_locked(running, &mut pipeline).await
    }

    /// Start a stopped server or stop a running one, returning the new state
    pub async fn toggle(&self) -> Result<ServerState> {
        let running = self.inner.pipeline.lock().await.is_some();
        if running {
            self.stop().await?;
        } else {
            self.start().await?;
        }
        Ok(self.state())
    }
}

impl std::fmt::Debug for MjpegServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MjpegServer")
            .field("state", &self.state())
            .field("bind_addr", &self.inner.config.bind_addr)
            .finish()
    }
}

impl ServerInner {
    fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ServerState) {
        let prev = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            next,
        );
        tracing::debug!(from = %prev, to = %next, "Server state changed");
        // No subscribers is fine
        let _ = self.events.send(next);
    }

    async fn start_locked(self: &Arc<Self>, slot: &mut Option<Pipeline>) -> Result<SocketAddr> {
        self.set_state(ServerState::Starting);

        match self.launch().await {
            Ok(pipeline) => {
                let addr = pipeline.local_addr;
                *slot = Some(pipeline);
                self.set_state(ServerState::Running);
                tracing::info!(addr = %addr, "MJPEG server listening");
                Ok(addr)
            }
            Err(e) => {
                self.set_state(ServerState::Stopped);
                tracing::error!(error = %e, "MJPEG server failed to start");
                Err(e)
            }
        }
    }

    async fn restart_locked(
        self: &Arc<Self>,
        running: Pipeline,
        slot: &mut Option<Pipeline>,
    ) -> Result<SocketAddr> {
        self.set_state(ServerState::Restarting);
        running.shutdown(self.config.shutdown_timeout).await;
        self.stats.record_restart();
        self.start_locked(slot).await
    }

    async fn supervised_restart(self: &Arc<Self>, generation: u64) {
        let mut pipeline = self.pipeline.lock().await;

        let running = match pipeline.take() {
            Some(running) if running.generation == generation => running,
            other => {
                *pipeline = other;
                tracing::debug!(generation = generation, "Stale restart request ignored");
                return;
            }
        };

        tracing::error!(generation = generation, "Supervisor restarting pipeline");
        if let Err(e) = self.restart_locked(running, &mut pipeline).await {
            tracing::error!(error = %e, "Supervisor restart failed, server stopped");
        }
    }

    /// Bind and spawn a new pipeline run
    ///
    /// Nothing is spawned until the listener is bound.
    async fn launch(self: &Arc<Self>) -> Result<Pipeline> {
        let config = &self.config;
        let addr = config.bind_addr;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stats = Arc::clone(&self.stats);
        let registry = Arc::new(ClientRegistry::new(config.max_clients));
        let queue = Arc::new(FrameQueue::new(
            config.queue_capacity,
            config.frame_max_age,
            Arc::clone(&stats),
        ));
        let slot = Arc::new(FrameSlot::new());
        let pool = Arc::new(EncoderPool::new(
            config.max_concurrent_encodes,
            config.encode_settings(),
            Arc::clone(&queue),
            Arc::clone(&slot),
            Arc::clone(&stats),
        ));

        let capture = CaptureTask::new(
            Arc::clone(&self.source),
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.frame_interval(),
            config.performance_mode,
        );
        let acceptor = Acceptor::new(
            listener,
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&stats),
        );
        let broadcaster = Broadcaster::new(
            config.clone(),
            Arc::clone(&slot),
            Arc::clone(&registry),
            Arc::clone(&stats),
            SupervisorHandle {
                inner: Arc::downgrade(self),
                generation,
            },
        );
        #[cfg(test)]
        let broadcaster = broadcaster.with_injected_failures(Arc::clone(&self.injected_failures));
        let health = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            Arc::clone(&stats),
            config.client_idle_timeout,
            config.health_interval,
        );

        let (shutdown, rx) = watch::channel(false);
        let tasks = vec![
            ("capture", tokio::spawn(capture.run(rx.clone()))),
            ("acceptor", tokio::spawn(acceptor.run(rx.clone()))),
            ("broadcast", tokio::spawn(broadcaster.run(rx.clone()))),
            ("health", tokio::spawn(health.run(rx))),
        ];

        tracing::debug!(
            generation = generation,
            frame_rate = config.frame_rate,
            max_clients = config.max_clients,
            max_encodes = config.max_concurrent_encodes,
            "Pipeline launched"
        );

        Ok(Pipeline {
            generation,
            local_addr,
            started_at: Instant::now(),
            shutdown,
            tasks,
            registry,
            queue,
            slot,
            pool,
        })
    }
}

impl Pipeline {
    /// Stop every task and release every resource
    ///
    /// Each wait is bounded by `timeout`; tasks that overrun are aborted.
    async fn shutdown(self, timeout: Duration) {
        // Tasks that already exited have dropped their receivers
        let _ = self.shutdown.send(true);

        for (name, mut task) in self.tasks {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(task = name, "Pipeline task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!(task = name, "Pipeline task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        let clients = self.registry.clear().await;
        let queued = self.queue.clear();
        self.pool.shutdown(timeout).await;
        self.slot.clear();

        tracing::info!(
            generation = self.generation,
            clients_closed = clients,
            frames_discarded = queued,
            "Pipeline shut down"
        );
    }
}
