//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::pipeline::encoder::EncodeSettings;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5809;

/// Fixed per-cycle overhead subtracted from the broadcast sleep
pub const BROADCAST_OVERHEAD: Duration = Duration::from_millis(5);

/// Highest supported performance mode (frame-skip factor)
pub const MAX_PERFORMANCE_MODE: u8 = 3;

/// Server configuration options
///
/// Read-only to the server: it is cloned into the pipeline at start and
/// never written back.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Target capture (and broadcast) rate in frames per second
    pub frame_rate: u32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Frame queue capacity
    pub queue_capacity: usize,

    /// Maximum concurrent encode operations
    pub max_concurrent_encodes: usize,

    /// Maximum concurrent stream clients
    pub max_clients: usize,

    /// Evict a client after this long without a successful send
    pub client_idle_timeout: Duration,

    /// Discard queued frames older than this instead of encoding them
    pub frame_max_age: Duration,

    /// Frame-skip factor (0 = capture every tick, N = every (N+1)-th tick)
    pub performance_mode: u8,

    /// Output resolution (None = source resolution)
    pub stream_resolution: Option<(u32, u32)>,

    /// Quality reduction while the encoder pool is saturated
    pub quality_penalty: u8,

    /// Lowest quality the penalty may reduce to
    pub quality_floor: u8,

    /// Budget for a single encode
    pub encode_timeout: Duration,

    /// Budget for writing one frame to one client
    pub send_timeout: Duration,

    /// Time allowed for a client to send its request head
    pub request_timeout: Duration,

    /// Delay after a failed accept before retrying
    pub accept_backoff: Duration,

    /// Period of the idle sweep and health summary
    pub health_interval: Duration,

    /// Broadcast sleep while no client is connected
    pub idle_poll_interval: Duration,

    /// Broadcast sleep after a failed cycle
    pub failure_backoff: Duration,

    /// Consecutive failed broadcast cycles that trigger a restart
    pub failure_threshold: u32,

    /// Bound on each wait during shutdown
    pub shutdown_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            frame_rate: 30,
            jpeg_quality: 75,
            queue_capacity: 3,
            max_concurrent_encodes: 2,
            max_clients: 5,
            client_idle_timeout: Duration::from_secs(30),
            frame_max_age: Duration::from_millis(500),
            performance_mode: 0,
            stream_resolution: Some((640, 480)),
            quality_penalty: 15,
            quality_floor: 30,
            encode_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            accept_backoff: Duration::from_millis(100),
            health_interval: Duration::from_secs(5),
            idle_poll_interval: Duration::from_millis(100),
            failure_backoff: Duration::from_millis(250),
            failure_threshold: 10,
            shutdown_timeout: Duration::from_secs(1),
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the port, keeping the bind IP
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set the target frame rate (clamped to 1-60)
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.clamp(1, 60);
        self
    }

    /// Set JPEG quality (clamped to 1-100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set frame queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the number of concurrent encodes
    pub fn max_concurrent_encodes(mut self, max: usize) -> Self {
        self.max_concurrent_encodes = max.max(1);
        self
    }

    /// Set maximum concurrent stream clients
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set client idle timeout
    pub fn client_idle_timeout(mut self, timeout: Duration) -> Self {
        self.client_idle_timeout = timeout;
        self
    }

    /// Set the queued-frame max age
    pub fn frame_max_age(mut self, age: Duration) -> Self {
        self.frame_max_age = age;
        self
    }

    /// Set the performance mode (clamped to 0-3)
    pub fn performance_mode(mut self, mode: u8) -> Self {
        self.performance_mode = mode.min(MAX_PERFORMANCE_MODE);
        self
    }

    /// Set the output resolution; `None` streams at source resolution
    pub fn stream_resolution(mut self, resolution: Option<(u32, u32)>) -> Self {
        self.stream_resolution = resolution.filter(|&(w, h)| w > 0 && h > 0);
        self
    }

    /// Set the per-encode timeout
    pub fn encode_timeout(mut self, timeout: Duration) -> Self {
        self.encode_timeout = timeout;
        self
    }

    /// Set the per-client write timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the health sweep period
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the number of consecutive failures that trigger a restart
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the sleep after a failed broadcast cycle
    pub fn failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Set the bound on shutdown waits
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Interval between capture ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// Encoder settings derived from this config
    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            quality: self.jpeg_quality,
            quality_penalty: self.quality_penalty,
            quality_floor: self.quality_floor,
            timeout: self.encode_timeout,
            resolution: self.stream_resolution,
        }
    }
}
