//! Per-client state
//!
//! A [`ClientRecord`] exists exactly as long as its connection is believed
//! live. Records are owned by the [`ClientRegistry`](super::ClientRegistry);
//! dropping a record closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// Write half of a stream client connection
pub type ClientConn = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection handle shared between the registry and an in-flight send
pub type SharedConn = Arc<Mutex<ClientConn>>;

/// Unique identifier for a registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// State for one stream consumer
pub struct ClientRecord {
    /// Registry-assigned ID
    pub id: ClientId,

    /// Remote address, when the connection came from a socket
    pub peer: Option<SocketAddr>,

    /// Whether the multipart stream header has been written
    pub header_sent: bool,

    /// Last successful send (registration time until the first send)
    pub last_activity: Instant,

    /// When the client was admitted
    pub registered_at: Instant,

    /// Sequence number of the last frame delivered, 0 before the first
    pub last_sequence: u64,

    pub(super) conn: SharedConn,

    /// Send currently writing to this client, if any
    pub(super) send_task: Option<AbortHandle>,

    pub(super) in_flight: bool,
}

impl ClientRecord {
    pub(super) fn new(id: ClientId, peer: Option<SocketAddr>, conn: ClientConn) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            header_sent: false,
            last_activity: now,
            registered_at: now,
            last_sequence: 0,
            conn: Arc::new(Mutex::new(conn)),
            send_task: None,
            in_flight: false,
        }
    }

    /// Time since the last successful send
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Whether a send is currently writing to this client
    pub fn is_sending(&self) -> bool {
        self.in_flight
    }

    /// Close the connection
    ///
    /// Cancels a send still writing to the socket; the connection itself is
    /// closed once the last handle to it is dropped.
    pub fn close(self) {
        if let Some(task) = self.send_task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRecord")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("header_sent", &self.header_sent)
            .field("last_sequence", &self.last_sequence)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
