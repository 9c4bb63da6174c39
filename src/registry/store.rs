//! Client registry implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use super::client::{ClientConn, ClientId, ClientRecord, SharedConn};
use super::error::RegistryError;

/// A refused registration
///
/// Hands the connection back so the caller can still answer it (with a
/// `503`) before closing.
pub struct Rejected {
    pub error: RegistryError,
    pub conn: ClientConn,
}

impl std::fmt::Debug for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A send the broadcast loop should perform for one client
#[derive(Clone)]
pub struct SendJob {
    /// Target client
    pub client: ClientId,
    /// Connection to write to
    pub conn: SharedConn,
    /// Whether the stream header must precede the frame
    pub send_header: bool,
}

/// Registry of connected stream clients
///
/// Bounded to `max_clients`. The client count is mirrored in an atomic so
/// the capture task can check for consumers without touching the lock.
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientRecord>>,
    count: AtomicUsize,
    next_id: AtomicU64,
    max_clients: usize,
}

impl ClientRegistry {
    /// Create a registry admitting at most `max_clients` clients
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            count: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            max_clients,
        }
    }

    /// Maximum concurrent clients
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether no client is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the client cap is reached
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_clients
    }

    /// Admit a new stream client
    ///
    /// The cap check and the insert happen under one lock, so the registry
    /// never holds more than `max_clients` records.
    pub async fn register(
        &self,
        peer: Option<SocketAddr>,
        conn: ClientConn,
    ) -> Result<ClientId, Rejected> {
        let mut clients = self.clients.lock().await;

        if clients.len() >= self.max_clients {
            return Err(Rejected {
                error: RegistryError::CapacityReached {
                    max: self.max_clients,
                },
                conn,
            });
        }

        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        clients.insert(id, ClientRecord::new(id, peer, conn));
        self.count.store(clients.len(), Ordering::Release);

        tracing::info!(
            client = %id,
            peer = ?peer,
            clients = clients.len(),
            "Stream client registered"
        );

        Ok(id)
    }

    /// Claim every client that still needs frame `sequence`
    ///
    /// Clients with a send already in flight, or that already have this
    /// frame, are skipped. Claimed clients are marked in flight until
    /// [`complete_send`](Self::complete_send) or removal.
    pub async fn begin_sends(&self, sequence: u64) -> Vec<SendJob> {
        let mut clients = self.clients.lock().await;

        clients
            .values_mut()
            .filter(|record| !record.in_flight && record.last_sequence < sequence)
            .map(|record| {
                record.in_flight = true;
                SendJob {
                    client: record.id,
                    conn: Arc::clone(&record.conn),
                    send_header: !record.header_sent,
                }
            })
            .collect()
    }

    /// Remember the task writing to `client` so eviction can cancel it
    ///
    /// Returns `false` (and cancels the task) if the client is already gone.
    pub async fn attach_send(&self, client: ClientId, task: AbortHandle) -> bool {
        let mut clients = self.clients.lock().await;

        match clients.get_mut(&client) {
            Some(record) => {
                record.send_task = Some(task);
                true
            }
            None => {
                task.abort();
                false
            }
        }
    }

    /// Record a successful send of frame `sequence` to `client`
    pub async fn complete_send(
        &self,
        client: ClientId,
        sequence: u64,
        header_written: bool,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let mut clients = self.clients.lock().await;
        let record = clients
            .get_mut(&client)
            .ok_or(RegistryError::ClientNotFound(client))?;

        record.in_flight = false;
        record.send_task = None;
        record.header_sent |= header_written;
        record.last_sequence = record.last_sequence.max(sequence);
        record.last_activity = now;
        Ok(())
    }

    /// Remove the given clients, returning the records that were present
    ///
    /// Callers close the returned records outside the lock.
    pub async fn remove(&self, ids: &[ClientId]) -> Vec<ClientRecord> {
        if ids.is_empty() {
            return Vec::new();
        }

        let mut clients = self.clients.lock().await;
        let removed: Vec<ClientRecord> = ids.iter().filter_map(|id| clients.remove(id)).collect();
        self.count.store(clients.len(), Ordering::Release);
        removed
    }

    /// Remove every client idle for longer than `idle_timeout`
    pub async fn evict_idle(&self, idle_timeout: Duration, now: Instant) -> Vec<ClientRecord> {
        let mut clients = self.clients.lock().await;

        let idle: Vec<ClientId> = clients
            .values()
            .filter(|record| record.idle_for(now) > idle_timeout)
            .map(|record| record.id)
            .collect();

        let removed: Vec<ClientRecord> = idle.iter().filter_map(|id| clients.remove(id)).collect();
        self.count.store(clients.len(), Ordering::Release);
        removed
    }

    /// Remove and close every client, returning how many there were
    pub async fn clear(&self) -> usize {
        let drained: Vec<ClientRecord> = {
            let mut clients = self.clients.lock().await;
            self.count.store(0, Ordering::Release);
            clients.drain().map(|(_, record)| record).collect()
        };

        let count = drained.len();
        for record in drained {
            record.close();
        }
        count
    }

    /// IDs of every registered client, in admission order
    pub async fn client_ids(&self) -> Vec<ClientId> {
        let clients = self.clients.lock().await;
        let mut ids: Vec<ClientId> = clients.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Whether `client` is registered
    pub async fn contains(&self, client: ClientId) -> bool {
        self.clients.lock().await.contains_key(&client)
    }

    /// Last-sent sequence and header flag for `client`
    pub async fn client_progress(&self, client: ClientId) -> Option<(u64, bool)> {
        self.clients
            .lock()
            .await
            .get(&client)
            .map(|record| (record.last_sequence, record.header_sent))
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .field("max_clients", &self.max_clients)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> ClientConn {
        Box::new(tokio::io::sink())
    }

    #[tokio::test]
    async fn test_register_until_full() {
        let registry = ClientRegistry::new(5);

        for _ in 0..5 {
            assert!(registry.register(None, sink()).await.is_ok());
        }
        assert!(registry.is_full());

        let rejected = registry.register(None, sink()).await.unwrap_err();
        assert_eq!(rejected.error, RegistryError::CapacityReached { max: 5 });
        assert_eq!(registry.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_registration_respects_cap() {
        let registry = Arc::new(ClientRegistry::new(3));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.register(None, Box::new(tokio::io::sink())).await.is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_begin_sends_claims_each_client_once() {
        let registry = ClientRegistry::new(5);
        let a = registry.register(None, sink()).await.unwrap();
        let b = registry.register(None, sink()).await.unwrap();

        let jobs = registry.begin_sends(1).await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.send_header));

        // Both in flight: nothing to claim
        assert!(registry.begin_sends(2).await.is_empty());

        registry.complete_send(a, 1, true, Instant::now()).await.unwrap();
        assert_eq!(registry.client_progress(a).await, Some((1, true)));

        // `a` already has frame 1, `b` is still sending
        assert!(registry.begin_sends(1).await.is_empty());

        let jobs = registry.begin_sends(2).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].client, a);
        assert!(!jobs[0].send_header);
        assert!(registry.contains(b).await);
    }

    #[tokio::test]
    async fn test_complete_send_for_removed_client() {
        let registry = ClientRegistry::new(5);
        let id = registry.register(None, sink()).await.unwrap();

        let removed = registry.remove(&[id]).await;
        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty());

        let result = registry.complete_send(id, 1, true, Instant::now()).await;
        assert_eq!(result, Err(RegistryError::ClientNotFound(id)));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ClientRegistry::new(5);
        let id = registry.register(None, sink()).await.unwrap();

        assert_eq!(registry.remove(&[id, id]).await.len(), 1);
        assert!(registry.remove(&[id]).await.is_empty());
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let registry = ClientRegistry::new(5);
        let stale = registry.register(None, sink()).await.unwrap();
        let active = registry.register(None, sink()).await.unwrap();

        let later = Instant::now() + Duration::from_secs(40);
        registry
            .complete_send(active, 1, true, later - Duration::from_secs(5))
            .await
            .unwrap();

        let evicted = registry.evict_idle(Duration::from_secs(30), later).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, stale);
        assert_eq!(registry.client_ids().await, vec![active]);
    }

    #[tokio::test]
    async fn test_attach_send_to_missing_client_aborts() {
        let registry = ClientRegistry::new(5);
        let task = tokio::spawn(std::future::pending::<()>());

        assert!(!registry.attach_send(ClientId(99), task.abort_handle()).await);
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = ClientRegistry::new(5);
        registry.register(None, sink()).await.unwrap();
        registry.register(None, sink()).await.unwrap();

        assert_eq!(registry.clear().await, 2);
        assert!(registry.is_empty());
        assert!(registry.client_ids().await.is_empty());
    }
}
