//! Client registry for stream consumers
//!
//! The registry is the single owner of every connected stream client. All
//! mutations (admit, mark a send as started or finished, evict) go through
//! [`ClientRegistry`] methods that hold its lock only for the bookkeeping,
//! never across a socket write.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<ClientRegistry>
//!                    ┌─────────────────────────┐
//!   acceptor ──────► │ clients: HashMap<Id,    │ ◄────── health sweep
//!   register()       │   ClientRecord {        │         evict_idle()
//!                    │     conn, header_sent,  │
//!                    │     last_activity, ...  │
//!                    │   }                     │
//!                    │ >                       │
//!                    └───────────┬─────────────┘
//!                                │ begin_sends() / complete_send()
//!                                ▼
//!                          broadcast loop ──► per-client send task ──► TCP
//! ```
//!
//! Removal is decided in exactly one place per path (the broadcast loop for
//! write failures, the health sweep for idle clients) and executed under the
//! registry lock, so a client is never both kept and evicted.

pub mod client;
pub mod error;
pub mod store;

pub use client::{ClientConn, ClientId, ClientRecord, SharedConn};
pub use error::RegistryError;
pub use store::{ClientRegistry, Rejected, SendJob};
