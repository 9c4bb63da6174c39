//! MJPEG server
//!
//! Ties the pipeline to the network: the acceptor admits stream clients,
//! the broadcast loop fans frames out to them, the health sweep evicts idle
//! ones, and [`MjpegServer`] supervises the whole run.

pub mod config;
mod broadcast;
mod health;
mod listener;
mod supervisor;

pub use config::ServerConfig;
pub use supervisor::{MjpegServer, ServerState};
