//! Registry error types
//!
//! Error types for client registry operations.

use super::client::ClientId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The maximum number of concurrent stream clients is already connected
    CapacityReached { max: usize },
    /// No client with this ID is registered
    ClientNotFound(ClientId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::CapacityReached { max } => {
                write!(f, "Client limit reached ({} clients)", max)
            }
            RegistryError::ClientNotFound(id) => write!(f, "Client not found: {}", id),
        }
    }
}

impl std::error::Error for RegistryError {}
