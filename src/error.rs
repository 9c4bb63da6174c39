//! Error types
//!
//! Almost every failure in the streaming pipeline is recovered locally and
//! turned into a counter or a log line. The variants here are the ones that
//! cross a component boundary: a failed start, an encode that went wrong,
//! or a broadcast cycle the supervisor has to count.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug)]
pub enum Error {
    /// Generic I/O failure
    Io(io::Error),

    /// The listener could not be bound
    Bind { addr: SocketAddr, source: io::Error },

    /// The server is already running (or transitioning)
    AlreadyRunning,

    /// The server is not running
    NotRunning,

    /// Pixel buffer does not match the declared geometry
    InvalidFrame {
        expected: usize,
        actual: usize,
    },

    /// JPEG encoder failure
    Encode(image::ImageError),

    /// Client registry rejected an operation
    Registry(RegistryError),

    /// Malformed or oversized HTTP request
    BadRequest(String),

    /// A background task panicked or was cancelled unexpectedly
    Task(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Error::AlreadyRunning => write!(f, "Server is already running"),
            Error::NotRunning => write!(f, "Server is not running"),
            Error::InvalidFrame { expected, actual } => write!(
                f,
                "Invalid frame buffer: expected {} bytes, got {}",
                expected, actual
            ),
            Error::Encode(e) => write!(f, "JPEG encode failed: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::BadRequest(reason) => write!(f, "Bad request: {}", reason),
            Error::Task(reason) => write!(f, "Background task failed: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Bind { source, .. } => Some(source),
            Error::Encode(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Encode(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_frame() {
        let err = Error::InvalidFrame {
            expected: 12,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "Invalid frame buffer: expected 12 bytes, got 10"
        );
    }

    #[test]
    fn test_bind_error_has_source() {
        use std::error::Error as _;

        let err = Error::Bind {
            addr: "127.0.0.1:5809".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("127.0.0.1:5809"));
    }

    #[test]
    fn test_from_registry_error() {
        let err: Error = RegistryError::CapacityReached { max: 5 }.into();
        assert!(matches!(err, Error::Registry(_)));
    }
}
