//! Wire protocol
//!
//! - [`mjpeg`]: the `multipart/x-mixed-replace` framing written to stream
//!   clients, and a parser for it
//! - [`http`]: the minimal HTTP/1.1 request handling the acceptor needs

pub mod http;
pub mod mjpeg;

pub use mjpeg::{MultipartParser, Part};
