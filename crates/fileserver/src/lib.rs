//! HTTP file server for sharing disc images on the local network
//!
//! This crate serves a fixed set of `.iso`/`.cso` files with single byte-range
//! support, and runs that server in the background while announcing it to the
//! rendezvous directory.

mod config;
mod files;
mod lifecycle;
mod range;
mod server;

pub use config::ShareConfig;
pub use files::{ServedFile, ServedFiles, SERVED_EXTENSIONS};
pub use lifecycle::{ServerLifecycle, ServerState, Transition};
pub use range::{ByteSpan, RangeError, RangeRequest};
pub use server::{router, RangeFileServer, CHUNK_SIZE, DEFAULT_BIND_HOST};

/// Result type alias for file server operations
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
