//! Rendezvous directory client and peer scanner
//!
//! A sharing device announces its LAN address to a well-known directory host,
//! and a browsing device asks the same host for recent announcements, then
//! probes each candidate until one accepts a TCP connection.

pub mod directory;
pub mod error;
pub mod scanner;

#[cfg(test)]
mod mock;

pub use directory::{
    parse_peer_list, DirectoryClient, PeerRecord, DEFAULT_DIRECTORY_HOST, DEFAULT_DIRECTORY_PORT,
};
pub use error::{DirectoryError, DirectoryResult};
pub use scanner::{probe, PeerScanner, ScanTask, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_RETRY_SECS};
