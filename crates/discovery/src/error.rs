use std::fmt;

/// Error raised while talking to the rendezvous directory
///
/// Callers of the public `DirectoryClient` operations never see these; they are
/// logged and degraded to a no-op or an empty peer list.
#[derive(Debug)]
pub enum DirectoryError {
    /// The directory host name did not resolve to any address
    Unresolved(String),
    /// Socket level failure (resolve, connect)
    Io(std::io::Error),
    /// Connecting took longer than the configured timeout
    Timeout,
    /// HTTP transport error
    Http(reqwest::Error),
    /// Directory answered with a non-200 status
    Status(u16),
    /// Response body was not the expected JSON
    Json(serde_json::Error),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Unresolved(host) => write!(f, "Could not resolve directory host {}", host),
            DirectoryError::Io(e) => write!(f, "Socket error: {}", e),
            DirectoryError::Timeout => write!(f, "Timed out connecting to directory"),
            DirectoryError::Http(e) => write!(f, "HTTP error: {}", e),
            DirectoryError::Status(code) => write!(f, "Directory returned status {}", code),
            DirectoryError::Json(e) => write!(f, "Malformed peer list: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DirectoryError::Io(e) => Some(e),
            DirectoryError::Http(e) => Some(e),
            DirectoryError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DirectoryError {
    fn from(err: std::io::Error) -> Self {
        DirectoryError::Io(err)
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        DirectoryError::Http(err)
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        DirectoryError::Json(err)
    }
}

impl From<tokio::time::error::Elapsed> for DirectoryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DirectoryError::Timeout
    }
}

/// Result type alias for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;
