//! Peer scanning for the browsing side
//!
//! A scan pass asks the directory for recent announcements and returns the URL
//! of the first peer that accepts a TCP connection.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::directory::DirectoryClient;

/// Connect timeout for a single reachability probe
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Delay between scan passes when nothing was found
pub const DEFAULT_RETRY_SECS: u64 = 30;

/// Check whether `host:port` accepts a TCP connection
///
/// Every resolved address is tried in turn. No data is exchanged; the
/// connection is closed right away.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    let attempt = async {
        let Ok(addrs) = tokio::net::lookup_host((host, port)).await else {
            return false;
        };
        for addr in addrs {
            if TcpStream::connect(addr).await.is_ok() {
                return true;
            }
        }
        false
    };

    matches!(tokio::time::timeout(timeout, attempt).await, Ok(true))
}

/// Locates a reachable file server through the directory
#[derive(Clone)]
pub struct PeerScanner {
    directory: DirectoryClient,
    probe_timeout: Duration,
}

impl PeerScanner {
    pub fn new(directory: DirectoryClient) -> Self {
        Self {
            directory,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }

    /// Override the per-candidate connect timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.directory
    }

    /// Run one scan pass
    ///
    /// # Returns
    /// * `Some(url)` - first reachable peer in directory order
    /// * `None` - the list was empty or no candidate answered
    pub async fn find_server(&self) -> Option<String> {
        let peers = self.directory.list_peers().await;
        if peers.is_empty() {
            tracing::debug!("Directory returned no peers");
            return None;
        }

        for peer in &peers {
            let url = peer.url();
            if probe(&peer.ip, peer.port, self.probe_timeout).await {
                tracing::info!("Found reachable server at {}", url);
                return Some(url);
            }
            tracing::debug!("Peer {} is not reachable", url);
        }

        tracing::info!("None of the {} listed peers were reachable", peers.len());
        None
    }

    /// Repeat scan passes until a server is found
    ///
    /// # Arguments
    /// * `interval` - Delay between passes
    /// * `attempts` - Maximum number of passes, `None` for no limit
    pub async fn find_server_with_retry(
        &self,
        interval: Duration,
        attempts: Option<usize>,
    ) -> Option<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(url) = self.find_server().await {
                return Some(url);
            }
            if attempts.is_some_and(|max| attempt >= max) {
                return None;
            }
            tracing::info!("No server found, retrying in {}s", interval.as_secs_f32());
            tokio::time::sleep(interval).await;
        }
    }

    /// Run one scan pass in a background task
    pub fn spawn_scan(&self) -> ScanTask {
        let scanner = self.clone();
        ScanTask {
            handle: tokio::spawn(async move { scanner.find_server().await }),
        }
    }
}

/// Handle to a scan pass running in the background
pub struct ScanTask {
    handle: JoinHandle<Option<String>>,
}

impl ScanTask {
    /// Whether the pass has completed (or was aborted)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the pass at its next await point
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the pass and take its result
    pub async fn wait(self) -> Option<String> {
        match self.handle.await {
            Ok(url) => url,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!("Scan task failed: {}", e);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{closed_port, open_port, stalled_port, MockDirectory};
    use axum::http::StatusCode;

    fn scanner(mock: &MockDirectory) -> PeerScanner {
        PeerScanner::new(mock.client()).with_probe_timeout(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_probe_open_and_closed() {
        let open = open_port().await;
        let closed = closed_port().await;
        assert!(probe("127.0.0.1", open, Duration::from_secs(2)).await);
        assert!(!probe("127.0.0.1", closed, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_first_reachable_peer_wins() {
        let closed = closed_port().await;
        let first_open = open_port().await;
        let second_open = open_port().await;
        let body = format!(
            r#"[{{"ip":"127.0.0.1","p":{}}},{{"ip":"127.0.0.1","p":{}}},{{"ip":"127.0.0.1","p":{}}}]"#,
            closed, first_open, second_open
        );
        let mock = MockDirectory::spawn(StatusCode::OK, &body).await;

        let url = scanner(&mock).find_server().await;
        assert_eq!(url, Some(format!("http://127.0.0.1:{}", first_open)));
    }

    #[tokio::test]
    async fn test_nothing_reachable() {
        let closed = closed_port().await;
        let body = format!(r#"[{{"ip":"127.0.0.1","p":{}}}]"#, closed);
        let mock = MockDirectory::spawn(StatusCode::OK, &body).await;

        assert_eq!(scanner(&mock).find_server().await, None);
    }

    #[tokio::test]
    async fn test_probe_gives_up_after_timeout() {
        let stalled = stalled_port().await;
        let started = tokio::time::Instant::now();
        assert!(!probe("127.0.0.1", stalled.port, Duration::from_millis(300)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unanswering_peer_is_skipped() {
        let stalled = stalled_port().await;
        let open = open_port().await;
        let body = format!(
            r#"[{{"ip":"127.0.0.1","p":{}}},{{"ip":"127.0.0.1","p":{}}}]"#,
            stalled.port, open
        );
        let mock = MockDirectory::spawn(StatusCode::OK, &body).await;

        let url = scanner(&mock).find_server().await;
        assert_eq!(url, Some(format!("http://127.0.0.1:{}", open)));
    }

    #[tokio::test]
    async fn test_empty_list() {
        let mock = MockDirectory::spawn(StatusCode::OK, "[]").await;
        assert_eq!(scanner(&mock).find_server().await, None);
    }

    #[tokio::test]
    async fn test_directory_error_means_no_server() {
        let mock = MockDirectory::spawn(StatusCode::NOT_FOUND, "").await;
        assert_eq!(scanner(&mock).find_server().await, None);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let mock = MockDirectory::spawn(StatusCode::OK, "[]").await;
        let result = scanner(&mock)
            .find_server_with_retry(Duration::from_millis(10), Some(3))
            .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retry_returns_found_server() {
        let open = open_port().await;
        let body = format!(r#"[{{"ip":"127.0.0.1","p":{}}}]"#, open);
        let mock = MockDirectory::spawn(StatusCode::OK, &body).await;
        let result = scanner(&mock)
            .find_server_with_retry(Duration::from_millis(10), None)
            .await;
        assert_eq!(result, Some(format!("http://127.0.0.1:{}", open)));
    }

    #[tokio::test]
    async fn test_spawned_scan() {
        let open = open_port().await;
        let body = format!(r#"[{{"ip":"127.0.0.1","p":{}}}]"#, open);
        let mock = MockDirectory::spawn(StatusCode::OK, &body).await;

        let task = scanner(&mock).spawn_scan();
        assert_eq!(task.wait().await, Some(format!("http://127.0.0.1:{}", open)));
    }

    #[tokio::test]
    async fn test_aborted_scan_yields_nothing() {
        let stalled = stalled_port().await;
        let body = format!(r#"[{{"ip":"127.0.0.1","p":{}}}]"#, stalled.port);
        let mock = MockDirectory::spawn(StatusCode::OK, &body).await;
        let task = PeerScanner::new(mock.client())
            .with_probe_timeout(Duration::from_secs(30))
            .spawn_scan();
        task.abort();
        assert_eq!(task.wait().await, None);
    }
}
