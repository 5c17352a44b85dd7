//! Rendezvous directory client
//!
//! The directory keeps a short list of recently announced `(ip, port)` pairs.
//! Both operations are best effort: a failure degrades to a no-op (`register`)
//! or an empty list (`list_peers`) and is only logged.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::{DirectoryError, DirectoryResult};

/// Well-known rendezvous host
pub const DEFAULT_DIRECTORY_HOST: &str = "report.ppsspp.org";

/// Rendezvous HTTP port
pub const DEFAULT_DIRECTORY_PORT: u16 = 80;

/// Upper bound for a whole directory HTTP request
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound for the connect used to discover the outward-facing address
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// A peer announced to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// LAN address or host name the peer announced
    pub ip: String,
    /// Port the peer's file server listens on
    #[serde(rename = "p")]
    pub port: u16,
}

impl PeerRecord {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// Base URL of the peer's file server
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// Parse the body of `GET /match/list`
///
/// The root must be a JSON array. Entries without a string `ip` or an integer
/// `p` that fits a port are skipped; the order of the rest is kept.
pub fn parse_peer_list(body: &str) -> DirectoryResult<Vec<PeerRecord>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(body)?;

    let peers = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<PeerRecord>(entry) {
            Ok(peer) => Some(peer),
            Err(err) => {
                tracing::debug!("Skipping malformed peer entry: {}", err);
                None
            }
        })
        .collect();

    Ok(peers)
}

/// HTTP client for the rendezvous directory
#[derive(Clone)]
pub struct DirectoryClient {
    host: String,
    port: u16,
    client: reqwest::Client,
}

impl Default for DirectoryClient {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY_HOST, DEFAULT_DIRECTORY_PORT)
    }
}

impl DirectoryClient {
    /// Create a client for the given directory host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            host: host.into(),
            port,
            client,
        }
    }

    /// Create a client from `REMOTEISO_DIRECTORY_HOST` and `REMOTEISO_DIRECTORY_PORT`
    ///
    /// Unset or unparsable values fall back to the well-known directory.
    pub fn from_env() -> Self {
        let host = std::env::var("REMOTEISO_DIRECTORY_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DIRECTORY_HOST.to_string());
        let port = std::env::var("REMOTEISO_DIRECTORY_PORT")
            .ok()
            .and_then(|p| p.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_DIRECTORY_PORT);
        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn endpoint(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    async fn resolve(&self) -> DirectoryResult<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                tracing::debug!("Resolving {} failed: {}", self.host, e);
                DirectoryError::Unresolved(self.host.clone())
            })?
            .next()
            .ok_or_else(|| DirectoryError::Unresolved(self.host.clone()))
    }

    /// Local address the OS picks to reach the directory
    async fn outward_ip(&self, addr: SocketAddr) -> DirectoryResult<IpAddr> {
        let stream =
            tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), TcpStream::connect(addr))
                .await??;
        Ok(stream.local_addr()?.ip())
    }

    /// Announce this machine's file server to the directory
    ///
    /// Never fails from the caller's point of view; errors are logged.
    pub async fn register(&self, port: u16) {
        if let Err(e) = self.try_register(port).await {
            tracing::warn!("Directory registration skipped: {}", e);
        }
    }

    /// Announce this machine's file server, reporting what went wrong
    pub async fn try_register(&self, port: u16) -> DirectoryResult<()> {
        let addr = self.resolve().await?;
        let ip = self.outward_ip(addr).await?;

        let response = self
            .client
            .get(self.endpoint("/match/update"))
            .query(&[("local", ip.to_string()), ("port", port.to_string())])
            .send()
            .await?;

        tracing::info!(
            "Registered {}:{} with directory {} (status {})",
            ip,
            port,
            self.host,
            response.status()
        );

        Ok(())
    }

    /// Fetch recently announced peers in directory order
    ///
    /// Any failure yields an empty list.
    pub async fn list_peers(&self) -> Vec<PeerRecord> {
        match self.try_list_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("Could not fetch peer list: {}", e);
                Vec::new()
            }
        }
    }

    /// Fetch recently announced peers, reporting what went wrong
    pub async fn try_list_peers(&self) -> DirectoryResult<Vec<PeerRecord>> {
        self.resolve().await?;

        let response = self.client.get(self.endpoint("/match/list")).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let peers = parse_peer_list(&body)?;
        tracing::debug!("Directory listed {} peers", peers.len());

        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDirectory;
    use axum::http::StatusCode;

    #[test]
    fn test_peer_url() {
        let peer = PeerRecord::new("10.0.0.5", 8080);
        assert_eq!(peer.url(), "http://10.0.0.5:8080");
    }

    #[test]
    fn test_parse_peer_list() {
        let peers = parse_peer_list(r#"[{"ip":"10.0.0.5","p":8080},{"ip":"192.168.1.2","p":1234}]"#)
            .unwrap();
        assert_eq!(
            peers,
            vec![PeerRecord::new("10.0.0.5", 8080), PeerRecord::new("192.168.1.2", 1234)]
        );
    }

    #[test]
    fn test_parse_peer_list_keeps_order_and_extra_fields() {
        let peers =
            parse_peer_list(r#"[{"ip":"b","p":2,"t":99},{"ip":"a","p":1}]"#).unwrap();
        assert_eq!(peers[0].ip, "b");
        assert_eq!(peers[1].ip, "a");
    }

    #[test]
    fn test_parse_peer_list_skips_bad_entries() {
        let peers = parse_peer_list(
            r#"[{"ip":"10.0.0.1"},{"p":80},{"ip":5,"p":80},{"ip":"x","p":70000},{"ip":"ok","p":80}]"#,
        )
        .unwrap();
        assert_eq!(peers, vec![PeerRecord::new("ok", 80)]);
    }

    #[test]
    fn test_parse_peer_list_rejects_non_array() {
        assert!(parse_peer_list(r#"{"ip":"10.0.0.5","p":8080}"#).is_err());
        assert!(parse_peer_list("not json").is_err());
        assert!(parse_peer_list("").is_err());
    }

    #[test]
    fn test_parse_empty_array() {
        assert!(parse_peer_list("[]").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_peers_ok() {
        let mock = MockDirectory::spawn(StatusCode::OK, r#"[{"ip":"10.0.0.5","p":8080}]"#).await;
        let peers = mock.client().list_peers().await;
        assert_eq!(peers, vec![PeerRecord::new("10.0.0.5", 8080)]);
    }

    #[tokio::test]
    async fn test_list_peers_non_200_is_empty() {
        let mock =
            MockDirectory::spawn(StatusCode::INTERNAL_SERVER_ERROR, r#"[{"ip":"10.0.0.5","p":1}]"#)
                .await;
        assert!(mock.client().list_peers().await.is_empty());
        assert!(matches!(
            mock.client().try_list_peers().await,
            Err(DirectoryError::Status(500))
        ));
    }

    #[tokio::test]
    async fn test_list_peers_malformed_json_is_empty() {
        let mock = MockDirectory::spawn(StatusCode::OK, "<html>oops</html>").await;
        assert!(mock.client().list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_peers_unreachable_directory_is_empty() {
        let port = crate::mock::closed_port().await;
        let client = DirectoryClient::new("127.0.0.1", port);
        assert!(client.list_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_reports_local_ip_and_port() {
        let mock = MockDirectory::spawn(StatusCode::OK, "[]").await;
        mock.client().register(4321).await;

        let updates = mock.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "127.0.0.1");
        assert_eq!(updates[0].1, "4321");
    }

    #[tokio::test]
    async fn test_register_unreachable_is_silent() {
        let port = crate::mock::closed_port().await;
        let client = DirectoryClient::new("127.0.0.1", port);
        client.register(80).await;
        assert!(client.try_register(80).await.is_err());
    }

    #[test]
    fn test_default_points_at_well_known_host() {
        let client = DirectoryClient::default();
        assert_eq!(client.host(), DEFAULT_DIRECTORY_HOST);
        assert_eq!(client.port(), DEFAULT_DIRECTORY_PORT);
    }
}
