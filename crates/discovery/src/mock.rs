//! In-process stand-in for the rendezvous directory used by unit tests

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::directory::DirectoryClient;

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: String,
    updates: Arc<Mutex<Vec<(String, String)>>>,
}

pub struct MockDirectory {
    port: u16,
    updates: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockDirectory {
    /// Serve `/match/list` with a fixed status and body and record `/match/update` calls
    pub async fn spawn(status: StatusCode, body: &str) -> Self {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            body: body.to_string(),
            updates: updates.clone(),
        };

        let app = Router::new()
            .route("/match/list", get(list))
            .route("/match/update", get(update))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { port, updates }
    }

    pub fn client(&self) -> DirectoryClient {
        DirectoryClient::new("127.0.0.1", self.port)
    }

    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }
}

async fn list(State(state): State<MockState>) -> (StatusCode, String) {
    (state.status, state.body.clone())
}

async fn update(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> &'static str {
    let local = params.get("local").cloned().unwrap_or_default();
    let port = params.get("port").cloned().unwrap_or_default();
    state.updates.lock().unwrap().push((local, port));
    "OK"
}

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// A local listener that accepts and immediately drops connections
pub async fn open_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    port
}

/// A loopback listener whose accept queue is full, so new connects never complete
///
/// The listener and the connections filling its queue live as long as the guard.
pub struct StalledPort {
    pub port: u16,
    _listener: tokio::net::TcpListener,
    _queued: Vec<tokio::net::TcpStream>,
}

pub async fn stalled_port() -> StalledPort {
    let socket = tokio::net::TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut queued = Vec::new();
    for _ in 0..16 {
        let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
        match tokio::time::timeout(Duration::from_millis(200), connect).await {
            Ok(stream) => queued.push(stream.unwrap()),
            Err(_) => {
                return StalledPort {
                    port,
                    _listener: listener,
                    _queued: queued,
                }
            }
        }
    }
    panic!("accept queue of port {} never filled", port);
}
