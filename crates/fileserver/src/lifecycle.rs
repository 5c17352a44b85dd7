//! Background lifecycle of the sharing server
//!
//! A `ServerLifecycle` owns the state machine
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Start and stop
//! requests only flip the state; the background run does the work and
//! reports back through the same state, which callers can read or await.

use discovery::DirectoryClient;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ShareConfig;
use crate::files::ServedFiles;
use crate::server::RangeFileServer;

/// Observable state of the sharing server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Outcome of a start or stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The request changed the state
    Done,
    /// The request did not apply to the current state and was ignored
    Skipped,
}

/// State and last known port, updated together under one lock
#[derive(Debug, Clone, Copy)]
struct Shared {
    state: ServerState,
    port: u16,
}

struct Inner {
    shared: watch::Sender<Shared>,
    config: Mutex<ShareConfig>,
    directory: DirectoryClient,
    runtime: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn set_state(&self, state: ServerState) {
        self.shared.send_modify(|shared| shared.state = state);
    }
}

/// Start/stop control over the background file server
#[derive(Clone)]
pub struct ServerLifecycle {
    inner: Arc<Inner>,
}

impl ServerLifecycle {
    /// Create a stopped lifecycle on the current Tokio runtime
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime
    pub fn new(config: ShareConfig, directory: DirectoryClient) -> Self {
        Self::with_runtime(config, directory, Handle::current())
    }

    /// Create a stopped lifecycle whose runs are spawned on `runtime`
    pub fn with_runtime(config: ShareConfig, directory: DirectoryClient, runtime: Handle) -> Self {
        let (shared, _) = watch::channel(Shared {
            state: ServerState::Stopped,
            port: config.port,
        });

        Self {
            inner: Arc::new(Inner {
                shared,
                config: Mutex::new(config),
                directory,
                runtime,
                task: Mutex::new(None),
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> ServerState {
        self.inner.shared.borrow().state
    }

    /// Port of the current or last run, or the preferred port before any run
    pub fn port(&self) -> u16 {
        self.inner.shared.borrow().port
    }

    /// Replace the candidate files used by the next run
    pub fn set_files(&self, files: Vec<std::path::PathBuf>) {
        let mut config = self.inner.config.lock().unwrap_or_else(|e| e.into_inner());
        config.files = files;
    }

    /// Start sharing in the background
    ///
    /// Only valid while stopped; otherwise returns [`Transition::Skipped`].
    pub fn start(&self) -> Transition {
        // Held across the transition so a concurrent start cannot swap handles
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        let started = self.inner.shared.send_if_modified(|shared| {
            if shared.state != ServerState::Stopped {
                return false;
            }
            shared.state = ServerState::Starting;
            true
        });

        if !started {
            tracing::debug!("Start ignored, server is {:?}", self.state());
            return Transition::Skipped;
        }

        *task = Some(self.inner.runtime.spawn(execute_server(self.inner.clone())));

        Transition::Done
    }

    /// Ask the running server to stop
    ///
    /// Only valid while running; otherwise returns [`Transition::Skipped`].
    /// The stop completes asynchronously; wait for [`ServerState::Stopped`].
    pub fn stop(&self) -> Transition {
        let stopping = self.inner.shared.send_if_modified(|shared| {
            if shared.state != ServerState::Running {
                return false;
            }
            shared.state = ServerState::Stopping;
            true
        });

        if stopping {
            tracing::info!("Stopping file server");
            Transition::Done
        } else {
            tracing::debug!("Stop ignored, server is {:?}", self.state());
            Transition::Skipped
        }
    }

    /// Wait until the state differs from `seen` and return the new state
    pub async fn wait_for_change(&self, seen: ServerState) -> ServerState {
        let mut rx = self.inner.shared.subscribe();
        let result = rx.wait_for(|shared| shared.state != seen).await.map(|s| s.state);
        result.unwrap_or_else(|_| self.state())
    }

    /// Wait until the state becomes `target`
    pub async fn wait_until(&self, target: ServerState) {
        let mut rx = self.inner.shared.subscribe();
        let _ = rx.wait_for(|shared| shared.state == target).await;
    }

    /// Wait for the most recent background run to finish
    pub async fn join(&self) {
        let handle = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("File server task failed: {}", e);
            }
        }
    }
}

/// One server run, from bind to release
async fn execute_server(inner: Arc<Inner>) {
    let config = inner.config.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let preferred_port = inner.shared.borrow().port;

    let files = ServedFiles::from_paths(&config.files);
    if files.is_empty() {
        tracing::warn!("No disc images to share");
    }

    let mut server = match RangeFileServer::bind(&config.bind_host, preferred_port, files).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Could not start file server: {}", e);
            inner.set_state(ServerState::Stopped);
            return;
        }
    };

    let port = server.port();
    inner.shared.send_modify(|shared| {
        shared.state = ServerState::Running;
        shared.port = port;
    });
    tracing::info!("Sharing on port {}", port);

    inner.directory.register(port).await;
    let mut last_register = Instant::now();

    let mut state_rx = inner.shared.subscribe();
    loop {
        let state = state_rx.borrow_and_update().state;
        if state != ServerState::Running {
            break;
        }

        tokio::select! {
            result = server.run_slice(config.slice) => {
                if let Err(e) = result {
                    tracing::error!("File server stopped unexpectedly: {}", e);
                    break;
                }
            }
            _ = state_rx.changed() => {}
        }

        // A stop request wakes the loop too; never announce a server that is going away
        let still_running = state_rx.borrow().state == ServerState::Running;
        if still_running && last_register.elapsed() >= config.register_interval {
            inner.directory.register(port).await;
            last_register = Instant::now();
        }
    }

    server.shutdown(config.drain).await;
    inner.set_state(ServerState::Stopped);
    tracing::info!("File server on port {} stopped", port);
}
