use discovery::{DirectoryClient, PeerScanner, DEFAULT_RETRY_SECS};
use fileserver::{ServerLifecycle, ServerState, ShareConfig, Transition};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// What this process does, from `REMOTEISO_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Share,
    Browse,
}

impl Mode {
    fn from_env() -> Self {
        match std::env::var("REMOTEISO_MODE").as_deref().map(str::trim) {
            Ok("browse") => Mode::Browse,
            Ok("share") | Err(_) => Mode::Share,
            Ok(other) => {
                tracing::warn!("Unknown REMOTEISO_MODE '{}', sharing instead", other);
                Mode::Share
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let directory = DirectoryClient::from_env();
    tracing::info!("Using directory {}:{}", directory.host(), directory.port());

    match Mode::from_env() {
        Mode::Share => share(directory).await,
        Mode::Browse => browse(directory).await,
    }
}

async fn share(directory: DirectoryClient) {
    let config = ShareConfig::from_env();
    if config.files.is_empty() {
        tracing::warn!("REMOTEISO_FILES is empty, nothing will be listed");
    }

    let lifecycle = ServerLifecycle::new(config, directory);
    if lifecycle.start() != Transition::Done {
        tracing::error!("File server is already running");
        return;
    }

    match lifecycle.wait_for_change(ServerState::Starting).await {
        ServerState::Running => {
            tracing::info!("Sharing games on port {}. Press Ctrl-C to stop.", lifecycle.port());
        }
        state => {
            tracing::error!("File server did not start (state: {:?})", state);
            lifecycle.join().await;
            return;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }

    lifecycle.stop();
    lifecycle.wait_until(ServerState::Stopped).await;
    lifecycle.join().await;
    tracing::info!("Sharing stopped");
}

async fn browse(directory: DirectoryClient) {
    let retry = std::env::var("REMOTEISO_RETRY_SECS")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_SECS);

    tracing::info!("Scanning... click Share Games on the other device");
    let scanner = PeerScanner::new(directory);

    tokio::select! {
        found = scanner.find_server_with_retry(Duration::from_secs(retry), None) => {
            match found {
                Some(url) => tracing::info!("Found server at {}", url),
                None => tracing::info!("No server found"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Scan cancelled");
        }
    }
}
