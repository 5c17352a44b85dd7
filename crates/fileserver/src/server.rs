//! HTTP server implementation with range request support

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use futures::StreamExt;
use std::future::{Future, IntoFuture};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::files::ServedFiles;
use crate::range::{ByteSpan, RangeError, RangeRequest};

/// Size of each chunk read from disk while streaming a range
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Address the server listens on unless configured otherwise
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

const OCTET_STREAM: &str = "application/octet-stream";

/// How long cut-off connections get to close after the drain period
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type ServeFuture = Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>;

/// Create the axum router serving `files`
///
/// Every request goes through one fallback handler, so the raw request path
/// (with `%20` escapes intact) is matched against the mapping.
pub fn router(files: ServedFiles) -> Router {
    app(AppState {
        files,
        cancel: CancellationToken::new(),
    })
}

fn app(state: AppState) -> Router {
    Router::new()
        .fallback(serve_file)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
struct AppState {
    files: ServedFiles,
    /// Cancelled when a stopping server stops waiting for bodies in flight
    cancel: CancellationToken,
}

/// A bound file server that is driven in time-boxed slices
///
/// The accept loop only makes progress while [`run_slice`](Self::run_slice)
/// is being awaited; accepted connections run on their own tasks.
pub struct RangeFileServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    serve: ServeFuture,
    finished: bool,
}

impl RangeFileServer {
    /// Bind the server
    ///
    /// # Arguments
    /// * `host` - Host to bind to (e.g., "0.0.0.0")
    /// * `preferred_port` - Port to try first; 0 lets the OS choose
    /// * `files` - Files to serve
    ///
    /// If the preferred port cannot be bound, any free port is used instead.
    pub async fn bind(host: &str, preferred_port: u16, files: ServedFiles) -> crate::Result<Self> {
        let listener = match TcpListener::bind((host, preferred_port)).await {
            Ok(listener) => listener,
            Err(e) if preferred_port != 0 => {
                tracing::warn!(
                    "Could not bind {}:{} ({}), falling back to any free port",
                    host,
                    preferred_port,
                    e
                );
                TcpListener::bind((host, 0)).await?
            }
            Err(e) => return Err(e.into()),
        };

        Self::from_listener(listener, files)
    }

    /// Serve `files` on an already bound listener
    pub fn from_listener(listener: TcpListener, files: ServedFiles) -> crate::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tracing::info!(
            "File server listening on {} with {} files",
            local_addr,
            files.len()
        );

        let signal = async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        };
        let cancel = CancellationToken::new();
        let state = AppState {
            files,
            cancel: cancel.clone(),
        };
        let serve = axum::serve(listener, app(state))
            .with_graceful_shutdown(signal)
            .into_future();

        Ok(Self {
            local_addr,
            shutdown_tx,
            cancel,
            serve: Box::pin(serve),
            finished: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Serve requests for up to `slice`, then hand control back
    ///
    /// Returns an error if the server has stopped serving. Cancelling the
    /// returned future loses no state.
    pub async fn run_slice(&mut self, slice: Duration) -> crate::Result<()> {
        if self.finished {
            return Err("file server is no longer serving".into());
        }

        match tokio::time::timeout(slice, &mut self.serve).await {
            Err(_) => Ok(()),
            Ok(result) => {
                self.finished = true;
                result?;
                Err("file server exited".into())
            }
        }
    }

    /// Stop accepting, give in-flight responses up to `drain` to finish, then
    /// release the listener
    ///
    /// Bodies still streaming after `drain` are cut short, which closes their
    /// connections. When this returns no connection of this server is left
    /// open, unless one failed to close within a further second.
    pub async fn shutdown(mut self, drain: Duration) {
        let _ = self.shutdown_tx.send(true);
        if self.finished {
            self.cancel.cancel();
            return;
        }

        match tokio::time::timeout(drain, &mut self.serve).await {
            Ok(Ok(())) => tracing::debug!("File server on {} drained", self.local_addr),
            Ok(Err(e)) => tracing::warn!("File server on {} exited with error: {}", self.local_addr, e),
            Err(_) => {
                tracing::warn!(
                    "File server on {} did not drain within {:?}, cutting off transfers",
                    self.local_addr,
                    drain
                );
                self.cancel.cancel();
                if tokio::time::timeout(CLOSE_GRACE, &mut self.serve).await.is_err() {
                    tracing::error!("Connections to {} are still open", self.local_addr);
                }
            }
        }
    }
}

/// Handler for every request path
async fn serve_file(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(AppError::MethodNotAllowed);
    }

    // Plain GETs are refused before anything else is looked at
    let range_header = headers.get(header::RANGE);
    if method == Method::GET && range_header.is_none() {
        return Err(AppError::RangeRequired);
    }

    let path = state.files.get(uri.path()).ok_or(AppError::NotFound)?;

    let file_size = file_size(path).await?;

    // HEAD always describes the whole file, whatever Range it carries
    if method == Method::HEAD {
        return head_response(file_size);
    }

    let range = range_header
        .ok_or(AppError::RangeRequired)?
        .to_str()
        .map_err(|_| RangeError::Malformed)
        .and_then(RangeRequest::parse)
        .map_err(|_| AppError::BadRequest)?;

    let span = range
        .resolve(file_size)
        .map_err(|_| AppError::RangeNotSatisfiable(file_size))?;

    handle_range_request(path, span, file_size, state.cancel).await
}

async fn file_size(path: &Path) -> Result<u64, AppError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat {}: {}", path.display(), e)))?;

    if !metadata.is_file() {
        return Err(AppError::Internal(format!("{} is not a regular file", path.display())));
    }

    Ok(metadata.len())
}

fn head_response(file_size: u64) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, OCTET_STREAM)
        .header(header::CONTENT_LENGTH, file_size)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Stream one byte span of a file
async fn handle_range_request(
    path: &Path,
    span: ByteSpan,
    file_size: u64,
    cancel: CancellationToken,
) -> Result<Response, AppError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;

    file.seek(SeekFrom::Start(span.start))
        .await
        .map_err(|e| AppError::Internal(format!("Failed to seek {}: {}", path.display(), e)))?;

    // A read error or cancellation after this point aborts the connection mid-body
    let stream = ReaderStream::with_capacity(file.take(span.len()), CHUNK_SIZE)
        .take_until(cancel.cancelled_owned());

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, OCTET_STREAM)
        .header(header::CONTENT_LENGTH, span.len())
        .header(header::CONTENT_RANGE, span.content_range(file_size))
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Application error types
#[derive(Debug)]
enum AppError {
    NotFound,
    MethodNotAllowed,
    BadRequest,
    RangeRequired,
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "File not found.").into_response(),
            AppError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, "GET, HEAD")],
                "Only GET and HEAD are supported.",
            )
                .into_response(),
            AppError::BadRequest => (
                StatusCode::BAD_REQUEST,
                "Could not understand range request.",
            )
                .into_response(),
            AppError::RangeRequired => (
                StatusCode::IM_A_TEAPOT,
                "This server only supports range requests.",
            )
                .into_response(),
            AppError::RangeNotSatisfiable(size) => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                "Range goes outside of file.",
            )
                .into_response(),
            AppError::Internal(msg) => {
                tracing::error!("{}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "File access failed.").into_response()
            }
        }
    }
}
