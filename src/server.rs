//! TCP server for Gopher connections.
//!
//! Each accepted connection gets its own task: read one selector line,
//! hand it to the configured handler, close. There is no keep-alive and no
//! pipelining, and per-connection failures never reach the accept loop.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::Utf8Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::gopher::{with_deadline, LineReader, ResponseWriter};
use crate::logging::{ErrorSink, TracingSink};

/// Address used by `listen_and_serve` when none is configured.
pub const DEFAULT_ADDR: &str = "127.0.0.1:7070";

/// Maximum request line size, terminator included.
pub const DEFAULT_MAX_REQ_BYTES: usize = 1 << 20;

/// Maximum number of concurrent connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// A request received by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub remote_addr: String,
    /// Selector with the line terminator removed.
    pub content: Bytes,
}

impl Request {
    pub fn selector(&self) -> std::result::Result<&str, Utf8Error> {
        std::str::from_utf8(&self.content)
    }
}

/// Responds to a request.
///
/// The server closes the connection once `serve_gopher` returns. A write
/// failure means the client is gone; implementations should stop at the
/// first one.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_gopher(&self, w: &mut ResponseWriter, req: &Request);
}

/// Server settings, shared read-only by every connection task.
pub struct ServerConfig {
    /// Listen address for `listen_and_serve`; `DEFAULT_ADDR` when unset.
    pub addr: Option<String>,
    /// Host advertised in local directory entries.
    pub ext_host: String,
    /// Port advertised in local directory entries.
    pub ext_port: String,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub max_req_bytes: usize,
    pub max_connections: usize,
    pub handler: Arc<dyn Handler>,
    pub error_log: Arc<dyn ErrorSink>,
}

impl ServerConfig {
    /// Defaults: no timeouts, no external address, errors go to `tracing`.
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            addr: None,
            ext_host: String::new(),
            ext_port: String::new(),
            read_timeout: None,
            write_timeout: None,
            max_req_bytes: DEFAULT_MAX_REQ_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            handler,
            error_log: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("ext_host", &self.ext_host)
            .field("ext_port", &self.ext_port)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_req_bytes", &self.max_req_bytes)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

/// Server instance
pub struct Server {
    config: Arc<ServerConfig>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a server; zero limits are replaced by their defaults.
    pub fn new(mut config: ServerConfig) -> Self {
        if config.max_req_bytes == 0 {
            config.max_req_bytes = DEFAULT_MAX_REQ_BYTES;
        }
        if config.max_connections == 0 {
            config.max_connections = DEFAULT_MAX_CONNECTIONS;
        }

        Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections on `listener` until the listener itself fails.
    ///
    /// Accept errors caused by a single pending connection are logged and
    /// skipped; running out of descriptors or buffers is logged and retried
    /// after a pause. Only other accept errors are returned. Errors on
    /// accepted connections are logged and never returned.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Server listening");
        }

        loop {
            // Wait for a connection slot
            let permit = Arc::clone(&self.connection_limit)
                .acquire_owned()
                .await
                .map_err(io::Error::other)?;

            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => match accept_error_action(&e) {
                    AcceptErrorAction::Skip => {
                        self.config
                            .error_log
                            .log(format_args!("Failed to accept connection: {e}"));
                        continue;
                    }
                    AcceptErrorAction::Backoff => {
                        self.config.error_log.log(format_args!(
                            "Failed to accept connection: {e}; retrying in {ACCEPT_BACKOFF:?}"
                        ));
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                    AcceptErrorAction::Fatal => return Err(e.into()),
                },
            };
            debug!(peer = %peer, "New connection");

            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                handle_connection(config, stream, peer).await;
                drop(permit);
            });
        }
    }

    /// Bind the configured address (or `DEFAULT_ADDR`) and serve on it.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let addr = self
            .config
            .addr
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_ADDR);

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }
}

/// Pause after an accept failure caused by resource exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What the accept loop does after `accept` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptErrorAction {
    /// The error belonged to one pending connection; accept the next.
    Skip,
    /// Out of descriptors or memory; wait, then accept again.
    Backoff,
    /// The listener is unusable.
    Fatal,
}

fn accept_error_action(e: &io::Error) -> AcceptErrorAction {
    use io::ErrorKind::*;

    match e.kind() {
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock
        | TimedOut => AcceptErrorAction::Skip,
        OutOfMemory => AcceptErrorAction::Backoff,
        _ => os_accept_error_action(e),
    }
}

#[cfg(unix)]
fn os_accept_error_action(e: &io::Error) -> AcceptErrorAction {
    match e.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) => {
            AcceptErrorAction::Backoff
        }
        // Network errors already pending on the new socket
        Some(
            libc::EPROTO | libc::ENETDOWN | libc::ENETUNREACH | libc::EHOSTUNREACH
            | libc::EHOSTDOWN | libc::EOPNOTSUPP,
        ) => AcceptErrorAction::Skip,
        _ => AcceptErrorAction::Fatal,
    }
}

#[cfg(not(unix))]
fn os_accept_error_action(_e: &io::Error) -> AcceptErrorAction {
    AcceptErrorAction::Fatal
}

/// Handle a single client connection
async fn handle_connection(config: Arc<ServerConfig>, stream: TcpStream, peer: SocketAddr) {
    let now = Instant::now();
    let read_deadline = config.read_timeout.map(|d| now + d);
    let write_deadline = config.write_timeout.map(|d| now + d);

    let remote_addr = peer.to_string();
    let (reader, writer) = stream.into_split();
    let mut reader = LineReader::new(reader, config.max_req_bytes);

    let content = match with_deadline(read_deadline, reader.read_line()).await {
        Ok(line) => line,
        Err(e) => {
            config
                .error_log
                .log(format_args!("Error reading request from {remote_addr}: {e}"));
            return;
        }
    };

    let request = Request {
        remote_addr,
        content,
    };
    debug!(
        peer = %request.remote_addr,
        selector = %String::from_utf8_lossy(&request.content),
        "Processing request"
    );

    let handler = Arc::clone(&config.handler);
    let mut w = ResponseWriter::new(writer, config, write_deadline);
    handler.serve_gopher(&mut w, &request).await;

    if let Err(e) = w.close().await {
        trace!(peer = %request.remote_addr, error = %e, "Close failed");
    }
    trace!(peer = %request.remote_addr, "Connection closed");
}
