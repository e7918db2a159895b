use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use remex_client::CommandHandler;
use remex_common::{Address, JsonCodec, MessageCodec, MessageTransport, RemexError, Result, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// TCP server that executes the commands its peers send.
///
/// At most one listener is active at a time. Each accepted connection is
/// served by its own task: frames are read, handed to the [`CommandHandler`]
/// and answered under the same correlation id, one at a time. A failing
/// command never closes the connection; only I/O errors do.
pub struct TcpServer {
    runtime: Handle,
    active: Mutex<Option<ActiveServer>>,
}

struct ActiveServer {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    registry: Arc<ConnectionRegistry>,
}

impl TcpServer {
    /// Creates a stopped server whose tasks will run on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            active: Mutex::new(None),
        }
    }

    /// Starts listening on `address`.
    ///
    /// Returns the bound address, or `None` without touching anything when a
    /// listener is already active.
    pub fn start(&self, address: &Address, handler: Arc<dyn CommandHandler>) -> Result<Option<SocketAddr>> {
        let mut active = lock(&self.active);
        if let Some(server) = active.as_ref() {
            tracing::warn!(addr = %server.local_addr, "server already running");
            return Ok(None);
        }

        let endpoint = address.bind_endpoint();
        let std_listener = std::net::TcpListener::bind(&endpoint)
            .map_err(|e| RemexError::Connection(format!("Failed to bind to {}: {}", endpoint, e)))?;
        std_listener.set_nonblocking(true)?;
        let listener = {
            let _guard = self.runtime.enter();
            TcpListener::from_std(std_listener)?
        };
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::default());
        let accept = self
            .runtime
            .spawn(accept_loop(listener, handler, Arc::clone(&registry)));

        tracing::info!(addr = %local_addr, "server listening");
        *active = Some(ActiveServer {
            local_addr,
            accept,
            registry,
        });
        Ok(Some(local_addr))
    }

    /// Stops listening and closes every open connection.
    ///
    /// Requests in flight on those connections fail on the peer's side with
    /// "connection lost". Returns whether a server was running.
    pub fn shutdown(&self) -> bool {
        let Some(server) = lock(&self.active).take() else {
            return false;
        };

        server.accept.abort();
        let closed = server.registry.close_all();
        if Handle::try_current().is_err() {
            let _ = self.runtime.block_on(server.accept);
        }
        tracing::info!(addr = %server.local_addr, connections = closed, "server stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.active).as_ref().map(|server| server.local_addr)
    }

    /// Number of connections currently being served.
    pub fn connection_count(&self) -> usize {
        lock(&self.active)
            .as_ref()
            .map(|server| server.registry.len())
            .unwrap_or(0)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        if let Some(server) = lock(&self.active).take() {
            server.accept.abort();
            server.registry.close_all();
        }
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<dyn CommandHandler>, registry: Arc<ConnectionRegistry>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let Some((id, close)) = registry.register() else {
            break;
        };
        tracing::info!(%peer, connection = id, "connection established");

        let handler = Arc::clone(&handler);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = serve_connection(stream, handler.as_ref()) => result,
                _ = close => Ok(()),
            };
            match outcome {
                Ok(()) | Err(RemexError::ConnectionClosed) => {
                    tracing::info!(%peer, connection = id, "connection closed");
                }
                Err(e) => tracing::warn!(%peer, connection = id, error = %e, "connection error"),
            }
            registry.remove(id);
        });
    }
}

/// Handles frames on one connection until it fails.
async fn serve_connection(mut stream: TcpStream, handler: &dyn CommandHandler) -> Result<()> {
    loop {
        let (id, body) = MessageTransport::receive_frame(&mut stream).await?;

        let reply = match JsonCodec::decode_payload(&body) {
            Ok(payload) => {
                let command = payload.into_command();
                tracing::debug!(%id, kind = command.kind(), "command received");
                handler.dispatch(command, None).await
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "failed to decode payload");
                Value::error("internal error")
            }
        };

        let frame = MessageCodec::encode_reply(id, reply)?;
        MessageTransport::send_frame(&mut stream, &frame).await?;
    }
}

/// The connections of one active server.
///
/// Removal is idempotent, and once [`close_all`](Self::close_all) ran no new
/// connection can register.
#[derive(Default)]
struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    connections: HashMap<u64, oneshot::Sender<()>>,
    closed: bool,
}

impl ConnectionRegistry {
    fn register(&self) -> Option<(u64, oneshot::Receiver<()>)> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return None;
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let (tx, rx) = oneshot::channel();
        inner.connections.insert(id, tx);
        Some((id, rx))
    }

    fn remove(&self, id: u64) -> bool {
        lock(&self.inner).connections.remove(&id).is_some()
    }

    /// Signals every connection to close; returns how many there were.
    fn close_all(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        let connections: Vec<_> = inner.connections.drain().collect();
        let count = connections.len();
        for (_, close) in connections {
            let _ = close.send(());
        }
        count
    }

    fn len(&self) -> usize {
        lock(&self.inner).connections.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
