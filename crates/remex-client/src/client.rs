use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use remex_common::{
    Address, Command, CorrelationId, JsonCodec, MessageCodec, MessageTransport, Payload,
    RemexError, Result, Value,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::handler::CommandHandler;
use crate::pending::{PendingTable, ReplySlot};
use crate::proxy::{Remote, RemoteFunction};
use crate::retry::Backoff;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Where a client is in its connect/reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing, or waiting out a backoff delay between attempts.
    Connecting,
    Connected,
    /// Retries exhausted. Idle, but not closed.
    GaveUp,
    /// Explicitly closed. Terminal.
    Closed,
}

/// The live half of a connection that callers can write into.
struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// One outbound TCP connection with automatic reconnect.
///
/// The connection is symmetric: it carries this side's requests and their
/// replies, and also commands the peer pushes to us. A frame whose id is in
/// the pending table is a reply; any other frame is a command, executed
/// through the client's [`CommandHandler`] and answered under the same id.
///
/// All socket work happens on the tokio runtime the client was created with.
/// [`call`](Self::call) blocks the calling thread and must be used from
/// outside that runtime; async code uses [`call_async`](Self::call_async).
///
/// # Example
///
/// ```no_run
/// use remex_client::{ClientConfig, NetworkClient, Unhandled};
/// use remex_common::{Address, Command};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let client = NetworkClient::connect(
///     Address::parse("8888").unwrap(),
///     ClientConfig::default(),
///     Arc::new(Unhandled),
///     runtime.handle(),
/// );
/// client.wait_connected(Duration::from_secs(2));
/// let value = client.call(Command::eval("1+1")).unwrap();
/// ```
pub struct NetworkClient {
    id: u64,
    address: Address,
    endpoint: String,
    config: ClientConfig,
    runtime: Handle,
    handler: Arc<dyn CommandHandler>,
    pending: PendingTable,
    link: Mutex<Option<Link>>,
    state: watch::Sender<ConnectionState>,
    closing: watch::Sender<bool>,
    attempts: AtomicU32,
    task: Mutex<Option<JoinHandle<()>>>,
    this: Weak<NetworkClient>,
}

impl NetworkClient {
    /// Creates the client and starts connecting in the background.
    ///
    /// Returns immediately; the first connect may still be in progress.
    pub fn connect(
        address: Address,
        config: ClientConfig,
        handler: Arc<dyn CommandHandler>,
        runtime: &Handle,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (closing, _) = watch::channel(false);
        let client = Arc::new_cyclic(|this| Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            endpoint: address.connect_endpoint(),
            address,
            config,
            runtime: runtime.clone(),
            handler,
            pending: PendingTable::new(),
            link: Mutex::new(None),
            state,
            closing,
            attempts: AtomicU32::new(0),
            task: Mutex::new(None),
            this: this.clone(),
        });

        let task = runtime.spawn(Arc::clone(&client).run());
        *lock(&client.task) = Some(task);
        client
    }

    /// Process-unique id, used to look clients up from engine values.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True until [`close`](Self::close) is called.
    pub fn is_open(&self) -> bool {
        !*self.closing.borrow()
    }

    /// Consecutive failed connects since the last successful one.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends `command` and blocks the calling thread until its reply.
    ///
    /// Fails at once with "connection not established" when there is no live
    /// connection, and with "connection lost" when the connection drops (or
    /// the client is closed) while waiting.
    pub fn call(&self, command: Command) -> Result<Value> {
        let slot = self.submit(command)?;
        slot.blocking_recv()
            .map_err(|_| RemexError::ConnectionLost(self.endpoint.clone()))?
    }

    /// Async counterpart of [`call`](Self::call).
    pub async fn call_async(&self, command: Command) -> Result<Value> {
        let slot = self.submit(command)?;
        slot.await
            .map_err(|_| RemexError::ConnectionLost(self.endpoint.clone()))?
    }

    /// Uses the client as a callable.
    ///
    /// The value becomes a command by the list-head rule of
    /// [`Command::from_value`]. Asking for a symbol whose remote value is a
    /// function yields a proxy for that function.
    pub fn apply(self: &Arc<Self>, value: Value) -> Result<Remote> {
        let symbol = value.as_symbol().map(str::to_owned);
        let reply = self.call(Command::from_value(value))?;
        match (symbol, reply) {
            (Some(name), Value::FnRef { arity }) => Ok(Remote::Function(RemoteFunction::new(
                Arc::clone(self),
                name,
                arity,
            )?)),
            (_, value) => Ok(Remote::Value(value)),
        }
    }

    /// Blocks until connected, the client gives up or closes, or `timeout`.
    ///
    /// Inside the client's runtime this cannot block and only reports the
    /// current state.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        if self.is_connected() || Handle::try_current().is_ok() {
            return self.is_connected();
        }
        let mut state = self.state.subscribe();
        self.runtime.block_on(async move {
            tokio::time::timeout(timeout, wait_for_connection(&mut state))
                .await
                .unwrap_or(false)
        })
    }

    /// Resolves once connected; `false` if the client gave up or closed.
    pub async fn connected(&self) -> bool {
        let mut state = self.state.subscribe();
        wait_for_connection(&mut state).await
    }

    /// Closes the client.
    ///
    /// Cancels any connect or backoff in progress, closes the socket, and
    /// fails every pending request with "connection lost". Outside the
    /// runtime this waits until the socket is released. Returns `false` when
    /// the client was already closed.
    pub fn close(&self) -> bool {
        let closed_now = self.signal_close();
        if Handle::try_current().is_err() {
            let task = lock(&self.task).take();
            if let Some(task) = task {
                let _ = self.runtime.block_on(task);
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        closed_now
    }

    /// Async counterpart of [`close`](Self::close).
    pub async fn close_async(&self) -> bool {
        let closed_now = self.signal_close();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.state.send_replace(ConnectionState::Closed);
        closed_now
    }

    fn signal_close(&self) -> bool {
        let closed_now = !self.closing.send_replace(true);
        if closed_now {
            tracing::info!(client = self.id, endpoint = %self.endpoint, "closing client");
        }
        closed_now
    }

    /// Registers a reply slot and queues the encoded command.
    ///
    /// Runs under the link lock so a concurrent teardown either sees the new
    /// entry in its sweep or makes this call fail with "not established".
    fn submit(&self, command: Command) -> Result<ReplySlot> {
        let link = lock(&self.link);
        let link = link
            .as_ref()
            .ok_or_else(|| RemexError::NotConnected(self.endpoint.clone()))?;

        let (id, slot) = self.pending.register();
        let kind = command.kind();
        let frame = match MessageCodec::encode(id, &Payload::Command(command)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.remove(id);
                return Err(e);
            }
        };
        if link.outbound.send(frame).is_err() {
            self.pending.remove(id);
            return Err(RemexError::ConnectionLost(self.endpoint.clone()));
        }

        tracing::debug!(client = self.id, %id, kind, "request sent");
        Ok(slot)
    }

    /// Connect/reconnect loop; owns the socket for the client's lifetime.
    async fn run(self: Arc<Self>) {
        let mut closing = self.closing.subscribe();
        let mut backoff = Backoff::new(self.config.retry_delay, self.config.max_retries);

        loop {
            if *closing.borrow() {
                break;
            }
            if backoff.exhausted() {
                tracing::warn!(
                    client = self.id,
                    endpoint = %self.endpoint,
                    attempts = backoff.attempts(),
                    "giving up on connection"
                );
                self.state.send_replace(ConnectionState::GaveUp);
                return;
            }
            self.state.send_replace(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = MessageTransport::connect(&self.address) => result,
                _ = wait_for_close(&mut closing) => break,
            };

            match connected {
                Ok(stream) => {
                    backoff.reset();
                    self.attempts.store(0, Ordering::Relaxed);
                    tracing::info!(client = self.id, endpoint = %self.endpoint, "connected");

                    let outcome = self.session(stream, &mut closing).await;
                    if *closing.borrow() {
                        break;
                    }
                    if let Err(e) = outcome {
                        tracing::warn!(client = self.id, endpoint = %self.endpoint, error = %e, "connection lost");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        client = self.id,
                        endpoint = %self.endpoint,
                        attempt = backoff.attempts() + 1,
                        error = %e,
                        "connect failed"
                    );
                }
            }

            let delay = backoff.next_delay();
            self.attempts.store(backoff.attempts(), Ordering::Relaxed);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_close(&mut closing) => break,
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        tracing::info!(client = self.id, endpoint = %self.endpoint, "client closed");
    }

    /// Serves one established connection until it fails or the client closes.
    async fn session(&self, stream: TcpStream, closing: &mut watch::Receiver<bool>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        *lock(&self.link) = Some(Link {
            outbound: outbound.clone(),
        });
        self.state.send_replace(ConnectionState::Connected);

        let mut writer_task = tokio::spawn(write_loop(writer, queue));

        let outcome = tokio::select! {
            result = self.read_loop(&mut reader, &outbound) => result,
            result = &mut writer_task => match result {
                Ok(Ok(())) => Err(RemexError::ConnectionClosed),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(RemexError::Connection(e.to_string())),
            },
            _ = wait_for_close(closing) => Ok(()),
        };

        // No new request can register once the link is gone, so the sweep
        // below sees every entry that will ever exist for this connection.
        lock(&self.link).take();
        drop(outbound);
        let failed = self.pending.fail_all(&self.endpoint);
        if failed > 0 {
            tracing::warn!(client = self.id, endpoint = %self.endpoint, failed, "failed pending requests");
        }

        if !writer_task.is_finished() {
            writer_task.abort();
            let _ = (&mut writer_task).await;
        }
        outcome
    }

    /// Reads frames until the connection fails.
    async fn read_loop(
        &self,
        reader: &mut OwnedReadHalf,
        outbound: &mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<()> {
        loop {
            let (id, body) = MessageTransport::receive_frame(reader).await?;
            let payload = match JsonCodec::decode_payload(&body) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(client = self.id, %id, error = %e, "undecodable payload");
                    if !self.pending.fail(id, RemexError::InvalidResponse(e.to_string())) {
                        queue_reply(outbound, id, Value::error("internal error"));
                    }
                    continue;
                }
            };

            match self.pending.complete(id, payload) {
                None => tracing::debug!(client = self.id, %id, "reply matched"),
                Some(unmatched) => self.dispatch_inbound(id, unmatched.into_command(), outbound),
            }
        }
    }

    /// Hands a pushed command to the handler and answers it when done.
    ///
    /// The handler enqueues before returning, so arrival order is kept; the
    /// reply is awaited off the receive loop so our own replies keep flowing.
    fn dispatch_inbound(
        &self,
        id: CorrelationId,
        command: Command,
        outbound: &mpsc::UnboundedSender<Vec<u8>>,
    ) {
        tracing::debug!(client = self.id, %id, kind = command.kind(), "inbound command");
        let reply = self.handler.dispatch(command, self.this.upgrade());
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let value = reply.await;
            queue_reply(&outbound, id, value);
        });
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<()> {
    while let Some(frame) = queue.recv().await {
        MessageTransport::send_frame(&mut writer, &frame).await?;
    }
    Ok(())
}

fn queue_reply(outbound: &mpsc::UnboundedSender<Vec<u8>>, id: CorrelationId, value: Value) {
    let frame = match MessageCodec::encode_reply(id, value) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(%id, error = %e, "failed to encode reply");
            return;
        }
    };
    if outbound.send(frame).is_err() {
        tracing::debug!(%id, "connection gone before reply could be sent");
    }
}

async fn wait_for_close(closing: &mut watch::Receiver<bool>) {
    while !*closing.borrow_and_update() {
        if closing.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_for_connection(state: &mut watch::Receiver<ConnectionState>) -> bool {
    loop {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Connected => return true,
            ConnectionState::GaveUp | ConnectionState::Closed => return false,
            ConnectionState::Connecting => {}
        }
        if state.changed().await.is_err() {
            return false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
