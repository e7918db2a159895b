use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use remex_client::{ClientConfig, CommandHandler, ConnectionState, NetworkClient};
use remex_common::{Address, Command, RemexError, Result, Value};
use tokio::runtime::{Handle, Runtime};

use crate::runtime::{dispatch, EvalBridge, EvalContext, EvalHandle, EvalLoop};
use crate::tcp_server::TcpServer;

/// Configuration for a [`Host`].
///
/// # Example
///
/// ```
/// use remex_server::HostConfig;
/// use remex_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = HostConfig::default()
///     .with_client(ClientConfig::default().with_retry_delay(Duration::from_millis(100)))
///     .with_network_threads(2);
/// ```
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Settings for every client the host opens
    pub client: ClientConfig,
    /// Worker threads of the network runtime (at least 1)
    pub network_threads: usize,
}

impl HostConfig {
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_network_threads(mut self, network_threads: usize) -> Self {
        self.network_threads = network_threads;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            network_threads: 1,
        }
    }
}

/// The network-facing state of a host, shared with the engine bindings.
pub struct Services {
    runtime: Handle,
    config: HostConfig,
    server: TcpServer,
    clients: Mutex<HashMap<u64, Arc<NetworkClient>>>,
    eval: EvalHandle,
}

impl Services {
    fn new(runtime: Handle, config: HostConfig, eval: EvalHandle) -> Self {
        Self {
            server: TcpServer::new(runtime.clone()),
            runtime,
            config,
            clients: Mutex::new(HashMap::new()),
            eval,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// A handler that runs pushed commands on this host's evaluation loop.
    pub fn bridge(&self) -> Arc<dyn CommandHandler> {
        Arc::new(EvalBridge::new(self.eval.clone()))
    }

    /// Opens a client and remembers it until it is closed or gives up.
    ///
    /// Returns at once; the connection is established in the background.
    /// Commands the peer pushes over it run on this host's evaluation loop.
    ///
    /// Opening also sweeps the registry: clients that were closed are
    /// forgotten, and clients that ran out of retries are closed and
    /// forgotten.
    ///
    /// # Arguments
    /// * `address` - Peer to dial; a port-only address dials localhost
    ///
    /// # Returns
    /// The new client, registered under [`NetworkClient::id`]
    pub fn open_client(&self, address: Address) -> Arc<NetworkClient> {
        let client = NetworkClient::connect(
            address,
            self.config.client.clone(),
            self.bridge(),
            &self.runtime,
        );
        let given_up = {
            let mut clients = lock(&self.clients);
            let mut given_up = Vec::new();
            clients.retain(|_, existing| match existing.state() {
                ConnectionState::Closed => false,
                ConnectionState::GaveUp => {
                    given_up.push(Arc::clone(existing));
                    false
                }
                ConnectionState::Connecting | ConnectionState::Connected => true,
            });
            clients.insert(client.id(), Arc::clone(&client));
            given_up
        };
        for stale in given_up {
            tracing::debug!(client = stale.id(), endpoint = %stale.address(), "dropping client that gave up");
            stale.close();
        }
        client
    }

    /// An open client by id.
    pub fn client(&self, id: u64) -> Option<Arc<NetworkClient>> {
        lock(&self.clients)
            .get(&id)
            .filter(|client| client.is_open())
            .cloned()
    }

    /// Closes and forgets a client.
    ///
    /// # Returns
    /// `false` if the id was unknown or the client was already closed
    pub fn close_client(&self, id: u64) -> bool {
        let client = lock(&self.clients).remove(&id);
        client.map(|client| client.close()).unwrap_or(false)
    }

    pub fn close_all_clients(&self) -> usize {
        let clients: Vec<_> = lock(&self.clients).drain().map(|(_, client)| client).collect();
        clients.iter().filter(|client| client.close()).count()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).values().filter(|client| client.is_open()).count()
    }

    /// Starts the server; commands it receives run on the evaluation loop.
    ///
    /// # Arguments
    /// * `address` - Bind spec; a port-only address binds all interfaces
    ///
    /// # Returns
    /// The bound address, or `None` if a server is already running
    ///
    /// # Errors
    /// Fails when the address cannot be bound.
    pub fn serve(&self, address: &Address) -> Result<Option<SocketAddr>> {
        self.server.start(address, self.bridge())
    }

    /// Stops the server; `false` if none was running.
    pub fn stop_server(&self) -> bool {
        self.server.shutdown()
    }

    pub fn server(&self) -> &TcpServer {
        &self.server
    }
}

/// An engine with its network context: one evaluation loop, one tokio
/// runtime for all sockets, at most one listening server and any number of
/// clients.
///
/// The blocking methods must be called from plain threads, never from
/// inside an async runtime.
///
/// # Example
///
/// ```no_run
/// use remex_server::Host;
/// use remex_common::{Address, Command, Value};
///
/// let host = Host::new().unwrap();
/// host.eval("function avg(xs) { return xs.reduce((a, b) => a + b, 0) / xs.length; }").unwrap();
/// host.serve(&Address::parse("8888").unwrap()).unwrap();
/// ```
pub struct Host {
    runtime: Option<Runtime>,
    services: Arc<Services>,
    eval_loop: EvalLoop,
}

impl Host {
    pub fn new() -> Result<Self> {
        Self::with_config(HostConfig::default())
    }

    /// Creates a host with custom configuration.
    ///
    /// # Arguments
    /// * `config` - Client settings and network runtime size
    ///
    /// # Returns
    /// A host with an idle evaluation loop, no server and no clients
    ///
    /// # Behavior
    /// - Builds the `remex-net` runtime with `config.network_threads` workers
    /// - Starts the `remex-eval` thread and installs the `remex` bindings
    pub fn with_config(config: HostConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.network_threads.max(1))
            .thread_name("remex-net")
            .enable_all()
            .build()?;

        let (eval, receiver) = EvalLoop::channel();
        let services = Arc::new(Services::new(runtime.handle().clone(), config, eval.clone()));

        let engine_services = Arc::clone(&services);
        let eval_loop = EvalLoop::start(eval, receiver, move || {
            Ok(EvalContext::with_services(engine_services)?)
        })?;

        Ok(Self {
            runtime: Some(runtime),
            services,
            eval_loop,
        })
    }

    /// Evaluates `source` on the evaluation loop and waits for the result.
    ///
    /// Pending promise jobs and deferred async calls run before this returns.
    ///
    /// # Arguments
    /// * `source` - JavaScript source text
    ///
    /// # Returns
    /// The completion value, converted to a wire [`Value`]
    ///
    /// # Errors
    /// `Evaluation` when the script throws, `LoopStopped` after shutdown.
    pub fn eval(&self, source: &str) -> Result<Value> {
        let source = source.to_string();
        self.eval_handle()
            .run(move |ctx| ctx.eval_value(&source))?
            .map_err(RemexError::from)
    }

    /// Loads and evaluates a script file.
    ///
    /// # Errors
    /// `InvalidRequest` when the file cannot be read, otherwise as [`eval`](Self::eval).
    pub fn eval_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RemexError::InvalidRequest(format!("Failed to load script {}: {}", path.display(), e))
        })?;
        tracing::info!(script = %path.display(), "loading script");
        self.eval(&source)
    }

    /// Binds a global name.
    pub fn define(&self, name: &str, value: Value) -> Result<()> {
        let name = name.to_string();
        self.eval_handle()
            .run(move |ctx| ctx.define_value(&name, value))?
            .map_err(RemexError::from)
    }

    pub fn lookup(&self, name: &str) -> Result<Value> {
        let name = name.to_string();
        self.eval_handle()
            .run(move |ctx| ctx.lookup_value(&name))?
            .map_err(RemexError::from)
    }

    /// Runs a command locally exactly as if a peer had sent it.
    ///
    /// # Returns
    /// The reply a peer would get: the result, `"symbol not found: <name>"`
    /// or `"internal error"`
    pub fn execute(&self, command: Command) -> Result<Value> {
        self.eval_handle()
            .run(move |ctx| dispatch::execute(ctx, command, None))
    }

    /// Starts the server. `None` if one is already running.
    pub fn serve(&self, address: &Address) -> Result<Option<SocketAddr>> {
        self.services.serve(address)
    }

    pub fn stop_server(&self) -> bool {
        self.services.stop_server()
    }

    /// Opens a client whose inbound commands run on this host's engine.
    ///
    /// See [`Services::open_client`]. The client is closed when the host
    /// shuts down.
    ///
    /// # Example
    /// ```no_run
    /// use remex_server::Host;
    /// use remex_common::{Address, Command};
    /// use std::time::Duration;
    ///
    /// let host = Host::new().unwrap();
    /// let client = host.connect(Address::parse("127.0.0.1:8888").unwrap());
    /// if client.wait_connected(Duration::from_secs(2)) {
    ///     let value = client.call(Command::eval("1 + 1")).unwrap();
    /// }
    /// ```
    pub fn connect(&self, address: Address) -> Arc<NetworkClient> {
        self.services.open_client(address)
    }

    /// The network context runtime.
    pub fn runtime(&self) -> &Handle {
        &self.services.runtime
    }

    pub fn eval_handle(&self) -> &EvalHandle {
        self.eval_loop.handle()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Stops the server, closes every client, stops the evaluation loop and
    /// shuts the network runtime down.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.services.stop_server();
        let closed = self.services.close_all_clients();
        self.eval_loop.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        tracing::debug!(clients = closed, "host shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
