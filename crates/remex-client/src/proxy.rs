//! Local stand-ins for remote functions and remote dictionaries.
//!
//! Proxies hold nothing but a shared client reference, so they are cheap to
//! create whenever a remote callable shows up. They never cache: every
//! operation goes over the wire, and every operation on a closed client fails.

use std::sync::Arc;

use remex_common::{Command, RemexError, Result, Value};

use crate::client::NetworkClient;

/// Largest arity a remote function proxy accepts.
pub const MAX_ARITY: usize = 16;

/// A remote function, callable with a fixed number of arguments.
///
/// Each call sends `FunctionCall(symbol, args)` over the client and blocks
/// for the reply, so it must not be used from inside the client's runtime.
///
/// # Example
///
/// ```no_run
/// use remex_client::{Remote, RemoteDict};
/// # use remex_client::NetworkClient;
/// # use remex_common::Value;
/// # fn example(client: std::sync::Arc<NetworkClient>) -> remex_common::Result<()> {
/// let dict = RemoteDict::new(client);
/// if let Remote::Function(avg) = dict.get(Value::symbol("avg"))? {
///     let xs: Value = (0..100).map(Value::from).collect();
///     assert_eq!(avg.call(vec![xs])?, Value::Float(49.5));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RemoteFunction {
    client: Arc<NetworkClient>,
    symbol: String,
    arity: usize,
}

impl RemoteFunction {
    /// Wraps the remote function `symbol`.
    ///
    /// # Arguments
    /// * `client` - Connection the calls go over
    /// * `symbol` - Name of the function on the peer
    /// * `arity` - Declared parameter count, as reported in [`Value::FnRef`]
    ///
    /// # Errors
    /// `InvalidResponse` when `arity` exceeds [`MAX_ARITY`].
    pub fn new(client: Arc<NetworkClient>, symbol: impl Into<String>, arity: usize) -> Result<Self> {
        if arity > MAX_ARITY {
            return Err(RemexError::InvalidResponse(format!(
                "remote function arity {} exceeds the maximum of {}",
                arity, MAX_ARITY
            )));
        }
        Ok(Self {
            client,
            symbol: symbol.into(),
            arity,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn client(&self) -> &Arc<NetworkClient> {
        &self.client
    }

    /// Calls the remote function with exactly [`arity`](Self::arity) arguments.
    ///
    /// # Returns
    /// The remote result. A failure on the peer is a value too:
    /// `Value::Error("symbol not found: ...")` or `Value::Error("internal error")`.
    ///
    /// # Errors
    /// - `InvalidRequest` for a wrong argument count or an unencodable argument
    /// - `NotConnected` / `ConnectionLost` from the client
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        if args.len() != self.arity {
            return Err(RemexError::InvalidRequest(format!(
                "{} expects {} argument(s), got {}",
                self.symbol,
                self.arity,
                args.len()
            )));
        }
        self.client.call(Command::call(self.symbol.clone(), args))
    }
}

/// A remote key/value store, backed by the peer's global names.
///
/// `get` and `set` map to `DictGet` and `DictSet`. Membership tests are not
/// supported: the peer cannot answer one without sending the value.
#[derive(Debug, Clone)]
pub struct RemoteDict {
    client: Arc<NetworkClient>,
}

impl RemoteDict {
    pub fn new(client: Arc<NetworkClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<NetworkClient> {
        &self.client
    }

    /// Fetches `key` from the peer.
    ///
    /// # Arguments
    /// * `key` - A symbol or string naming the remote global
    ///
    /// # Returns
    /// [`Remote::Function`] bound to this client when the remote value is a
    /// function, [`Remote::Value`] otherwise (including not-found errors)
    pub fn get(&self, key: impl Into<Value>) -> Result<Remote> {
        let key = key.into();
        let name = key.as_symbol().or_else(|| key.as_str()).map(str::to_owned);
        match (name, self.client.call(Command::DictGet { key })?) {
            (Some(name), Value::FnRef { arity }) => Ok(Remote::Function(RemoteFunction::new(
                Arc::clone(&self.client),
                name,
                arity,
            )?)),
            (_, value) => Ok(Remote::Value(value)),
        }
    }

    /// Stores `value` under `key` and returns the handle for chaining.
    ///
    /// # Errors
    /// `Evaluation` when the peer reports a failure, plus the client's
    /// connection errors.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<&Self> {
        let reply = self.client.call(Command::set(key, value))?;
        if let Value::Error(message) = reply {
            return Err(RemexError::Evaluation(message));
        }
        Ok(self)
    }

    /// Always fails: the remote side cannot answer membership without
    /// returning the value itself.
    pub fn contains(&self, _key: impl Into<Value>) -> Result<bool> {
        Err(RemexError::Unsupported("membership test on a remote dict"))
    }
}

/// The local view of something fetched from a peer.
#[derive(Debug, Clone)]
pub enum Remote {
    Value(Value),
    Function(RemoteFunction),
}

impl Remote {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Remote::Value(value) => Some(value),
            Remote::Function(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Remote::Value(value) => Some(value),
            Remote::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&RemoteFunction> {
        match self {
            Remote::Function(function) => Some(function),
            Remote::Value(_) => None,
        }
    }
}
