use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use remex_common::{Command, Value};

use crate::client::NetworkClient;

/// Executes commands a peer pushes over a connection.
///
/// `dispatch` is called from the network context. Implementations must hand
/// the command to their executor before returning (the returned future only
/// waits for the result), so commands are queued in the order they arrived.
/// The future always yields a value; failures are already folded into
/// [`Value::Error`].
pub trait CommandHandler: Send + Sync + 'static {
    /// `origin` is the client connection the command arrived on, or `None` on
    /// the server's accept side.
    fn dispatch(&self, command: Command, origin: Option<Arc<NetworkClient>>)
        -> BoxFuture<'static, Value>;
}

impl<F> CommandHandler for F
where
    F: Fn(Command, Option<Arc<NetworkClient>>) -> Value + Send + Sync + 'static,
{
    fn dispatch(
        &self,
        command: Command,
        origin: Option<Arc<NetworkClient>>,
    ) -> BoxFuture<'static, Value> {
        Box::pin(future::ready(self(command, origin)))
    }
}

/// Handler for clients that expose nothing locally.
///
/// Any pushed command is answered with an error value so the peer does not
/// wait forever.
pub struct Unhandled;

impl CommandHandler for Unhandled {
    fn dispatch(&self, command: Command, _origin: Option<Arc<NetworkClient>>) -> BoxFuture<'static, Value> {
        tracing::warn!(kind = command.kind(), "no local handler for pushed command");
        Box::pin(future::ready(Value::error("internal error")))
    }
}
