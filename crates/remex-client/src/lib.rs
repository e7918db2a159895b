//! remex client
//!
//! A [`NetworkClient`] owns one reconnecting TCP connection to a peer and
//! turns it into a blocking `call(command) -> value`. The same connection
//! also carries commands the peer pushes back; those go to the client's
//! [`CommandHandler`].
//!
//! [`RemoteFunction`] and [`RemoteDict`] wrap a client so a remote function
//! or the remote global namespace can be used like local ones.

pub mod client;
pub mod config;
pub mod handler;
pub mod pending;
pub mod proxy;
pub mod retry;

pub use client::{ConnectionState, NetworkClient};
pub use config::ClientConfig;
pub use handler::{CommandHandler, Unhandled};
pub use pending::PendingTable;
pub use proxy::{Remote, RemoteDict, RemoteFunction, MAX_ARITY};
pub use retry::Backoff;
