//! remex server
//!
//! Hosts a Boa engine behind a TCP listener. Everything that touches the
//! engine runs on one evaluation thread ([`EvalLoop`]); everything that
//! touches a socket runs on the host's tokio runtime. The
//! [`EvalBridge`] moves commands from the second to the first and results
//! back.
//!
//! Scripts reach the network through the global `remex` object:
//! `connect`, `connectDict`, `close`, `serve`, `async` and `peer`.

pub mod host;
pub mod runtime;
pub mod tcp_server;

pub use host::{Host, HostConfig, Services};
pub use runtime::{EvalBridge, EvalContext, EvalError, EvalHandle, EvalLoop};
pub use tcp_server::TcpServer;
