//! One-shot remote evaluation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use remex_client::{ClientConfig, NetworkClient, Unhandled};
use remex_common::{Address, Command, Value};

/// Evaluates `expression` on the host at `address`.
///
/// Waits at most `connect_wait` for the connection. A remote error value is
/// turned into an `Err` so the process exits non-zero.
pub fn run_call(address: &str, expression: &str, connect_wait: Duration) -> Result<Value> {
    let address = Address::parse(address).with_context(|| format!("invalid address '{}'", address))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("remex-net")
        .enable_all()
        .build()?;

    // One attempt, and no waiting after it fails.
    let config = ClientConfig::default()
        .with_max_retries(1)
        .with_retry_delay(Duration::ZERO)
        .with_connect_wait(connect_wait);
    let client = NetworkClient::connect(address.clone(), config, Arc::new(Unhandled), runtime.handle());
    if !client.wait_connected(connect_wait) {
        client.close();
        bail!("could not connect to {}", address);
    }

    let result = client.call(Command::eval(expression));
    client.close();
    runtime.shutdown_background();

    match result? {
        Value::Error(message) => bail!("remote error: {}", message),
        value => Ok(value),
    }
}
