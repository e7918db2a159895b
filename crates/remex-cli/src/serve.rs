//! Hosting a script.

use std::path::Path;

use anyhow::{Context, Result};
use remex_common::Address;
use remex_server::{Host, HostConfig};

/// Loads `script` into a fresh host and starts its server on `bind`.
///
/// The host keeps serving until it is dropped.
pub fn start_host(script: &Path, bind: &str, config: HostConfig) -> Result<Host> {
    let address = Address::parse(bind).with_context(|| format!("invalid bind address '{}'", bind))?;
    if address.is_stop_request() {
        anyhow::bail!("port 0 without a host stops a server; use e.g. 0.0.0.0:0 for a random port");
    }

    let host = Host::with_config(config)?;
    host.eval_file(script)
        .with_context(|| format!("failed to load {}", script.display()))?;

    let local_addr = host
        .serve(&address)?
        .context("a server is already running on this host")?;
    tracing::info!(addr = %local_addr, script = %script.display(), "serving");
    Ok(host)
}

/// Runs [`start_host`] and serves until Ctrl-C.
pub fn run_serve(script: &Path, bind: &str, config: HostConfig) -> Result<()> {
    let host = start_host(script, bind, config)?;
    host.runtime()
        .block_on(tokio::signal::ctrl_c())
        .context("failed to wait for Ctrl-C")?;
    tracing::info!("shutting down");
    host.shutdown();
    Ok(())
}
