//! Address specs shared by client-open and server-start.
//!
//! | input        | host        | port |
//! |--------------|-------------|------|
//! | `8888`       | default     | 8888 |
//! | `"8888"`     | default     | 8888 |
//! | `"h:8888"`   | `h`         | 8888 |
//!
//! The default host is `localhost` when connecting and every interface when
//! binding. A bare port `0` handed to the server means "stop".

use std::fmt;
use std::str::FromStr;

use crate::protocol::error::{RemexError, Result};

/// Host used when a client address names only a port.
pub const DEFAULT_HOST: &str = "localhost";

/// Interface used when a bind spec names only a port.
pub const DEFAULT_BIND: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: Option<String>,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            host: (!host.is_empty()).then_some(host),
            port,
        }
    }

    /// A port-only address.
    pub fn port_only(port: u16) -> Self {
        Self { host: None, port }
    }

    /// Builds an address from an engine integer.
    pub fn from_port_number(port: i64) -> Result<Self> {
        u16::try_from(port)
            .map(Self::port_only)
            .map_err(|_| RemexError::InvalidAddress(format!("port {} out of range", port)))
    }

    /// Parses `"H:P"` or a bare `"P"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        match spec.rsplit_once(':') {
            Some((host, port)) => Ok(Self::new(host, parse_port(port, spec)?)),
            None => Ok(Self::port_only(parse_port(spec, spec)?)),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host to dial, falling back to [`DEFAULT_HOST`].
    pub fn connect_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    /// Interface to listen on, falling back to [`DEFAULT_BIND`].
    pub fn bind_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_BIND)
    }

    /// `"host:port"` suitable for resolving as a client endpoint.
    pub fn connect_endpoint(&self) -> String {
        format!("{}:{}", self.connect_host(), self.port)
    }

    /// `"host:port"` suitable for binding a listener.
    pub fn bind_endpoint(&self) -> String {
        format!("{}:{}", self.bind_host(), self.port)
    }

    /// A bare port 0: the server-side request to shut down.
    pub fn is_stop_request(&self) -> bool {
        self.host.is_none() && self.port == 0
    }
}

fn parse_port(port: &str, spec: &str) -> Result<u16> {
    port.trim()
        .parse::<u16>()
        .map_err(|e| RemexError::InvalidAddress(format!("'{}': {}", spec, e)))
}

impl FromStr for Address {
    type Err = RemexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<u16> for Address {
    fn from(port: u16) -> Self {
        Self::port_only(port)
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connect_host(), self.port)
    }
}
