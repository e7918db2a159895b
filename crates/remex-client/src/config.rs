use std::time::Duration;

/// Client connection configuration.
///
/// Controls reconnect behaviour and how long the engine-facing open
/// primitive waits for the first connection.
///
/// # Default Configuration
///
/// - `max_retries`: 5
/// - `retry_delay`: 5 seconds, doubled after every failed attempt
///
/// Every failed attempt is followed by its delay, the last one included, so
/// a client that never connects gives up after `max_retries` attempts and
/// `retry_delay * (2^max_retries - 1)` of waiting.
/// - `connect_wait`: 2 seconds
///
/// # Example
///
/// ```rust
/// use remex_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_max_retries(3)
///     .with_retry_delay(Duration::from_millis(200));
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Consecutive failed attempts before the client gives up
    pub max_retries: u32,
    /// Wait after the first failure; doubles each further failure
    pub retry_delay: Duration,
    /// Bounded wait for the first connect when opening from the engine
    pub connect_wait: Duration,
}

impl ClientConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_connect_wait(mut self, connect_wait: Duration) -> Self {
        self.connect_wait = connect_wait;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            connect_wait: Duration::from_secs(2),
        }
    }
}
