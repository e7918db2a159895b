use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemexError {
    #[error("connection not established: {0}")]
    NotConnected(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("evaluation loop has stopped")]
    LoopStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemexError {
    /// True for failures caused by the link going away underneath a request.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, RemexError::ConnectionLost(_) | RemexError::ConnectionClosed)
    }
}

impl From<std::net::AddrParseError> for RemexError {
    fn from(err: std::net::AddrParseError) -> Self {
        RemexError::InvalidAddress(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemexError>;
