//! remex transport layer
//!
//! - **[`JsonCodec`]**: versioned JSON encoding of payloads
//! - **[`MessageCodec`]**: `[16-byte id] [4-byte BE length] [payload]` framing
//! - **[`MessageTransport`]**: async connect/send/receive over tokio streams
//!
//! All framing enforces a maximum payload size of 100 MB.

pub mod codec;
pub mod tcp;

pub use codec::{JsonCodec, MessageCodec, HEADER_LEN, MAX_MESSAGE_SIZE};
pub use tcp::MessageTransport;

#[cfg(test)]
mod tests;
