//! remex common types and transport
//!
//! This crate holds everything both ends of a remex connection agree on:
//!
//! - **Protocol layer**: the tagged [`Value`] model, [`Command`]s, reply
//!   [`Payload`]s, correlation ids, address parsing and the shared error type
//! - **Transport layer**: the versioned JSON value codec and the framed
//!   message codec used on every TCP connection
//!
//! # Wire format
//!
//! ```text
//! +----------------+----------------+------------------------+
//! | correlation-id | payload length | payload (JSON envelope) |
//! |   16 bytes     |  4 bytes (BE)  |   length bytes          |
//! +----------------+----------------+------------------------+
//! ```
//!
//! There is no handshake and no dedicated error frame. A peer tells a reply
//! from a new command only by whether it is still waiting on the id.
//!
//! # Example
//!
//! ```
//! use remex_common::{Command, MessageCodec, Payload, Value};
//! use uuid::Uuid;
//!
//! let command = Command::call("avg", vec![Value::from(vec![Value::Int(1), Value::Int(2)])]);
//! let frame = MessageCodec::encode(Uuid::new_v4(), &Payload::Command(command)).unwrap();
//! let (_, payload) = MessageCodec::decode(&frame).unwrap();
//! assert!(matches!(payload, Payload::Command(_)));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{JsonCodec, MessageCodec, MessageTransport, MAX_MESSAGE_SIZE};
