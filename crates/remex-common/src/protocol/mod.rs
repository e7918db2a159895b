pub mod address;
pub mod error;
pub mod message;
pub mod value;


pub use address::Address;
pub use error::{RemexError, Result};
pub use message::{Command, CorrelationId, Payload, PAYLOAD_VERSION};
pub use value::{Value, MAX_VALUE_DEPTH};
