use serde::{Deserialize, Serialize};

use crate::protocol::error::{RemexError, Result};
use crate::protocol::message::{CorrelationId, Payload, PAYLOAD_VERSION};
use crate::protocol::value::Value;

/// Bytes taken by the correlation id at the start of a frame.
pub const ID_LEN: usize = 16;

/// Correlation id plus the big-endian length prefix.
pub const HEADER_LEN: usize = ID_LEN + 4;

/// Largest payload a peer may announce (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u8,
    payload: &'a Payload,
}

#[derive(Deserialize)]
struct Envelope {
    v: u8,
    payload: serde_json::Value,
}

/// Versioned JSON encoding of a [`Payload`].
///
/// Every payload is wrapped as `{"v": 1, "payload": ...}`. Decoding checks the
/// version before looking at the payload, so an unknown version is reported as
/// such instead of as a confusing shape error.
///
/// Encoding refuses payloads the peer could not decode back into an equal
/// value (see [`Value::validate`]).
///
/// # Example
///
/// ```
/// use remex_common::{JsonCodec, Payload, Value};
///
/// let encoded = JsonCodec::encode_payload(&Payload::Value(Value::Int(2))).unwrap();
/// let decoded = JsonCodec::decode_payload(&encoded).unwrap();
/// assert_eq!(decoded, Payload::Value(Value::Int(2)));
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>> {
        payload.validate()?;
        Ok(serde_json::to_vec(&EnvelopeRef {
            v: PAYLOAD_VERSION,
            payload,
        })?)
    }

    pub fn decode_payload(data: &[u8]) -> Result<Payload> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        if envelope.v != PAYLOAD_VERSION {
            return Err(RemexError::UnsupportedVersion(envelope.v));
        }
        Ok(serde_json::from_value(envelope.payload)?)
    }
}

/// Frames a `(correlation id, payload)` pair.
///
/// ```text
/// [16-byte correlation id] [4-byte length as u32 big-endian] [payload]
/// ```
pub struct MessageCodec;

impl MessageCodec {
    /// Encodes the payload and frames it under `id`.
    pub fn encode(id: CorrelationId, payload: &Payload) -> Result<Vec<u8>> {
        let body = JsonCodec::encode_payload(payload)?;
        Self::frame(id, &body)
    }

    /// Frames a reply value under `id`.
    ///
    /// A value that cannot be framed (too large, too deep, or a non-finite
    /// float) is replaced by an
    /// `internal error` value so the waiting peer still gets an answer.
    pub fn encode_reply(id: CorrelationId, value: Value) -> Result<Vec<u8>> {
        Self::encode(id, &Payload::Value(value))
            .or_else(|_| Self::encode(id, &Payload::Value(Value::error("internal error"))))
    }

    /// Frames an already encoded payload.
    pub fn frame(id: CorrelationId, body: &[u8]) -> Result<Vec<u8>> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(RemexError::InvalidRequest(format!(
                "Message too large: {} bytes (max {} bytes)",
                body.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(id.as_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        Ok(frame)
    }

    /// Splits a frame header into the id and the announced payload length.
    pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(CorrelationId, usize)> {
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&header[..ID_LEN]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&header[ID_LEN..]);

        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RemexError::InvalidResponse(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }
        Ok((CorrelationId::from_bytes(id), len))
    }

    /// Decodes one complete in-memory frame.
    ///
    /// A buffer that ends before the announced length is reported as
    /// [`RemexError::ConnectionClosed`], the same as a stream that closed
    /// mid-frame.
    pub fn decode(frame: &[u8]) -> Result<(CorrelationId, Payload)> {
        let header: &[u8; HEADER_LEN] = frame
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(RemexError::ConnectionClosed)?;
        let (id, len) = Self::decode_header(header)?;
        let body = frame
            .get(HEADER_LEN..HEADER_LEN + len)
            .ok_or(RemexError::ConnectionClosed)?;
        Ok((id, JsonCodec::decode_payload(body)?))
    }
}
