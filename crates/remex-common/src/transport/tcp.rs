use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use crate::protocol::address::Address;
use crate::protocol::error::{RemexError, Result};
use crate::protocol::message::{CorrelationId, Payload};
use crate::transport::codec::{MessageCodec, HEADER_LEN};

/// Async framed transport over any byte stream.
///
/// Used by both the client connection and the server's per-connection loop.
/// Reads are all-or-nothing: a stream that ends anywhere inside a frame
/// surfaces as [`RemexError::ConnectionClosed`], never as a partial message.
///
/// # Example
///
/// ```no_run
/// use remex_common::{Address, Command, MessageTransport, Payload};
/// use uuid::Uuid;
///
/// # #[tokio::main]
/// # async fn main() -> remex_common::Result<()> {
/// let mut stream = MessageTransport::connect(&Address::parse("8888")?).await?;
/// let payload = Payload::Command(Command::eval("1+1"));
/// MessageTransport::send_message(&mut stream, Uuid::new_v4(), &payload).await?;
/// let (_id, reply) = MessageTransport::receive_message(&mut stream).await?;
/// # Ok(())
/// # }
/// ```
pub struct MessageTransport;

impl MessageTransport {
    /// Resolves the address and connects to the first endpoint that accepts.
    pub async fn connect(addr: &Address) -> Result<TcpStream> {
        let endpoint = addr.connect_endpoint();
        let socket_addrs = lookup_host(endpoint.as_str())
            .await
            .map_err(|e| RemexError::Connection(format!("Invalid address '{}': {}", endpoint, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect(socket_addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(RemexError::Connection(format!(
            "Failed to connect to {}: {}",
            endpoint,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Encodes and writes one message, then flushes.
    pub async fn send_message<W>(stream: &mut W, id: CorrelationId, payload: &Payload) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = MessageCodec::encode(id, payload)?;
        Self::send_frame(stream, &frame).await
    }

    /// Writes an already framed message, then flushes.
    pub async fn send_frame<W>(stream: &mut W, frame: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream
            .write_all(frame)
            .await
            .map_err(|e| Self::map_io_error(e, "writing frame"))?;
        stream
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;
        Ok(())
    }

    /// Reads exactly one frame and returns its id with the raw payload bytes.
    ///
    /// Kept separate from decoding so a payload that fails to decode can still
    /// be answered under its id.
    pub async fn receive_frame<R>(stream: &mut R) -> Result<(CorrelationId, Vec<u8>)>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| Self::map_io_error(e, "reading frame header"))?;

        let (id, len) = MessageCodec::decode_header(&header)?;

        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| Self::map_io_error(e, "reading payload"))?;

        Ok((id, body))
    }

    /// Reads and decodes one message.
    pub async fn receive_message<R>(stream: &mut R) -> Result<(CorrelationId, Payload)>
    where
        R: AsyncRead + Unpin,
    {
        let (id, body) = Self::receive_frame(stream).await?;
        Ok((id, crate::transport::codec::JsonCodec::decode_payload(&body)?))
    }

    /// Maps IO errors onto the connection taxonomy.
    ///
    /// - end of stream (including mid-frame) -> `ConnectionClosed`
    /// - reset, abort, broken pipe -> `ConnectionLost`
    /// - anything else -> `Io`
    fn map_io_error(err: std::io::Error, context: &str) -> RemexError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => RemexError::ConnectionClosed,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected => {
                RemexError::ConnectionLost(format!("{}: {}", context, err))
            }
            _ => RemexError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Value};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_send_then_receive_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let id = Uuid::new_v4();
        let payload = Payload::Command(Command::get("foo"));

        MessageTransport::send_message(&mut a, id, &payload).await.unwrap();
        let (got_id, got) = MessageTransport::receive_message(&mut b).await.unwrap();

        assert_eq!(got_id, id);
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_send_order() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let ids: Vec<_> = (0..5).map(|_| Uuid::new_v4()).collect();

        for (i, id) in ids.iter().enumerate() {
            let payload = Payload::Value(Value::Int(i as i64));
            MessageTransport::send_message(&mut a, *id, &payload).await.unwrap();
        }

        for (i, id) in ids.iter().enumerate() {
            let (got_id, got) = MessageTransport::receive_message(&mut b).await.unwrap();
            assert_eq!(got_id, *id);
            assert_eq!(got, Payload::Value(Value::Int(i as i64)));
        }
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_connection_closed() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frame = MessageCodec::encode(Uuid::new_v4(), &Payload::Value(Value::Int(1))).unwrap();

        a.write_all(&frame[..frame.len() - 2]).await.unwrap();
        drop(a);

        let err = MessageTransport::receive_message(&mut b).await.unwrap_err();
        assert!(matches!(err, RemexError::ConnectionClosed), "got {}", err);
    }

    #[tokio::test]
    async fn test_clean_close_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        let err = MessageTransport::receive_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, RemexError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = MessageTransport::connect(&Address::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(RemexError::Connection(_))));
    }
}
