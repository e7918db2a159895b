//! Transport tests over real loopback sockets

#[cfg(test)]
mod tests {
    use crate::protocol::{Address, Command, Payload, Value};
    use crate::transport::MessageTransport;
    use tokio::net::TcpListener;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_request_reply_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (id, payload) = MessageTransport::receive_message(&mut stream).await.unwrap();
            assert_eq!(payload, Payload::Command(Command::eval("1+1")));
            MessageTransport::send_message(&mut stream, id, &Payload::Value(Value::Int(2)))
                .await
                .unwrap();
        });

        let mut stream = MessageTransport::connect(&Address::new("127.0.0.1", port))
            .await
            .unwrap();
        let id = Uuid::new_v4();
        MessageTransport::send_message(&mut stream, id, &Payload::Command(Command::eval("1+1")))
            .await
            .unwrap();
        let (reply_id, reply) = MessageTransport::receive_message(&mut stream).await.unwrap();

        assert_eq!(reply_id, id);
        assert_eq!(reply, Payload::Value(Value::Int(2)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_drop_surfaces_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut stream = MessageTransport::connect(&Address::new("127.0.0.1", port))
            .await
            .unwrap();
        server.await.unwrap();

        let err = MessageTransport::receive_message(&mut stream).await.unwrap_err();
        assert!(err.is_connection_lost(), "got {}", err);
    }

    #[tokio::test]
    async fn test_undecodable_payload_keeps_framing() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let bad_id = Uuid::new_v4();
        let good_id = Uuid::new_v4();

        let bad = crate::transport::MessageCodec::frame(bad_id, b"not json").unwrap();
        MessageTransport::send_frame(&mut a, &bad).await.unwrap();
        MessageTransport::send_message(&mut a, good_id, &Payload::Value(Value::Null))
            .await
            .unwrap();

        let (id, body) = MessageTransport::receive_frame(&mut b).await.unwrap();
        assert_eq!(id, bad_id);
        assert!(crate::transport::JsonCodec::decode_payload(&body).is_err());

        let (id, payload) = MessageTransport::receive_message(&mut b).await.unwrap();
        assert_eq!(id, good_id);
        assert_eq!(payload, Payload::Value(Value::Null));
    }
}
