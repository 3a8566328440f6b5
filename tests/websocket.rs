mod common;

use common::{WsClient, WAIT};
use light_bridge::transport::websocket::frame::Opcode;
use light_bridge::{Transport, TransportError, WebSocketConfig, WebSocketTransport};
use tokio::time::timeout;

async fn bind() -> WebSocketTransport {
    let config = WebSocketConfig {
        bind_address: "127.0.0.1:0".to_string(),
        close_timeout_ms: 200,
        ..WebSocketConfig::default()
    };
    WebSocketTransport::init(&config).await.unwrap()
}

#[tokio::test]
async fn test_fragmented_message_over_tcp() {
    let transport = bind().await;
    let addr = transport.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut client = WsClient::connect(addr).await;
        client.send_frame(false, Opcode::Text, b"setrgb").await;
        client.send_frame(true, Opcode::Ping, b"are you there").await;
        client.send_frame(false, Opcode::Continuation, b" 12 1").await;
        client.send_frame(true, Opcode::Continuation, b" 2 3").await;

        let (header, payload) = client.read_frame().await;
        assert_eq!(header.opcode, Opcode::Pong);
        assert_eq!(payload, b"are you there");
        client.recv().await
    });

    let id = transport.accept().await.unwrap();
    transport.connect(id).await.unwrap();
    let message = timeout(WAIT, transport.recv(id, 2000)).await.unwrap().unwrap();
    assert_eq!(message, b"setrgb 12 1 2 3");
    transport.send(id, b"OK").await.unwrap();

    assert_eq!(client.await.unwrap(), "OK");
}

#[tokio::test]
async fn test_clients_are_independent() {
    let transport = bind().await;
    let addr = transport.local_addr().unwrap();

    let first = tokio::spawn(async move {
        let mut client = WsClient::connect(addr).await;
        client.send("from first").await;
        client
    });
    let a = transport.accept().await.unwrap();
    transport.connect(a).await.unwrap();
    let mut first = first.await.unwrap();

    let second = tokio::spawn(async move {
        let mut client = WsClient::connect(addr).await;
        client.send("from second").await;
        client
    });
    let b = transport.accept().await.unwrap();
    transport.connect(b).await.unwrap();
    let mut second = second.await.unwrap();

    assert_ne!(a, b);
    assert_eq!(transport.recv(b, 100).await.unwrap(), b"from second");
    assert_eq!(transport.recv(a, 100).await.unwrap(), b"from first");

    transport.send(a, b"one").await.unwrap();
    transport.send(b, b"two").await.unwrap();
    assert_eq!(first.recv().await, "one");
    assert_eq!(second.recv().await, "two");
}

#[tokio::test]
async fn test_client_close_removes_connection() {
    let transport = bind().await;
    let addr = transport.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut client = WsClient::connect(addr).await;
        client
            .send_frame(true, Opcode::Close, &1000u16.to_be_bytes())
            .await;
        client.read_frame().await
    });

    let id = transport.accept().await.unwrap();
    transport.connect(id).await.unwrap();
    assert!(matches!(
        transport.recv(id, 100).await,
        Err(TransportError::Closed)
    ));
    assert!(!transport.is_open(id));

    let (header, payload) = client.await.unwrap();
    assert_eq!(header.opcode, Opcode::Close);
    assert_eq!(payload, 1000u16.to_be_bytes());

    // Already gone; both are no-ops.
    transport.disconnect(id).await;
    transport.disconnect(id).await;
    assert!(matches!(
        transport.send(id, b"late").await,
        Err(TransportError::UnknownConnection(_))
    ));
}

#[tokio::test]
async fn test_server_close_is_echoed_by_client() {
    let transport = bind().await;
    let addr = transport.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut client = WsClient::connect(addr).await;
        let (header, payload) = client.read_frame().await;
        assert_eq!(header.opcode, Opcode::Close);
        client.send_frame(true, Opcode::Close, &payload).await;
        payload
    });

    let id = transport.accept().await.unwrap();
    transport.connect(id).await.unwrap();
    timeout(WAIT, transport.disconnect(id)).await.unwrap();
    assert!(!transport.is_open(id));
    assert_eq!(client.await.unwrap(), 1000u16.to_be_bytes());
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let transport = bind().await;
    let taken = transport.local_addr().unwrap();
    let config = WebSocketConfig {
        bind_address: taken.to_string(),
        ..WebSocketConfig::default()
    };
    assert!(matches!(
        WebSocketTransport::init(&config).await,
        Err(TransportError::Bind { .. })
    ));
}
