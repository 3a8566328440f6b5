mod common;

use common::WAIT;
use light_bridge::{Transport, UdpConfig, UdpMultiplexTransport};
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn bind_on(address: &str) -> UdpMultiplexTransport {
    let config = UdpConfig {
        bind_address: address.to_string(),
        ..UdpConfig::default()
    };
    UdpMultiplexTransport::init(&config).await.unwrap()
}

async fn bind() -> UdpMultiplexTransport {
    bind_on("127.0.0.1:0").await
}

#[tokio::test]
async fn test_interleaved_peers_are_never_cross_delivered() {
    interleaved_peers_on("127.0.0.1:0").await;
}

#[tokio::test]
async fn test_interleaved_ipv6_peers_are_never_cross_delivered() {
    interleaved_peers_on("[::1]:0").await;
}

async fn interleaved_peers_on(loopback: &str) {
    let transport = bind_on(loopback).await;
    let server = transport.local_addr().unwrap();
    assert_eq!(server.is_ipv6(), loopback.starts_with('['));
    let a = UdpSocket::bind(loopback).await.unwrap();
    let b = UdpSocket::bind(loopback).await.unwrap();

    for (socket, payload) in [(&a, "a1"), (&b, "b1"), (&a, "a2"), (&b, "b2"), (&a, "a3")] {
        socket.send_to(payload.as_bytes(), server).await.unwrap();
    }

    let id_a = timeout(WAIT, transport.accept()).await.unwrap().unwrap();
    assert_eq!(transport.peer_addr(id_a), Some(a.local_addr().unwrap()));
    for expected in ["a1", "a2", "a3"] {
        let message = timeout(WAIT, transport.recv(id_a, 100)).await.unwrap().unwrap();
        assert_eq!(message, expected.as_bytes());
    }

    // B's datagrams were parked on its queue while A was reading.
    let id_b = timeout(WAIT, transport.accept()).await.unwrap().unwrap();
    assert_ne!(id_a, id_b);
    assert_eq!(transport.peer_addr(id_b), Some(b.local_addr().unwrap()));
    for expected in ["b1", "b2"] {
        let message = timeout(WAIT, transport.recv(id_b, 100)).await.unwrap().unwrap();
        assert_eq!(message, expected.as_bytes());
    }
}

#[tokio::test]
async fn test_concurrent_readers_share_the_socket() {
    let transport = std::sync::Arc::new(bind().await);
    let server = transport.local_addr().unwrap();
    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    a.send_to(b"hello a", server).await.unwrap();
    let id_a = transport.accept().await.unwrap();
    assert_eq!(transport.recv(id_a, 100).await.unwrap(), b"hello a");
    b.send_to(b"hello b", server).await.unwrap();
    let id_b = transport.accept().await.unwrap();
    assert_eq!(transport.recv(id_b, 100).await.unwrap(), b"hello b");

    let reader_a = {
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move { transport.recv(id_a, 100).await.unwrap() })
    };
    let reader_b = {
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move { transport.recv(id_b, 100).await.unwrap() })
    };

    b.send_to(b"second b", server).await.unwrap();
    a.send_to(b"second a", server).await.unwrap();

    assert_eq!(timeout(WAIT, reader_a).await.unwrap().unwrap(), b"second a");
    assert_eq!(timeout(WAIT, reader_b).await.unwrap().unwrap(), b"second b");
}

#[tokio::test]
async fn test_peer_returns_after_disconnect_as_new_connection() {
    let transport = bind().await;
    let server = transport.local_addr().unwrap();
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    peer.send_to(b"one", server).await.unwrap();
    let first = transport.accept().await.unwrap();
    transport.disconnect(first).await;
    assert!(!transport.is_open(first));

    peer.send_to(b"two", server).await.unwrap();
    let second = timeout(WAIT, transport.accept()).await.unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(transport.recv(second, 100).await.unwrap(), b"two");
}
