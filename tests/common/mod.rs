#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use light_bridge::transport::websocket::frame::{encode_frame, read_header, FrameHeader, Opcode};
use light_bridge::BridgeConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

pub const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const WAIT: Duration = Duration::from_secs(5);

/// Everything on loopback with OS-assigned ports.
pub fn loopback_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.websocket.bind_address = "127.0.0.1:0".to_string();
    config.websocket.close_timeout_ms = 100;
    config.udp.bind_address = "127.0.0.1:0".to_string();
    config
}

pub fn upgrade_request(subprotocol: &str) -> String {
    format!(
        "GET /lights HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Protocol: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        KEY, subprotocol
    )
}

pub struct WsClient {
    stream: TcpStream,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(upgrade_request("nlcp").as_bytes())
            .await
            .unwrap();

        let mut response = Vec::new();
        while !response.ends_with(b"\r\n\r\n") {
            response.push(timeout(WAIT, stream.read_u8()).await.unwrap().unwrap());
        }
        let response = String::from_utf8(response).unwrap();
        assert!(
            response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
            "unexpected response: {}",
            response
        );
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        Self { stream }
    }

    pub async fn send_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) {
        let frame = encode_frame(fin, opcode, payload, Some([0x9A, 0x4C, 0x03, 0xE1]));
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn send(&mut self, text: &str) {
        self.send_frame(true, Opcode::Text, text.as_bytes()).await;
    }

    pub async fn read_frame(&mut self) -> (FrameHeader, Vec<u8>) {
        timeout(WAIT, async {
            let header = read_header(&mut self.stream).await.unwrap();
            assert!(header.mask.is_none(), "server frames are never masked");
            let mut payload = vec![0u8; header.payload_len as usize];
            self.stream.read_exact(&mut payload).await.unwrap();
            (header, payload)
        })
        .await
        .unwrap()
    }

    pub async fn recv(&mut self) -> String {
        let (header, payload) = self.read_frame().await;
        assert_eq!(header.opcode, Opcode::Text);
        String::from_utf8(payload).unwrap()
    }

    pub async fn request(&mut self, text: &str) -> String {
        self.send(text).await;
        self.recv().await
    }
}

pub struct UdpClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl UdpClient {
    pub async fn new(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self { socket, server }
    }

    pub async fn send(&self, text: &str) {
        self.socket.send_to(text.as_bytes(), self.server).await.unwrap();
    }

    pub async fn recv(&self) -> String {
        let mut buf = [0u8; 2048];
        let (len, from) = timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, self.server);
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    pub async fn request(&self, text: &str) -> String {
        self.send(text).await;
        self.recv().await
    }
}
