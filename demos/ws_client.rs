//! Minimal WebSocket client for the bridge.
//!
//! ```text
//! cargo run --example ws_client -- 127.0.0.1:7446 "setrgb 1 255 0 0" list "temp 1"
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use light_bridge::transport::websocket::frame::{encode_frame, read_header, Opcode};
use light_bridge::transport::websocket::handshake::accept_token;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("ws_client=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7446".to_string());
    let commands: Vec<String> = args.collect();
    let commands = if commands.is_empty() {
        vec!["list".to_string()]
    } else {
        commands
    };

    let stream = TcpStream::connect(&addr).await?;
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);

    let nonce: [u8; 16] = std::array::from_fn(|i| (i as u8).wrapping_mul(37) ^ 0x5C);
    let key = STANDARD.encode(nonce);
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\nSec-WebSocket-Protocol: nlcp\r\nSec-WebSocket-Version: 13\r\n\r\n",
        addr, key
    );
    write.write_all(request.as_bytes()).await?;

    let mut status = String::new();
    read.read_line(&mut status).await?;
    let mut accepted = None;
    loop {
        let mut line = String::new();
        read.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
                accepted = Some(value.trim().to_string());
            }
        }
    }
    if !status.starts_with("HTTP/1.1 101") || accepted != Some(accept_token(&key)) {
        return Err(format!("handshake refused: {}", status.trim_end()).into());
    }
    info!(%addr, "connected");

    for (n, command) in commands.iter().enumerate() {
        let mask = (n as u32 ^ 0xA5C3_7E19).to_be_bytes();
        write
            .write_all(&encode_frame(true, Opcode::Text, command.as_bytes(), Some(mask)))
            .await?;

        // Bulk frames are not answered.
        if command.contains(',') {
            info!(%command, "sent frame");
            continue;
        }

        loop {
            let header = read_header(&mut read).await?;
            let mut payload = vec![0u8; header.payload_len as usize];
            read.read_exact(&mut payload).await?;
            match header.opcode {
                Opcode::Text => {
                    info!(%command, reply = %String::from_utf8_lossy(&payload), "reply");
                    break;
                }
                Opcode::Close => {
                    warn!("server closed the connection");
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    let close = encode_frame(true, Opcode::Close, &1000u16.to_be_bytes(), Some([1, 2, 3, 4]));
    write.write_all(&close).await?;
    Ok(())
}
