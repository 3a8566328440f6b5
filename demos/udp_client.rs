//! Streams a rainbow to lights 1..=8 over the UDP transport.
//!
//! ```text
//! cargo run --example udp_client -- 127.0.0.1:7447
//! ```

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{interval, timeout};
use tracing::info;

const LIGHTS: usize = 8;
const FRAMES: usize = 120;

fn hue_to_rgb(hue: f32) -> (u8, u8, u8) {
    let h = (hue % 1.0) * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    ((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("udp_client=info".parse()?),
        )
        .init();

    let server = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7447".to_string());
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&server).await?;

    let mut buf = [0u8; 2048];
    socket.send(b"list").await?;
    let len = timeout(Duration::from_secs(2), socket.recv(&mut buf)).await??;
    info!(connected = %String::from_utf8_lossy(&buf[..len]), "lights");

    let mut ticker = interval(Duration::from_millis(33));
    for frame in 0..FRAMES {
        ticker.tick().await;
        let message: String = (0..LIGHTS)
            .map(|light| {
                let hue = frame as f32 / FRAMES as f32 + light as f32 / LIGHTS as f32;
                let (r, g, b) = hue_to_rgb(hue);
                format!("{:02x}{:02x}{:02x},", r, g, b)
            })
            .collect();
        socket.send(message.as_bytes()).await?;
    }

    socket.send(b"setrgb 255 0 0 0").await?;
    let len = timeout(Duration::from_secs(2), socket.recv(&mut buf)).await??;
    info!(reply = %String::from_utf8_lossy(&buf[..len]), "lights off");
    Ok(())
}
