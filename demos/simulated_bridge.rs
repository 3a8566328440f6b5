//! Runs the full bridge against a simulated radio with eight lights.
//!
//! ```text
//! cargo run --example simulated_bridge [config.toml]
//! ```
//!
//! Then talk to it with the `ws_client` or `udp_client` examples.

use std::path::Path;
use std::time::Duration;

use light_bridge::{BridgeConfig, LightBridge, SimulatedRadio};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("light_bridge=info".parse()?),
        )
        .init();

    let path = std::env::args().nth(1);
    let config = BridgeConfig::load(path.as_deref().map(Path::new))?;

    let mut radio = SimulatedRadio::for_config(&config.radio);
    for id in 1..=8 {
        radio = radio.with_light(id);
    }
    // One light that acknowledges but never answers.
    radio = radio.with_light(9);
    radio.silence(9);

    let bridge = LightBridge::start(config, radio.clone()).await?;
    info!(
        websocket = ?bridge.websocket_addr(),
        udp = ?bridge.udp_addr(),
        "bridge running, ctrl-c to stop"
    );

    let mut report = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                for (id, color) in radio.received_colors() {
                    info!(id, r = color.r, g = color.g, b = color.b, "light");
                }
            }
        }
    }

    bridge.shutdown().await?;
    Ok(())
}
