//! # Loopback Chat Example
//!
//! Demonstrates a complete Dust IRC session lifecycle:
//!
//! 1. Connect (in-memory loopback by default, or a real server)
//! 2. Register and join a channel
//! 3. Send a message and measure a PING round-trip
//! 4. React to events until idle, then shut down gracefully
//!
//! ## Running
//!
//! ```sh
//! # Loopback: every line sent comes straight back as inbound traffic.
//! cargo run --example loopback_chat
//!
//! # Against a real network:
//! DUST_IRC_SERVER=irc.libera.chat:6697 cargo run --example loopback_chat
//! ```

use std::time::Duration;

use dust_irc::{ConnectOptions, IrcClient, IrcConfig, IrcEvent};

/// Channel joined by the demo.
const CHANNEL: &str = "#dust-demo";

/// Stop once no event has arrived for this long.
const IDLE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=dust_irc=debug` to see every line on the wire.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let server = std::env::var("DUST_IRC_SERVER").ok();
    let (host, port) = match server.as_deref().map(|s| s.rsplit_once(':')) {
        Some(Some((host, port))) => (host.to_owned(), port.parse::<u16>()?),
        Some(None) => return Err("DUST_IRC_SERVER must look like host:port".into()),
        None => ("irc.loopback".to_owned(), 6667),
    };
    let options = ConnectOptions::new()
        .with_real(server.is_some())
        .with_timeout(Duration::from_secs(10))
        .with_auto_register(true)
        .with_realname("Dust IRC demo")
        .with_auto_join([CHANNEL]);

    let client = IrcClient::new(IrcConfig::new());
    let (_subscription, mut events) = client.subscribe();

    // ── Connect ─────────────────────────────────────────────────────
    tracing::info!("Connecting to {host}:{port}");
    client.connect(&host, port, "dust-demo", options).await?;
    client.send_message("hello from dust-irc", Some(CHANNEL))?;

    match client.ping().await {
        Ok(rtt) => tracing::info!("PING round-trip: {} ms", rtt.as_millis()),
        Err(e) => tracing::warn!("PING failed: {e}"),
    }

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    IrcEvent::Raw(line) => tracing::debug!("<< {line}"),
                    IrcEvent::Message(own) => {
                        tracing::info!("[{}] <{}> {}", own.target, own.from, own.text);
                    }
                    IrcEvent::Privmsg(msg) => tracing::info!(
                        "[{}] <{}> {}",
                        msg.target().unwrap_or("?"),
                        msg.from.as_deref().unwrap_or("?"),
                        msg.text().unwrap_or("")
                    ),
                    IrcEvent::Numeric(msg) => {
                        if let Some(reply) = msg.reply().filter(|r| r.is_error()) {
                            tracing::warn!("Server error {reply:?}: {}", reply.description());
                        }
                    }
                    IrcEvent::Disconnected => {
                        tracing::info!("Disconnected");
                        break;
                    }
                    other => tracing::info!("Event: {}", other.kind()),
                }
            }

            () = tokio::time::sleep(IDLE) => {
                tracing::info!("Idle, leaving");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received");
                break;
            }
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    if client.is_connected() {
        client.send_quit(Some("bye"))?;
        tokio::time::sleep(Duration::from_millis(600)).await;
    }
    client.shutdown().await;
    tracing::info!("Done");
    Ok(())
}
