//! # Custom Transport Example
//!
//! Shows how to implement the [`Transport`] and [`Connector`] traits with an
//! in-process channel pair. This is useful for:
//!
//! - **Testing**: unit-test your bot logic without a real server
//! - **Custom backends**: adapt any line-oriented I/O layer (a proxy, a
//!   bouncer socket, a WebSocket gateway)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dust_irc::{
    ConnectOptions, Connector, EventKind, IrcClient, IrcConfig, IrcError, IrcEvent, Transport,
    TransportTarget,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based transport
// ─────────────────────────────────────────────────────────────────────

/// The client half: implements [`Transport`] and is handed to the engine.
pub struct ChannelTransport {
    /// Lines the engine sends go here (the fake server reads them).
    tx: mpsc::UnboundedSender<String>,
    /// Lines the fake server sends arrive here.
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, line: String) -> Result<(), IrcError> {
        self.tx
            .send(line)
            .map_err(|e| IrcError::TransportSend(e.to_string()))
    }

    /// Returns `None` once the server half is dropped. Cancel-safe because
    /// `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, IrcError>> {
        self.rx.recv().await.map(Ok)
    }

    /// Dropping the channels is enough.
    async fn close(&mut self) -> Result<(), IrcError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Connector trait
// ─────────────────────────────────────────────────────────────────────

/// Opens a [`ChannelTransport`] and spawns a tiny fake server behind it.
#[derive(Default)]
pub struct FakeNetwork {
    /// Every line the server received, for the summary at the end.
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Connector for FakeNetwork {
    async fn open(&self, target: &TransportTarget) -> Result<Box<dyn Transport>, IrcError> {
        tracing::info!("FakeNetwork: opening {target}");
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_server(server_rx, server_tx, Arc::clone(&self.log)));
        Ok(Box::new(ChannelTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

/// Answers registration with a welcome, echoes JOINs with a proper prefix
/// and replies to PING.
async fn fake_server(
    mut rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
    log: Arc<Mutex<Vec<String>>>,
) {
    let mut nick = String::from("*");
    while let Some(line) = rx.recv().await {
        if let Ok(mut log) = log.lock() {
            log.push(line.clone());
        }
        let mut words = line.splitn(2, ' ');
        let command = words.next().unwrap_or_default();
        let rest = words.next().unwrap_or_default();
        let reply = match command {
            "NICK" => {
                nick = rest.to_owned();
                None
            }
            "USER" => Some(format!(":fake.server 001 {nick} :Welcome to the fake network")),
            "JOIN" => Some(format!(":{nick}!demo@localhost JOIN {rest}")),
            "PING" => Some(format!(":fake.server PONG fake.server {rest}")),
            "QUIT" => break,
            _ => None,
        };
        if let Some(reply) = reply {
            if tx.send(reply).is_err() {
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the engine and the fake network
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let network = Arc::new(FakeNetwork::default());
    let client = IrcClient::with_connector(IrcConfig::new(), Arc::clone(&network) as Arc<dyn Connector>);

    client.on(EventKind::Numeric, |event| {
        if let Some(msg) = event.message() {
            tracing::info!("Numeric {:?}: {}", msg.reply(), msg.text().unwrap_or(""));
        }
    });
    client.on(EventKind::Join, |event| {
        if let IrcEvent::Join(msg) = event {
            tracing::info!("{} joined {}", msg.from.as_deref().unwrap_or("?"), msg.channel().unwrap_or("?"));
        }
    });

    let options = ConnectOptions::new()
        .with_real(true)
        .with_rate_limit(Duration::from_millis(50))
        .with_auto_register(true)
        .with_auto_join(["#demo"]);
    client.connect("fake.server", 6667, "demo", options).await?;

    let rtt = client.ping().await?;
    tracing::info!("PING answered in {} ms", rtt.as_millis());
    tracing::info!("Joined channels: {:?}", client.joined_channels());

    client.send_message("hello, fake network", None)?;
    client.send_quit(Some("done"))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.shutdown().await;

    let received = network.log.lock().map(|log| log.len()).unwrap_or_default();
    tracing::info!("Done. The fake server received {received} line(s). Custom transport works!");
    Ok(())
}
