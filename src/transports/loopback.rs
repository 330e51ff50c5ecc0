//! In-memory loopback transport.
//!
//! Every line sent is handed straight back as a received line. The engine
//! uses it when `ConnectOptions::real` is off, which lets a host exercise its
//! event handling (and ping round-trips) without a network.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::IrcError;
use crate::transport::{Connector, Transport, TransportTarget};

/// Simulated connect latency used by [`LoopbackConnector::default`].
pub const DEFAULT_LOOPBACK_DELAY: Duration = Duration::from_millis(10);

/// Opens [`LoopbackTransport`]s after a simulated delay.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    delay: Duration,
}

impl LoopbackConnector {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new(DEFAULT_LOOPBACK_DELAY)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, target: &TransportTarget) -> Result<Box<dyn Transport>, IrcError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        debug!(addr = %target, "loopback transport opened");
        Ok(Box::new(LoopbackTransport::new()))
    }
}

/// Echoes sent lines back through [`recv`](Transport::recv).
///
/// # Cancel Safety
///
/// `recv` only awaits an mpsc receiver, which is cancel-safe.
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx: Some(tx), rx }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, line: String) -> Result<(), IrcError> {
        let tx = self.tx.as_ref().ok_or(IrcError::TransportClosed)?;
        tx.send(line).map_err(|_| IrcError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Result<String, IrcError>> {
        // Yields None once closed and every echoed line has been drained.
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), IrcError> {
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::transport::TlsOptions;

    #[tokio::test]
    async fn echoes_lines_in_order() {
        let mut transport = LoopbackTransport::new();
        transport.send("NICK dust".into()).await.unwrap();
        transport.send("PING :t".into()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "NICK dust");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "PING :t");
    }

    #[tokio::test]
    async fn close_ends_stream_and_rejects_sends() {
        let mut transport = LoopbackTransport::new();
        transport.send("PING :last".into()).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(matches!(
            transport.send("PING :late".into()).await,
            Err(IrcError::TransportClosed)
        ));
        assert_eq!(transport.recv().await.unwrap().unwrap(), "PING :last");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connector_waits_simulated_delay() {
        let connector = LoopbackConnector::new(Duration::from_millis(10));
        let target = TransportTarget::new("localhost", 6667, false, TlsOptions::default());
        let started = tokio::time::Instant::now();
        let mut transport = connector.open(&target).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));

        transport.send("JOIN #x".into()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "JOIN #x");
    }
}
