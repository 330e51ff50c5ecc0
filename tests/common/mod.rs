#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Dust IRC integration tests.
//!
//! Provides a [`MockConnector`] whose transports record every sent line and
//! replay whatever the test pushes as server traffic, plus helpers for
//! waiting on events.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dust_irc::{
    Connector, EventKind, IrcClient, IrcConfig, IrcError, IrcEvent, Transport, TransportTarget,
};
use tokio::sync::mpsc;

/// One scripted item for `recv()`: a line, an error, or `None` for a clean close.
type Inbound = Option<Result<String, IrcError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport.
///
/// Items pushed through the owning [`MockConnector`] are yielded by `recv()`
/// in order. All lines sent by the engine are recorded in `sent`.
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, line: String) -> Result<(), IrcError> {
        self.sent.lock().unwrap().push(line);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, IrcError>> {
        match self.inbound.recv().await {
            Some(item) => item,
            // The connector moved on to a newer transport. Hang so the
            // session stays alive until it is shut down.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), IrcError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Opens [`MockTransport`]s and keeps a handle to feed the newest one.
#[derive(Default)]
pub struct MockConnector {
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    opened: AtomicUsize,
    failures: AtomicUsize,
    delay: StdMutex<Duration>,
    server: StdMutex<Option<mpsc::UnboundedSender<Inbound>>>,
    targets: StdMutex<Vec<TransportTarget>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` opens fail with a connection-refused error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Delay every open by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Deliver `line` to the most recently opened transport.
    pub fn push_line(&self, line: &str) {
        self.push(Some(Ok(line.to_owned())));
    }

    /// Make the most recent transport's `recv()` fail.
    pub fn push_error(&self, message: &str) {
        self.push(Some(Err(IrcError::TransportReceive(message.to_owned()))));
    }

    /// Simulate the server closing the connection.
    pub fn close_remote(&self) {
        self.push(None);
    }

    fn push(&self, item: Inbound) {
        let server = self.server.lock().unwrap();
        server
            .as_ref()
            .expect("no transport opened yet")
            .send(item)
            .expect("transport dropped");
    }

    /// Lines written to any transport so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<TransportTarget> {
        self.targets.lock().unwrap().last().cloned()
    }

    /// Poll until a sent line satisfies `pred`, returning it.
    pub async fn wait_for_sent(&self, pred: impl Fn(&str) -> bool) -> String {
        within(async {
            loop {
                if let Some(line) = self.sent().into_iter().find(|line| pred(line)) {
                    return line;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, target: &TransportTarget) -> Result<Box<dyn Transport>, IrcError> {
        self.targets.lock().unwrap().push(target.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IrcError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.server.lock().unwrap() = Some(tx);
        Ok(Box::new(MockTransport {
            inbound: rx,
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
        }))
    }
}

// ── Client helpers ──────────────────────────────────────────────────

/// Engine config for tests: no simulated loopback delay.
pub fn test_config() -> IrcConfig {
    IrcConfig::new().with_loopback_delay(Duration::ZERO)
}

/// A client whose live connections go through `connector`.
pub fn mock_client(connector: &Arc<MockConnector>) -> IrcClient {
    IrcClient::with_connector(test_config(), Arc::clone(connector) as Arc<dyn Connector>)
}

/// Records every event the client publishes.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<StdMutex<Vec<IrcEvent>>>,
}

impl EventLog {
    pub fn attach(client: &IrcClient) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        client.on_any(move |event| events.lock().unwrap().push(event.clone()));
        log
    }

    pub fn events(&self) -> Vec<IrcEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(IrcEvent::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    /// Wait until at least `n` events of `kind` were published.
    pub async fn wait_for(&self, kind: EventKind, n: usize) {
        within(async {
            while self.count(kind) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
    }
}

/// Run `fut` with a two-second timeout, failing the test if it elapses.
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out waiting")
}
