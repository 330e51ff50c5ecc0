//! IRC connection engine.
//!
//! [`IrcClient`] is a cheap, cloneable handle to one IRC session. Commands
//! are validated on the caller's task and appended to a bounded outbound
//! queue; a background session task drains that queue one line per
//! rate-limit interval into the [`Transport`] and feeds every inbound line
//! back through [`IrcClient::handle_inbound_line`]. Subscribers observe the
//! session through [`IrcEvent`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), dust_irc::IrcError> {
//! use dust_irc::{ConnectOptions, EventKind, IrcClient, IrcConfig, IrcEvent};
//!
//! let client = IrcClient::new(IrcConfig::new());
//! client.on(EventKind::Privmsg, |event| {
//!     if let IrcEvent::Privmsg(msg) = event {
//!         println!("<{}> {}", msg.from.as_deref().unwrap_or("?"), msg.text().unwrap_or(""));
//!     }
//! });
//!
//! let options = ConnectOptions::new()
//!     .with_real(true)
//!     .with_auto_register(true)
//!     .with_auto_join(["#rust"]);
//! client.connect("irc.libera.chat", 6697, "dust", options).await?;
//! client.send_message("hello", Some("#rust"))?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::emitter::{EventRegistry, SubscriptionId};
use crate::error::{IrcError, Result};
use crate::event::{EventKind, IrcEvent, OwnMessage};
use crate::message::{Message, MessageKind};
use crate::numeric::Reply;
use crate::transport::{Connector, TlsOptions, Transport, TransportTarget};
use crate::transports::loopback::{LoopbackConnector, DEFAULT_LOOPBACK_DELAY};
use crate::validate::{
    irc_eq, sanitize_channel, sanitize_nick, sanitize_target, strip_line_breaks, validate_host,
    validate_port,
};

/// Default window for a PING round-trip.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Default outbound queue length at which the oldest lines are dropped.
const DEFAULT_QUEUE_HIGH_WATER: usize = 1000;

/// Default number of lines dropped when the queue overflows.
const DEFAULT_QUEUE_DROP_BATCH: usize = 100;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity of channels handed out by [`IrcClient::subscribe`].
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default interval between two outbound lines.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(500);

/// Shortest accepted outbound interval.
pub const MIN_RATE_LIMIT: Duration = Duration::from_millis(50);

/// Longest accepted outbound interval.
pub const MAX_RATE_LIMIT: Duration = Duration::from_millis(5000);

// ── Configuration ───────────────────────────────────────────────────

/// Engine-wide settings, fixed for the lifetime of an [`IrcClient`].
///
/// # Example
///
/// ```
/// use dust_irc::IrcConfig;
/// use std::time::Duration;
///
/// let config = IrcConfig::new()
///     .with_ping_timeout(Duration::from_secs(10))
///     .with_queue_limits(500, 50);
/// assert_eq!(config.queue_high_water, 500);
/// ```
#[derive(Debug, Clone)]
pub struct IrcConfig {
    /// How long [`IrcClient::ping`] waits for the matching reply.
    ///
    /// Defaults to **5 seconds**.
    pub ping_timeout: Duration,
    /// Outbound queue length that triggers dropping the oldest lines.
    ///
    /// Defaults to **1000**. Values below 1 are clamped to 1.
    pub queue_high_water: usize,
    /// How many of the oldest lines are dropped on overflow.
    ///
    /// Defaults to **100**. Clamped to `1..=queue_high_water`.
    pub queue_drop_batch: usize,
    /// Simulated connect latency in loopback mode.
    ///
    /// Defaults to **10 ms**.
    pub loopback_delay: Duration,
    /// How long [`IrcClient::shutdown`] waits for the session task to close
    /// the transport before aborting it.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Capacity of the channel returned by [`IrcClient::subscribe`].
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) rather than blocking the session.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
}

impl IrcConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            ping_timeout: DEFAULT_PING_TIMEOUT,
            queue_high_water: DEFAULT_QUEUE_HIGH_WATER,
            queue_drop_batch: DEFAULT_QUEUE_DROP_BATCH,
            loopback_delay: DEFAULT_LOOPBACK_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Set the PING round-trip window.
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set the queue high-water mark and the overflow drop batch.
    #[must_use]
    pub fn with_queue_limits(mut self, high_water: usize, drop_batch: usize) -> Self {
        self.queue_high_water = high_water.max(1);
        self.queue_drop_batch = drop_batch.clamp(1, self.queue_high_water);
        self
    }

    /// Set the simulated loopback connect delay.
    #[must_use]
    pub fn with_loopback_delay(mut self, delay: Duration) -> Self {
        self.loopback_delay = delay;
        self
    }

    /// Set the timeout for the graceful shutdown.
    ///
    /// A zero timeout aborts the session task immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the capacity of subscription channels.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection options passed to [`IrcClient::connect`].
///
/// # Example
///
/// ```
/// use dust_irc::ConnectOptions;
/// use std::time::Duration;
///
/// let options = ConnectOptions::new()
///     .with_real(true)
///     .with_timeout(Duration::from_secs(10))
///     .with_rate_limit(Duration::from_millis(10));
/// // Clamped to the 50 ms floor.
/// assert_eq!(options.rate_limit, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Use the injected network connector instead of the in-memory loopback.
    pub real: bool,
    /// Wrap the connection in TLS. Port 6697 implies TLS regardless.
    pub tls: bool,
    pub tls_options: TlsOptions,
    /// Abandon a connect that has not completed within this window.
    pub timeout: Option<Duration>,
    /// Send PASS/NICK/USER right after the transport comes up.
    pub auto_register: bool,
    /// USER name for registration. Defaults to the nickname.
    pub user: Option<String>,
    /// Real name for registration. Defaults to the user name.
    pub realname: Option<String>,
    /// Server password sent with PASS during registration.
    pub password: Option<String>,
    /// Interval between two outbound lines, within [50 ms, 5000 ms].
    ///
    /// Defaults to **500 ms**.
    pub rate_limit: Duration,
    /// Channels joined once the connection (and registration) is underway.
    pub auto_join: Vec<String>,
    /// Answer server `PING` lines with `PONG`.
    ///
    /// Defaults to **true**.
    pub auto_pong: bool,
}

impl ConnectOptions {
    /// Options for a loopback connection with default settings.
    pub fn new() -> Self {
        Self {
            real: false,
            tls: false,
            tls_options: TlsOptions::default(),
            timeout: None,
            auto_register: false,
            user: None,
            realname: None,
            password: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            auto_join: Vec::new(),
            auto_pong: true,
        }
    }

    #[must_use]
    pub fn with_real(mut self, real: bool) -> Self {
        self.real = real;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_tls_options(mut self, tls_options: TlsOptions) -> Self {
        self.tls_options = tls_options;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.auto_register = auto_register;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_realname(mut self, realname: impl Into<String>) -> Self {
        self.realname = Some(realname.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the outbound interval, clamped to [50 ms, 5000 ms].
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit.clamp(MIN_RATE_LIMIT, MAX_RATE_LIMIT);
        self
    }

    #[must_use]
    pub fn with_auto_join<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_join = channels.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_auto_pong(mut self, auto_pong: bool) -> Self {
        self.auto_pong = auto_pong;
        self
    }

    /// The registration details carried by these options.
    pub fn registration(&self) -> Registration {
        Registration {
            user: self.user.clone(),
            realname: self.realname.clone(),
            password: self.password.clone(),
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Login details for [`IrcClient::register`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub user: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_realname(mut self, realname: impl Into<String>) -> Self {
        self.realname = Some(realname.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Retry budget for [`IrcClient::reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connect attempts before giving up. Defaults to **3**.
    pub max_attempts: u32,
    /// Sleep after the first failure, doubled after every further one.
    /// Defaults to **100 ms**.
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the session is (or was last asked to be) connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub nick: String,
}

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// ── Shared state ────────────────────────────────────────────────────

/// One live connection: owned by [`EngineState`] while it is current.
///
/// Dropping it drops the shutdown sender, which stops the session task.
struct Session {
    generation: u64,
    queue: VecDeque<String>,
    pings: HashMap<String, oneshot::Sender<()>>,
    auto_pong: bool,
    /// In-memory echo session: pings complete without touching the queue.
    loopback: bool,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    fn new(generation: u64, auto_pong: bool, loopback: bool) -> Self {
        Self {
            generation,
            queue: VecDeque::new(),
            pings: HashMap::new(),
            auto_pong,
            loopback,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Append `line`, first dropping the oldest `drop_batch` lines if the
    /// queue is at `high_water`. Returns how many lines were dropped.
    fn push(&mut self, line: String, high_water: usize, drop_batch: usize) -> usize {
        let mut dropped = 0;
        if self.queue.len() >= high_water {
            dropped = drop_batch.max(1).min(self.queue.len());
            self.queue.drain(..dropped);
        }
        self.queue.push_back(line);
        dropped
    }

    /// Signal the session task and hand back its handle.
    fn stop(mut self) -> Option<JoinHandle<()>> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task.take()
    }
}

#[derive(Default)]
struct EngineState {
    info: Option<ServerInfo>,
    /// Options of the last `connect`, reused by `reconnect`.
    options: Option<ConnectOptions>,
    phase: ConnectionState,
    /// Bumped on every connect attempt and every teardown.
    generation: u64,
    session: Option<Session>,
    channels: Vec<String>,
    current: Option<String>,
}

impl EngineState {
    fn live_session(&mut self) -> Result<&mut Session> {
        match (self.phase, self.session.as_mut()) {
            (ConnectionState::Connected, Some(session)) => Ok(session),
            _ => Err(IrcError::NotConnected),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    fn nick(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.nick.as_str())
    }

    fn add_channel(&mut self, channel: &str) {
        if !self.channels.iter().any(|joined| irc_eq(joined, channel)) {
            self.channels.push(channel.to_owned());
        }
        if self.current.is_none() {
            self.current = self
                .channels
                .iter()
                .find(|joined| irc_eq(joined, channel))
                .cloned();
        }
    }

    fn remove_channel(&mut self, channel: &str) {
        let Some(pos) = self
            .channels
            .iter()
            .position(|joined| irc_eq(joined, channel))
        else {
            return;
        };
        let removed = self.channels.remove(pos);
        if self
            .current
            .as_deref()
            .is_some_and(|current| irc_eq(current, &removed))
        {
            self.current = self.channels.first().cloned();
        }
    }
}

struct Inner {
    config: IrcConfig,
    connector: Arc<dyn Connector>,
    loopback: LoopbackConnector,
    events: EventRegistry,
    state: Mutex<EngineState>,
    dropped: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to one IRC session.
///
/// Clones share the same session. Every method may be called from inside an
/// event handler; async operations such as [`reconnect`](Self::reconnect)
/// should be started there with `tokio::spawn`.
#[derive(Clone)]
pub struct IrcClient {
    inner: Arc<Inner>,
}

impl IrcClient {
    /// Create an engine whose live connections use [`TcpConnector`](crate::transports::TcpConnector).
    #[cfg(feature = "transport-tcp")]
    pub fn new(config: IrcConfig) -> Self {
        Self::with_connector(config, Arc::new(crate::transports::TcpConnector::new()))
    }

    /// Create an engine whose live connections are opened by `connector`.
    ///
    /// Loopback connections (`ConnectOptions::real == false`) never touch
    /// the connector.
    pub fn with_connector(config: IrcConfig, connector: Arc<dyn Connector>) -> Self {
        let loopback = LoopbackConnector::new(config.loopback_delay);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                loopback,
                events: EventRegistry::new(),
                state: Mutex::new(EngineState::default()),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    fn upgrade(engine: &Weak<Inner>) -> Option<Self> {
        engine.upgrade().map(|inner| Self { inner })
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&IrcEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Register `handler` for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&IrcEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_any(handler)
    }

    /// Remove a handler. Returns `false` if it was already removed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.events.off(id)
    }

    /// Receive every event through a bounded channel of
    /// [`IrcConfig::event_channel_capacity`] slots.
    ///
    /// Events that do not fit are dropped with a warning. Pass the returned
    /// id to [`off`](Self::off) to stop forwarding.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::Receiver<IrcEvent>) {
        self.inner
            .events
            .channel(self.inner.config.event_channel_capacity)
    }

    fn emit(&self, event: IrcEvent) {
        self.inner.events.emit(&event);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Connect to `host:port` as `nick`.
    ///
    /// Arguments and state are checked before any I/O. The host, port and
    /// nickname are remembered for [`reconnect`](Self::reconnect) even if
    /// the connection then fails.
    ///
    /// # Errors
    ///
    /// - [`IrcError::InvalidArgument`] for an empty host, port 0, a bad
    ///   nickname, or a blank user name when `auto_register` is set.
    /// - [`IrcError::AlreadyConnected`] unless the engine is disconnected.
    /// - [`IrcError::ConnectTimeout`] when `options.timeout` elapses.
    /// - [`IrcError::ConnectAborted`] when [`disconnect`](Self::disconnect)
    ///   ran while the connection was being opened.
    /// - Any error from the connector ([`IrcError::Io`], [`IrcError::Tls`]).
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        nick: &str,
        options: ConnectOptions,
    ) -> Result<()> {
        let host = validate_host(host)?.to_owned();
        let port = validate_port(i64::from(port))?;
        let nick = sanitize_nick(nick)?;
        if options.auto_register {
            if let Some(user) = options.user.as_deref() {
                sanitize_target(user)?;
            }
        }

        let generation = {
            let mut state = self.inner.lock();
            if state.phase != ConnectionState::Disconnected {
                return Err(IrcError::AlreadyConnected);
            }
            state.generation += 1;
            state.phase = ConnectionState::Connecting;
            state.info = Some(ServerInfo {
                host: host.clone(),
                port,
                nick,
            });
            state.options = Some(options.clone());
            state.generation
        };

        let target = TransportTarget::new(host, port, options.tls, options.tls_options.clone());
        let connector: &dyn Connector = if options.real {
            self.inner.connector.as_ref()
        } else {
            &self.inner.loopback
        };
        info!(addr = %target, real = options.real, generation, "connecting");

        let opening = connector.open(&target);
        let opened = match options.timeout {
            Some(limit) => time::timeout(limit, opening)
                .await
                .unwrap_or_else(|_| Err(IrcError::ConnectTimeout)),
            None => opening.await,
        };

        let transport = match opened {
            Ok(transport) => transport,
            Err(err) => {
                {
                    let mut state = self.inner.lock();
                    if state.generation == generation
                        && state.phase == ConnectionState::Connecting
                    {
                        state.phase = ConnectionState::Disconnected;
                    }
                }
                error!(addr = %target, error = %err, "connect failed");
                self.emit(IrcEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let rate_limit = options.rate_limit.clamp(MIN_RATE_LIMIT, MAX_RATE_LIMIT);
        if let Err(mut transport) =
            self.start_session(generation, transport, rate_limit, &options)
        {
            debug!(generation, "connect superseded by disconnect, closing transport");
            if let Err(e) = transport.close().await {
                debug!(error = %e, "closing abandoned transport failed");
            }
            return Err(IrcError::ConnectAborted);
        }

        info!(addr = %target, generation, "connected");
        self.emit(IrcEvent::Connected);

        if options.auto_register {
            if let Err(e) = self.register(&options.registration()) {
                warn!(error = %e, "registration failed, closing connection");
                self.disconnect();
                return Err(e);
            }
        }
        for channel in &options.auto_join {
            if let Err(e) = self.send_join(channel, None) {
                warn!(channel = %channel, error = %e, "auto-join skipped");
            }
        }
        Ok(())
    }

    /// Install the session for `generation` and spawn its task. Hands the
    /// transport back if a `disconnect` got there first.
    fn start_session(
        &self,
        generation: u64,
        transport: Box<dyn Transport>,
        rate_limit: Duration,
        options: &ConnectOptions,
    ) -> std::result::Result<(), Box<dyn Transport>> {
        let mut state = self.inner.lock();
        if state.generation != generation || state.phase != ConnectionState::Connecting {
            return Err(transport);
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(
            Arc::downgrade(&self.inner),
            generation,
            transport,
            shutdown_rx,
            rate_limit,
        ));
        let mut session = Session::new(generation, options.auto_pong, !options.real);
        session.shutdown_tx = Some(shutdown_tx);
        session.task = Some(task);
        state.session = Some(session);
        state.phase = ConnectionState::Connected;
        Ok(())
    }

    /// Close the connection and forget host, port, nickname and channels.
    ///
    /// Unsent queued lines and pending pings are discarded. Calling this
    /// while disconnected only clears the remembered state. A connect that
    /// is still in flight fails with [`IrcError::ConnectAborted`].
    pub fn disconnect(&self) {
        drop(self.teardown());
    }

    /// [`disconnect`](Self::disconnect), then wait for the session task to
    /// close the transport, aborting it after
    /// [`IrcConfig::shutdown_timeout`].
    pub async fn shutdown(&self) {
        debug!("IrcClient: shutdown requested");
        let Some(mut task) = self.teardown() else {
            return;
        };
        match time::timeout(self.inner.config.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!("session task terminated with join error: {join_err}");
            }
            Err(_) => {
                warn!("session task did not exit within timeout; aborting task");
                task.abort();
                if let Err(join_err) = task.await {
                    debug!("session task aborted: {join_err}");
                }
            }
        }
    }

    fn teardown(&self) -> Option<JoinHandle<()>> {
        let (was_connected, session) = {
            let mut state = self.inner.lock();
            let was_connected = state.phase == ConnectionState::Connected;
            if state.phase != ConnectionState::Disconnected {
                state.generation += 1;
            }
            state.phase = ConnectionState::Disconnected;
            state.info = None;
            state.options = None;
            state.channels.clear();
            state.current = None;
            (was_connected, state.session.take())
        };
        let task = session.and_then(Session::stop);
        if was_connected {
            info!("disconnected");
            self.emit(IrcEvent::Disconnected);
        }
        task
    }

    /// Disconnect, then connect again to the last host, port and nickname
    /// with the last options.
    ///
    /// Returns `false` when no previous connection is known or every attempt
    /// failed. Never returns an error.
    pub async fn reconnect(&self, policy: ReconnectPolicy) -> bool {
        let (info, options) = {
            let state = self.inner.lock();
            (state.info.clone(), state.options.clone())
        };
        let Some(info) = info else {
            debug!("reconnect requested without a previous connection");
            return false;
        };
        let options = options.unwrap_or_default();

        self.disconnect();

        let mut delay = policy.base_delay;
        for attempt in 1..=policy.max_attempts {
            match self
                .connect(&info.host, info.port, &info.nick, options.clone())
                .await
            {
                Ok(()) => {
                    info!(attempt, host = %info.host, port = info.port, "reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    if attempt < policy.max_attempts {
                        time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }
        false
    }

    /// Measure the round-trip time of a `PING` to the server.
    ///
    /// In loopback mode the round-trip completes at once with a small
    /// synthetic elapsed time, regardless of how many lines are queued.
    ///
    /// # Errors
    ///
    /// - [`IrcError::NotConnected`] when not connected.
    /// - [`IrcError::PingTimeout`] when no reply arrives within
    ///   [`IrcConfig::ping_timeout`].
    /// - [`IrcError::TransportClosed`] when the session ends first.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let token = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let loopback = {
            let mut state = self.inner.lock();
            let session = state.live_session()?;
            if !session.loopback {
                session.pings.insert(token.clone(), tx);
            }
            session.loopback
        };
        if loopback {
            tokio::task::yield_now().await;
            let elapsed = started.elapsed();
            debug!(elapsed_ms = elapsed.as_millis() as u64, "loopback ping answered");
            return Ok(elapsed);
        }
        self.enqueue_raw(&format!("PING :{token}"))?;

        match time::timeout(self.inner.config.ping_timeout, rx).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                debug!(elapsed_ms = elapsed.as_millis() as u64, "ping answered");
                Ok(elapsed)
            }
            Ok(Err(_)) => Err(IrcError::TransportClosed),
            Err(_) => {
                if let Some(session) = self.inner.lock().session.as_mut() {
                    session.pings.remove(&token);
                }
                Err(IrcError::PingTimeout)
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Send `text` as a PRIVMSG to `target`, or to the current channel.
    ///
    /// A [`IrcEvent::Message`] echo is published before the line is queued.
    ///
    /// # Errors
    ///
    /// [`IrcError::NotConnected`], or [`IrcError::NoTarget`] when no target
    /// was given and no channel is current.
    pub fn send_message(&self, text: &str, target: Option<&str>) -> Result<()> {
        let (from, target) = {
            let mut state = self.inner.lock();
            state.live_session()?;
            let target = match target {
                Some(target) => sanitize_target(target)?,
                None => state.current.clone().ok_or(IrcError::NoTarget)?,
            };
            (state.nick().unwrap_or_default().to_owned(), target)
        };
        let text = strip_line_breaks(text);
        self.emit(IrcEvent::Message(OwnMessage {
            from,
            text: text.clone(),
            target: target.clone(),
        }));
        self.enqueue_raw(&format!("PRIVMSG {target} :{text}"))
    }

    /// Queue `JOIN <channel>[ <key>]`. A missing `#` is added.
    pub fn send_join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        self.require_connected()?;
        let channel = sanitize_channel(channel)?;
        let line = match key.filter(|key| !key.trim().is_empty()) {
            Some(key) => format!("JOIN {channel} {}", sanitize_target(key)?),
            None => format!("JOIN {channel}"),
        };
        self.enqueue_raw(&line)
    }

    /// Queue `PART <channel>[ :<message>]`, defaulting to the current channel.
    ///
    /// # Errors
    ///
    /// [`IrcError::NotConnected`], or [`IrcError::NoChannel`] when no channel
    /// was given and none is current.
    pub fn send_part(&self, channel: Option<&str>, message: Option<&str>) -> Result<()> {
        let channel = {
            let mut state = self.inner.lock();
            state.live_session()?;
            match channel {
                Some(channel) => sanitize_channel(channel)?,
                None => state.current.clone().ok_or(IrcError::NoChannel)?,
            }
        };
        let line = match message {
            Some(message) => format!("PART {channel} :{}", strip_line_breaks(message)),
            None => format!("PART {channel}"),
        };
        self.enqueue_raw(&line)
    }

    /// Queue `NICK <nick>`. The session nickname changes once the server
    /// echoes the change.
    pub fn send_nick(&self, nick: &str) -> Result<()> {
        self.require_connected()?;
        let nick = sanitize_nick(nick)?;
        self.enqueue_raw(&format!("NICK {nick}"))
    }

    /// Queue `USER <user> 0 * :<realname>`.
    pub fn send_user(&self, user: &str, realname: &str) -> Result<()> {
        self.require_connected()?;
        let user = sanitize_target(user)?;
        self.enqueue_raw(&format!(
            "USER {user} 0 * :{}",
            strip_line_breaks(realname)
        ))
    }

    /// Queue `PASS <password>`.
    pub fn send_pass(&self, password: &str) -> Result<()> {
        self.require_connected()?;
        self.enqueue_raw(&format!("PASS {}", strip_line_breaks(password)))
    }

    /// Queue `PRIVMSG NickServ :IDENTIFY <password>`.
    pub fn send_identify(&self, password: &str) -> Result<()> {
        self.require_connected()?;
        self.enqueue_raw(&format!(
            "PRIVMSG NickServ :IDENTIFY {}",
            strip_line_breaks(password)
        ))
    }

    /// Queue the login sequence: PASS (when a password is set), NICK with
    /// the session nickname, then USER.
    pub fn register(&self, registration: &Registration) -> Result<()> {
        let nick = {
            let mut state = self.inner.lock();
            state.live_session()?;
            state.nick().unwrap_or_default().to_owned()
        };
        if let Some(password) = registration
            .password
            .as_deref()
            .filter(|password| !password.is_empty())
        {
            self.send_pass(password)?;
        }
        self.send_nick(&nick)?;
        let user = registration.user.as_deref().unwrap_or(nick.as_str());
        let realname = registration.realname.as_deref().unwrap_or(user);
        self.send_user(user, realname)
    }

    /// Queue `QUIT[ :<message>]`. The server closes the connection after it.
    pub fn send_quit(&self, message: Option<&str>) -> Result<()> {
        self.require_connected()?;
        let line = match message {
            Some(message) => format!("QUIT :{}", strip_line_breaks(message)),
            None => "QUIT".to_owned(),
        };
        self.enqueue_raw(&line)
    }

    /// Alias of [`enqueue_raw`](Self::enqueue_raw).
    pub fn send_raw(&self, line: &str) -> Result<()> {
        self.enqueue_raw(line)
    }

    /// Append a line to the outbound queue. CR, LF and NUL are stripped.
    ///
    /// When the queue is at its high-water mark the oldest lines are dropped
    /// to make room; the new line is always accepted.
    pub fn enqueue_raw(&self, line: &str) -> Result<()> {
        let line = strip_line_breaks(line);
        let dropped = {
            let mut state = self.inner.lock();
            let config = &self.inner.config;
            state
                .live_session()?
                .push(line, config.queue_high_water, config.queue_drop_batch)
        };
        self.note_dropped(dropped);
        Ok(())
    }

    fn require_connected(&self) -> Result<()> {
        self.inner.lock().live_session().map(|_| ())
    }

    fn note_dropped(&self, dropped: usize) {
        if dropped > 0 {
            let total = self
                .inner
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed)
                + dropped as u64;
            warn!(dropped, total, "outbound queue full, dropped oldest lines");
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Process one inbound line as if it had arrived from the server.
    ///
    /// Publishes [`IrcEvent::Raw`], parses the line, updates channel and
    /// nickname state, then publishes the typed event. A line that fails to
    /// parse produces an [`IrcEvent::Error`] instead of the typed event.
    pub fn handle_inbound_line(&self, line: &str) {
        self.emit(IrcEvent::Raw(line.to_owned()));

        let msg = match Message::try_parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(line = %line.escape_debug(), error = %e, "dropping malformed line");
                self.emit(IrcEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        self.apply_inbound(&msg);
        if let Some(event) = IrcEvent::from_message(msg) {
            self.emit(event);
        }
    }

    fn apply_inbound(&self, msg: &Message) {
        let mut dropped = 0;
        {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            let own = state.nick().is_some_and(|nick| msg.is_from(nick));
            match msg.kind {
                MessageKind::Join if own => {
                    if let Some(channel) = msg.channel() {
                        debug!(channel, "joined");
                        state.add_channel(channel);
                    }
                }
                MessageKind::Part if own => {
                    if let Some(channel) = msg.channel() {
                        debug!(channel, "parted");
                        state.remove_channel(channel);
                    }
                }
                MessageKind::Nick if own => {
                    if let (Some(info), Some(new_nick)) = (state.info.as_mut(), msg.text()) {
                        info!(old = %info.nick, new = new_nick, "nickname changed");
                        info.nick = new_nick.to_owned();
                    }
                }
                MessageKind::Numeric if msg.reply() == Some(Reply::Welcome) => {
                    if let (Some(info), Some(confirmed)) = (state.info.as_mut(), msg.target()) {
                        if info.nick != confirmed {
                            debug!(requested = %info.nick, confirmed, "server assigned nickname");
                            info.nick = confirmed.to_owned();
                        }
                    }
                }
                MessageKind::Ping => {
                    if let (Some(session), Some(token)) = (state.session.as_mut(), msg.text()) {
                        if let Some(waiter) = session.pings.remove(token) {
                            let _ = waiter.send(());
                        } else if session.auto_pong && msg.command.eq_ignore_ascii_case("PING") {
                            let config = &self.inner.config;
                            dropped = session.push(
                                format!("PONG :{token}"),
                                config.queue_high_water,
                                config.queue_drop_batch,
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        self.note_dropped(dropped);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Host, port and nickname of the current (or last failed) connection.
    pub fn info(&self) -> Option<ServerInfo> {
        self.inner.lock().info.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase
    }

    /// The session nickname, as last confirmed by the server.
    pub fn nick(&self) -> Option<String> {
        self.inner.lock().nick().map(str::to_owned)
    }

    /// Joined channels, in join order.
    pub fn joined_channels(&self) -> Vec<String> {
        self.inner.lock().channels.clone()
    }

    pub fn current_channel(&self) -> Option<String> {
        self.inner.lock().current.clone()
    }

    /// Select the channel that [`send_message`](Self::send_message) and
    /// [`send_part`](Self::send_part) default to.
    ///
    /// # Errors
    ///
    /// [`IrcError::InvalidArgument`] when `channel` is not joined.
    pub fn set_current_channel(&self, channel: Option<&str>) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(channel) = channel else {
            state.current = None;
            return Ok(());
        };
        let wanted = sanitize_channel(channel)?;
        let joined = state
            .channels
            .iter()
            .find(|joined| irc_eq(joined, &wanted))
            .cloned()
            .ok_or_else(|| IrcError::InvalidArgument(format!("not joined to {wanted}")))?;
        state.current = Some(joined);
        Ok(())
    }

    /// Lines waiting in the outbound queue, oldest first.
    pub fn pending_commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total lines dropped by queue overflow since the engine was created.
    pub fn dropped_commands(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for IrcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("IrcClient")
            .field("state", &state.phase)
            .field("info", &state.info)
            .field("channels", &state.channels)
            .field("current", &state.current)
            .field(
                "pending",
                &state.session.as_ref().map_or(0, |s| s.queue.len()),
            )
            .finish()
    }
}

// ── Session task ────────────────────────────────────────────────────

enum SessionEnd {
    /// Disconnect, a newer session, or the engine was dropped.
    Requested,
    /// The peer closed the connection.
    Closed,
    Failed(IrcError),
}

enum Outbound {
    Stale,
    Idle,
    Line(String),
}

impl IrcClient {
    fn next_outbound(&self, generation: u64) -> Outbound {
        let mut state = self.inner.lock();
        match state.session.as_mut() {
            Some(session) if session.generation == generation => session
                .queue
                .pop_front()
                .map_or(Outbound::Idle, Outbound::Line),
            _ => Outbound::Stale,
        }
    }

    /// The transport of `generation` went away without a `disconnect`.
    /// Host, port and nickname stay for `reconnect`; channel membership does
    /// not survive the connection.
    fn session_lost(&self, generation: u64, err: Option<IrcError>) {
        let was_current = {
            let mut state = self.inner.lock();
            if state.is_current(generation) {
                state.session = None;
                state.phase = ConnectionState::Disconnected;
                state.channels.clear();
                state.current = None;
                true
            } else {
                false
            }
        };
        if !was_current {
            return;
        }
        if let Some(e) = err {
            self.emit(IrcEvent::Error {
                message: e.to_string(),
            });
        }
        info!(generation, "connection lost");
        self.emit(IrcEvent::Disconnected);
    }
}

/// Background loop owning the transport of one connection.
///
/// Exits when:
/// - The shutdown signal fires or its sender is dropped (disconnect, or the
///   engine itself was dropped)
/// - The transport returns `None` (server closed connection)
/// - A transport error occurs
async fn run_session(
    engine: Weak<Inner>,
    generation: u64,
    mut transport: Box<dyn Transport>,
    mut shutdown_rx: oneshot::Receiver<()>,
    rate_limit: Duration,
) {
    debug!(generation, "session task started");

    let mut pump = time::interval_at(Instant::now() + rate_limit, rate_limit);
    pump.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => break SessionEnd::Requested,

            _ = pump.tick() => {
                let Some(client) = IrcClient::upgrade(&engine) else {
                    break SessionEnd::Requested;
                };
                let next = client.next_outbound(generation);
                drop(client);
                match next {
                    Outbound::Stale => break SessionEnd::Requested,
                    Outbound::Idle => {}
                    Outbound::Line(line) => {
                        debug!(generation, line = %line, "sending line");
                        if let Err(e) = transport.send(line).await {
                            break SessionEnd::Failed(e);
                        }
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(line)) => {
                        let Some(client) = IrcClient::upgrade(&engine) else {
                            break SessionEnd::Requested;
                        };
                        if !client.inner.lock().is_current(generation) {
                            break SessionEnd::Requested;
                        }
                        debug!(generation, line = %line, "received line");
                        client.handle_inbound_line(&line);
                    }
                    Some(Err(e)) => break SessionEnd::Failed(e),
                    None => break SessionEnd::Closed,
                }
            }
        }
    };

    if let Err(e) = transport.close().await {
        debug!(generation, error = %e, "transport close failed");
    }

    match end {
        SessionEnd::Requested => debug!(generation, "session stopped"),
        SessionEnd::Closed => {
            debug!(generation, "transport closed by server");
            if let Some(client) = IrcClient::upgrade(&engine) {
                client.session_lost(generation, None);
            }
        }
        SessionEnd::Failed(e) => {
            error!(generation, error = %e, "transport failure");
            if let Some(client) = IrcClient::upgrade(&engine) {
                client.session_lost(generation, Some(e));
            }
        }
    }

    debug!(generation, "session task exited");
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records sent lines; `recv` stays pending until closed.
    struct SilentTransport {
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send(&mut self, line: String) -> std::result::Result<(), IrcError> {
            self.sent.lock().unwrap().push(line);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, IrcError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), IrcError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    struct SilentConnector {
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for SilentConnector {
        async fn open(
            &self,
            _target: &TransportTarget,
        ) -> std::result::Result<Box<dyn Transport>, IrcError> {
            Ok(Box::new(SilentTransport {
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn silent_client() -> (IrcClient, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let client = IrcClient::with_connector(
            IrcConfig::new().with_loopback_delay(Duration::ZERO),
            Arc::new(SilentConnector {
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            }),
        );
        (client, sent, closed)
    }

    fn real() -> ConnectOptions {
        ConnectOptions::new()
            .with_real(true)
            .with_rate_limit(MIN_RATE_LIMIT)
    }

    // ── Config ──────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = IrcConfig::new();
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.queue_high_water, 1000);
        assert_eq!(config.queue_drop_batch, 100);
        assert_eq!(config.loopback_delay, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn config_clamps() {
        let config = IrcConfig::new()
            .with_queue_limits(0, 0)
            .with_event_channel_capacity(0);
        assert_eq!(config.queue_high_water, 1);
        assert_eq!(config.queue_drop_batch, 1);
        assert_eq!(config.event_channel_capacity, 1);

        let config = IrcConfig::new().with_queue_limits(10, 50);
        assert_eq!(config.queue_drop_batch, 10);
    }

    #[test]
    fn rate_limit_is_clamped() {
        let low = ConnectOptions::new().with_rate_limit(Duration::from_millis(1));
        assert_eq!(low.rate_limit, MIN_RATE_LIMIT);
        let high = ConnectOptions::new().with_rate_limit(Duration::from_secs(60));
        assert_eq!(high.rate_limit, MAX_RATE_LIMIT);
        assert_eq!(ConnectOptions::new().rate_limit, DEFAULT_RATE_LIMIT);
        assert!(ConnectOptions::new().auto_pong);
    }

    #[test]
    fn reconnect_policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }

    // ── State bookkeeping ───────────────────────────────────────────

    #[test]
    fn queue_overflow_drops_oldest_batch() {
        let mut session = Session::new(1, true, false);
        for i in 0..10 {
            assert_eq!(session.push(format!("L{i}"), 10, 3), 0);
        }
        assert_eq!(session.push("L10".into(), 10, 3), 3);
        assert_eq!(session.queue.len(), 8);
        assert_eq!(session.queue.front().map(String::as_str), Some("L3"));
        assert_eq!(session.queue.back().map(String::as_str), Some("L10"));
    }

    #[test]
    fn channel_set_is_casemapped() {
        let mut state = EngineState::default();
        state.add_channel("#Rust");
        state.add_channel("#rust");
        state.add_channel("#tokio");
        assert_eq!(state.channels, vec!["#Rust", "#tokio"]);
        assert_eq!(state.current.as_deref(), Some("#Rust"));

        state.remove_channel("#RUST");
        assert_eq!(state.channels, vec!["#tokio"]);
        assert_eq!(state.current.as_deref(), Some("#tokio"));

        state.remove_channel("#tokio");
        assert!(state.channels.is_empty());
        assert_eq!(state.current, None);
    }

    // ── Session ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn pump_sends_one_line_per_tick_in_order() {
        let (client, sent, _closed) = silent_client();
        client.connect("irc.test", 6667, "dust", real()).await.unwrap();
        client.send_nick("dust").unwrap();
        client.send_user("dust", "Dust").unwrap();
        assert_eq!(client.pending_commands().len(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["NICK dust", "USER dust 0 * :Dust"]
        );
        assert!(client.pending_commands().is_empty());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_transport() {
        let (client, _sent, closed) = silent_client();
        client.connect("irc.test", 6667, "dust", real()).await.unwrap();
        client.shutdown().await;
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());
        assert_eq!(client.info(), None);
    }

    #[tokio::test]
    async fn dropping_last_handle_closes_transport() {
        let (client, _sent, closed) = silent_client();
        client.connect("irc.test", 6667, "dust", real()).await.unwrap();
        drop(client);
        tokio::time::timeout(Duration::from_secs(1), async {
            while !closed.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn auto_pong_answers_server_ping() {
        let (client, _sent, _closed) = silent_client();
        client.connect("irc.test", 6667, "dust", real()).await.unwrap();
        client.handle_inbound_line("PING :irc.test");
        assert_eq!(client.pending_commands(), vec!["PONG :irc.test"]);

        client.handle_inbound_line(":irc.test PONG irc.test :unrelated");
        assert_eq!(client.pending_commands().len(), 1);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn welcome_confirms_nickname() {
        let (client, _sent, _closed) = silent_client();
        client.connect("irc.test", 6667, "dust", real()).await.unwrap();
        client.handle_inbound_line(":irc.test 001 dust_ :Welcome to the network");
        assert_eq!(client.nick().as_deref(), Some("dust_"));
        client.shutdown().await;
    }
}
