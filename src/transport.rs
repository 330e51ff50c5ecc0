//! Transport abstraction for the IRC client engine.
//!
//! The [`Transport`] trait is a bidirectional channel of IRC lines between the
//! engine and a server. Lines cross the trait without their `\r\n`
//! terminator, so every implementation owns its own framing: the TCP
//! transport appends `\r\n` on send and splits the byte stream on `\n` on
//! receive, the loopback transport hands lines back untouched.
//!
//! # Connection Setup
//!
//! Opening a transport is the job of a [`Connector`]. The engine receives a
//! connector at construction time (see
//! [`IrcClient::with_connector`](crate::IrcClient::with_connector)) and asks it
//! for a fresh transport on every `connect`, which is also the seam tests use
//! to substitute a scripted transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use dust_irc::error::IrcError;
//! use dust_irc::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, line: String) -> Result<(), IrcError> {
//!         // Write `line` followed by "\r\n"
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, IrcError>> {
//!         // Return the next complete line without its terminator
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), IrcError> {
//!         // Shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;

use crate::error::IrcError;

/// Conventional ports that imply TLS even when it was not requested.
pub const SECURE_PORTS: [u16; 1] = [6697];

/// A bidirectional IRC line transport.
///
/// # Object Safety
///
/// This trait is object-safe; connectors hand out `Box<dyn Transport>`.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because the
/// session loop races it against the outbound pump inside `tokio::select!`.
/// If `recv` is cancelled before completion, calling it again must not lose
/// data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one IRC line. The line carries no terminator.
    ///
    /// # Errors
    ///
    /// Returns [`IrcError::TransportSend`] or [`IrcError::TransportClosed`] if
    /// the line could not be written.
    async fn send(&mut self, line: String) -> Result<(), IrcError>;

    /// Receive the next complete line, without its terminator.
    ///
    /// Returns:
    /// - `Some(Ok(line))`: a complete line was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed by the peer
    async fn recv(&mut self) -> Option<Result<String, IrcError>>;

    /// Close the transport. Calling it twice is not an error.
    async fn close(&mut self) -> Result<(), IrcError>;
}

/// TLS overrides for a live connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Name sent for SNI and checked against the certificate. Defaults to the host.
    pub server_name: Option<String>,
    /// Skip certificate verification (self-signed test servers only).
    pub accept_invalid_certs: bool,
}

impl TlsOptions {
    /// Override the SNI / verification name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Disable certificate verification.
    #[must_use]
    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

/// Where and how a [`Connector`] should open a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
    pub host: String,
    pub port: u16,
    /// Wrap the connection in TLS.
    pub tls: bool,
    pub tls_options: TlsOptions,
}

impl TransportTarget {
    /// Build a target, turning TLS on when requested or when `port` is a
    /// conventional secure IRC port.
    pub fn new(host: impl Into<String>, port: u16, tls: bool, tls_options: TlsOptions) -> Self {
        Self {
            host: host.into(),
            port,
            tls: tls || SECURE_PORTS.contains(&port),
            tls_options,
        }
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "ircs" } else { "irc" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Opens transports for the engine.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a transport to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`IrcError::Io`] or [`IrcError::Tls`] when the connection or
    /// handshake fails.
    async fn open(&self, target: &TransportTarget) -> Result<Box<dyn Transport>, IrcError>;
}
