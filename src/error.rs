//! Error types for the IRC client engine.

use thiserror::Error;

/// Errors that can occur when using the IRC client engine.
#[derive(Debug, Error)]
pub enum IrcError {
    /// A caller-supplied value was rejected (empty host, port 0, malformed
    /// or over-long nickname or channel name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `connect` was called while a connection is established or in progress.
    #[error("already connected")]
    AlreadyConnected,

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected")]
    NotConnected,

    /// `send_message` was called without a target and no current channel is set.
    #[error("no target specified and no current channel")]
    NoTarget,

    /// `send_part` was called without a channel and no current channel is set.
    #[error("no channel specified and no current channel")]
    NoChannel,

    /// The transport did not finish connecting within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// `disconnect` was called while the connect attempt was still in flight.
    #[error("connect aborted by disconnect")]
    ConnectAborted,

    /// No matching PONG arrived within the ping window.
    #[error("ping timed out")]
    PingTimeout,

    /// Failed to send a line through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a line from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// An inbound line could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`IrcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed a bad value. Fix the call.
    Argument,
    /// The engine is in the wrong state for the call.
    State,
    /// The network or transport failed.
    Network,
    /// Inbound data was malformed. Only ever seen through error events.
    Parse,
}

impl IrcError {
    /// Returns the [`ErrorKind`] this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::Argument,
            Self::AlreadyConnected | Self::NotConnected | Self::NoTarget | Self::NoChannel => {
                ErrorKind::State
            }
            Self::ConnectTimeout
            | Self::ConnectAborted
            | Self::PingTimeout
            | Self::TransportSend(_)
            | Self::TransportReceive(_)
            | Self::TransportClosed
            | Self::Tls(_)
            | Self::Io(_) => ErrorKind::Network,
            Self::Parse(_) => ErrorKind::Parse,
        }
    }
}

/// A specialized [`Result`] type for IRC client operations.
pub type Result<T> = std::result::Result<T, IrcError>;
