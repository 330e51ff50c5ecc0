//! # Dust IRC
//!
//! Embeddable single-server IRC client engine.
//!
//! This crate owns one connection to an IRC server, speaks the line protocol
//! (with optional IRCv3 message tags), and turns inbound traffic into typed
//! events for a host application such as a chat panel or a bot.
//!
//! ## Features
//!
//! - **Total parser**: [`Message::parse`] accepts any input without failing
//! - **Typed events**: subscribe per [`EventKind`] with callbacks, or take a
//!   bounded channel via [`IrcClient::subscribe`]
//! - **Channel tracking**: joined channels and a "current" channel follow the
//!   server's own JOIN/PART echoes
//! - **Rate-limited sends**: outbound lines leave one per interval from a
//!   bounded queue that drops its oldest lines under pressure
//! - **Transport-agnostic**: in-memory loopback for tests and demos, TCP/TLS
//!   behind the default `transport-tcp` feature, or your own [`Connector`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dust_irc::{ConnectOptions, EventKind, IrcClient, IrcConfig, IrcEvent};
//!
//! # async fn example() -> Result<(), dust_irc::IrcError> {
//! let client = IrcClient::new(IrcConfig::new());
//! client.on(EventKind::Join, |event| {
//!     if let IrcEvent::Join(msg) = event {
//!         println!("{:?} joined {:?}", msg.from, msg.channel());
//!     }
//! });
//!
//! client
//!     .connect("irc.libera.chat", 6697, "dust", ConnectOptions::new().with_real(true).with_auto_register(true))
//!     .await?;
//! client.send_join("#rust", None)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod emitter;
pub mod error;
pub mod event;
pub mod message;
pub mod numeric;
pub mod transport;
pub mod transports;
pub mod validate;

// Re-export primary types for ergonomic imports.
pub use client::{
    ConnectOptions, ConnectionState, IrcClient, IrcConfig, ReconnectPolicy, Registration,
    ServerInfo,
};
pub use emitter::{EventRegistry, SubscriptionId};
pub use error::{ErrorKind, IrcError, Result};
pub use event::{EventKind, IrcEvent, OwnMessage};
pub use message::{Message, MessageKind, TagValue, Tags};
pub use numeric::Reply;
pub use transport::{Connector, TlsOptions, Transport, TransportTarget};
pub use transports::{LoopbackConnector, LoopbackTransport};

#[cfg(feature = "transport-tcp")]
pub use transports::{TcpConnector, TcpTransport};
