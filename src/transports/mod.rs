//! Transport implementations for the IRC client engine.
//!
//! This module provides concrete [`Transport`](crate::transport::Transport)
//! implementations. The loopback transport is always available; network
//! transports sit behind Cargo features:
//!
//! | Feature         | Transport                                 |
//! |-----------------|-------------------------------------------|
//! | (always)        | [`LoopbackTransport`]                     |
//! | `transport-tcp` | [`TcpTransport`] (plain TCP or TLS)       |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), dust_irc::IrcError> {
//! use dust_irc::transport::Transport;
//! use dust_irc::transports::LoopbackTransport;
//!
//! let mut transport = LoopbackTransport::new();
//! transport.send("PING :42".to_string()).await?;
//!
//! if let Some(Ok(line)) = transport.recv().await {
//!     assert_eq!(line, "PING :42");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod framing;
pub mod loopback;

#[cfg(feature = "transport-tcp")]
pub mod tcp;

pub use framing::{LineBuffer, MAX_LINE_LEN};
pub use loopback::{LoopbackConnector, LoopbackTransport};

#[cfg(feature = "transport-tcp")]
pub use tcp::{IrcStream, TcpConnector, TcpTransport};
