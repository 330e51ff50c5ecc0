//! TCP transport with optional TLS, using `tokio` and `tokio-rustls`.
//!
//! This module provides [`TcpConnector`], the engine's default
//! [`Connector`], and [`TcpTransport`], a [`Transport`] over any byte stream.
//! Outbound lines are terminated with `\r\n`; inbound bytes are split into
//! lines by a [`LineBuffer`].
//!
//! # Feature gate
//!
//! This module is only available when the `transport-tcp` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), dust_irc::IrcError> {
//! use dust_irc::transport::{Connector, TlsOptions, TransportTarget};
//! use dust_irc::transports::TcpConnector;
//!
//! let target = TransportTarget::new("irc.libera.chat", 6697, true, TlsOptions::default());
//! let mut transport = TcpConnector::new().open(&target).await?;
//! transport.send("NICK dust".to_string()).await?;
//!
//! if let Some(Ok(line)) = transport.recv().await {
//!     println!("server said: {line}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use super::framing::LineBuffer;
use crate::error::IrcError;
use crate::transport::{Connector, Transport, TransportTarget};

const READ_CHUNK: usize = 4096;

/// Any duplex byte stream a [`TcpTransport`] can run over.
pub trait IrcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> IrcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Opens plain TCP or TLS connections.
///
/// TLS trust anchors come from `webpki-roots`. Certificate verification can
/// be switched off per connection with
/// [`TlsOptions::accept_invalid_certs`](crate::transport::TlsOptions).
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, target: &TransportTarget) -> Result<Box<dyn Transport>, IrcError> {
        let tls = if target.tls {
            let name = target
                .tls_options
                .server_name
                .as_deref()
                .unwrap_or(&target.host);
            let server_name = ServerName::try_from(name.to_owned())
                .map_err(|e| IrcError::Tls(format!("invalid server name {name:?}: {e}")))?;
            let config = client_config(target.tls_options.accept_invalid_certs)?;
            Some((TlsConnector::from(Arc::new(config)), server_name))
        } else {
            None
        };

        debug!(host = %target.host, port = target.port, tls = target.tls, "connecting");
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        tcp.set_nodelay(true)?;

        let transport = match tls {
            Some((connector, server_name)) => {
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| IrcError::Tls(format!("handshake with {target} failed: {e}")))?;
                debug!(host = %target.host, "TLS handshake complete");
                TcpTransport::from_stream(stream)
            }
            None => TcpTransport::from_stream(tcp),
        };

        info!(addr = %target, "connection established");
        Ok(Box::new(transport))
    }
}

fn client_config(accept_invalid_certs: bool) -> Result<ClientConfig, IrcError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| IrcError::Tls(e.to_string()))?;

    let config = if accept_invalid_certs {
        debug!("TLS certificate verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Accepts every certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// A [`Transport`] over a TCP (or TLS, or in-memory) byte stream.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. It only awaits a
/// single `read`, and bytes are moved into the line buffer synchronously
/// after the read completes.
pub struct TcpTransport {
    stream: Box<dyn IrcStream>,
    lines: LineBuffer,
    chunk: Box<[u8]>,
    eof: bool,
    closed: bool,
}

impl TcpTransport {
    /// Wrap an already-established stream.
    ///
    /// Useful for proxies, custom TLS setups, or `tokio::io::duplex` pairs in
    /// tests.
    pub fn from_stream<S: IrcStream>(stream: S) -> Self {
        Self {
            stream: Box::new(stream),
            lines: LineBuffer::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            eof: false,
            closed: false,
        }
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("lines", &self.lines)
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, line: String) -> Result<(), IrcError> {
        if self.closed {
            return Err(IrcError::TransportClosed);
        }
        let mut framed = line.into_bytes();
        framed.extend_from_slice(b"\r\n");
        self.stream
            .write_all(&framed)
            .await
            .map_err(|e| IrcError::TransportSend(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| IrcError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, IrcError>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Some(Ok(line));
            }
            if self.eof || self.closed {
                return None;
            }
            match self.stream.read(&mut self.chunk).await {
                Ok(0) => {
                    if self.lines.partial_len() > 0 {
                        debug!(
                            bytes = self.lines.partial_len(),
                            "connection closed mid-line, discarding fragment"
                        );
                    }
                    self.eof = true;
                    return None;
                }
                Ok(n) => self.lines.extend(self.chunk.get(..n).unwrap_or_default()),
                Err(e) => return Some(Err(IrcError::TransportReceive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), IrcError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .shutdown()
            .await
            .map_err(|e| IrcError::TransportSend(e.to_string()))
    }
}

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
    use crate::transport::TlsOptions;
    use tokio::net::TcpListener;

    #[test]
    fn tcp_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<TcpTransport>();
    }

    #[tokio::test]
    async fn send_appends_crlf() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = TcpTransport::from_stream(client);
        transport.send("NICK dust".into()).await.unwrap();
        transport.send("USER dust 0 * :Dust".into()).await.unwrap();
        transport.close().await.unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "NICK dust\r\nUSER dust 0 * :Dust\r\n");
    }

    #[tokio::test]
    async fn recv_reassembles_fragmented_lines() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = TcpTransport::from_stream(client);

        let writer = tokio::spawn(async move {
            for chunk in [&b":srv 001 du"[..], b"st :Welcome\r", b"\nPING :abc\n"] {
                server.write_all(chunk).await.unwrap();
                server.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            ":srv 001 dust :Welcome"
        );
        assert_eq!(transport.recv().await.unwrap().unwrap(), "PING :abc");
        writer.await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = TcpTransport::from_stream(client);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(matches!(
            transport.send("PING :x".into()).await,
            Err(IrcError::TransportClosed)
        ));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connector_opens_plain_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"PING :hello\r\n").await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let target = TransportTarget {
            host: "127.0.0.1".into(),
            port,
            tls: false,
            tls_options: TlsOptions::default(),
        };
        let mut transport = TcpConnector::new().open(&target).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "PING :hello");
        transport.send("PONG :hello".into()).await.unwrap();
        assert_eq!(server.await.unwrap(), "PONG :hello\r\n");
    }

    #[tokio::test]
    async fn connector_fails_with_unreachable_host() {
        let target = TransportTarget {
            host: "127.0.0.1".into(),
            port: 1,
            tls: false,
            tls_options: TlsOptions::default(),
        };
        let err = TcpConnector::new().open(&target).await.err().unwrap();
        assert!(matches!(err, IrcError::Io(_)));
    }

    #[tokio::test]
    async fn invalid_server_name_is_a_tls_error() {
        let target = TransportTarget::new(
            "127.0.0.1",
            6697,
            true,
            TlsOptions::default().with_server_name("not a hostname"),
        );
        let err = TcpConnector::new().open(&target).await.err().unwrap();
        assert!(matches!(err, IrcError::Tls(_)));
    }

    #[test]
    fn client_config_builds_both_modes() {
        assert!(client_config(false).is_ok());
        assert!(client_config(true).is_ok());
    }
}
