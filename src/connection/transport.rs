//! Transport abstraction (TCP with optional TLS)

use crate::hostchooser::HostEndpoint;
use crate::{Error, Result};
use bytes::BytesMut;
use rustls_pki_types::CertificateDer;
use sha2::Digest;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};

use super::tls::TlsConfig;

/// Socket options applied before the first byte is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Bound on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Bound on each read; `None` waits forever
    pub socket_timeout: Option<Duration>,
    /// Enable SO_KEEPALIVE
    pub tcp_keepalive: bool,
    /// SO_SNDBUF; `None` keeps the OS default
    pub send_buffer_size: Option<u32>,
    /// SO_RCVBUF; `None` keeps the OS default
    pub receive_buffer_size: Option<u32>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            socket_timeout: None,
            tcp_keepalive: false,
            send_buffer_size: None,
            receive_buffer_size: None,
        }
    }
}

/// Transport layer: a TCP socket, plain or TLS-encrypted
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
        }
    }
}

fn configure_socket(socket: &TcpSocket, options: &SocketOptions) -> std::io::Result<()> {
    socket.set_keepalive(options.tcp_keepalive)?;
    match options.send_buffer_size {
        Some(0) => tracing::warn!("ignoring send buffer size 0"),
        Some(size) => socket.set_send_buffer_size(size)?,
        None => {}
    }
    match options.receive_buffer_size {
        Some(0) => tracing::warn!("ignoring receive buffer size 0"),
        Some(size) => socket.set_recv_buffer_size(size)?,
        None => {}
    }
    Ok(())
}

async fn connect_addrs(endpoint: &HostEndpoint, options: &SocketOptions) -> Result<TcpStream> {
    let addrs = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port)).await?;

    let mut last_err = None;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        configure_socket(&socket, options)?;
        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => Error::Io(e),
        None => Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses resolved for {}", endpoint),
        )),
    })
}

impl Transport {
    /// Connect via plain TCP, honouring the connect timeout and socket options
    pub async fn connect_tcp(endpoint: &HostEndpoint, options: &SocketOptions) -> Result<Self> {
        let stream = tokio::time::timeout(options.connect_timeout, connect_addrs(endpoint, options))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}", endpoint)))??;
        Ok(Transport::Plain(stream))
    }

    /// Write bytes to the transport
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            Transport::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the transport
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read bytes into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Upgrade a plain TCP transport to TLS after SSLRequest negotiation.
    ///
    /// Consumes `self`; on failure the socket is dropped with it.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        match self {
            Transport::Plain(tcp_stream) => {
                let server_name = super::tls::parse_server_name(hostname)?;

                let tls_connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
                let tls_stream = tls_connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

                Ok(Transport::Tls(tls_stream))
            }
            Transport::Tls(_) => Err(Error::Config(
                "transport is already TLS-encrypted".into(),
            )),
        }
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    /// Whether the transport is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Leaf certificate presented by the server, if TLS is active
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(stream) => {
                let (_tcp, conn) = stream.get_ref();
                conn.peer_certificates()?.first()
            }
        }
    }

    /// Extract the `tls-server-end-point` channel binding data.
    ///
    /// Returns `None` for plain TCP connections; otherwise the SHA-256 hash of
    /// the server's DER-encoded certificate.
    pub fn channel_binding_data(&self) -> Option<Vec<u8>> {
        let server_cert = self.peer_certificate()?;
        Some(sha2::Sha256::digest(server_cert.as_ref()).to_vec())
    }
}
