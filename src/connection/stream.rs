//! Buffered, framed byte channel over a swappable [`Transport`]

use super::tls::TlsConfig;
use super::transport::{SocketOptions, Transport};
use crate::hostchooser::HostEndpoint;
use crate::protocol::{decode_message, encode_message, BackendMessage, FrontendMessage};
use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io;

/// Duplex channel to one server.
///
/// Writes are buffered until [`flush`](PgStream::flush). The transport can be
/// replaced in place (TLS upgrade, reconnect); every replacement drops the
/// previous transport and bumps [`generation`](PgStream::generation).
#[derive(Debug)]
pub struct PgStream {
    transport: Option<Transport>,
    endpoint: HostEndpoint,
    options: SocketOptions,
    read_buf: BytesMut,
    write_buf: BytesMut,
    generation: u32,
}

impl PgStream {
    /// Open a plain TCP connection to `endpoint`
    pub async fn connect(endpoint: HostEndpoint, options: SocketOptions) -> Result<Self> {
        let transport = Transport::connect_tcp(&endpoint, &options).await?;
        Ok(Self::new(transport, endpoint, options))
    }

    /// Wrap an already connected transport
    pub fn new(transport: Transport, endpoint: HostEndpoint, options: SocketOptions) -> Self {
        Self {
            transport: Some(transport),
            endpoint,
            options,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(1024),
            generation: 0,
        }
    }

    /// Endpoint this stream talks to
    pub fn endpoint(&self) -> &HostEndpoint {
        &self.endpoint
    }

    /// Socket options applied to every transport this stream opens
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Incremented on every transport swap
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether the current transport is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    /// Current transport
    pub fn transport(&self) -> Result<&Transport> {
        self.transport
            .as_ref()
            .ok_or_else(|| Error::Protocol("transport not available".into()))
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport
            .as_mut()
            .ok_or_else(|| Error::Protocol("transport not available".into()))
    }

    /// Number of received bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    // ── Sending ──

    /// Queue one byte
    pub fn send_char(&mut self, c: u8) {
        self.write_buf.put_u8(c);
    }

    /// Queue a big-endian int16
    pub fn send_i16(&mut self, v: i16) {
        self.write_buf.put_i16(v);
    }

    /// Queue a big-endian int32
    pub fn send_i32(&mut self, v: i32) {
        self.write_buf.put_i32(v);
    }

    /// Queue raw bytes
    pub fn send(&mut self, bytes: &[u8]) {
        self.write_buf.put_slice(bytes);
    }

    /// Queue an encoded frontend message
    pub fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg)?;
        self.write_buf.unsplit(buf);
        Ok(())
    }

    /// Write out everything queued
    pub async fn flush(&mut self) -> Result<()> {
        let pending = self.write_buf.split();
        let transport = self.transport_mut()?;
        transport.write_all(&pending).await?;
        transport.flush().await?;
        Ok(())
    }

    // ── Receiving ──

    async fn fill(&mut self) -> Result<()> {
        let timeout = self.options.socket_timeout;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Protocol("transport not available".into()))?;
        let read = transport.read_buf(&mut self.read_buf);
        let n = match timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| Error::Timeout("reading from server".into()))??,
            None => read.await?,
        };
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    async fn fill_to(&mut self, n: usize) -> Result<()> {
        while self.read_buf.len() < n {
            self.fill().await?;
        }
        Ok(())
    }

    /// Read one byte
    pub async fn receive_char(&mut self) -> Result<u8> {
        self.fill_to(1).await?;
        Ok(self.read_buf.get_u8())
    }

    /// Read a big-endian int16
    pub async fn receive_i16(&mut self) -> Result<i16> {
        self.fill_to(2).await?;
        Ok(self.read_buf.get_i16())
    }

    /// Read a big-endian int32
    pub async fn receive_i32(&mut self) -> Result<i32> {
        self.fill_to(4).await?;
        Ok(self.read_buf.get_i32())
    }

    /// Read exactly `n` bytes
    pub async fn receive(&mut self, n: usize) -> Result<Vec<u8>> {
        self.fill_to(n).await?;
        Ok(self.read_buf.split_to(n).to_vec())
    }

    /// Read one whole backend frame
    pub async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }
            self.fill().await?;
        }
    }

    // ── Transport swaps ──

    fn install(&mut self, transport: Transport) {
        self.transport = Some(transport);
        self.read_buf.clear();
        self.write_buf.clear();
        self.generation += 1;
    }

    /// Perform the TLS handshake on the current socket and swap in the
    /// encrypted transport. On failure the stream is left without a transport.
    pub async fn upgrade_tls(&mut self, tls: &TlsConfig) -> Result<()> {
        if !self.read_buf.is_empty() {
            return Err(Error::Protocol(
                "received unencrypted data after SSL response".into(),
            ));
        }
        let plain = self
            .transport
            .take()
            .ok_or_else(|| Error::Protocol("transport not available".into()))?;
        let encrypted = plain.upgrade_to_tls(tls, &self.endpoint.host).await?;
        self.install(encrypted);
        Ok(())
    }

    /// Drop the current transport and connect again to the same endpoint
    pub async fn reconnect(&mut self) -> Result<()> {
        drop(self.transport.take());
        let fresh = Transport::connect_tcp(&self.endpoint, &self.options).await?;
        self.install(fresh);
        Ok(())
    }

    /// Install `transport` in place of the current one
    pub fn swap_transport(&mut self, transport: Transport) {
        drop(self.transport.take());
        self.install(transport);
    }

    /// Shut the transport down
    pub async fn close(&mut self) -> Result<()> {
        match self.transport.take() {
            Some(mut transport) => transport.shutdown().await,
            None => Ok(()),
        }
    }
}
