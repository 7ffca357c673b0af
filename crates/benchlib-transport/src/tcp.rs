//! TCP transport for instrument communication.
//!
//! A BSI chassis accepts exactly one control connection on a configurable
//! port. [`TcpTransport`] owns that connection and implements the
//! [`Transport`] trait for it.

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default connection timeout (5 seconds).
///
/// Generous enough for a bench LAN, short enough that a wrong address does
/// not hang a test run.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport for a network-connected instrument.
///
/// The connection is established eagerly via [`connect`](TcpTransport::connect)
/// or [`connect_with_timeout`](TcpTransport::connect_with_timeout).
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()`.
    stream: Option<TcpStream>,
    /// The address string, kept for logging.
    addr: String,
}

impl TcpTransport {
    /// Connect to a TCP endpoint using the default timeout.
    ///
    /// `addr` is a `host:port` string, e.g. `"192.168.1.77:21"`.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a TCP endpoint, waiting at most `timeout` for the
    /// connection to be established.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(addr = %addr, timeout_ms = timeout.as_millis(), "Connecting to instrument");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Replies are short and latency-sensitive; disable Nagle buffering.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY (continuing)");
        }

        tracing::info!(addr = %addr, "TCP connection established");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// Wrap an already-connected `TcpStream`, e.g. one accepted from a
    /// listener in tests. `addr` is only used as a log label.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// The address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), "Sending");

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send");
            map_io_error(e)
        })?;
        stream.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to flush");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                // TCP: a 0-byte read means the peer closed the connection.
                tracing::warn!(addr = %self.addr, "Instrument closed connection");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(addr = %self.addr, bytes = n, "Received");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "Receive failed");
                Err(map_io_error(e))
            }
            Err(_) => {
                tracing::trace!(addr = %self.addr, timeout_ms = timeout.as_millis(), "Receive timeout");
                Err(Error::Timeout)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "Closing TCP connection");
            if let Err(e) = stream.flush().await {
                tracing::warn!(addr = %self.addr, error = %e, "Flush before close failed");
            }
            if let Err(e) = stream.shutdown().await {
                tracing::warn!(addr = %self.addr, error = %e, "Shutdown failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
