//! The transport session: one live connection, one command in flight.
//!
//! [`Session`] owns the [`Transport`] to the instrument together with the
//! steady-state I/O timeout, behind a single async mutex. All
//! command/reply exchanges go through [`exchange`](Session::exchange),
//! which holds the lock for the full round trip -- the command and its
//! matching reply form an atomic unit on the shared channel, so command
//! bytes from two callers are never interleaved.
//!
//! Large transfers run through
//! [`exchange_with_timeout`](Session::exchange_with_timeout), which applies
//! a temporary timeout *inside* the lock. The steady-state timeout is
//! never visible in a mutated state to concurrent callers.

use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;
use tokio::sync::Mutex;

use crate::codec;

/// Default steady-state I/O timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard cap on follow-up reads when reassembling a reply that arrived
/// split across TCP segments.
const REASSEMBLY_ATTEMPTS: usize = 100;

/// Pause between reassembly reads.
const REASSEMBLY_PAUSE: Duration = Duration::from_millis(10);

/// Receive buffer size per read.
const RECEIVE_BUFFER: usize = 1024;

struct Inner {
    transport: Box<dyn Transport>,
    timeout: Duration,
}

/// The serialized connection to one instrument.
pub struct Session {
    inner: Mutex<Inner>,
}

impl Session {
    /// Wrap a connected transport with the given steady-state timeout.
    pub fn new(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Session {
            inner: Mutex::new(Inner { transport, timeout }),
        }
    }

    /// Whether the underlying transport is connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.transport.is_connected()
    }

    /// Close the connection.
    ///
    /// Closing an already-closed session reports [`Error::NotConnected`];
    /// it never panics.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        tracing::debug!("Closing instrument session");
        inner.transport.close().await
    }

    /// Swap in a freshly connected transport (reconnect support).
    pub async fn replace_transport(&self, transport: Box<dyn Transport>) {
        let mut inner = self.inner.lock().await;
        inner.transport = transport;
    }

    /// Set the steady-state I/O timeout.
    pub async fn set_timeout(&self, timeout: Duration) {
        self.inner.lock().await.timeout = timeout;
    }

    /// Read the steady-state I/O timeout.
    pub async fn timeout(&self) -> Duration {
        self.inner.lock().await.timeout
    }

    /// Send one framed command line. Returns the number of bytes written.
    pub async fn send(&self, line: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        Self::send_locked(&mut inner, line).await
    }

    /// Receive one reply line under the steady-state timeout.
    pub async fn receive(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let timeout = inner.timeout;
        Self::receive_locked(&mut inner, timeout).await
    }

    /// Send a command and read its reply as one atomic exchange.
    ///
    /// A reply whose first character is `E` is surfaced as
    /// [`Error::Instrument`] -- the instrument processed the command and
    /// rejected it, which is distinct from a transport failure.
    pub async fn exchange(&self, line: &str) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let timeout = inner.timeout;
        Self::exchange_locked(&mut inner, line, timeout).await
    }

    /// Like [`exchange`](Session::exchange), but with a temporary timeout
    /// for this one round trip (large transfers, self-calibration).
    ///
    /// The override lives only on the stack while the exchange lock is
    /// held, so the steady-state timeout is identical before and after the
    /// call on every path, and no concurrent caller can observe it raised.
    pub async fn exchange_with_timeout(&self, line: &str, timeout: Duration) -> Result<String> {
        let mut inner = self.inner.lock().await;
        Self::exchange_locked(&mut inner, line, timeout).await
    }

    async fn exchange_locked(inner: &mut Inner, line: &str, timeout: Duration) -> Result<String> {
        Self::send_locked(inner, line).await?;
        let reply = Self::receive_locked(inner, timeout).await?;
        if codec::is_error_reply(&reply) {
            let text = reply.trim_end().to_string();
            tracing::warn!(reply = %text, "Instrument reported an error");
            return Err(Error::Instrument(text));
        }
        Ok(reply)
    }

    async fn send_locked(inner: &mut Inner, line: &str) -> Result<usize> {
        tracing::trace!(command = %line.trim_end(), "Sending command");
        inner.transport.send(line.as_bytes()).await.map_err(|e| {
            tracing::error!(error = %e, command = %line.trim_end(), "Send failed");
            e
        })?;
        Ok(line.len())
    }

    /// Read until the accumulated text ends with the terminator.
    ///
    /// A reply can arrive split across TCP segments; follow-up reads are
    /// bounded so a stream that never terminates cannot spin forever.
    async fn receive_locked(inner: &mut Inner, timeout: Duration) -> Result<String> {
        let mut buf = vec![0u8; RECEIVE_BUFFER];
        let mut text = String::new();

        let n = inner.transport.receive(&mut buf, timeout).await?;
        text.push_str(&String::from_utf8_lossy(&buf[..n]));

        let mut attempts = 0;
        while !text.ends_with(char::from(codec::TERMINATOR)) {
            if attempts >= REASSEMBLY_ATTEMPTS {
                return Err(Error::Protocol(format!(
                    "reply not terminated after {} reads",
                    REASSEMBLY_ATTEMPTS + 1
                )));
            }
            attempts += 1;
            tokio::time::sleep(REASSEMBLY_PAUSE).await;
            let n = inner.transport.receive(&mut buf, timeout).await?;
            text.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        tracing::trace!(reply = %text.trim_end(), "Reply received");
        Ok(text)
    }
}
