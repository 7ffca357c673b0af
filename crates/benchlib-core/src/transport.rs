//! Transport trait for instrument communication.
//!
//! The [`Transport`] trait abstracts over the physical link to an
//! instrument chassis. The shipped implementation is a TCP socket
//! (`benchlib-transport`); the test harness provides an in-memory mock so
//! protocol code can be exercised without hardware.
//!
//! The protocol session in `benchlib-bsi` operates on a `Transport` rather
//! than directly on a socket, which is what makes deterministic unit
//! testing with `MockTransport` possible.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to an instrument.
///
/// Implementations handle connecting, buffering, and error mapping at the
/// physical layer. Protocol-level concerns (command framing, sequence
/// numbers, per-card parameter lists) live above this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the instrument.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying transport.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the instrument into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After `close()`, subsequent `send()` and `receive()` calls should
    /// return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
