//! Error types for benchlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! instrument-reported errors are all captured here.

/// The error type for all benchlib operations.
///
/// Variants cover the failure modes encountered when talking to a rack
/// instrument over its single TCP control connection: physical transport
/// failures, malformed replies, timeouts, and errors the instrument itself
/// reports for a command it rejected.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket failure, refused connection).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed reply, unparsable field).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The instrument rejected or failed the command logically.
    ///
    /// This is the reply class beginning with `E` on the wire. It is
    /// distinct from a transport failure: the link is fine, the command
    /// reached the instrument, and the instrument said no. The payload is
    /// the full error reply text.
    #[error("instrument error: {0}")]
    Instrument(String),

    /// Timed out waiting for a reply from the instrument.
    ///
    /// This typically indicates the instrument is powered off, busy with a
    /// long-running command, or the address is wrong.
    #[error("timeout waiting for reply")]
    Timeout,

    /// An invalid parameter was rejected before any wire traffic.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the instrument has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the instrument was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
