//! Asynchronous instrument event types.
//!
//! Events are emitted by the protocol client through a
//! `tokio::sync::broadcast` channel. A UI or logging front-end subscribes
//! to see connection lifecycle changes and per-operation pass/fail status
//! without polling.

/// An event emitted by the protocol client.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events under heavy load (e.g. a tight
/// measurement loop).
#[derive(Debug, Clone)]
pub enum InstrumentEvent {
    /// Successfully connected to the instrument and completed discovery.
    Connected,

    /// The connection to the instrument was closed or lost.
    Disconnected,

    /// A protocol operation completed.
    Operation {
        /// Human-readable description of the attempted operation,
        /// typically the wire command name.
        description: String,
        /// Whether the operation succeeded.
        success: bool,
    },
}
