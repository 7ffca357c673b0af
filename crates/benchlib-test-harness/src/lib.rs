//! Test doubles for benchlib.
//!
//! - [`MockTransport`]: an in-memory scripted [`Transport`] for
//!   protocol-level unit tests, with support for replies split across
//!   multiple receive calls.
//! - [`MockInstrument`]: a real TCP server speaking the BSI line protocol
//!   from a script, for end-to-end client tests.
//!
//! [`Transport`]: benchlib_core::transport::Transport

pub mod mock_instrument;
pub mod mock_transport;

pub use mock_instrument::{MockInstrument, ScriptedReply};
pub use mock_transport::MockTransport;
