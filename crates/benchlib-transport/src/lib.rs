//! benchlib-transport: physical transports for benchlib instruments.
//!
//! Currently one implementation: [`TcpTransport`], for instruments that
//! accept a TCP control connection. The [`Transport`](benchlib_core::Transport)
//! trait it implements lives in `benchlib-core` so protocol code and tests
//! can swap in mocks.

pub mod tcp;

pub use tcp::TcpTransport;
