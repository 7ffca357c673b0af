//! benchlib-core: Core traits, types, and error definitions for benchlib.
//!
//! This crate defines the instrument-agnostic abstractions that benchlib
//! backends implement. Device drivers (sensor register maps, EEPROM access)
//! depend on these types without pulling in any specific instrument backend.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`I2cBus`] / [`SpiBus`] -- bus primitives consumed by device drivers
//! - [`CardSelect`] / [`PerCard`] -- per-card addressing and results
//! - [`InstrumentEvent`] -- asynchronous status notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod bus;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use benchlib_core::*`.
pub use bus::{I2cBus, SpiBus};
pub use error::{Error, Result};
pub use events::InstrumentEvent;
pub use transport::Transport;
pub use types::{CardSelect, PerCard};
