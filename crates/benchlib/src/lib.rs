//! benchlib: async control of SPEKTRA BSI rack test instruments.
//!
//! This umbrella crate re-exports the public API of the workspace:
//!
//! - [`core`] -- errors, events, the [`Transport`] seam, bus traits, and
//!   per-card addressing types
//! - [`transport`] -- the TCP transport
//! - [`bsi`] -- the BSI protocol client and its typed operation modules
//!
//! ```no_run
//! use benchlib::{BsiClient, CardSelect, ConnectOptions};
//!
//! # async fn example() -> benchlib::Result<()> {
//! let client = BsiClient::connect("192.168.1.77", ConnectOptions::default()).await?;
//! let volts = client.voltage("MIO01", "MIO02", CardSelect::All).await?;
//! println!("{:?}", volts);
//! # Ok(())
//! # }
//! ```
//!
//! [`Transport`]: benchlib_core::transport::Transport

pub use benchlib_bsi as bsi;
pub use benchlib_core as core;
pub use benchlib_transport as transport;

pub use benchlib_bsi::{
    spawn_voltage_sampler, BsiClient, BsiI2cChannel, BsiSpiChannel, CalibrationResult,
    ConnectOptions, I2cChannel, SamplerHandle, Session, VoltageSample,
};
pub use benchlib_core::bus::{I2cBus, SpiBus};
pub use benchlib_core::error::{Error, Result};
pub use benchlib_core::events::InstrumentEvent;
pub use benchlib_core::transport::Transport;
pub use benchlib_core::types::{CardSelect, PerCard, MAX_CARDS};
pub use benchlib_transport::TcpTransport;
