//! benchlib-bsi: protocol client for SPEKTRA BSI rack test instruments.
//!
//! A BSI chassis exposes dozens of measurement, configuration, and IO
//! functions over a single newline-terminated text protocol on one TCP
//! connection. This crate turns typed operations (measure a voltage,
//! configure a pin bank, run an I2C transaction) into correctly framed
//! commands, serializes them onto the shared connection, and decodes the
//! replies into typed values.
//!
//! # Layering
//!
//! - [`codec`] -- pure translation between typed values and wire text
//! - [`Session`] -- the single locked connection: framing, reassembly,
//!   timeouts, one command in flight at a time
//! - [`BsiClient`] -- sequence numbering, card discovery, typed decode
//! - adapter modules ([`meas`], [`mio`], [`power`], [`spi`], [`i2c`],
//!   [`cal`]) -- one typed operation set per logical sub-device family
//!
//! # Example
//!
//! ```no_run
//! use benchlib_bsi::{BsiClient, ConnectOptions};
//! use benchlib_core::CardSelect;
//!
//! # async fn example() -> benchlib_core::Result<()> {
//! let client = BsiClient::connect("192.168.1.77", ConnectOptions::default()).await?;
//! println!("{} cards, serials {:?}", client.card_count().await, client.card_serials().await);
//!
//! let volts = client.voltage("MIO01", "MIO02", CardSelect::card(1)?).await?;
//! println!("card 1: {:?} V", volts);
//! # Ok(())
//! # }
//! ```

pub mod cal;
pub mod client;
pub mod codec;
pub mod i2c;
pub mod meas;
pub mod mio;
pub mod poll;
pub mod power;
pub mod session;
pub mod spi;

pub use cal::CalibrationResult;
pub use client::{BsiClient, ConnectOptions};
pub use codec::{Decoded, Field, FieldKind};
pub use i2c::{BsiI2cChannel, I2cChannel};
pub use meas::AUTORANGE_THRESHOLD_VOLTS;
pub use poll::{spawn_voltage_sampler, SamplerHandle, VoltageSample};
pub use session::Session;
pub use spi::BsiSpiChannel;
