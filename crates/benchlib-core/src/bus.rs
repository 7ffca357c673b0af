//! Bus traits consumed by device drivers.
//!
//! A device driver (accelerometer register map, EEPROM, pressure sensor)
//! only needs raw byte transactions on a bus. These traits decouple such
//! drivers from the instrument backend that actually clocks the bytes:
//! `benchlib-bsi` provides one [`I2cBus`] implementation per logical I2C
//! channel (system I2C, per-MIO I2C) and an [`SpiBus`] per SPI interface,
//! but a driver written against the traits also runs on a dedicated bus
//! master or a mock.

use async_trait::async_trait;

use crate::error::Result;

/// Raw I2C master transactions against one bus.
///
/// Addresses are 7-bit (1..=127). A device that does not acknowledge is
/// reported as `Ok(false)` / `Ok(None)`, distinct from transport errors:
/// "device absent" and "link broken" are different answers.
#[async_trait]
pub trait I2cBus: Send + Sync {
    /// Write `data` to the device at `addr`.
    ///
    /// Returns `true` if the device acknowledged the transfer.
    async fn write(&self, addr: u8, data: &[u8]) -> Result<bool>;

    /// Read `len` bytes from the device at `addr`.
    ///
    /// Returns `None` if the device did not acknowledge.
    async fn read(&self, addr: u8, len: usize) -> Result<Option<Vec<u8>>>;

    /// Write `data`, then read `len` bytes in one transaction
    /// (e.g. memory devices: write the cell address, read the contents).
    ///
    /// Returns `None` if the device did not acknowledge.
    async fn write_read(&self, addr: u8, data: &[u8], len: usize) -> Result<Option<Vec<u8>>>;
}

/// Raw SPI full-duplex transfers against one chip-selected interface.
#[async_trait]
pub trait SpiBus: Send + Sync {
    /// Clock `data` out on MOSI and return the bytes clocked in on MISO.
    async fn transfer(&self, data: &[u8]) -> Result<Vec<u8>>;
}
