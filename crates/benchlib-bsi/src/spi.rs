//! SPI master interfaces (four per card).
//!
//! Transfers are full duplex: writing a frame on MOSI clocks the same
//! number of bytes back in on MISO. The frame length register must match
//! the transfer size, so [`spi_transfer`](BsiClient::spi_transfer) sets it
//! before every frame.

use std::sync::Arc;

use async_trait::async_trait;
use benchlib_core::bus::SpiBus;
use benchlib_core::error::{Error, Result};
use benchlib_core::types::{CardSelect, PerCard};

use crate::client::{BsiClient, TryMapPerCard};
use crate::codec::{self, Field};

/// Number of SPI interfaces per card.
pub const SPI_CHANNELS: u8 = 4;

fn validate_channel(channel: u8) -> Result<()> {
    if (1..=SPI_CHANNELS).contains(&channel) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "SPI channel {} out of range 1..=4",
            channel
        )))
    }
}

impl BsiClient {
    /// Set the clock frequency of an SPI interface in Hz. Chassis-wide.
    pub async fn spi_set_frequency(&self, channel: u8, frequency_hz: u32) -> Result<bool> {
        validate_channel(channel)?;
        let cmd = format!("DIG_SPI{}_CFG_SetFrequency", channel);
        self.query_ack(&cmd, &frequency_hz.to_string()).await
    }

    /// Set the clock polarity of an SPI interface.
    pub async fn spi_set_polarity(
        &self,
        channel: u8,
        pol_high: bool,
        card: CardSelect,
    ) -> Result<bool> {
        validate_channel(channel)?;
        let cmd = format!(
            "DIG_SPI{}_CFG_SetCPOL{}",
            channel,
            if pol_high { "High" } else { "Low" }
        );
        self.send_and_check(&cmd, card).await
    }

    /// Enable or disable an SPI interface.
    pub async fn spi_set_enable(&self, channel: u8, enable: bool, card: CardSelect) -> Result<bool> {
        validate_channel(channel)?;
        let cmd = format!(
            "DIG_SPI{}_{}",
            channel,
            if enable { "Enable" } else { "Disable" }
        );
        self.send_and_check(&cmd, card).await
    }

    /// Set the frame length of an SPI interface. The wire unit is bits.
    pub async fn spi_set_frame_len(
        &self,
        channel: u8,
        frame_len_bytes: usize,
        card: CardSelect,
    ) -> Result<bool> {
        validate_channel(channel)?;
        let cmd = format!("DIG_SPI{}_CFG_SetFrameLength", channel);
        let frame_bits = frame_len_bytes as u64 * 8;
        self.send_hex_and_check(&cmd, frame_bits, card).await
    }

    /// Read the frame length of an SPI interface in bits.
    pub async fn spi_frame_len(&self, channel: u8, card: CardSelect) -> Result<PerCard<i64>> {
        validate_channel(channel)?;
        let cmd = format!("DIG_SPI{}_CFG_GetFrameLength", channel);
        self.query_ints(&cmd, &Self::ack_list(card), card).await
    }

    /// Clock `data` out on an SPI interface and return the bytes clocked
    /// back in.
    ///
    /// Sets the frame length to this transfer's byte count first; a frame
    /// length the chassis refuses aborts the transfer. A card that answers
    /// with an empty readback slot is a protocol fault, not an empty
    /// transfer.
    pub async fn spi_transfer(
        &self,
        channel: u8,
        data: &[u8],
        card: CardSelect,
    ) -> Result<PerCard<Vec<u8>>> {
        validate_channel(channel)?;
        if !self.spi_set_frame_len(channel, data.len(), card).await? {
            return Err(Error::Protocol(format!(
                "SPI{} frame length {} not acknowledged",
                channel,
                data.len()
            )));
        }
        let cmd = format!("DIG_SPI{}_WriteFrame1", channel);
        let payload = codec::bytes_to_hex(data);
        let params = codec::per_card_list(&payload, "", card);
        let fields = self.query_hex(&cmd, &params, card, 2).await?;
        fields.try_map(|field: Field| {
            field.into_bytes().ok_or_else(|| {
                Error::Protocol(format!("SPI{} transfer came back without readback data", channel))
            })
        })
    }
}

/// One SPI interface of one card, usable as a generic [`SpiBus`] by
/// device drivers.
pub struct BsiSpiChannel {
    client: Arc<BsiClient>,
    channel: u8,
    card: CardSelect,
}

impl BsiSpiChannel {
    /// Bind SPI interface `channel` (1..=4) of a single card.
    pub fn new(client: Arc<BsiClient>, channel: u8, card: CardSelect) -> Result<Self> {
        validate_channel(channel)?;
        if card.is_all() {
            return Err(Error::InvalidParameter(
                "an SPI bus handle needs a single card, not broadcast".into(),
            ));
        }
        Ok(BsiSpiChannel {
            client,
            channel,
            card,
        })
    }
}

#[async_trait]
impl SpiBus for BsiSpiChannel {
    async fn transfer(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.client
            .spi_transfer(self.channel, data, self.card)
            .await?
            .into_single()
    }
}
