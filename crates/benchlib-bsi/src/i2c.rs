//! I2C master transactions.
//!
//! Every card carries one system I2C channel plus four channels
//! multiplexed onto MIO pins; [`I2cChannel`] names them. A transaction is
//! staged through configuration registers (master address, frame lengths)
//! and then fired with a write/read/write-read command. A device that does
//! not acknowledge yields an empty payload, reported as `false`/`None`
//! rather than an error: "device absent" is an answer, not a failure.

use std::sync::Arc;

use async_trait::async_trait;
use benchlib_core::bus::I2cBus;
use benchlib_core::error::{Error, Result};
use benchlib_core::types::{CardSelect, PerCard};

use crate::client::{field_to_word, BsiClient, TryMapPerCard};
use crate::codec::{self, Field};

/// Reads and combined transactions above this many bytes run under the
/// large-transfer timeout.
pub const LARGE_TRANSFER_BYTES: usize = 4096;

/// Reply timeout for large transfers.
pub const LARGE_TRANSFER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// One I2C channel of a card: the system channel, or one of the four
/// channels on the MIO pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cChannel {
    /// The dedicated system I2C channel (`SYS_I2CExt_*`).
    Sys,
    /// An I2C channel on the MIO pins, 1..=4 (`DIG_I2C<n>_*`).
    Mio(u8),
}

impl I2cChannel {
    /// Select MIO channel `n`, validating 1..=4.
    pub fn mio(n: u8) -> Result<Self> {
        if (1..=4).contains(&n) {
            Ok(I2cChannel::Mio(n))
        } else {
            Err(Error::InvalidParameter(format!(
                "I2C MIO channel {} out of range 1..=4",
                n
            )))
        }
    }

    fn command(&self, suffix: &str) -> String {
        match self {
            I2cChannel::Sys => format!("SYS_I2CExt_{}", suffix),
            I2cChannel::Mio(n) => format!("DIG_I2C{}_{}", n, suffix),
        }
    }
}

fn validate_address(addr: u8) -> Result<()> {
    if (1..=127).contains(&addr) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "I2C address {:#04x} out of range 0x01..=0x7f",
            addr
        )))
    }
}

impl BsiClient {
    /// Set the target device address (7-bit, 1..=127) for a channel.
    ///
    /// The address is validated before any wire traffic.
    pub async fn i2c_set_master_address(
        &self,
        addr: u8,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<bool> {
        validate_address(addr)?;
        let cmd = channel.command("CFG_SetMasterAdr");
        self.send_hex_and_check(&cmd, addr as u64, card).await
    }

    /// Read back the configured device address.
    pub async fn i2c_master_address(
        &self,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<PerCard<u64>> {
        let cmd = channel.command("CFG_GetMasterAdr");
        let fields = self
            .query_hex(&cmd, &Self::ack_list(CardSelect::All), card, 0)
            .await?;
        fields.try_map(field_to_word)
    }

    /// Set the write frame length in bytes.
    pub async fn i2c_set_write_frame_len(
        &self,
        len: usize,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<bool> {
        let cmd = channel.command("CFG_SetWriteFrameLength");
        self.send_hex_and_check(&cmd, len as u64, card).await
    }

    /// Read the write frame length in bytes.
    pub async fn i2c_write_frame_len(
        &self,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<PerCard<u64>> {
        let cmd = channel.command("CFG_GetWriteFrameLength");
        let fields = self
            .query_hex(&cmd, &Self::ack_list(CardSelect::All), card, 0)
            .await?;
        fields.try_map(field_to_word)
    }

    /// Set the read frame length in bytes.
    pub async fn i2c_set_read_frame_len(
        &self,
        len: usize,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<bool> {
        let cmd = channel.command("CFG_SetReadFrameLength");
        self.send_hex_and_check(&cmd, len as u64, card).await
    }

    /// Read the read frame length in bytes.
    pub async fn i2c_read_frame_len(
        &self,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<PerCard<u64>> {
        let cmd = channel.command("CFG_GetReadFrameLength");
        let fields = self
            .query_hex(&cmd, &Self::ack_list(CardSelect::All), card, 0)
            .await?;
        fields.try_map(field_to_word)
    }

    /// Write `data` to the device at `addr`.
    ///
    /// Returns whether the device acknowledged; the AND over all existing
    /// cards under broadcast.
    pub async fn i2c_write_frame(
        &self,
        addr: u8,
        data: &[u8],
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<bool> {
        self.i2c_stage(addr, None, Some(data.len()), card, channel)
            .await?;
        let cmd = channel.command("Write");
        self.send_value_and_check(&cmd, &codec::bytes_to_hex(data), card)
            .await
    }

    /// Read `len` bytes from the device at `addr`. `None` means the device
    /// did not acknowledge.
    pub async fn i2c_read_frame(
        &self,
        addr: u8,
        len: usize,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<PerCard<Option<Vec<u8>>>> {
        self.i2c_stage(addr, Some(len), None, card, channel).await?;
        let cmd = channel.command("Read");
        let params = Self::ack_list(card);
        let fields = self.i2c_fire(&cmd, &params, card, len).await?;
        Ok(fields.map(Field::into_bytes))
    }

    /// Write `data`, then read `len` bytes, in one transaction. `None`
    /// means the device did not acknowledge.
    pub async fn i2c_write_read_frame(
        &self,
        addr: u8,
        data: &[u8],
        len: usize,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<PerCard<Option<Vec<u8>>>> {
        self.i2c_stage(addr, Some(len), Some(data.len()), card, channel)
            .await?;
        let cmd = channel.command("WriteRead");
        let params = codec::per_card_list(&codec::bytes_to_hex(data), "", card);
        let fields = self.i2c_fire(&cmd, &params, card, len).await?;
        Ok(fields.map(Field::into_bytes))
    }

    /// Probe a range of device addresses and report every one that
    /// acknowledges.
    ///
    /// Per address: try a 1-byte read; a device that does not answer reads
    /// (some write-only parts) gets a second chance with a write of
    /// `probe_data`. For `CardSelect::Card` the result is that card's
    /// address list; under broadcast, one list per existing card.
    pub async fn i2c_address_search(
        &self,
        card: CardSelect,
        start: u8,
        end: u8,
        probe_data: &[u8],
        channel: I2cChannel,
    ) -> Result<PerCard<Vec<u8>>> {
        validate_address(start)?;
        validate_address(end)?;
        if start > end {
            return Err(Error::InvalidParameter(format!(
                "empty I2C search range {:#04x}..={:#04x}",
                start, end
            )));
        }

        if !self.i2c_set_read_frame_len(1, CardSelect::All, channel).await? {
            return Err(Error::Protocol("I2C read frame length not acknowledged".into()));
        }
        if !self
            .i2c_set_write_frame_len(probe_data.len(), CardSelect::All, channel)
            .await?
        {
            return Err(Error::Protocol("I2C write frame length not acknowledged".into()));
        }

        match card {
            CardSelect::Card(_) => {
                let mut found = Vec::new();
                for addr in start..=end {
                    self.i2c_retarget(addr, channel).await?;
                    if self.i2c_probe(card, probe_data, channel).await? {
                        found.push(addr);
                    }
                }
                Ok(PerCard::Single(found))
            }
            CardSelect::All => {
                let count = self.card_count().await;
                let mut found = vec![Vec::new(); count];
                for addr in start..=end {
                    self.i2c_retarget(addr, channel).await?;
                    for (index, card_found) in found.iter_mut().enumerate() {
                        let single = CardSelect::Card(index as u8 + 1);
                        if self.i2c_probe(single, probe_data, channel).await? {
                            card_found.push(addr);
                        }
                    }
                }
                Ok(PerCard::AllCards(found))
            }
        }
    }

    /// Stage a transaction: device address, then whichever frame lengths
    /// this transaction needs. A staging command the chassis rejects
    /// aborts the transaction.
    async fn i2c_stage(
        &self,
        addr: u8,
        read_len: Option<usize>,
        write_len: Option<usize>,
        card: CardSelect,
        channel: I2cChannel,
    ) -> Result<()> {
        if !self.i2c_set_master_address(addr, card, channel).await? {
            return Err(Error::Protocol("I2C device address not acknowledged".into()));
        }
        if let Some(len) = read_len {
            if !self.i2c_set_read_frame_len(len, card, channel).await? {
                return Err(Error::Protocol("I2C read frame length not acknowledged".into()));
            }
        }
        if let Some(len) = write_len {
            if !self.i2c_set_write_frame_len(len, card, channel).await? {
                return Err(Error::Protocol("I2C write frame length not acknowledged".into()));
            }
        }
        Ok(())
    }

    /// Issue the transfer command, under the large-transfer timeout when
    /// the expected payload warrants it. The temporary timeout is scoped
    /// inside the session's exchange lock.
    async fn i2c_fire(
        &self,
        cmd: &str,
        params: &str,
        card: CardSelect,
        read_len: usize,
    ) -> Result<PerCard<Field>> {
        if read_len > LARGE_TRANSFER_BYTES {
            self.query_hex_with_timeout(cmd, params, card, 2, LARGE_TRANSFER_TIMEOUT)
                .await
        } else {
            self.query_hex(cmd, params, card, 2).await
        }
    }

    /// Point the channel at a new device address during a search, without
    /// touching the staged frame lengths.
    async fn i2c_retarget(&self, addr: u8, channel: I2cChannel) -> Result<()> {
        self.i2c_set_master_address(addr, CardSelect::All, channel)
            .await?;
        Ok(())
    }

    /// One search probe against one card: read first, fall back to a
    /// write.
    async fn i2c_probe(
        &self,
        card: CardSelect,
        probe_data: &[u8],
        channel: I2cChannel,
    ) -> Result<bool> {
        let read_cmd = channel.command("Read");
        let fields = self
            .query_hex(&read_cmd, &Self::ack_list(card), card, 2)
            .await?;
        if !matches!(fields.into_single()?, Field::Empty) {
            return Ok(true);
        }
        let write_cmd = channel.command("Write");
        self.send_value_and_check(&write_cmd, &codec::bytes_to_hex(probe_data), card)
            .await
    }
}

/// One I2C channel of one card, usable as a generic [`I2cBus`] by device
/// drivers.
pub struct BsiI2cChannel {
    client: Arc<BsiClient>,
    card: CardSelect,
    channel: I2cChannel,
}

impl BsiI2cChannel {
    /// Bind an I2C channel of a single card.
    pub fn new(client: Arc<BsiClient>, card: CardSelect, channel: I2cChannel) -> Result<Self> {
        if card.is_all() {
            return Err(Error::InvalidParameter(
                "an I2C bus handle needs a single card, not broadcast".into(),
            ));
        }
        Ok(BsiI2cChannel {
            client,
            card,
            channel,
        })
    }
}

#[async_trait]
impl I2cBus for BsiI2cChannel {
    async fn write(&self, addr: u8, data: &[u8]) -> Result<bool> {
        self.client
            .i2c_write_frame(addr, data, self.card, self.channel)
            .await
    }

    async fn read(&self, addr: u8, len: usize) -> Result<Option<Vec<u8>>> {
        self.client
            .i2c_read_frame(addr, len, self.card, self.channel)
            .await?
            .into_single()
    }

    async fn write_read(&self, addr: u8, data: &[u8], len: usize) -> Result<Option<Vec<u8>>> {
        self.client
            .i2c_write_read_frame(addr, data, len, self.card, self.channel)
            .await?
            .into_single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_test_harness::MockTransport;
    use std::time::Duration;

    fn discovery_mock() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.push_reply("SYS_IDN,001,SPEKTRA,BSI\n");
        mock.push_reply("SYS_GetBSISnr,002,10,,,,,,,,,,,,,,,\n");
        mock
    }

    async fn client(mock: MockTransport) -> BsiClient {
        BsiClient::with_transport(Box::new(mock), Duration::from_secs(1))
            .await
            .unwrap()
    }

    fn ok_reply(seq: u16) -> String {
        format!("I2C,{:03},O,,,,,,,,,,,,,,,\n", seq)
    }

    #[tokio::test]
    async fn address_is_validated_before_any_traffic() {
        let mock = discovery_mock();
        let log = mock.sent_log();
        let client = client(mock).await;

        assert!(matches!(
            client
                .i2c_set_master_address(0, CardSelect::All, I2cChannel::Sys)
                .await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            client
                .i2c_set_master_address(128, CardSelect::All, I2cChannel::Sys)
                .await,
            Err(Error::InvalidParameter(_))
        ));
        // Only the two discovery commands were sent.
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn channel_picks_sys_or_mio_command_names() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3));
        mock.push_reply(&ok_reply(4));
        let log = mock.sent_log();

        let client = client(mock).await;
        client
            .i2c_set_master_address(0x54, CardSelect::All, I2cChannel::Sys)
            .await
            .unwrap();
        client
            .i2c_set_master_address(0x54, CardSelect::All, I2cChannel::mio(2).unwrap())
            .await
            .unwrap();

        let sent = log.lock().unwrap().clone();
        assert!(sent[2].starts_with("SYS_I2CExt_CFG_SetMasterAdr,003,54,54,"));
        assert!(sent[3].starts_with("DIG_I2C2_CFG_SetMasterAdr,004,54,54,"));
    }

    #[tokio::test]
    async fn write_frame_stages_then_writes() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3)); // master address
        mock.push_reply(&ok_reply(4)); // write frame length
        mock.push_reply(&ok_reply(5)); // the write itself
        let log = mock.sent_log();

        let client = client(mock).await;
        let acked = client
            .i2c_write_frame(
                0x50,
                &[0x0a, 0x0b],
                CardSelect::card(1).unwrap(),
                I2cChannel::Sys,
            )
            .await
            .unwrap();
        assert!(acked);

        let sent = log.lock().unwrap().clone();
        assert!(sent[2].starts_with("SYS_I2CExt_CFG_SetMasterAdr,003,50,"));
        assert!(sent[3].starts_with("SYS_I2CExt_CFG_SetWriteFrameLength,004,02,"));
        assert!(sent[4].starts_with("SYS_I2CExt_Write,005,0a0b,"));
    }

    #[tokio::test]
    async fn read_frame_no_acknowledge_is_none() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3)); // master address
        mock.push_reply(&ok_reply(4)); // read frame length
        mock.push_reply("I2C,005,,,,,,,,,,,,,,,,\n"); // empty payload

        let client = client(mock).await;
        let data = client
            .i2c_read_frame(0x50, 4, CardSelect::card(1).unwrap(), I2cChannel::Sys)
            .await
            .unwrap();
        assert_eq!(data, PerCard::Single(None));
    }

    #[tokio::test]
    async fn read_frame_decodes_byte_pairs() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3));
        mock.push_reply(&ok_reply(4));
        mock.push_reply("I2C,005,deadbeef,,,,,,,,,,,,,,,\n");

        let client = client(mock).await;
        let data = client
            .i2c_read_frame(0x50, 4, CardSelect::card(1).unwrap(), I2cChannel::Sys)
            .await
            .unwrap();
        assert_eq!(data, PerCard::Single(Some(vec![0xde, 0xad, 0xbe, 0xef])));
    }

    #[tokio::test]
    async fn large_read_leaves_the_steady_timeout_untouched() {
        let payload = "ab".repeat(5000);
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3));
        mock.push_reply(&ok_reply(4));
        mock.push_reply(&format!("I2C,005,{},,,,,,,,,,,,,,,\n", payload));

        let client = client(mock).await;
        let before = client.timeout().await;
        let data = client
            .i2c_read_frame(0x50, 5000, CardSelect::card(1).unwrap(), I2cChannel::Sys)
            .await
            .unwrap();
        match data {
            PerCard::Single(Some(bytes)) => assert_eq!(bytes.len(), 5000),
            other => panic!("unexpected read result: {:?}", other),
        }
        assert_eq!(client.timeout().await, before);
    }

    #[tokio::test]
    async fn write_read_frame_carries_the_payload() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3)); // master address
        mock.push_reply(&ok_reply(4)); // read frame length
        mock.push_reply(&ok_reply(5)); // write frame length
        mock.push_reply("I2C,006,1234,,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let data = client
            .i2c_write_read_frame(
                0x50,
                &[0x00, 0x10],
                2,
                CardSelect::card(1).unwrap(),
                I2cChannel::Sys,
            )
            .await
            .unwrap();
        assert_eq!(data, PerCard::Single(Some(vec![0x12, 0x34])));
        assert!(log.lock().unwrap()[5].starts_with("SYS_I2CExt_WriteRead,006,0010,"));
    }

    #[tokio::test]
    async fn address_search_finds_the_acknowledging_address() {
        let mut mock = discovery_mock();
        // Staging: read frame length 1, write frame length 1.
        mock.push_reply(&ok_reply(3));
        mock.push_reply(&ok_reply(4));
        // Address 1: retarget, read empty, write not acknowledged.
        mock.push_reply(&ok_reply(5));
        mock.push_reply("I2C,006,,,,,,,,,,,,,,,,\n");
        mock.push_reply("I2C,007,N,,,,,,,,,,,,,,,\n");
        // Address 2: retarget, read answers.
        mock.push_reply(&ok_reply(8));
        mock.push_reply("I2C,009,ff,,,,,,,,,,,,,,,\n");
        // Address 3: retarget, read empty, write not acknowledged.
        mock.push_reply(&ok_reply(10));
        mock.push_reply("I2C,011,,,,,,,,,,,,,,,,\n");
        mock.push_reply("I2C,012,N,,,,,,,,,,,,,,,\n");

        let client = client(mock).await;
        let found = client
            .i2c_address_search(
                CardSelect::card(1).unwrap(),
                1,
                3,
                &[0x00],
                I2cChannel::Sys,
            )
            .await
            .unwrap();
        assert_eq!(found, PerCard::Single(vec![2]));
    }

    #[tokio::test]
    async fn address_search_write_fallback_counts_as_found() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3));
        mock.push_reply(&ok_reply(4));
        // Read is silent but the write acknowledges (write-only device).
        mock.push_reply(&ok_reply(5));
        mock.push_reply("I2C,006,,,,,,,,,,,,,,,,\n");
        mock.push_reply("I2C,007,O,,,,,,,,,,,,,,,\n");

        let client = client(mock).await;
        let found = client
            .i2c_address_search(
                CardSelect::card(1).unwrap(),
                0x20,
                0x20,
                &[0x00],
                I2cChannel::Sys,
            )
            .await
            .unwrap();
        assert_eq!(found, PerCard::Single(vec![0x20]));
    }

    #[tokio::test]
    async fn bus_handle_round_trips_through_the_trait() {
        let mut mock = discovery_mock();
        mock.push_reply(&ok_reply(3));
        mock.push_reply(&ok_reply(4));
        mock.push_reply("I2C,005,42,,,,,,,,,,,,,,,\n");

        let client = Arc::new(client(mock).await);
        let bus = BsiI2cChannel::new(
            Arc::clone(&client),
            CardSelect::card(1).unwrap(),
            I2cChannel::Sys,
        )
        .unwrap();
        let data = bus.read(0x50, 1).await.unwrap();
        assert_eq!(data, Some(vec![0x42]));
    }
}
