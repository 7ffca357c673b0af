//! Digital IO (MIO) pin configuration and state.
//!
//! Each card exposes 16 MIO pins in four banks. Pin function is set
//! through numbered configuration sets: a set is loaded chassis-wide with
//! [`mio_load_config`](BsiClient::mio_load_config) and takes effect on a
//! card only once activated with
//! [`mio_activate_config`](BsiClient::mio_activate_config).

use benchlib_core::error::{Error, Result};
use benchlib_core::types::{CardSelect, PerCard};

use crate::client::{field_to_word, BsiClient, TryMapPerCard};
use crate::codec::{self, Field};

/// Pin-config word bit marking the pin as an output.
const PIN_OUTPUT_BIT: u64 = 0x40;
/// Pin-config word bit carrying the driven level.
const PIN_LEVEL_BIT: u64 = 0x01;

/// Words a config reply carries before the 16 pin words (version + spare).
const CONFIG_HEADER_WORDS: usize = 7;

/// Number of MIO pins per card, and of words in a configuration set.
pub const MIO_PINS: usize = 16;

fn validate_mio_number(mio_number: u8) -> Result<()> {
    if (1..=MIO_PINS as u8).contains(&mio_number) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "MIO number {} out of range 1..=16",
            mio_number
        )))
    }
}

impl BsiClient {
    /// Set the output HIGH level voltage for a bank (1..=4).
    pub async fn mio_set_high_level_out(
        &self,
        bank: u8,
        voltage: f64,
        card: CardSelect,
    ) -> Result<bool> {
        let cmd = format!("DIG_CFG_SetHighLevelOutBank{}", bank);
        self.send_value_and_check(&cmd, &voltage.to_string(), card)
            .await
    }

    /// Set the output LOW level voltage for a bank (1..=4).
    pub async fn mio_set_low_level_out(
        &self,
        bank: u8,
        voltage: f64,
        card: CardSelect,
    ) -> Result<bool> {
        let cmd = format!("DIG_CFG_SetLowLevelOutBank{}", bank);
        self.send_value_and_check(&cmd, &voltage.to_string(), card)
            .await
    }

    /// Set the input HIGH threshold voltage for a bank (1..=4).
    pub async fn mio_set_high_level_in(
        &self,
        bank: u8,
        voltage: f64,
        card: CardSelect,
    ) -> Result<bool> {
        let cmd = format!("DIG_CFG_SetHighLevelInBank{}", bank);
        self.send_value_and_check(&cmd, &voltage.to_string(), card)
            .await
    }

    /// Set the input LOW threshold voltage for a bank (1..=4).
    pub async fn mio_set_low_level_in(
        &self,
        bank: u8,
        voltage: f64,
        card: CardSelect,
    ) -> Result<bool> {
        let cmd = format!("DIG_CFG_SetLowLevelInBank{}", bank);
        self.send_value_and_check(&cmd, &voltage.to_string(), card)
            .await
    }

    /// Read the output HIGH level voltage for a bank.
    pub async fn mio_high_level_out(&self, bank: u8, card: CardSelect) -> Result<PerCard<f64>> {
        let cmd = format!("DIG_CFG_GetHighLevelOutBank{}", bank);
        self.query_floats(&cmd, &Self::ack_list(card), card).await
    }

    /// Read the output LOW level voltage for a bank.
    pub async fn mio_low_level_out(&self, bank: u8, card: CardSelect) -> Result<PerCard<f64>> {
        let cmd = format!("DIG_CFG_GetLowLevelOutBank{}", bank);
        self.query_floats(&cmd, &Self::ack_list(card), card).await
    }

    /// Read the input HIGH threshold voltage for a bank.
    pub async fn mio_high_level_in(&self, bank: u8, card: CardSelect) -> Result<PerCard<f64>> {
        let cmd = format!("DIG_CFG_GetHighLevelInBank{}", bank);
        self.query_floats(&cmd, &Self::ack_list(card), card).await
    }

    /// Read the input LOW threshold voltage for a bank.
    pub async fn mio_low_level_in(&self, bank: u8, card: CardSelect) -> Result<PerCard<f64>> {
        let cmd = format!("DIG_CFG_GetLowLevelInBank{}", bank);
        self.query_floats(&cmd, &Self::ack_list(card), card).await
    }

    /// Select the ground reference for a bank: 0 = analog ground, 1.. =
    /// numbered digital ground.
    pub async fn mio_set_gnd(&self, bank: u8, gnd_bank: u8, card: CardSelect) -> Result<bool> {
        let cmd = if gnd_bank == 0 {
            format!("DIG_CFG_Bank{}_Agnd", bank)
        } else {
            format!("DIG_CFG_Bank{}_Gnds{}", bank, gnd_bank)
        };
        self.send_and_check(&cmd, card).await
    }

    /// Read the digital ground selection for a bank.
    pub async fn mio_gnd(&self, bank: u8, card: CardSelect) -> Result<PerCard<i64>> {
        let cmd = format!("DIG_CFG_GetBank{}_Gnds", bank);
        self.query_ints(&cmd, &Self::ack_list(card), card).await
    }

    /// Read the analog ground selection for a bank.
    pub async fn mio_agnd(&self, bank: u8, card: CardSelect) -> Result<PerCard<i64>> {
        let cmd = format!("DIG_CFG_GetBank{}_Agnd", bank);
        self.query_ints(&cmd, &Self::ack_list(card), card).await
    }

    /// Read the active MIO configuration: 16 pin-config words per card.
    ///
    /// The reply carries version and spare words ahead of the pin words;
    /// those are stripped here.
    pub async fn mio_config(&self, card: CardSelect) -> Result<PerCard<Vec<u64>>> {
        let fields = self
            .query_hex("DIG_CFG_GetActivateMIOSetup", &Self::ack_list(card), card, 8)
            .await?;
        match fields {
            PerCard::Single(field) => Ok(PerCard::Single(config_words(field)?)),
            PerCard::AllCards(fields) => Ok(PerCard::AllCards(
                fields
                    .into_iter()
                    .map(config_words)
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    /// Load a 16-word configuration into set `config_number` (1..=20).
    /// Takes effect only after
    /// [`mio_activate_config`](BsiClient::mio_activate_config).
    pub async fn mio_load_config(&self, config_number: u8, words: &[u64]) -> Result<bool> {
        if words.len() != MIO_PINS {
            return Err(Error::InvalidParameter(format!(
                "configuration set needs exactly 16 words, got {}",
                words.len()
            )));
        }
        let cmd = format!("DIG_CFG_LoadMIOSetup{}", config_number);
        let mut params = String::from("1,0,0,0,0,0,0");
        for word in words {
            params.push(',');
            params.push_str(&codec::hex_even(*word));
        }
        self.query_ack(&cmd, &params).await
    }

    /// Activate configuration set `config_number` on the selected card(s).
    pub async fn mio_activate_config(&self, config_number: u8, card: CardSelect) -> Result<bool> {
        let cmd = format!("DIG_CFG_ActivateMIOSetup{}", config_number);
        self.send_and_check(&cmd, card).await
    }

    /// Drive an MIO pin high or low.
    ///
    /// Read-modify-write: fetches the active configuration, patches the
    /// level bit of the pin word, reloads it into `config_number`, and
    /// reactivates. Three round trips, fail-fast, no rollback. The pin
    /// must be configured as an output.
    pub async fn mio_set_output(
        &self,
        mio_number: u8,
        high: bool,
        card: CardSelect,
        config_number: u8,
    ) -> Result<bool> {
        validate_mio_number(mio_number)?;
        let mut words = self.mio_config(card).await?.into_single()?;
        let index = mio_number as usize - 1;

        if words[index] & PIN_OUTPUT_BIT != PIN_OUTPUT_BIT {
            return Err(Error::InvalidParameter(format!(
                "MIO{} is not configured as an output",
                mio_number
            )));
        }
        if high {
            words[index] |= PIN_LEVEL_BIT;
        } else {
            words[index] &= !PIN_LEVEL_BIT;
        }

        if !self.mio_load_config(config_number, &words).await? {
            return Ok(false);
        }
        self.mio_activate_config(config_number, card).await
    }

    /// Read the input state of all 16 MIO pins as one word per card
    /// (bit 0 = MIO1).
    pub async fn mio_state(&self, card: CardSelect) -> Result<PerCard<u64>> {
        let fields = self
            .query_hex("DIG_GetMIOState", &Self::ack_list(card), card, 4)
            .await?;
        fields.try_map(field_to_word)
    }

    /// Read the input state of one MIO pin.
    pub async fn mio_input(&self, mio_number: u8, card: CardSelect) -> Result<PerCard<bool>> {
        validate_mio_number(mio_number)?;
        let mask = 1u64 << (mio_number - 1);
        Ok(self.mio_state(card).await?.map(|word| word & mask != 0))
    }

    /// Put every MIO pin into high impedance, or return to normal
    /// operation.
    pub async fn mio_set_high_z(&self, on: bool, card: CardSelect) -> Result<bool> {
        let cmd = if on {
            "DIG_CFG_MIO_Highz_ON"
        } else {
            "DIG_CFG_MIO_Highz_OFF"
        };
        self.send_and_check(cmd, card).await
    }
}

fn config_words(field: Field) -> Result<Vec<u64>> {
    match field {
        Field::HexList(words) if words.len() == CONFIG_HEADER_WORDS + MIO_PINS => {
            Ok(words[CONFIG_HEADER_WORDS..].to_vec())
        }
        other => Err(Error::Protocol(format!(
            "malformed MIO configuration field: {:?}",
            other
        ))),
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

    /// 7 header words then 16 pin words, 8 nibbles each, as one field.
    fn config_reply(pin_words: &[u64; 16]) -> String {
        let mut hex = String::new();
        for _ in 0..7 {
            hex.push_str("00000001");
        }
        for w in pin_words {
            hex.push_str(&format!("{:08x}", w));
        }
        format!("DIG,003,{},,,,,,,,,,,,,,,\n", hex)
    }

    #[tokio::test]
    async fn config_strips_header_words() {
        let mut pins = [0u64; 16];
        pins[0] = 0x50;
        pins[3] = 0x53;
        let mut mock = discovery_mock();
        mock.push_reply(&config_reply(&pins));

        let client = client(mock).await;
        let words = client
            .mio_config(CardSelect::card(1).unwrap())
            .await
            .unwrap()
            .into_single()
            .unwrap();
        assert_eq!(words.len(), 16);
        assert_eq!(words[0], 0x50);
        assert_eq!(words[3], 0x53);
    }

    #[tokio::test]
    async fn load_config_sends_header_and_hex_words() {
        let mut mock = discovery_mock();
        mock.push_reply("DIG,003,O\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let mut words = vec![0u64; 16];
        words[0] = 0x50;
        words[1] = 0x51;
        assert!(client.mio_load_config(3, &words).await.unwrap());

        let sent = log.lock().unwrap().clone();
        assert!(sent[2].starts_with("DIG_CFG_LoadMIOSetup3,003,1,0,0,0,0,0,0,50,51,00,"));
    }

    #[tokio::test]
    async fn load_config_rejects_wrong_word_count() {
        let client = client(discovery_mock()).await;
        let result = client.mio_load_config(1, &[0u64; 15]).await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn set_output_patches_the_pin_word() {
        let mut pins = [0u64; 16];
        pins[4] = 0x40; // MIO5 is an output, currently low
        let mut mock = discovery_mock();
        mock.push_reply(&config_reply(&pins));
        mock.push_reply("DIG,004,O\n");
        mock.push_reply("DIG,005,O,,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let ok = client
            .mio_set_output(5, true, CardSelect::card(1).unwrap(), 2)
            .await
            .unwrap();
        assert!(ok);

        let sent = log.lock().unwrap().clone();
        // The reloaded set carries 0x41 in MIO5's slot.
        assert!(sent[3].starts_with("DIG_CFG_LoadMIOSetup2,004,1,0,0,0,0,0,0,00,00,00,00,41,"));
        assert!(sent[4].starts_with("DIG_CFG_ActivateMIOSetup2,005,"));
    }

    #[tokio::test]
    async fn truncated_config_reply_is_a_protocol_error() {
        let mut mock = discovery_mock();
        // 7 header words but only 3 pin words.
        let mut hex = String::new();
        for _ in 0..10 {
            hex.push_str("00000041");
        }
        mock.push_reply(&format!("DIG,003,{},,,,,,,,,,,,,,,\n", hex));

        let client = client(mock).await;
        let result = client
            .mio_set_output(16, true, CardSelect::card(1).unwrap(), 1)
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn set_output_rejects_non_output_pins() {
        let pins = [0u64; 16]; // nothing configured as output
        let mut mock = discovery_mock();
        mock.push_reply(&config_reply(&pins));

        let client = client(mock).await;
        let result = client
            .mio_set_output(1, true, CardSelect::card(1).unwrap(), 1)
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn input_tests_the_pin_bit() {
        let mut mock = discovery_mock();
        // MIO3 high: state word 0x0004.
        mock.push_reply("DIG,003,0004,,,,,,,,,,,,,,,\n");
        mock.push_reply("DIG,004,0004,,,,,,,,,,,,,,,\n");

        let client = client(mock).await;
        let high = client
            .mio_input(3, CardSelect::card(1).unwrap())
            .await
            .unwrap();
        assert_eq!(high, PerCard::Single(true));
        let low = client
            .mio_input(4, CardSelect::card(1).unwrap())
            .await
            .unwrap();
        assert_eq!(low, PerCard::Single(false));
    }

    #[tokio::test]
    async fn high_z_picks_the_on_off_command() {
        let mut mock = discovery_mock();
        mock.push_reply("DIG,003,O,,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        assert!(client.mio_set_high_z(true, CardSelect::All).await.unwrap());
        assert!(log.lock().unwrap()[2].starts_with("DIG_CFG_MIO_Highz_ON,003,"));
    }
}
