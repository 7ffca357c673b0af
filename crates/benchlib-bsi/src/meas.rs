//! Analog voltage measurement and measurement configuration.
//!
//! Range, sample count, sample frequency, and wait time are chassis-wide
//! settings; voltage readings are per card. Pin names in measurement
//! commands follow the chassis documentation (`MIO01`, `High1F`, ...).

use benchlib_core::error::Result;
use benchlib_core::types::{CardSelect, PerCard};

use crate::client::BsiClient;

/// Boundary of the narrow measurement range in volts.
///
/// The chassis measures -2..25 V in range 1 and -2..8 V in range 0; a
/// wide-range reading at or below this value also fits the narrow range,
/// where resolution is better.
pub const AUTORANGE_THRESHOLD_VOLTS: f64 = 8.0;

/// Wide measurement range, -2..25 V.
pub const RANGE_WIDE: u8 = 1;
/// Narrow measurement range, -2..8 V.
pub const RANGE_NARROW: u8 = 0;

impl BsiClient {
    /// Read the active measurement range (1 = -2..25 V, 0 = -2..8 V).
    /// Chassis-wide.
    pub async fn meas_range(&self) -> Result<i64> {
        self.query_ints("MEAS_CFG_GetRange", "", CardSelect::Card(1))
            .await?
            .into_single()
    }

    /// Set the measurement range (1 = -2..25 V, 0 = -2..8 V). Chassis-wide.
    pub async fn set_meas_range(&self, range: u8) -> Result<bool> {
        self.query_ack("MEAS_CFG_SetRange", &range.to_string())
            .await
    }

    /// Set the number of samples averaged per reading. Chassis-wide.
    pub async fn set_sample_count(&self, samples_per_average: u32) -> Result<bool> {
        self.query_ack("MEAS_CFG_SetSampleCnt", &samples_per_average.to_string())
            .await
    }

    /// Set the sample frequency in Hz. Chassis-wide.
    pub async fn set_sample_frequency(&self, sample_freq_hz: u32) -> Result<bool> {
        self.query_ack("MEAS_CFG_SetSampleFreq", &sample_freq_hz.to_string())
            .await
    }

    /// Set the settle time in ms after the multiplexer switches.
    /// Chassis-wide.
    pub async fn set_wait_time(&self, wait_time_ms: u32) -> Result<bool> {
        self.query_ack("MEAS_CFG_SetWaitTime", &wait_time_ms.to_string())
            .await
    }

    /// Measure the voltage between two pins in the active range.
    pub async fn voltage(
        &self,
        high_pin: &str,
        low_pin: &str,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        let cmd = format!("MEAS_V_{}_{}", high_pin, low_pin);
        self.query_floats(&cmd, "", card).await
    }

    /// Measure between two pins with automatic range selection.
    ///
    /// Measures in the wide range first; when the reading also fits the
    /// narrow range (at most [`AUTORANGE_THRESHOLD_VOLTS`]) it switches
    /// down and measures again for better resolution. Under broadcast the
    /// range is chassis-wide, so the second pass only happens when every
    /// card's reading fits. The two measurements are an ordered sequence,
    /// not a transaction; the line voltage may move between them.
    pub async fn voltage_autorange(
        &self,
        high_pin: &str,
        low_pin: &str,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        let cmd = format!("MEAS_V_{}_{}", high_pin, low_pin);
        self.autorange_with(&cmd, "", card).await
    }

    /// Autorange measurement through an arbitrary low-level measurement
    /// command, for pin pairs without a standard `MEAS_V_` form.
    pub async fn voltage_autorange_by_cmd(
        &self,
        cmd: &str,
        params: &str,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        self.autorange_with(cmd, params, card).await
    }

    async fn autorange_with(
        &self,
        cmd: &str,
        params: &str,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        self.set_meas_range(RANGE_WIDE).await?;
        let wide = self.query_floats(cmd, params, card).await?;

        let fits_narrow = match &wide {
            PerCard::Single(v) => *v <= AUTORANGE_THRESHOLD_VOLTS,
            PerCard::AllCards(values) => {
                !values.is_empty() && values.iter().all(|v| *v <= AUTORANGE_THRESHOLD_VOLTS)
            }
        };
        if !fits_narrow {
            return Ok(wide);
        }

        self.set_meas_range(RANGE_NARROW).await?;
        self.query_floats(cmd, params, card).await
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
        mock.push_reply("SYS_GetBSISnr,002,10,20,,,,,,,,,,,,,,\n");
        mock
    }

    async fn client(mock: MockTransport) -> BsiClient {
        BsiClient::with_transport(Box::new(mock), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn voltage_command_is_built_from_pin_names() {
        let mut mock = discovery_mock();
        mock.push_reply("MEAS,003,1.25,2.5,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let volts = client
            .voltage("MIO01", "MIO02", CardSelect::All)
            .await
            .unwrap();
        assert_eq!(volts, PerCard::AllCards(vec![1.25, 2.5]));
        assert_eq!(log.lock().unwrap()[2], "MEAS_V_MIO01_MIO02,003\n");
    }

    #[tokio::test]
    async fn autorange_keeps_wide_reading_above_threshold() {
        let mut mock = discovery_mock();
        mock.push_reply("MEAS_CFG_SetRange,003,O\n");
        mock.push_reply("MEAS,004,9.0,,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let volts = client
            .voltage_autorange("MIO01", "MIO02", CardSelect::card(1).unwrap())
            .await
            .unwrap();
        assert_eq!(volts, PerCard::Single(9.0));

        // 9.0 V does not fit the narrow range, so exactly one range set
        // and one measurement went out.
        let sent = log.lock().unwrap().clone();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2], "MEAS_CFG_SetRange,003,1\n");
    }

    #[tokio::test]
    async fn autorange_remeasures_below_threshold() {
        let mut mock = discovery_mock();
        mock.push_reply("MEAS_CFG_SetRange,003,O\n");
        mock.push_reply("MEAS,004,5.0,,,,,,,,,,,,,,,\n");
        mock.push_reply("MEAS_CFG_SetRange,005,O\n");
        mock.push_reply("MEAS,006,5.02,,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let volts = client
            .voltage_autorange("MIO01", "MIO02", CardSelect::card(1).unwrap())
            .await
            .unwrap();
        // The narrow-range reading wins.
        assert_eq!(volts, PerCard::Single(5.02));

        let sent = log.lock().unwrap().clone();
        assert_eq!(sent[2], "MEAS_CFG_SetRange,003,1\n");
        assert_eq!(sent[4], "MEAS_CFG_SetRange,005,0\n");
    }

    #[tokio::test]
    async fn broadcast_autorange_requires_every_card_to_fit() {
        let mut mock = discovery_mock();
        mock.push_reply("MEAS_CFG_SetRange,003,O,O,,,,,,,,,,,,,,\n");
        // Card 2 reads above the narrow range; no second pass.
        mock.push_reply("MEAS,004,5.0,12.0,,,,,,,,,,,,,,\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        let volts = client
            .voltage_autorange("MIO01", "MIO02", CardSelect::All)
            .await
            .unwrap();
        assert_eq!(volts, PerCard::AllCards(vec![5.0, 12.0]));
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn range_setters_use_bare_parameters() {
        let mut mock = discovery_mock();
        mock.push_reply("MEAS_CFG_SetSampleCnt,003,O\n");
        let log = mock.sent_log();

        let client = client(mock).await;
        assert!(client.set_sample_count(1000).await.unwrap());
        assert_eq!(log.lock().unwrap()[2], "MEAS_CFG_SetSampleCnt,003,1000\n");
    }
}
