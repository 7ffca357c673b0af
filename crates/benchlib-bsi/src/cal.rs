//! ADC self-calibration.

use std::time::Duration;

use benchlib_core::error::Result;
use benchlib_core::types::CardSelect;

use crate::client::BsiClient;

/// Default reply timeout for a self-calibration pass. Both calibration
/// commands measure for several seconds per card before answering.
pub const DEFAULT_CAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-card results of a self-calibration pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    /// ADC offset value per card.
    pub offsets: Vec<f64>,
    /// ADC reference value per card.
    pub references: Vec<f64>,
}

impl BsiClient {
    /// Run ADC self-calibration on all cards: offset pass, then reference
    /// pass.
    ///
    /// Both passes run under `timeout` (defaulting to
    /// [`DEFAULT_CAL_TIMEOUT`]); the steady-state timeout is untouched.
    pub async fn self_calibrate(&self, timeout: Option<Duration>) -> Result<CalibrationResult> {
        let timeout = timeout.unwrap_or(DEFAULT_CAL_TIMEOUT);
        let offsets = self
            .query_floats_with_timeout("CAL_ADCOffset", "", CardSelect::All, timeout)
            .await?
            .into_vec();
        let references = self
            .query_floats_with_timeout("CAL_ADCRef", "", CardSelect::All, timeout)
            .await?
            .into_vec();
        tracing::info!(?offsets, ?references, "Self-calibration complete");
        Ok(CalibrationResult {
            offsets,
            references,
        })
    }

    /// Set the calibration measurement parameters: settle time before the
    /// first sample, wait between samples, and samples per average.
    pub async fn set_calibration_params(
        &self,
        first_wait_ms: u32,
        wait_ms: u32,
        samples: u32,
    ) -> Result<bool> {
        let params = format!("{},{},{}", first_wait_ms, wait_ms, samples);
        self.query_ack("LLV_SET_CALI_Parameter", &params).await
    }

    /// Restore the default calibration measurement parameters.
    pub async fn reset_calibration_params(&self) -> Result<bool> {
        self.query_ack("LLV_RESET_CALI_Parameter", "").await
    }
}
