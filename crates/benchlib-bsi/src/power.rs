//! Power source control: relays, supply voltage/current configuration,
//! and supply measurements.
//!
//! Each card carries four sources. A source drives its load only with the
//! relay closed; [`set_output`](BsiClient::set_output) keeps the supply
//! switch and the relay paired so a source is never left driving an open
//! relay or feeding a closed one unpowered.

use benchlib_core::error::{Error, Result};
use benchlib_core::types::{CardSelect, PerCard};

use crate::client::{field_to_word, BsiClient, TryMapPerCard};

/// Number of power sources per card.
pub const POWER_SOURCES: u8 = 4;

fn validate_source(source: u8) -> Result<()> {
    if (1..=POWER_SOURCES).contains(&source) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "power source {} out of range 1..=4",
            source
        )))
    }
}

impl BsiClient {
    /// Close the relay of a source (1..=4).
    pub async fn relay_close(&self, source: u8, card: CardSelect) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_RelClose{}", source);
        self.send_and_check(&cmd, card).await
    }

    /// Open the relay of a source (1..=4).
    pub async fn relay_open(&self, source: u8, card: CardSelect) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_RelOpen{}", source);
        self.send_and_check(&cmd, card).await
    }

    /// Switch a source on or off together with its relay: on closes the
    /// relay, off opens it.
    pub async fn set_output(&self, source: u8, on: bool, card: CardSelect) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_{}{}", if on { "On" } else { "Off" }, source);
        let switched = self.send_and_check(&cmd, card).await?;
        let relay = if on {
            self.relay_close(source, card).await?
        } else {
            self.relay_open(source, card).await?
        };
        Ok(switched && relay)
    }

    /// Put a source into voltage mode.
    pub async fn set_voltage_mode(&self, source: u8, card: CardSelect) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_VoltageMode{}", source);
        self.send_and_check(&cmd, card).await
    }

    /// Put a source into current mode.
    pub async fn set_current_mode(&self, source: u8, card: CardSelect) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_CurrentMode{}", source);
        self.send_and_check(&cmd, card).await
    }

    /// Set the supply voltage of a source in volts.
    pub async fn set_supply_voltage(
        &self,
        source: u8,
        voltage: f64,
        card: CardSelect,
    ) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_SetV{}", source);
        self.send_value_and_check(&cmd, &voltage.to_string(), card)
            .await
    }

    /// Set the maximum (source) current limit in mA.
    pub async fn set_current_limit_max(
        &self,
        source: u8,
        current_ma: f64,
        card: CardSelect,
    ) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_IMax{}", source);
        self.send_value_and_check(&cmd, &current_ma.to_string(), card)
            .await
    }

    /// Set the minimum (sink) current limit in mA, a negative value.
    pub async fn set_current_limit_min(
        &self,
        source: u8,
        current_ma: f64,
        card: CardSelect,
    ) -> Result<bool> {
        validate_source(source)?;
        let cmd = format!("PWR_CFG_IMin{}", source);
        self.send_value_and_check(&cmd, &current_ma.to_string(), card)
            .await
    }

    /// Measure the supply voltage at the force pin against the sense low
    /// pin.
    pub async fn supply_voltage_force(
        &self,
        source: u8,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        validate_source(source)?;
        let cmd = format!("MEAS_V_High{}F_Low{}S", source, source);
        self.query_floats(&cmd, "", card).await
    }

    /// Measure the supply voltage at the sense pins.
    pub async fn supply_voltage_sense(
        &self,
        source: u8,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        validate_source(source)?;
        let cmd = format!("MEAS_V_High{}S_Low{}S", source, source);
        self.query_floats(&cmd, "", card).await
    }

    /// Measure the output current of a source in mA.
    pub async fn source_current(&self, source: u8, card: CardSelect) -> Result<PerCard<f64>> {
        validate_source(source)?;
        let cmd = format!("MEAS_I_{}", source);
        self.query_floats(&cmd, &Self::ack_list(card), card).await
    }

    /// Read the status word of a source.
    pub async fn power_state(&self, source: u8, card: CardSelect) -> Result<PerCard<u64>> {
        validate_source(source)?;
        let cmd = format!("PWR_GetState{}", source);
        let fields = self.query_hex(&cmd, &Self::ack_list(card), card, 8).await?;
        fields.try_map(field_to_word)
    }

    /// Configure a source as a voltage source in one call: sense/force
    /// selection, voltage mode, both current limits, and the voltage.
    ///
    /// Five chained commands; the first one the chassis rejects aborts the
    /// rest and reports `false`, leaving earlier steps applied.
    pub async fn configure_voltage_source(
        &self,
        source: u8,
        card: CardSelect,
        voltage: f64,
        i_min_ma: f64,
        i_max_ma: f64,
        use_sense: bool,
    ) -> Result<bool> {
        validate_source(source)?;
        if !self.set_sense_force(source, use_sense, card).await? {
            return Ok(false);
        }
        if !self.set_voltage_mode(source, card).await? {
            return Ok(false);
        }
        if !self.set_current_limit_min(source, i_min_ma, card).await? {
            return Ok(false);
        }
        if !self.set_current_limit_max(source, i_max_ma, card).await? {
            return Ok(false);
        }
        self.set_supply_voltage(source, voltage, card).await
    }

    /// Configure a source as a current source in one call: sense/force
    /// selection, current mode, both voltage limits, and the current.
    ///
    /// Same chaining and failure behavior as
    /// [`configure_voltage_source`](BsiClient::configure_voltage_source).
    pub async fn configure_current_source(
        &self,
        source: u8,
        card: CardSelect,
        current_ma: f64,
        v_min: f64,
        v_max: f64,
        use_sense: bool,
    ) -> Result<bool> {
        validate_source(source)?;
        if !self.set_sense_force(source, use_sense, card).await? {
            return Ok(false);
        }
        if !self.set_current_mode(source, card).await? {
            return Ok(false);
        }
        let cmd = format!("PWR_CFG_VMin{}", source);
        if !self
            .send_value_and_check(&cmd, &v_min.to_string(), card)
            .await?
        {
            return Ok(false);
        }
        let cmd = format!("PWR_CFG_VMax{}", source);
        if !self
            .send_value_and_check(&cmd, &v_max.to_string(), card)
            .await?
        {
            return Ok(false);
        }
        let cmd = format!("PWR_CFG_SetI{}", source);
        self.send_value_and_check(&cmd, &current_ma.to_string(), card)
            .await
    }

    async fn set_sense_force(&self, source: u8, on: bool, card: CardSelect) -> Result<bool> {
        let cmd = format!("PWR_CFG_Sense_Force_{}{}", if on { "On" } else { "Off" }, source);
        self.send_and_check(&cmd, card).await
    }
}
