//! openHAB REST items as telemetry, switches, and current limiters.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Url, header::CONTENT_TYPE};

use crate::{
    core::capability::{Actuator, CurrentLimiter, HpActuator, Telemetry},
    prelude::*,
    quantity::{Amps, Percent, Volts},
};

const ON: &str = "ON";
const OFF: &str = "OFF";

pub struct Client {
    inner: reqwest::Client,
    base_url: Url,
}

impl Client {
    #[instrument(skip_all, fields(base_url = %base_url))]
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner, base_url })
    }

    fn item_url(&self, name: &str, suffix: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("`{}` cannot be a base URL", self.base_url))?
            .pop_if_empty()
            .extend(["rest", "items", name])
            .extend(suffix);
        Ok(url)
    }

    #[instrument(skip_all, fields(item = name))]
    pub async fn get_state(&self, name: &str) -> Result<String> {
        let state = self
            .inner
            .get(self.item_url(name, Some("state"))?)
            .send()
            .await
            .with_context(|| format!("failed to request the state of `{name}`"))?
            .error_for_status()
            .with_context(|| format!("failed to get the state of `{name}`"))?
            .text()
            .await
            .with_context(|| format!("failed to read the state of `{name}`"))?;
        debug!(state = %state, "fetched");
        Ok(state)
    }

    #[instrument(skip_all, fields(item = name, command = command))]
    pub async fn send_command(&self, name: &str, command: &str) -> Result {
        info!("sending…");
        self.inner
            .post(self.item_url(name, None)?)
            .header(CONTENT_TYPE, "text/plain")
            .body(command.to_string())
            .send()
            .await
            .with_context(|| format!("failed to send `{command}` to `{name}`"))?
            .error_for_status()
            .with_context(|| format!("`{name}` rejected `{command}`"))?;
        Ok(())
    }
}

/// Parse a numeric item state, like `12.5` or `12.5 A`.
///
/// `NULL` and `UNDEF` mean that the item has no value.
fn parse_number(state: &str) -> Result<Option<f64>> {
    let state = state.trim();
    if state.is_empty() || state == "NULL" || state == "UNDEF" {
        return Ok(None);
    }
    let value = state.split_whitespace().next().unwrap_or(state);
    let value: f64 = value.parse().with_context(|| format!("`{state}` is not a number"))?;
    Ok(Some(value))
}

pub struct NumberItem {
    client: Arc<Client>,
    name: String,
}

impl NumberItem {
    pub const fn new(client: Arc<Client>, name: String) -> Self {
        Self { client, name }
    }

    pub async fn read(&self) -> Result<Option<f64>> {
        parse_number(&self.client.get_state(&self.name).await?)
    }

    /// Read the value, logging and swallowing the errors.
    async fn read_or_none(&self) -> Option<f64> {
        match self.read().await {
            Ok(value) => value,
            Err(error) => {
                warn!(item = %self.name, "failed to read: {error:#}");
                None
            }
        }
    }

    pub async fn read_voltage(&self) -> Option<Volts> {
        self.read_or_none().await.map(Volts)
    }
}

/// Battery state of charge and current from two numeric items.
pub struct ItemTelemetry {
    pub state_of_charge: NumberItem,
    pub battery_current: NumberItem,
}

#[async_trait]
impl Telemetry for ItemTelemetry {
    async fn state_of_charge(&self) -> Option<Percent> {
        self.state_of_charge.read_or_none().await.map(Percent)
    }

    async fn battery_current(&self) -> Option<Amps> {
        self.battery_current.read_or_none().await.map(Amps)
    }
}

/// Switch item, optionally paired with a separate item that reports the actual state.
pub struct SwitchItem {
    client: Arc<Client>,
    switch_item: String,
    state_item: Option<String>,
    running_states: Vec<String>,
}

impl SwitchItem {
    pub const fn new(
        client: Arc<Client>,
        switch_item: String,
        state_item: Option<String>,
        running_states: Vec<String>,
    ) -> Self {
        Self { client, switch_item, state_item, running_states }
    }
}

#[async_trait]
impl Actuator for SwitchItem {
    async fn set_powered(&self, is_powered: bool) -> Result {
        self.client.send_command(&self.switch_item, if is_powered { ON } else { OFF }).await
    }

    async fn is_powered(&self) -> Result<bool> {
        let item = self.state_item.as_deref().unwrap_or(&self.switch_item);
        let state = self.client.get_state(item).await?;
        Ok(self.running_states.iter().any(|running| running == state.trim()))
    }
}

/// Item of a high-power load: a switch, or a thermostat mode.
pub struct HpItem {
    client: Arc<Client>,
    item: String,
    high_power_states: Vec<String>,
}

impl HpItem {
    pub const fn new(client: Arc<Client>, item: String, high_power_states: Vec<String>) -> Self {
        Self { client, item, high_power_states }
    }
}

#[async_trait]
impl Actuator for HpItem {
    async fn set_powered(&self, is_powered: bool) -> Result {
        self.set_state(if is_powered { ON } else { OFF }).await
    }

    async fn is_powered(&self) -> Result<bool> {
        Ok(self.state().await? != OFF)
    }
}

#[async_trait]
impl HpActuator for HpItem {
    async fn state(&self) -> Result<String> {
        Ok(self.client.get_state(&self.item).await?.trim().to_string())
    }

    async fn set_state(&self, state: &str) -> Result {
        self.client.send_command(&self.item, state).await
    }

    async fn in_high_power_state(&self) -> bool {
        match self.state().await {
            Ok(state) => self.high_power_states.contains(&state),
            Err(error) => {
                warn!(item = %self.item, "failed to read the state: {error:#}");
                false
            }
        }
    }
}

/// Numeric item holding a current ceiling.
pub struct LimitItem {
    client: Arc<Client>,
    item: String,
}

impl LimitItem {
    pub const fn new(client: Arc<Client>, item: String) -> Self {
        Self { client, item }
    }
}

#[async_trait]
impl CurrentLimiter for LimitItem {
    async fn set_limit(&self, limit: Amps) -> Result {
        if limit < Amps::ZERO {
            warn!(item = %self.item, %limit, "ignoring the negative limit");
            return Ok(());
        }
        self.client.send_command(&self.item, &limit.0.to_string()).await
    }
}
