//! OpenEVSE charger as a sheddable high-power load.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{
    core::capability::{Actuator, HpActuator},
    prelude::*,
};

pub struct Client {
    inner: reqwest::Client,
    url: Url,

    /// Pausing the charger is allowed.
    enable_control: bool,
}

impl Client {
    #[instrument(skip_all, fields(url = %url))]
    pub fn new(url: Url, enable_control: bool, timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner, url, enable_control })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.url.join(path).with_context(|| format!("invalid OpenEVSE endpoint `{path}`"))
    }

    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn get_status(&self) -> Result<Status> {
        let status: Status = self
            .inner
            .get(self.endpoint("status")?)
            .send()
            .await
            .context("failed to request the charger status")?
            .error_for_status()?
            .json()
            .await
            .context("failed to deserialize the charger status")?;
        debug!(status = %status.status, "fetched");
        Ok(status)
    }

    /// Pause the charging.
    #[instrument(skip_all, fields(url = %self.url))]
    async fn set_override(&self) -> Result {
        info!("pausing the charger…");
        self.inner
            .post(self.endpoint("override")?)
            .json(&Override::DISABLED)
            .send()
            .await
            .context("failed to set the override")?
            .error_for_status()?;
        Ok(())
    }

    /// Hand the charger back to its own schedule.
    #[instrument(skip_all, fields(url = %self.url))]
    async fn delete_override(&self) -> Result {
        info!("resuming the charger…");
        self.inner
            .delete(self.endpoint("override")?)
            .send()
            .await
            .context("failed to clear the override")?
            .error_for_status()?;
        Ok(())
    }
}

#[must_use]
#[derive(Deserialize)]
pub struct Status {
    /// `active`, `disabled`, `sleeping`, and the like.
    pub status: String,
}

impl Status {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Serialize)]
struct Override {
    state: &'static str,
}

impl Override {
    const DISABLED: Self = Self { state: "disabled" };
}

#[async_trait]
impl Actuator for Client {
    async fn set_powered(&self, is_powered: bool) -> Result {
        if !self.enable_control {
            debug!("control is disabled, leaving the charger as is");
            return Ok(());
        }
        match (is_powered, self.is_powered().await?) {
            (true, false) => self.delete_override().await,
            (false, true) => self.set_override().await,
            _ => Ok(()),
        }
    }

    async fn is_powered(&self) -> Result<bool> {
        Ok(self.get_status().await?.is_active())
    }
}

#[async_trait]
impl HpActuator for Client {
    async fn state(&self) -> Result<String> {
        Ok(if self.is_powered().await? { "ON" } else { "OFF" }.to_string())
    }

    async fn set_state(&self, state: &str) -> Result {
        match state {
            "ON" => self.set_powered(true).await,
            "OFF" => self.set_powered(false).await,
            _ => bail!("unsupported charger state `{state}`"),
        }
    }

    async fn in_high_power_state(&self) -> bool {
        if !self.enable_control {
            return false;
        }
        self.is_powered().await.unwrap_or_else(|error| {
            warn!("failed to read the charger status: {error:#}");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ok() -> Result {
        // language=json
        let body = r#"{
            "mode": "STA",
            "wifi_client_connected": 1,
            "srssi": -61,
            "amp": 15840,
            "voltage": 240,
            "pilot": 32,
            "session_energy": 1820.4,
            "state": 3,
            "status": "active",
            "elapsed": 1260
        }"#;
        assert!(serde_json::from_str::<Status>(body)?.is_active());
        Ok(())
    }

    #[test]
    fn disabled_status_ok() -> Result {
        // language=json
        let body = r#"{"state": 254, "status": "disabled"}"#;
        assert!(!serde_json::from_str::<Status>(body)?.is_active());
        Ok(())
    }

    #[test]
    fn override_body_ok() -> Result {
        assert_eq!(serde_json::to_string(&Override::DISABLED)?, r#"{"state":"disabled"}"#);
        Ok(())
    }

    #[test]
    fn endpoint_ok() -> Result {
        let client = Client::new(Url::parse("http://openevse.local/")?, true, Duration::from_secs(1))?;
        assert_eq!(client.endpoint("override")?.as_str(), "http://openevse.local/override");
        Ok(())
    }

    #[tokio::test]
    async fn uncontrolled_charger_is_never_high_power() -> Result {
        // The address is never contacted:
        let client = Client::new(Url::parse("http://192.0.2.1/")?, false, Duration::from_secs(1))?;
        assert!(!client.in_high_power_state().await);
        client.set_powered(false).await?;
        Ok(())
    }
}
