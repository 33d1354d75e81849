//! Capabilities the automations consume from the device layer.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::{
    prelude::*,
    quantity::{Amps, Percent},
};

/// Point-in-time battery readings. `None` means the reading is unavailable.
#[async_trait]
pub trait Telemetry: Send + Sync {
    async fn state_of_charge(&self) -> Option<Percent>;

    async fn battery_current(&self) -> Option<Amps>;
}

/// Physical switch: generator relay, load relay, charger.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn set_powered(&self, is_powered: bool) -> Result;

    async fn is_powered(&self) -> Result<bool>;
}

/// High-power load that may be shed on the AC input loss.
#[async_trait]
pub trait HpActuator: Actuator {
    /// Current state label, for example `ON`, `OFF`, or a thermostat mode.
    async fn state(&self) -> Result<String>;

    /// Bring the device back to the previously read state label.
    async fn set_state(&self, state: &str) -> Result;

    /// Whether the device currently draws enough power to be shed.
    ///
    /// A thermostat, for example, only counts in the electric heat mode.
    async fn in_high_power_state(&self) -> bool;
}

/// Charge or input current ceiling of the inverter/charger.
#[async_trait]
pub trait CurrentLimiter: Send + Sync {
    async fn set_limit(&self, limit: Amps) -> Result;
}

/// Bounds every call to the wrapped capability with the request timeout.
pub struct WithTimeout<C: ?Sized> {
    inner: Arc<C>,
    timeout: Duration,
}

impl<C: ?Sized> WithTimeout<C> {
    pub fn wrap(inner: Arc<C>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self { inner, timeout })
    }
}

#[async_trait]
impl<C: Telemetry + ?Sized> Telemetry for WithTimeout<C> {
    async fn state_of_charge(&self) -> Option<Percent> {
        timeout(self.timeout, self.inner.state_of_charge()).await.unwrap_or_else(|_| {
            warn!("timed out reading the state of charge");
            None
        })
    }

    async fn battery_current(&self) -> Option<Amps> {
        timeout(self.timeout, self.inner.battery_current()).await.unwrap_or_else(|_| {
            warn!("timed out reading the battery current");
            None
        })
    }
}

#[async_trait]
impl<C: Actuator + ?Sized> Actuator for WithTimeout<C> {
    async fn set_powered(&self, is_powered: bool) -> Result {
        timeout(self.timeout, self.inner.set_powered(is_powered))
            .await
            .context("timed out switching the actuator")?
    }

    async fn is_powered(&self) -> Result<bool> {
        timeout(self.timeout, self.inner.is_powered())
            .await
            .context("timed out reading the actuator state")?
    }
}

#[async_trait]
impl<C: HpActuator + ?Sized> HpActuator for WithTimeout<C> {
    async fn state(&self) -> Result<String> {
        timeout(self.timeout, self.inner.state()).await.context("timed out reading the state")?
    }

    async fn set_state(&self, state: &str) -> Result {
        timeout(self.timeout, self.inner.set_state(state))
            .await
            .context("timed out restoring the state")?
    }

    async fn in_high_power_state(&self) -> bool {
        timeout(self.timeout, self.inner.in_high_power_state()).await.unwrap_or_else(|_| {
            warn!("timed out checking the high-power state");
            false
        })
    }
}

#[async_trait]
impl<C: CurrentLimiter + ?Sized> CurrentLimiter for WithTimeout<C> {
    async fn set_limit(&self, limit: Amps) -> Result {
        timeout(self.timeout, self.inner.set_limit(limit))
            .await
            .context("timed out setting the current limit")?
    }
}
