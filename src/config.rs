//! TOML deployment configuration.

mod duration;

use std::{fs, path::Path, time::Duration};

use itertools::Itertools;
use reqwest::Url;
use serde::Deserialize;
use serde_with::serde_as;

pub use self::duration::HumanDuration;
use crate::{
    core::{
        generator::AutomationParameters,
        power_loss::{CurrentLimitConfiguration, ShoreDetection},
    },
    prelude::*,
};

#[serde_as]
#[derive(Deserialize)]
pub struct Config {
    pub openhab: OpenHabConfig,

    /// Upper bound for every single device call.
    #[serde_as(as = "HumanDuration")]
    #[serde(default = "Config::default_request_timeout")]
    pub request_timeout: Duration,

    pub generator: Option<GeneratorConfig>,

    pub shore_detection: Option<ShoreDetectionConfig>,

    #[serde(default)]
    pub charge_limit: LimiterConfig,

    #[serde(default)]
    pub input_limit: LimiterConfig,

    #[serde(default)]
    pub hp_devices: Vec<HpDeviceConfig>,

    pub evse: Option<EvseConfig>,
}

impl Config {
    const fn default_request_timeout() -> Duration {
        Duration::from_secs(10)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read the configuration from `{}`", path.display()))?;
        let config: Self = toml::from_str(&contents).context("failed to parse the configuration")?;
        config.validate()?;
        info!(
            generator = config.generator.is_some(),
            shore_detection = config.shore_detection.is_some(),
            n_hp_devices = config.hp_devices.len(),
            evse = config.evse.is_some(),
            "loaded the configuration",
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result {
        ensure!(!self.request_timeout.is_zero(), "request timeout must be positive");
        self.openhab.url()?;
        if let Some(generator) = &self.generator {
            generator.parameters.validate().context("invalid generator parameters")?;
        }
        if let Some(shore_detection) = &self.shore_detection {
            shore_detection.settings.validate().context("invalid shore detection settings")?;
            ensure!(!shore_detection.poll_interval.is_zero(), "poll interval must be positive");
        }
        self.charge_limit.limits.validate().context("invalid charge current limits")?;
        self.input_limit.limits.validate().context("invalid input current limits")?;
        if let Some(evse) = &self.evse {
            evse.url()?;
        }
        let duplicates = self.hp_device_ids().duplicates().collect_vec();
        ensure!(duplicates.is_empty(), "duplicate high-power device IDs: {}", duplicates.join(", "));
        Ok(())
    }

    fn hp_device_ids(&self) -> impl Iterator<Item = &str> {
        self.hp_devices
            .iter()
            .map(|device| device.id.as_str())
            .chain(self.evse.iter().map(|evse| evse.id.as_str()))
    }
}

#[derive(Deserialize)]
pub struct OpenHabConfig {
    pub url: String,
}

impl OpenHabConfig {
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.url).with_context(|| format!("invalid openHAB URL `{}`", self.url))
    }
}

#[derive(Deserialize)]
pub struct GeneratorConfig {
    /// Item receiving the `ON` and `OFF` commands.
    pub switch_item: String,

    /// Item reporting whether the generator runs, when different from the switch item.
    pub state_item: Option<String>,

    /// State labels of the state item that mean the generator is running.
    #[serde(default = "default_on_states")]
    pub running_states: Vec<String>,

    pub state_of_charge_item: String,

    /// Positive values mean the battery is charging.
    pub battery_current_item: String,

    #[serde(flatten)]
    pub parameters: AutomationParameters,
}

#[serde_as]
#[derive(Deserialize)]
pub struct ShoreDetectionConfig {
    /// Numeric item with the AC input voltage.
    pub voltage_item: String,

    #[serde_as(as = "HumanDuration")]
    #[serde(default = "ShoreDetectionConfig::default_poll_interval")]
    pub poll_interval: Duration,

    #[serde(flatten)]
    pub settings: ShoreDetection,
}

impl ShoreDetectionConfig {
    const fn default_poll_interval() -> Duration {
        Duration::from_secs(5)
    }
}

#[derive(Default, Deserialize)]
pub struct LimiterConfig {
    /// Numeric item with the current ceiling. Without it, the limiter is not used.
    pub item: Option<String>,

    #[serde(flatten)]
    pub limits: CurrentLimitConfiguration,
}

#[derive(Deserialize)]
pub struct HpDeviceConfig {
    pub id: String,

    pub name: String,

    pub item: String,

    /// State labels that count as the high power draw.
    #[serde(default = "default_on_states")]
    pub high_power_states: Vec<String>,
}

#[derive(Deserialize)]
pub struct EvseConfig {
    #[serde(default = "EvseConfig::default_id")]
    pub id: String,

    #[serde(default = "EvseConfig::default_name")]
    pub name: String,

    pub address: String,

    /// Allow pausing the charger. Without it, the charger is never shed.
    #[serde(default)]
    pub enable_control: bool,
}

impl EvseConfig {
    fn default_id() -> String {
        "evse".to_string()
    }

    fn default_name() -> String {
        "EV charger".to_string()
    }

    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.address).with_context(|| format!("invalid OpenEVSE address `{}`", self.address))
    }
}

fn default_on_states() -> Vec<String> {
    vec!["ON".to_string()]
}
