use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{TimestampSeconds, serde_as};

use crate::{
    config::HumanDuration,
    prelude::*,
    quantity::{Amps, Percent},
};

/// Generator automation thresholds, fixed for the process lifetime.
#[serde_as]
#[must_use]
#[derive(Copy, Clone, Debug, Deserialize)]
pub struct AutomationParameters {
    /// Start the generator below this state of charge.
    pub low_value: Percent,

    /// Stop the generator above this state of charge.
    pub high_value: Percent,

    /// Stop the generator when the battery charges slower than this.
    #[serde(default)]
    pub min_charge_current: Amps,

    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub min_on: Duration,

    /// Zero means unbounded.
    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub max_on: Duration,

    /// Quiet time after a stop before the next automatic start.
    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub cool_down: Duration,

    /// Delay between the shut-off decision and the actual stop.
    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub off_delay: Duration,
}

impl AutomationParameters {
    pub fn validate(&self) -> Result {
        ensure!(
            (0.0..=100.0).contains(&self.low_value.0) && (0.0..=100.0).contains(&self.high_value.0),
            "state of charge thresholds must be within 0–100%",
        );
        ensure!(
            self.low_value < self.high_value,
            "low value ({}) must be below high value ({})",
            self.low_value,
            self.high_value,
        );
        ensure!(
            self.max_on.is_zero() || self.max_on >= self.min_on,
            "maximum run time must not be shorter than the minimum run time",
        );
        Ok(())
    }
}

/// Persisted generator automation flags.
#[serde_as]
#[must_use]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationState {
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub last_started: DateTime<Utc>,

    #[serde_as(as = "TimestampSeconds<i64>")]
    pub last_stopped: DateTime<Utc>,

    /// The automation owns the current run.
    #[serde(rename = "automationTriggered")]
    pub triggered: bool,
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Typical deployment: start below 10%, stop above 99%, run for 30 minutes to 3 hours.
    pub fn parameters() -> AutomationParameters {
        AutomationParameters {
            low_value: Percent(10.0),
            high_value: Percent(99.0),
            min_charge_current: Amps(1.0),
            min_on: Duration::from_secs(30 * 60),
            max_on: Duration::from_secs(3 * 3600),
            cool_down: Duration::from_secs(3600),
            off_delay: Duration::from_secs(5 * 60),
        }
    }
}
