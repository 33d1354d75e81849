use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{TimestampSecondsWithFrac, serde_as};

/// Persisted load-shedding flags and the cached states of the high-power devices.
#[serde_as]
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PowerLossState {
    /// Keyed by the stable device identifier.
    pub hp_devices: BTreeMap<String, HpDeviceRecord>,

    /// Time of the most recent low-voltage sample.
    #[serde_as(as = "TimestampSecondsWithFrac<f64>")]
    pub last_shutdown_time: DateTime<Utc>,

    pub shutdown_due_to_power_out: bool,
}

#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpDeviceRecord {
    pub name: String,

    /// State label read right before the device was switched off, or at its registration.
    pub state: String,

    /// The device is currently off because of the power loss, and is to be restored.
    #[serde(default)]
    pub shed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{prelude::*, store::Store};

    #[test]
    fn layout_ok() -> Result {
        // language=json
        let body = r#"
            {
                "HpDevices": {
                    "heater": {"name": "Heat strip", "state": "ON"},
                    "thermostat": {"name": "Thermostat", "state": "HEAT", "shed": true}
                },
                "LastShutdownTime": 1767225600.5,
                "ShutdownDueToPowerOut": true
            }
        "#;
        let state: PowerLossState = serde_json::from_str(body)?;
        assert!(state.shutdown_due_to_power_out);
        assert_eq!(state.last_shutdown_time.timestamp_millis(), 1_767_225_600_500);
        assert_eq!(state.hp_devices["heater"].state, "ON");
        assert!(!state.hp_devices["heater"].shed);
        assert!(state.hp_devices["thermostat"].shed);
        Ok(())
    }

    #[test]
    fn serializes_with_pascal_case() -> Result {
        let value = serde_json::to_value(PowerLossState::default())?;
        assert_eq!(value["ShutdownDueToPowerOut"], false);
        assert_eq!(value["LastShutdownTime"], 0.0);
        assert!(value["HpDevices"].as_object().is_some_and(serde_json::Map::is_empty));
        Ok(())
    }

    #[test]
    fn survives_restart() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("hpItems.json");
        let mut state = PowerLossState {
            last_shutdown_time: DateTime::from_timestamp(1_767_225_600, 0).unwrap(),
            shutdown_due_to_power_out: true,
            ..PowerLossState::default()
        };
        state.hp_devices.insert(
            "heater".to_string(),
            HpDeviceRecord { name: "Heat strip".to_string(), state: "ON".to_string(), shed: true },
        );
        Store::new(&path).save(&state);
        assert_eq!(Store::<PowerLossState>::new(&path).load(), state);
    }
}
