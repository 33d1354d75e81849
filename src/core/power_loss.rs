//! AC input loss detection, high-power load shedding, and ramped current restoration.

mod ramp;
pub mod state;

use std::{collections::HashMap, sync::Arc, time::Duration};

use bon::bon;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::serde_as;
use tokio::{sync::Mutex, task::JoinHandle};

pub use self::{
    ramp::{CurrentLimitConfiguration, RampedLimiter},
    state::{HpDeviceRecord, PowerLossState},
};
use crate::{
    config::HumanDuration,
    core::{
        capability::{HpActuator, WithTimeout},
        clock::{Clock, delta},
        reporter::Reporter,
    },
    prelude::*,
    quantity::Volts,
    store::Store,
};

/// State label of a switched-off device.
const OFF: &str = "OFF";

#[serde_as]
#[must_use]
#[derive(Copy, Clone, Debug, Deserialize)]
pub struct ShoreDetection {
    #[serde(default = "ShoreDetection::default_enabled")]
    pub enabled: bool,

    /// Samples at or below this voltage mean the AC input is lost.
    #[serde(default = "ShoreDetection::default_min_voltage")]
    pub min_voltage: Volts,

    /// Voltage must stay above the threshold this long before the loads are restored.
    #[serde_as(as = "HumanDuration")]
    #[serde(default = "ShoreDetection::default_restore_delay")]
    pub restore_delay: Duration,

    /// Samples are ignored this long after the start-up, while the inverter settles.
    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub startup_delay: Duration,
}

impl Default for ShoreDetection {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            min_voltage: Self::default_min_voltage(),
            restore_delay: Self::default_restore_delay(),
            startup_delay: Duration::ZERO,
        }
    }
}

impl ShoreDetection {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_min_voltage() -> Volts {
        Volts(105.0)
    }

    const fn default_restore_delay() -> Duration {
        Duration::from_secs(60)
    }

    pub fn validate(&self) -> Result {
        ensure!(self.min_voltage > Volts::ZERO, "minimum voltage must be positive");
        Ok(())
    }
}

pub struct PowerLossProtection {
    settings: ShoreDetection,
    charge_limit: Option<RampedLimiter>,
    input_limit: Option<RampedLimiter>,
    store: Store<PowerLossState>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
    request_timeout: Duration,
    started_at: DateTime<Utc>,

    /// Shared by the registration and the sampling paths.
    inner: Mutex<Inner>,
}

struct Inner {
    state: PowerLossState,
    actuators: HashMap<String, Arc<dyn HpActuator>>,
    ramps: Vec<JoinHandle<()>>,
}

#[bon]
impl PowerLossProtection {
    #[builder]
    pub fn new(
        settings: ShoreDetection,
        charge_limit: Option<RampedLimiter>,
        input_limit: Option<RampedLimiter>,
        store: Store<PowerLossState>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
        request_timeout: Duration,
    ) -> Self {
        let state = store.load();
        info!(
            n_devices = state.hp_devices.len(),
            shutdown_due_to_power_out = state.shutdown_due_to_power_out,
            "loaded the power-loss state",
        );
        let wrap = |limit: RampedLimiter| RampedLimiter {
            limiter: WithTimeout::wrap(limit.limiter, request_timeout),
            ..limit
        };
        Self {
            settings,
            charge_limit: charge_limit.map(wrap),
            input_limit: input_limit.map(wrap),
            store,
            started_at: clock.now(),
            clock,
            reporter,
            request_timeout,
            inner: Mutex::new(Inner { state, actuators: HashMap::new(), ramps: Vec::new() }),
        }
    }
}

impl PowerLossProtection {
    /// Feed an AC input voltage observation.
    #[instrument(skip_all, fields(voltage = %voltage))]
    pub async fn on_ac_sample(&self, voltage: Volts) {
        self.reporter.gauge("shore.voltage", voltage.0);
        if !self.settings.enabled {
            return;
        }
        let now = self.clock.now();
        if now < self.started_at + delta(self.settings.startup_delay) {
            debug!("still starting up, ignoring the sample");
            return;
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if voltage <= self.settings.min_voltage {
            inner.state.last_shutdown_time = now;
            if !inner.state.shutdown_due_to_power_out {
                warn!(min_voltage = %self.settings.min_voltage, "AC input is lost, shedding the loads…");
                for ramp in inner.ramps.drain(..) {
                    ramp.abort();
                }
                for limiter in self.limiters() {
                    limiter.lower().await;
                }
                Self::shed(inner).await;
                inner.state.shutdown_due_to_power_out = true;
                self.store.save(&inner.state);
            }
        } else if inner.state.shutdown_due_to_power_out
            && now > inner.state.last_shutdown_time + delta(self.settings.restore_delay)
        {
            info!("AC input is restored, bringing the loads back…");
            Self::restore(inner).await;
            inner.ramps.retain(|ramp| !ramp.is_finished());
            inner.ramps.extend(self.limiters().filter_map(RampedLimiter::spawn_ramp));
            inner.state.shutdown_due_to_power_out = false;
            self.store.save(&inner.state);
        }

        self.reporter
            .gauge("power_loss.shed", f64::from(u8::from(inner.state.shutdown_due_to_power_out)));
    }

    /// Add the device to the registry, or rebind the existing one keeping its cached state.
    #[instrument(skip_all, fields(id = id))]
    pub async fn register_hp_device(&self, id: &str, name: &str, actuator: Arc<dyn HpActuator>) {
        let actuator: Arc<dyn HpActuator> = WithTimeout::wrap(actuator, self.request_timeout);
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(record) = inner.state.hp_devices.get_mut(id) {
            debug!(name, "rebinding the device");
            name.clone_into(&mut record.name);
        } else {
            let state = actuator.state().await.unwrap_or_else(|error| {
                warn!("failed to read the initial state: {error:#}");
                String::new()
            });
            info!(name, state = %state, "registered a new device");
            let record = HpDeviceRecord { name: name.to_string(), state, shed: false };
            inner.state.hp_devices.insert(id.to_string(), record);
        }
        inner.actuators.insert(id.to_string(), actuator);
        self.store.save(&inner.state);
    }

    pub async fn status(&self) -> PowerLossState {
        self.inner.lock().await.state.clone()
    }

    fn limiters(&self) -> impl Iterator<Item = &RampedLimiter> {
        self.charge_limit.iter().chain(self.input_limit.iter())
    }

    /// Switch off every bound device that currently draws high power, remembering its state.
    async fn shed(inner: &mut Inner) {
        for (id, actuator) in &inner.actuators {
            let Some(record) = inner.state.hp_devices.get_mut(id) else {
                continue;
            };
            if !actuator.in_high_power_state().await {
                debug!(id = %id, "not in the high-power state, leaving as is");
                continue;
            }
            match actuator.state().await {
                Ok(state) => record.state = state,
                Err(error) => {
                    warn!(id = %id, "failed to read the state, skipping: {error:#}");
                    continue;
                }
            }
            record.shed = true;
            info!(id = %id, name = %record.name, from = %record.state, "switching off…");
            if let Err(error) = actuator.set_powered(false).await {
                error!(id = %id, "failed to switch off: {error:#}");
            }
        }
    }

    /// Bring the shed devices back to their cached states.
    async fn restore(inner: &mut Inner) {
        for (id, record) in inner.state.hp_devices.iter_mut().filter(|(_, record)| record.shed) {
            record.shed = false;
            if record.state == OFF {
                debug!(id = %id, "was off before the loss, leaving as is");
                continue;
            }
            let Some(actuator) = inner.actuators.get(id) else {
                warn!(id = %id, "device is not bound anymore, cannot restore");
                continue;
            };
            info!(id = %id, name = %record.name, to = %record.state, "restoring…");
            if let Err(error) = actuator.set_state(&record.state).await {
                error!(id = %id, "failed to restore: {error:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        core::{
            capability::testing::{FakeLoad, RecordingLimiter},
            clock::TokioClock,
            reporter::testing::RecordingReporter,
        },
        quantity::Amps,
    };

    const LOST: Volts = Volts(98.0);
    const PRESENT: Volts = Volts(121.0);

    struct Fixture {
        directory: TempDir,
        clock: Arc<TokioClock>,
        reporter: Arc<RecordingReporter>,
        charge_limiter: Arc<RecordingLimiter>,
        input_limiter: Arc<RecordingLimiter>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                directory: tempfile::tempdir().unwrap(),
                clock: Arc::new(TokioClock::new()),
                reporter: Arc::default(),
                charge_limiter: Arc::default(),
                input_limiter: Arc::default(),
            }
        }

        fn store(&self) -> Store<PowerLossState> {
            Store::new(self.directory.path().join("hpItems.json"))
        }

        fn protection(&self, settings: ShoreDetection) -> PowerLossProtection {
            let limits = CurrentLimitConfiguration {
                low_current_max: Amps(20.0),
                high_current_max: Amps(50.0),
                steps: 3,
                start_delay: Duration::from_secs(10),
                step_time: Duration::from_secs(5),
            };
            PowerLossProtection::builder()
                .settings(settings)
                .charge_limit(RampedLimiter { name: "charge", limiter: self.charge_limiter.clone(), limits })
                .input_limit(RampedLimiter {
                    name: "input",
                    limiter: self.input_limiter.clone(),
                    limits: CurrentLimitConfiguration { high_current_max: Amps::ZERO, ..limits },
                })
                .store(self.store())
                .clock(self.clock.clone())
                .reporter(self.reporter.clone())
                .request_timeout(Duration::from_secs(10))
                .build()
        }
    }

    async fn advance_secs(secs: u64) {
        tokio::time::advance(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn sheds_high_power_devices() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());
        let heater = FakeLoad::new("ON", &["ON"]);
        let thermostat = FakeLoad::new("GAS", &["HEAT"]);
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;
        protection.register_hp_device("thermostat", "Thermostat", thermostat.clone()).await;

        protection.on_ac_sample(LOST).await;

        assert_eq!(heater.commands(), ["OFF"]);
        assert!(thermostat.commands().is_empty());
        assert_eq!(fixture.charge_limiter.limits(), [20.0]);
        assert_eq!(fixture.input_limiter.limits(), [20.0]);
        assert_eq!(fixture.reporter.last("power_loss.shed"), Some(1.0));

        let saved = fixture.store().load();
        assert!(saved.shutdown_due_to_power_out);
        assert_eq!(saved.hp_devices["heater"].state, "ON");
        assert!(saved.hp_devices["heater"].shed);
        assert!(!saved.hp_devices["thermostat"].shed);

        // Repeated low samples do not shed again:
        protection.on_ac_sample(LOST).await;
        assert_eq!(heater.commands(), ["OFF"]);
        assert_eq!(fixture.charge_limiter.limits(), [20.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn restoration_is_debounced() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());
        let heater = FakeLoad::new("ON", &["ON"]);
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;

        protection.on_ac_sample(LOST).await;
        advance_secs(30).await;
        protection.on_ac_sample(PRESENT).await;
        assert_eq!(heater.commands(), ["OFF"]);
        assert!(protection.status().await.shutdown_due_to_power_out);

        advance_secs(31).await;
        protection.on_ac_sample(PRESENT).await;
        assert_eq!(heater.commands(), ["OFF", "ON"]);
        assert!(!protection.status().await.shutdown_due_to_power_out);

        protection.on_ac_sample(PRESENT).await;
        assert_eq!(heater.commands(), ["OFF", "ON"]);
        assert!(!fixture.store().load().shutdown_due_to_power_out);
    }

    #[tokio::test(start_paused = true)]
    async fn flicker_extends_the_debounce() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());
        let heater = FakeLoad::new("ON", &["ON"]);
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;

        protection.on_ac_sample(LOST).await;
        advance_secs(50).await;
        protection.on_ac_sample(LOST).await;
        advance_secs(20).await;
        protection.on_ac_sample(PRESENT).await;
        assert_eq!(heater.commands(), ["OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ramps_up_after_restoration() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());

        protection.on_ac_sample(LOST).await;
        advance_secs(61).await;
        protection.on_ac_sample(PRESENT).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fixture.charge_limiter.limits(), [20.0, 30.0, 40.0, 50.0]);
        // The input ramp has no high ceiling:
        assert_eq!(fixture.input_limiter.limits(), [20.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_loss_aborts_the_ramp() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());

        protection.on_ac_sample(LOST).await;
        advance_secs(61).await;
        protection.on_ac_sample(PRESENT).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        protection.on_ac_sample(LOST).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fixture.charge_limiter.limits(), [20.0, 20.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_device_is_skipped() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());
        let broken = FakeLoad::new("ON", &["ON"]);
        let heater = FakeLoad::new("ON", &["ON"]);
        protection.register_hp_device("broken", "Water heater", broken.clone()).await;
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;
        broken.set_unreadable(true);

        protection.on_ac_sample(LOST).await;

        assert!(broken.commands().is_empty());
        assert_eq!(heater.commands(), ["OFF"]);
        let status = protection.status().await;
        assert!(!status.hp_devices["broken"].shed);
        assert!(status.hp_devices["heater"].shed);
    }

    #[tokio::test(start_paused = true)]
    async fn device_off_before_the_loss_stays_off() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());
        // In the high-power set even when off, like a load that cannot report its draw:
        let pump = FakeLoad::new("OFF", &["ON", "OFF"]);
        protection.register_hp_device("pump", "Pump", pump.clone()).await;

        protection.on_ac_sample(LOST).await;
        advance_secs(61).await;
        protection.on_ac_sample(PRESENT).await;

        assert_eq!(pump.commands(), ["OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_is_idempotent() {
        let fixture = Fixture::new();
        let protection = fixture.protection(ShoreDetection::default());
        let heater = FakeLoad::new("ON", &["ON"]);
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;

        heater.set_state("AUTO").await.unwrap();
        protection.register_hp_device("heater", "Heater", heater.clone()).await;

        let status = protection.status().await;
        assert_eq!(status.hp_devices.len(), 1);
        assert_eq!(status.hp_devices["heater"].name, "Heater");
        assert_eq!(status.hp_devices["heater"].state, "ON");
        assert_eq!(fixture.store().load(), status);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_are_ignored_during_startup() {
        let fixture = Fixture::new();
        let settings = ShoreDetection { startup_delay: Duration::from_secs(120), ..ShoreDetection::default() };
        let protection = fixture.protection(settings);
        let heater = FakeLoad::new("ON", &["ON"]);
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;

        protection.on_ac_sample(LOST).await;
        assert!(heater.commands().is_empty());

        advance_secs(120).await;
        protection.on_ac_sample(LOST).await;
        assert_eq!(heater.commands(), ["OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_detection_ignores_samples() {
        let fixture = Fixture::new();
        let settings = ShoreDetection { enabled: false, ..ShoreDetection::default() };
        let protection = fixture.protection(settings);
        protection.on_ac_sample(LOST).await;
        assert!(fixture.charge_limiter.limits().is_empty());
        assert_eq!(fixture.reporter.last("shore.voltage"), Some(98.0));
    }

    #[tokio::test(start_paused = true)]
    async fn restores_after_restart() {
        let fixture = Fixture::new();
        let heater = FakeLoad::new("ON", &["ON"]);
        {
            let protection = fixture.protection(ShoreDetection::default());
            protection.register_hp_device("heater", "Heat strip", heater.clone()).await;
            protection.on_ac_sample(LOST).await;
        }

        advance_secs(300).await;
        let protection = fixture.protection(ShoreDetection::default());
        protection.register_hp_device("heater", "Heat strip", heater.clone()).await;
        protection.on_ac_sample(PRESENT).await;
        assert_eq!(heater.commands(), ["OFF", "ON"]);
    }

    #[test]
    fn settings_defaults_ok() -> Result {
        let settings: ShoreDetection = toml::from_str("")?;
        assert!(settings.enabled);
        assert_eq!(settings.min_voltage, Volts(105.0));
        assert_eq!(settings.restore_delay, Duration::from_secs(60));
        settings.validate()
    }
}
