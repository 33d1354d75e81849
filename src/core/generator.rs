//! Generator auto-start and auto-stop driven by the battery state of charge.

mod shutoff;
pub mod state;

use std::{sync::Arc, time::Duration};

use bon::bon;
use chrono::{DateTime, Utc};
use humantime::format_duration;
use serde::Serialize;
use tokio::{
    sync::Mutex,
    time::{MissedTickBehavior, interval, sleep},
};

pub use self::{
    shutoff::should_shut_off,
    state::{AutomationParameters, AutomationState},
};
use crate::{
    core::{
        capability::{Actuator, CurrentLimiter, Telemetry, WithTimeout},
        clock::{Clock, delta},
        reporter::Reporter,
        shutdown::Shutdown,
    },
    prelude::*,
    quantity::Amps,
    store::Store,
};

/// Charge current limit to apply before a manual stop, so that the generator is unloaded first.
pub struct SettleLimit {
    pub limiter: Arc<dyn CurrentLimiter>,
    pub limit: Amps,
}

pub struct GeneratorAutomation {
    parameters: AutomationParameters,
    telemetry: Arc<dyn Telemetry>,
    generator: Arc<dyn Actuator>,
    settle_limit: Option<SettleLimit>,
    store: Store<AutomationState>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,

    /// Serializes the read-decide-mutate-persist sequences of the tick loop and manual triggers.
    state: Mutex<AutomationState>,
}

#[bon]
impl GeneratorAutomation {
    #[builder]
    pub fn new(
        parameters: AutomationParameters,
        telemetry: Arc<dyn Telemetry>,
        generator: Arc<dyn Actuator>,
        settle_limit: Option<SettleLimit>,
        store: Store<AutomationState>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
        request_timeout: Duration,
    ) -> Self {
        let state = store.load();
        info!(
            triggered = state.triggered,
            last_started = %state.last_started,
            last_stopped = %state.last_stopped,
            "loaded the generator automation state",
        );
        Self {
            parameters,
            telemetry: WithTimeout::wrap(telemetry, request_timeout),
            generator: WithTimeout::wrap(generator, request_timeout),
            settle_limit: settle_limit.map(|settle_limit| SettleLimit {
                limiter: WithTimeout::wrap(settle_limit.limiter, request_timeout),
                limit: settle_limit.limit,
            }),
            store,
            clock,
            reporter,
            state: Mutex::new(state),
        }
    }
}

impl GeneratorAutomation {
    pub const TICK_PERIOD: Duration = Duration::from_secs(10);

    /// Pause between lowering the charge current and stopping the generator manually.
    pub const SETTLE_DELAY: Duration = Duration::from_secs(30);

    /// Tick until the shutdown is requested.
    pub async fn run(&self, mut shutdown: Shutdown) {
        info!(parameters = ?self.parameters, "starting the generator automation…");
        let mut interval = interval(Self::TICK_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.requested() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        info!("generator automation stopped");
    }

    /// Sample the battery and start or stop the generator when needed.
    #[instrument(skip_all)]
    pub async fn tick(&self) {
        let mut state = self.state.lock().await;

        let Some(state_of_charge) = self.telemetry.state_of_charge().await else {
            debug!("state of charge is unavailable, skipping");
            return;
        };
        self.reporter.gauge("battery.state_of_charge", state_of_charge.0);

        if state_of_charge < self.parameters.low_value {
            self.start_on_low_battery(&mut state, state_of_charge.0).await;
        } else if state.triggered
            && should_shut_off(
                &self.parameters,
                state.last_started,
                self.clock.now(),
                self.telemetry.as_ref(),
            )
            .await
        {
            self.stop_after_charging(&mut state).await;
        }

        self.reporter.gauge("generator.automation_triggered", f64::from(u8::from(state.triggered)));
    }

    async fn start_on_low_battery(&self, state: &mut AutomationState, state_of_charge: f64) {
        match self.generator.is_powered().await {
            Ok(true) => {
                if !state.triggered {
                    info!("generator is already running, skipping the start");
                }
                return;
            }
            Ok(false) => {}
            Err(error) => {
                warn!("failed to read the generator state, skipping: {error:#}");
                return;
            }
        }

        let now = self.clock.now();
        if !self.parameters.cool_down.is_zero() {
            let cool_down_until = state.last_stopped + delta(self.parameters.cool_down);
            if now < cool_down_until {
                info!(%cool_down_until, "cool-down has not finished yet");
                return;
            }
        }

        info!(state_of_charge, low_value = %self.parameters.low_value, "battery is low, starting the generator…");
        if let Err(error) = self.generator.set_powered(true).await {
            error!("failed to start the generator: {error:#}");
            return;
        }
        state.triggered = true;
        state.last_started = now;
        self.store.save(state);
    }

    async fn stop_after_charging(&self, state: &mut AutomationState) {
        let off_delay = self.parameters.off_delay;
        if !off_delay.is_zero() {
            info!(off_delay = %format_duration(off_delay), "waiting before stopping the generator…");
            sleep(off_delay).await;
        }
        info!("stopping the generator…");
        if let Err(error) = self.generator.set_powered(false).await {
            // Stay triggered, so that the next tick retries the stop.
            error!("failed to stop the generator: {error:#}");
            return;
        }
        state.last_stopped = self.clock.now();
        state.triggered = false;
        self.store.save(state);
    }

    /// Manual trigger: start the generator, or adopt the one that is already running.
    ///
    /// The cool-down does not apply here.
    #[instrument(skip_all)]
    pub async fn start_auto_charge(&self) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        match self.generator.is_powered().await {
            Ok(true) if state.triggered => {
                info!("automation is already running");
                return;
            }
            Ok(true) => {
                info!("generator is already running, adopting it");
            }
            Ok(false) | Err(_) => {
                info!("starting the generator from the manual trigger…");
                if let Err(error) = self.generator.set_powered(true).await {
                    error!("failed to start the generator: {error:#}");
                    return;
                }
            }
        }

        state.triggered = true;
        state.last_started = now;
        self.store.save(&state);
    }

    /// Manual trigger: stop the generator if it is running and release the automation.
    #[instrument(skip_all)]
    pub async fn stop_auto_charge(&self) {
        let mut state = self.state.lock().await;

        let is_powered = self.generator.is_powered().await.unwrap_or_else(|error| {
            warn!("failed to read the generator state, assuming it is running: {error:#}");
            true
        });
        if is_powered {
            if let Some(settle_limit) = &self.settle_limit {
                info!(
                    limit = %settle_limit.limit,
                    delay = %format_duration(Self::SETTLE_DELAY),
                    "lowering the charge current before stopping…",
                );
                if let Err(error) = settle_limit.limiter.set_limit(settle_limit.limit).await {
                    warn!("failed to lower the charge current: {error:#}");
                }
                sleep(Self::SETTLE_DELAY).await;
            }
            info!("stopping the generator from the manual trigger…");
            match self.generator.set_powered(false).await {
                Ok(()) => state.last_stopped = self.clock.now(),
                Err(error) => error!("failed to stop the generator: {error:#}"),
            }
        } else {
            info!("generator is already stopped, skipping");
        }

        state.triggered = false;
        self.store.save(&state);
    }

    pub async fn is_automation_running(&self) -> bool {
        self.state.lock().await.triggered
    }

    pub async fn status(&self) -> GeneratorStatus {
        let state = *self.state.lock().await;
        GeneratorStatus::new(&self.parameters, state, self.clock.now())
    }
}

/// Where the automation currently is in its start-run-cool-down cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Running,
    CoolDown,
}

#[must_use]
#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStatus {
    pub phase: Phase,
    pub triggered: bool,
    pub last_started: DateTime<Utc>,
    pub last_stopped: DateTime<Utc>,
}

impl GeneratorStatus {
    pub fn new(parameters: &AutomationParameters, state: AutomationState, now: DateTime<Utc>) -> Self {
        let phase = if state.triggered {
            Phase::Running
        } else if !parameters.cool_down.is_zero()
            && now < state.last_stopped + delta(parameters.cool_down)
        {
            Phase::CoolDown
        } else {
            Phase::Idle
        };
        Self {
            phase,
            triggered: state.triggered,
            last_started: state.last_started,
            last_stopped: state.last_stopped,
        }
    }
}
