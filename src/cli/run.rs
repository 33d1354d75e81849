use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio::{
    task::{JoinError, JoinSet},
    time::{MissedTickBehavior, interval},
};

use crate::{
    api::{
        openevse,
        openhab::{self, HpItem, ItemTelemetry, LimitItem, NumberItem, SwitchItem},
    },
    cli::StateArgs,
    config::{
        Config,
        EvseConfig,
        GeneratorConfig,
        HpDeviceConfig,
        LimiterConfig,
        ShoreDetectionConfig,
    },
    core::{
        capability::CurrentLimiter,
        clock::{Clock, SystemClock},
        generator::{GeneratorAutomation, SettleLimit},
        power_loss::{PowerLossProtection, RampedLimiter},
        reporter::{Reporter, TracingReporter},
        shutdown::{self, Shutdown},
    },
    prelude::*,
    server::{self, AppState},
};

#[derive(Parser)]
pub struct RunArgs {
    /// TOML configuration file.
    #[clap(long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,

    #[clap(flatten)]
    state: StateArgs,

    /// Control API address.
    #[clap(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,
}

impl RunArgs {
    pub async fn run(self) -> Result {
        let config = Config::read_from(&self.config)?;
        let openhab = Arc::new(openhab::Client::new(config.openhab.url()?, config.request_timeout)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter);

        let charge_limiter = limiter(&openhab, &config.charge_limit);
        let input_limiter = limiter(&openhab, &config.input_limit);

        let generator = config.generator.map(|generator_config| {
            let limit = config.charge_limit.limits.low_current_max;
            let settle_limit = charge_limiter
                .clone()
                .filter(|_| !limit.is_zero())
                .map(|limiter| SettleLimit { limiter, limit });
            Arc::new(
                GeneratorAutomation::builder()
                    .parameters(generator_config.parameters)
                    .telemetry(Arc::new(telemetry(&openhab, &generator_config)))
                    .generator(Arc::new(switch(&openhab, generator_config)))
                    .maybe_settle_limit(settle_limit)
                    .store(self.state.generator_store())
                    .clock(clock.clone())
                    .reporter(reporter.clone())
                    .request_timeout(config.request_timeout)
                    .build(),
            )
        });

        let power_loss = match &config.shore_detection {
            Some(shore_detection) => {
                let protection = PowerLossProtection::builder()
                    .settings(shore_detection.settings)
                    .maybe_charge_limit(charge_limiter.map(|limiter| RampedLimiter {
                        name: "charge",
                        limiter,
                        limits: config.charge_limit.limits,
                    }))
                    .maybe_input_limit(input_limiter.map(|limiter| RampedLimiter {
                        name: "input",
                        limiter,
                        limits: config.input_limit.limits,
                    }))
                    .store(self.state.power_loss_store())
                    .clock(clock)
                    .reporter(reporter)
                    .request_timeout(config.request_timeout)
                    .build();
                let protection = Arc::new(protection);
                register_hp_devices(
                    &protection,
                    &openhab,
                    &config.hp_devices,
                    config.evse.as_ref(),
                    config.request_timeout,
                )
                .await?;
                Some(protection)
            }
            None => {
                if !config.hp_devices.is_empty() || config.evse.is_some() {
                    warn!("high-power devices are configured, but the shore detection is not");
                }
                None
            }
        };

        let (trigger, shutdown) = shutdown::channel();
        let mut tasks = JoinSet::new();
        if let Some(generator) = &generator {
            let (generator, shutdown) = (generator.clone(), shutdown.clone());
            tasks.spawn(async move {
                generator.run(shutdown).await;
                Ok(())
            });
        }
        if let (Some(protection), Some(shore_detection)) = (&power_loss, config.shore_detection) {
            let voltage = NumberItem::new(openhab.clone(), shore_detection.voltage_item.clone());
            tasks.spawn(poll_voltage(voltage, protection.clone(), shore_detection, shutdown.clone()));
        }
        {
            let state = AppState { generator, power_loss };
            let bind_address = self.bind_address.clone();
            tasks.spawn(async move { server::serve(&bind_address, state, shutdown).await });
        }

        let outcome = tokio::select! {
            result = shutdown::signal() => result,
            Some(result) = tasks.join_next() => {
                flatten(result).and_then(|()| Err(anyhow!("a task has stopped unexpectedly")))
            }
        };
        trigger.trigger();
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = flatten(result) {
                error!("task has failed: {error:#}");
            }
        }
        outcome
    }
}

fn flatten(result: Result<Result, JoinError>) -> Result {
    result.context("the task has panicked")?
}

fn limiter(
    openhab: &Arc<openhab::Client>,
    config: &LimiterConfig,
) -> Option<Arc<dyn CurrentLimiter>> {
    let item = config.item.clone()?;
    Some(Arc::new(LimitItem::new(openhab.clone(), item)))
}

fn telemetry(openhab: &Arc<openhab::Client>, config: &GeneratorConfig) -> ItemTelemetry {
    ItemTelemetry {
        state_of_charge: NumberItem::new(openhab.clone(), config.state_of_charge_item.clone()),
        battery_current: NumberItem::new(openhab.clone(), config.battery_current_item.clone()),
    }
}

fn switch(openhab: &Arc<openhab::Client>, config: GeneratorConfig) -> SwitchItem {
    SwitchItem::new(openhab.clone(), config.switch_item, config.state_item, config.running_states)
}

#[instrument(skip_all)]
async fn register_hp_devices(
    protection: &PowerLossProtection,
    openhab: &Arc<openhab::Client>,
    hp_devices: &[HpDeviceConfig],
    evse: Option<&EvseConfig>,
    request_timeout: Duration,
) -> Result {
    for device in hp_devices {
        let item =
            HpItem::new(openhab.clone(), device.item.clone(), device.high_power_states.clone());
        protection.register_hp_device(&device.id, &device.name, Arc::new(item)).await;
    }
    if let Some(evse) = evse {
        let client = openevse::Client::new(evse.url()?, evse.enable_control, request_timeout)?;
        protection.register_hp_device(&evse.id, &evse.name, Arc::new(client)).await;
    }
    Ok(())
}

/// Sample the AC input voltage and feed it to the power-loss protection.
#[instrument(skip_all, fields(item = %config.voltage_item))]
async fn poll_voltage(
    voltage: NumberItem,
    protection: Arc<PowerLossProtection>,
    config: ShoreDetectionConfig,
    mut shutdown: Shutdown,
) -> Result {
    info!(poll_interval = ?config.poll_interval, "starting the shore detection…");
    let mut interval = interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.requested() => break,
            _ = interval.tick() => {
                if let Some(voltage) = voltage.read_voltage().await {
                    protection.on_ac_sample(voltage).await;
                }
            }
        }
    }
    info!("shore detection stopped");
    Ok(())
}
