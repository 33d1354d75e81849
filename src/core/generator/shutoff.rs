use chrono::{DateTime, Utc};

use crate::{
    core::{capability::Telemetry, clock::delta, generator::AutomationParameters},
    prelude::*,
};

/// Decide whether a generator started at `started_at` should be stopped now.
///
/// Unavailable telemetry counts as a reason to stop: running the generator unmonitored is worse
/// than stopping it needlessly. Telemetry is only read once the minimum run time has passed.
pub async fn should_shut_off(
    parameters: &AutomationParameters,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    telemetry: &dyn Telemetry,
) -> bool {
    if now < started_at + delta(parameters.min_on) {
        return false;
    }
    let running_for = now - started_at;
    if !parameters.max_on.is_zero() && now > started_at + delta(parameters.max_on) {
        info!(running_for_secs = running_for.num_seconds(), "maximum run time exceeded");
        return true;
    }
    let Some(state_of_charge) = telemetry.state_of_charge().await else {
        warn!("state of charge is unavailable");
        return true;
    };
    if state_of_charge > parameters.high_value {
        info!(%state_of_charge, high_value = %parameters.high_value, "battery is charged");
        return true;
    }
    let Some(battery_current) = telemetry.battery_current().await else {
        warn!("battery current is unavailable");
        return true;
    };
    if battery_current < parameters.min_charge_current {
        info!(
            %battery_current,
            min_charge_current = %parameters.min_charge_current,
            "generator is not charging the battery anymore",
        );
        return true;
    }
    false
}
