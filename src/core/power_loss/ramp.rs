use std::{iter, sync::Arc, time::Duration};

use serde::Deserialize;
use serde_with::serde_as;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    config::HumanDuration,
    core::capability::CurrentLimiter,
    prelude::*,
    quantity::Amps,
};

/// Low and high current ceilings, and how to step from the former to the latter.
#[serde_as]
#[must_use]
#[derive(Copy, Clone, Debug, Default, Deserialize)]
pub struct CurrentLimitConfiguration {
    /// Ceiling while the AC input is lost. Zero leaves the limiter untouched.
    #[serde(default)]
    pub low_current_max: Amps,

    /// Ceiling to ramp up to after the restoration. Zero disables the ramp.
    #[serde(default)]
    pub high_current_max: Amps,

    #[serde(default)]
    pub steps: u32,

    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub start_delay: Duration,

    #[serde_as(as = "HumanDuration")]
    #[serde(default)]
    pub step_time: Duration,
}

impl CurrentLimitConfiguration {
    /// Zero steps behave as one.
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps.max(1)
    }

    /// Increment per step, rounded to whole amps.
    pub fn step_value(&self) -> Amps {
        ((self.high_current_max - self.low_current_max) / f64::from(self.steps())).round()
    }

    /// Intermediate targets, and then exactly the high ceiling.
    pub fn targets(&self) -> impl Iterator<Item = Amps> {
        let (low, step_value) = (self.low_current_max, self.step_value());
        (1..self.steps())
            .map(move |step| low + step_value * f64::from(step))
            .chain(iter::once(self.high_current_max))
    }

    pub fn validate(&self) -> Result {
        ensure!(
            self.low_current_max >= Amps::ZERO && self.high_current_max >= Amps::ZERO,
            "current ceilings must not be negative",
        );
        Ok(())
    }
}

/// Current limiter together with its ceilings.
pub struct RampedLimiter {
    pub name: &'static str,
    pub limiter: Arc<dyn CurrentLimiter>,
    pub limits: CurrentLimitConfiguration,
}

impl RampedLimiter {
    /// Drop to the low ceiling, when one is configured.
    #[instrument(skip_all, fields(limiter = self.name))]
    pub async fn lower(&self) {
        let limit = self.limits.low_current_max;
        if limit.is_zero() {
            debug!("no low ceiling, skipping");
            return;
        }
        info!(%limit, "lowering the current limit…");
        if let Err(error) = self.limiter.set_limit(limit).await {
            error!("failed to lower the current limit: {error:#}");
        }
    }

    /// Spawn the ramp towards the high ceiling, when one is configured.
    pub fn spawn_ramp(&self) -> Option<JoinHandle<()>> {
        if self.limits.high_current_max.is_zero() {
            debug!(limiter = self.name, "no high ceiling, not ramping");
            return None;
        }
        Some(tokio::spawn(ramp(self.name, self.limiter.clone(), self.limits)))
    }
}

#[instrument(skip_all, fields(limiter = name))]
async fn ramp(name: &'static str, limiter: Arc<dyn CurrentLimiter>, limits: CurrentLimitConfiguration) {
    let steps = limits.steps();
    sleep(limits.start_delay).await;
    for (step, target) in (1..=steps).zip(limits.targets()) {
        sleep(limits.step_time).await;
        info!(step, steps, %target, "ramping the current limit…");
        if let Err(error) = limiter.set_limit(target).await {
            warn!(step, "failed to set the current limit: {error:#}");
        }
    }
    info!("ramp completed");
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::core::capability::testing::RecordingLimiter;

    fn limits(low: f64, high: f64, steps: u32) -> CurrentLimitConfiguration {
        CurrentLimitConfiguration {
            low_current_max: Amps(low),
            high_current_max: Amps(high),
            steps,
            start_delay: Duration::from_secs(10),
            step_time: Duration::from_secs(5),
        }
    }

    #[test]
    fn targets_ok() {
        let targets: Vec<f64> = limits(20.0, 50.0, 3).targets().map(|target| target.0).collect();
        assert_eq!(targets, [30.0, 40.0, 50.0]);
    }

    #[test]
    fn rounded_step_still_ends_at_high() {
        let limits = limits(6.0, 16.0, 3);
        assert_abs_diff_eq!(limits.step_value().0, 3.0);
        let targets: Vec<f64> = limits.targets().map(|target| target.0).collect();
        assert_eq!(targets, [9.0, 12.0, 16.0]);
    }

    #[test]
    fn zero_steps_jump_to_high() {
        let limits = limits(20.0, 50.0, 0);
        assert_eq!(limits.steps(), 1);
        assert_eq!(limits.targets().collect::<Vec<_>>(), [Amps(50.0)]);
    }

    #[test]
    fn negative_ceiling_is_rejected() {
        assert!(limits(-1.0, 50.0, 3).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_is_paced() {
        let recorder = Arc::new(RecordingLimiter::default());
        let limiter = RampedLimiter { name: "charge", limiter: recorder.clone(), limits: limits(20.0, 50.0, 3) };
        let handle = limiter.spawn_ramp().unwrap();

        sleep(Duration::from_secs(16)).await;
        assert_eq!(recorder.limits(), [30.0]);

        handle.await.unwrap();
        assert_eq!(recorder.limits(), [30.0, 40.0, 50.0]);
    }

    #[tokio::test]
    async fn zero_ceilings_do_nothing() {
        let recorder = Arc::new(RecordingLimiter::default());
        let limiter = RampedLimiter { name: "input", limiter: recorder.clone(), limits: limits(0.0, 0.0, 3) };
        limiter.lower().await;
        assert!(limiter.spawn_ramp().is_none());
        assert!(recorder.limits().is_empty());
    }
}
