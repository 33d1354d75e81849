use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of wall-clock time for the automations.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert a configured duration into a timestamp offset, saturating on overflow.
#[must_use]
pub fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Wall clock driven by the Tokio timer, so that paused tests can advance it together with sleeps.
#[cfg(test)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started_at: tokio::time::Instant,
}

#[cfg(test)]
impl TokioClock {
    /// 2026-01-01T00:00:00Z.
    pub const ORIGIN_TIMESTAMP: i64 = 1_767_225_600;

    pub fn new() -> Self {
        Self {
            origin: DateTime::from_timestamp(Self::ORIGIN_TIMESTAMP, 0).unwrap(),
            started_at: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.origin + delta(self.started_at.elapsed())
    }
}
