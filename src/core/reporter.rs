use crate::prelude::*;

/// Sink for the automation gauges, injected into the controllers.
pub trait Reporter: Send + Sync {
    fn gauge(&self, name: &'static str, value: f64);
}

/// Emit the gauges as trace events, to be picked up by the log collector.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn gauge(&self, name: &'static str, value: f64) {
        debug!(name, value, "gauge");
    }
}
