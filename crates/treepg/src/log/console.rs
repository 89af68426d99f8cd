//! Console logging backend.

use super::MetricLogger;
use std::collections::BTreeMap;

/// Logger that reports metrics through `tracing`.
#[derive(Default)]
pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("Step {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: u64) {
        let line = metrics
            .iter()
            .map(|(name, value)| format!("{}={:.4}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!("Step {}: {}", step, line);
    }
}
