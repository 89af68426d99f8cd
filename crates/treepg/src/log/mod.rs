//! Metric logging.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` for `tracing` output
//! - `MemoryLogger` for inspecting a run after the fact
//! - `CompositeLogger` for fan-out to several backends

mod console;

pub use console::ConsoleLogger;

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Trait for logging training metrics.
pub trait MetricLogger: Send + Sync {
    /// Log one named scalar at `step`.
    fn log_scalar(&self, name: &str, value: f64, step: u64);

    /// Log several scalars recorded at the same step.
    fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: u64) {
        for (name, value) in metrics {
            self.log_scalar(name, *value, step);
        }
    }

    /// Flush pending output.
    fn close(&self) {}
}

/// A logger that does nothing (default).
pub struct NoOpLogger;

impl MetricLogger for NoOpLogger {
    fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {}
}

/// Keeps every logged scalar in memory.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(String, f64, u64)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values logged under `name`, in logging order.
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|(n, _, _)| n == name)
                    .map(|(_, v, _)| *v)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl MetricLogger for MemoryLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        if let Ok(mut records) = self.records.lock() {
            records.push((name.to_string(), value, step));
        }
    }
}

/// Dispatches to multiple backends.
pub struct CompositeLogger {
    loggers: Vec<Box<dyn MetricLogger>>,
}

impl CompositeLogger {
    pub fn new(loggers: Vec<Box<dyn MetricLogger>>) -> Self {
        Self { loggers }
    }

    pub fn add(&mut self, logger: Box<dyn MetricLogger>) {
        self.loggers.push(logger);
    }
}

impl MetricLogger for CompositeLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        for logger in &self.loggers {
            logger.log_scalar(name, value, step);
        }
    }

    fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: u64) {
        for logger in &self.loggers {
            logger.log_metrics(metrics, step);
        }
    }

    fn close(&self) {
        for logger in &self.loggers {
            logger.close();
        }
    }
}

impl<T: MetricLogger + ?Sized> MetricLogger for std::sync::Arc<T> {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        (**self).log_scalar(name, value, step)
    }

    fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: u64) {
        (**self).log_metrics(metrics, step)
    }

    fn close(&self) {
        (**self).close()
    }
}
