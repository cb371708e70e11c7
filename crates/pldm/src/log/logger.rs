//! Metric logger traits and composites.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Named scalar metrics, ordered by name so output is stable.
pub type Metrics = BTreeMap<String, f64>;

/// Trait for logging metrics to various backends.
pub trait MetricLogger: Send + Sync {
    /// Log a scalar value (e.g. a loss component).
    fn log_scalar(&self, name: &str, value: f64, step: u64);

    /// Log a group of metrics recorded at the same step.
    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        for (name, value) in metrics {
            self.log_scalar(name, *value, step);
        }
    }

    /// Close the logger and flush any pending writes.
    fn close(&self) {}
}

/// A logger that does nothing (default).
pub struct NoOpLogger;

impl MetricLogger for NoOpLogger {
    fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {}
    fn log_metrics(&self, _metrics: &Metrics, _step: u64) {}
}

/// Dispatches every call to each of its backends.
#[derive(Default)]
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

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricLogger for CompositeLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        for logger in &self.loggers {
            logger.log_scalar(name, value, step);
        }
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
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

/// Keeps every logged value in memory.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(String, f64, u64)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(step, value)` pairs logged under `name`, in order.
    pub fn series(&self, name: &str) -> Vec<(u64, f64)> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|(n, _, _)| n == name)
                    .map(|(_, v, s)| (*s, *v))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recent value logged under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.series(name).last().map(|(_, v)| *v)
    }
}

impl MetricLogger for MemoryLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        if let Ok(mut records) = self.records.lock() {
            records.push((name.to_string(), value, step));
        }
    }
}

impl<L: MetricLogger + ?Sized> MetricLogger for std::sync::Arc<L> {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        (**self).log_scalar(name, value, step)
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        (**self).log_metrics(metrics, step)
    }

    fn close(&self) {
        (**self).close()
    }
}
