//! Console logging backend.

use super::{MetricLogger, Metrics};

/// Logger that prints metrics via tracing, one line per step.
#[derive(Default)]
pub struct ConsoleLogger {
    prefix: Option<String>,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` (e.g. "train") to every line.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn format_line(&self, metrics: &Metrics, step: u64) -> String {
        let body = metrics
            .iter()
            .map(|(k, v)| format!("{}={:.4}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        match &self.prefix {
            Some(p) => format!("[{}] step {}: {}", p, step, body),
            None => format!("step {}: {}", step, body),
        }
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!(step, metric = name, value, "{}", self.prefix.as_deref().unwrap_or(""));
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        // Group output to avoid spamming lines
        tracing::info!("{}", self.format_line(metrics, step));
    }
}
