//! Checkpoint state and trait definitions.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Trait for components that can be checkpointed.
///
/// # Example
///
/// ```ignore
/// impl Checkpointable for MyModel {
///     fn save_state(&self) -> Result<Vec<u8>> {
///         Ok(serde_json::to_vec(&self.params)?)
///     }
///
///     fn load_state(&mut self, data: &[u8]) -> Result<()> {
///         self.params = serde_json::from_slice(data)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Checkpointable {
    /// Serialize the component's state to bytes.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore the component's state from bytes.
    fn load_state(&mut self, data: &[u8]) -> Result<()>;
}

/// Loss and evaluation snapshot stored with a checkpoint.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CheckpointMetrics {
    pub total_loss: f64,
    pub sim_loss: f64,
    pub var_loss: f64,
    pub cov_loss: f64,
    pub time_loss: f64,
    pub idm_loss: f64,
    /// Success rate of the last evaluation, if one was run
    #[serde(default)]
    pub success_rate: Option<f64>,
}

/// Metadata written as `<checkpoint>.json` beside the weight file.
///
/// Holds everything needed to rebuild the model before loading weights.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckpointState {
    /// Training epoch number
    pub epoch: u64,
    /// Optimizer steps taken so far
    pub global_step: u64,
    /// Which model the weights belong to ("pldm", "gcbc")
    pub method: String,
    pub metrics: CheckpointMetrics,
    /// Full training configuration
    #[serde(default)]
    pub config: serde_json::Value,
    /// Model-specific data such as dataset shapes and normalizer statistics
    #[serde(default)]
    pub extra: serde_json::Value,
    /// Seconds since the Unix epoch
    pub timestamp: String,
    pub version: String,
}

impl CheckpointState {
    pub fn new(epoch: u64, global_step: u64, method: &str, metrics: CheckpointMetrics) -> Self {
        Self {
            epoch,
            global_step,
            method: method.to_string(),
            metrics,
            config: serde_json::Value::Null,
            extra: serde_json::Value::Null,
            timestamp: unix_timestamp(),
            version: crate::VERSION.to_string(),
        }
    }

    pub fn with_config<C: Serialize>(mut self, config: &C) -> Result<Self> {
        self.config = serde_json::to_value(config)?;
        Ok(self)
    }

    pub fn with_extra<E: Serialize>(mut self, extra: &E) -> Result<Self> {
        self.extra = serde_json::to_value(extra)?;
        Ok(self)
    }
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}
