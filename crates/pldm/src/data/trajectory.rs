//! Reward-free trajectories.

use crate::{PldmError, Result};
use serde::{Deserialize, Serialize};

/// A single reward-free trajectory.
///
/// Holds `len() + 1` observations and states for `len()` actions:
/// `observations[t + 1]` is what the agent saw after taking `actions[t]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Flattened observations
    pub observations: Vec<Vec<f32>>,
    pub actions: Vec<Vec<f32>>,
    /// Low-dimensional simulator states aligned with `observations`
    pub states: Vec<Vec<f32>>,
}

impl Trajectory {
    /// Start a trajectory from the observation and state returned by `reset`.
    pub fn new(observation: Vec<f32>, state: Vec<f32>) -> Self {
        Self {
            observations: vec![observation],
            actions: Vec::new(),
            states: vec![state],
        }
    }

    /// Record one transition.
    pub fn push(&mut self, action: Vec<f32>, observation: Vec<f32>, state: Vec<f32>) {
        self.actions.push(action);
        self.observations.push(observation);
        self.states.push(state);
    }

    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Check the observation/action alignment and that every entry of a
    /// field has the same width.
    pub fn validate(&self) -> Result<()> {
        let n = self.actions.len();
        if self.observations.len() != n + 1 || self.states.len() != n + 1 {
            return Err(PldmError::DatasetError(format!(
                "trajectory has {} observations and {} states for {} actions",
                self.observations.len(),
                self.states.len(),
                n
            )));
        }
        for (name, rows) in [
            ("observation", &self.observations),
            ("action", &self.actions),
            ("state", &self.states),
        ] {
            if let Some(first) = rows.first() {
                if rows.iter().any(|r| r.len() != first.len()) {
                    return Err(PldmError::DatasetError(format!(
                        "inconsistent {} width in trajectory",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Euclidean length of the path traced by the states.
    pub fn path_length(&self) -> f32 {
        self.states
            .windows(2)
            .map(|w| {
                w[0].iter()
                    .zip(w[1].iter())
                    .map(|(a, b)| (b - a) * (b - a))
                    .sum::<f32>()
                    .sqrt()
            })
            .sum()
    }
}
