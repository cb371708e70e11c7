//! Exploration policies used to collect reward-free data.

use crate::spaces::{BoxSpace, Space};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// How actions are drawn while collecting offline data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplorationPolicy {
    /// Independent uniform actions every step
    Uniform,
    /// Repeat the previous action with probability `persistence`,
    /// otherwise draw a fresh uniform action
    Momentum { persistence: f32 },
}

impl ExplorationPolicy {
    pub fn momentum(persistence: f32) -> Self {
        Self::Momentum {
            persistence: persistence.clamp(0.0, 1.0),
        }
    }

    /// Short human-readable description stored in dataset metadata
    pub fn describe(&self) -> String {
        match self {
            Self::Uniform => "uniform".to_string(),
            Self::Momentum { persistence } => format!("momentum(p={:.2})", persistence),
        }
    }

    /// Create a seeded action sampler over `space`.
    pub fn sampler(&self, space: BoxSpace, seed: u64) -> ActionSampler {
        ActionSampler {
            policy: self.clone(),
            space,
            rng: StdRng::seed_from_u64(seed),
            last: None,
        }
    }
}

impl Default for ExplorationPolicy {
    fn default() -> Self {
        Self::momentum(0.9)
    }
}

/// Stateful sampler produced by [`ExplorationPolicy::sampler`].
pub struct ActionSampler {
    policy: ExplorationPolicy,
    space: BoxSpace,
    rng: StdRng,
    last: Option<ArrayD<f32>>,
}

impl ActionSampler {
    /// Forget the repeated action (call at episode start).
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn sample(&mut self) -> ArrayD<f32> {
        let action = match (&self.policy, &self.last) {
            (ExplorationPolicy::Momentum { persistence }, Some(last))
                if self.rng.gen::<f32>() < *persistence =>
            {
                last.clone()
            }
            _ => self.space.sample(&mut self.rng),
        };
        self.last = Some(action.clone());
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_stays_in_bounds() {
        let space = BoxSpace::symmetric(&[2], 1.0);
        let mut sampler = ExplorationPolicy::Uniform.sampler(space.clone(), 1);
        for _ in 0..200 {
            assert!(space.contains(&sampler.sample()));
        }
    }

    #[test]
    fn test_full_persistence_repeats_first_action() {
        let space = BoxSpace::symmetric(&[2], 1.0);
        let mut sampler = ExplorationPolicy::momentum(1.0).sampler(space, 5);
        let first = sampler.sample();
        for _ in 0..20 {
            assert_eq!(sampler.sample(), first);
        }
        sampler.reset();
        assert_ne!(sampler.sample(), first);
    }

    #[test]
    fn test_same_seed_same_actions() {
        let space = BoxSpace::symmetric(&[2], 1.0);
        let policy = ExplorationPolicy::momentum(0.5);
        let mut a = policy.sampler(space.clone(), 9);
        let mut b = policy.sampler(space, 9);
        for _ in 0..50 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(ExplorationPolicy::Uniform.describe(), "uniform");
        assert_eq!(ExplorationPolicy::momentum(0.9).describe(), "momentum(p=0.90)");
    }
}
