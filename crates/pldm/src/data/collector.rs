//! Parallel collection of offline datasets.
//!
//! Runs environments in parallel using rayon. Every episode is reset with
//! its own seed, so the collected dataset does not depend on scheduling.

use super::{DatasetMetadata, ExplorationPolicy, OfflineDataset, Trajectory};
use crate::env::PldmEnv;
use crate::spaces::Space;
use crate::utils::mix_seed;
use crate::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Collection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Name stored in the dataset metadata
    pub env_name: String,
    pub num_episodes: usize,
    /// Steps per episode (shorter if the environment ends the episode)
    pub episode_len: usize,
    pub seed: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            env_name: "wall".to_string(),
            num_episodes: 1000,
            episode_len: 100,
            seed: 0,
        }
    }
}

/// Rolls an exploration policy to build an [`OfflineDataset`].
pub struct DataCollector {
    config: CollectorConfig,
}

impl DataCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Collect `num_episodes` trajectories, creating one environment per
    /// rayon worker with `make_env`.
    pub fn collect<E, F>(&self, make_env: F, policy: &ExplorationPolicy) -> Result<OfflineDataset>
    where
        E: PldmEnv,
        F: Fn() -> E + Send + Sync,
    {
        let probe = make_env();
        let obs_shape = probe.observation_space().shape().to_vec();
        let action_dim = probe.action_space().num_elements();
        drop(probe);

        let mut metadata = DatasetMetadata::new(&self.config.env_name, obs_shape, action_dim);
        metadata.policy = policy.describe();
        metadata.seed = self.config.seed;

        tracing::info!(
            env = %self.config.env_name,
            episodes = self.config.num_episodes,
            episode_len = self.config.episode_len,
            policy = %metadata.policy,
            "Collecting offline data"
        );

        let base_seed = self.config.seed;
        let episode_len = self.config.episode_len;
        let trajectories: Vec<Trajectory> = (0..self.config.num_episodes)
            .into_par_iter()
            .map_init(&make_env, |env, episode| {
                let seed = base_seed.wrapping_add(episode as u64);
                rollout(env, policy, seed, episode_len)
            })
            .collect();

        let mut dataset = OfflineDataset::new(metadata);
        for traj in trajectories {
            dataset.add_trajectory(traj)?;
        }

        tracing::info!(
            trajectories = dataset.num_trajectories(),
            transitions = dataset.num_transitions(),
            "Collection complete"
        );
        Ok(dataset)
    }
}

/// Run one episode of at most `episode_len` steps.
pub fn rollout<E: PldmEnv>(
    env: &mut E,
    policy: &ExplorationPolicy,
    seed: u64,
    episode_len: usize,
) -> Trajectory {
    let (obs, _) = env.reset(Some(seed));
    let mut traj = Trajectory::new(obs.iter().copied().collect(), env.state());
    // Separate stream so action noise is not correlated with the env's own RNG
    let mut sampler = policy.sampler(env.action_space(), mix_seed(seed, 1));

    for _ in 0..episode_len {
        let action = sampler.sample();
        let result = env.step(&action);
        traj.push(
            action.iter().copied().collect(),
            result.observation.iter().copied().collect(),
            env.state(),
        );
        if result.done() {
            break;
        }
    }
    traj
}
