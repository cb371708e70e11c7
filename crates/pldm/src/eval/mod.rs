//! Goal-reaching evaluation.
//!
//! Runs a [`GoalPolicy`] for a number of seeded episodes and aggregates
//! success rate, final distance and episode length.

use crate::env::GoalEnv;
use crate::planning::GoalPolicy;
use crate::{PldmError, Result};
use serde::{Deserialize, Serialize};

/// Evaluation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub episodes: usize,
    /// Episode `i` is reset with `base_seed + i`
    pub base_seed: u64,
    /// Hard cap on steps, on top of the environment's own time limit
    pub max_steps: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            episodes: std::env::var("PLDM_EVAL_EPISODES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            base_seed: 1000,
            max_steps: 500,
        }
    }
}

/// Outcome of one evaluation episode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    pub seed: u64,
    pub success: bool,
    pub final_distance: f32,
    pub length: usize,
}

/// Aggregated evaluation results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub policy: String,
    pub success_rate: f32,
    pub mean_final_distance: f32,
    pub mean_episode_length: f32,
    pub episodes: Vec<EpisodeOutcome>,
}

impl EvalReport {
    fn from_outcomes(policy: &str, episodes: Vec<EpisodeOutcome>) -> Self {
        let n = episodes.len().max(1) as f32;
        let successes = episodes.iter().filter(|e| e.success).count() as f32;
        Self {
            policy: policy.to_string(),
            success_rate: successes / n,
            mean_final_distance: episodes.iter().map(|e| e.final_distance).sum::<f32>() / n,
            mean_episode_length: episodes.iter().map(|e| e.length as f32).sum::<f32>() / n,
            episodes,
        }
    }
}

pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Run `config.episodes` episodes of `policy` in `env`.
    pub fn run<E: GoalEnv + ?Sized>(
        &self,
        env: &mut E,
        policy: &mut dyn GoalPolicy,
    ) -> Result<EvalReport> {
        if self.config.episodes == 0 {
            return Err(PldmError::ConfigError(
                "evaluation needs at least one episode".into(),
            ));
        }

        let mut outcomes = Vec::with_capacity(self.config.episodes);
        for i in 0..self.config.episodes {
            let seed = self.config.base_seed.wrapping_add(i as u64);
            let outcome = self.run_episode(env, policy, seed)?;
            tracing::debug!(
                episode = i,
                seed,
                success = outcome.success,
                distance = outcome.final_distance,
                length = outcome.length,
                "episode finished"
            );
            outcomes.push(outcome);
        }

        let report = EvalReport::from_outcomes(policy.name(), outcomes);
        tracing::info!(
            policy = %report.policy,
            episodes = report.episodes.len(),
            success_rate = report.success_rate,
            mean_distance = report.mean_final_distance,
            mean_length = report.mean_episode_length,
            "Evaluation complete"
        );
        Ok(report)
    }

    fn run_episode<E: GoalEnv + ?Sized>(
        &self,
        env: &mut E,
        policy: &mut dyn GoalPolicy,
        seed: u64,
    ) -> Result<EpisodeOutcome> {
        let (mut obs, _) = env.reset(Some(seed));
        let goal = env.goal_observation();
        policy.reset();

        let mut length = 0;
        let mut success = env.is_success();
        while !success && length < self.config.max_steps {
            let action = policy.act(&obs, &goal)?;
            let result = env.step(&action);
            length += 1;
            success = env.is_success();
            let done = result.done();
            obs = result.observation;
            if done {
                break;
            }
        }

        Ok(EpisodeOutcome {
            seed,
            success,
            final_distance: env.distance_to_goal(),
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvInfo, PldmEnv, StepResult};
    use crate::planning::{MppiPlanner, PlannerConfig, PlanningAgent, RandomPolicy, WorldModel};
    use crate::spaces::BoxSpace;
    use ndarray::{Array2, ArrayD, IxDyn};

    /// Open plane with the goal at distance `seed % 5 + 2` along x.
    struct Plane {
        pos: [f32; 2],
        goal: [f32; 2],
        steps: usize,
    }

    impl Plane {
        fn new() -> Self {
            Self {
                pos: [0.0; 2],
                goal: [0.0; 2],
                steps: 0,
            }
        }

        fn obs(p: [f32; 2]) -> ArrayD<f32> {
            ArrayD::from_shape_vec(IxDyn(&[2]), p.to_vec()).unwrap()
        }
    }

    impl PldmEnv for Plane {
        fn observation_space(&self) -> BoxSpace {
            BoxSpace::uniform(&[2], -50.0, 50.0)
        }

        fn action_space(&self) -> BoxSpace {
            BoxSpace::symmetric(&[2], 1.0)
        }

        fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
            self.pos = [0.0; 2];
            self.goal = [(seed.unwrap_or(0) % 5 + 2) as f32, 0.0];
            self.steps = 0;
            (Self::obs(self.pos), EnvInfo::new())
        }

        fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
            self.pos[0] += action[[0]].clamp(-1.0, 1.0);
            self.pos[1] += action[[1]].clamp(-1.0, 1.0);
            self.steps += 1;
            StepResult {
                observation: Self::obs(self.pos),
                reward: 0.0,
                terminated: self.is_success(),
                truncated: self.steps >= 30,
                info: EnvInfo::new(),
            }
        }

        fn state(&self) -> Vec<f32> {
            self.pos.to_vec()
        }
    }

    impl GoalEnv for Plane {
        fn goal_observation(&self) -> ArrayD<f32> {
            Self::obs(self.goal)
        }

        fn goal_state(&self) -> Vec<f32> {
            self.goal.to_vec()
        }

        fn distance_to_goal(&self) -> f32 {
            let dx = self.pos[0] - self.goal[0];
            let dy = self.pos[1] - self.goal[1];
            (dx * dx + dy * dy).sqrt()
        }

        fn is_success(&self) -> bool {
            self.distance_to_goal() < 0.5
        }
    }

    struct Additive;

    impl WorldModel for Additive {
        fn encode(&self, observations: &Array2<f32>) -> Result<Array2<f32>> {
            Ok(observations.clone())
        }

        fn predict(&self, latents: &Array2<f32>, actions: &Array2<f32>) -> Result<Array2<f32>> {
            Ok(latents + actions)
        }

        fn action_dim(&self) -> usize {
            2
        }
    }

    fn config(episodes: usize) -> EvalConfig {
        EvalConfig {
            episodes,
            base_seed: 0,
            max_steps: 100,
        }
    }

    #[test]
    fn test_planner_solves_open_plane() {
        let planner = MppiPlanner::new(PlannerConfig {
            horizon: 8,
            num_samples: 128,
            seed: 5,
            ..Default::default()
        });
        let mut agent = PlanningAgent::new(Additive, planner, 2);
        let report = Evaluator::new(config(5))
            .run(&mut Plane::new(), &mut agent)
            .unwrap();

        assert_eq!(report.policy, "pldm");
        assert_eq!(report.episodes.len(), 5);
        assert_eq!(report.success_rate, 1.0);
        assert!(report.mean_final_distance < 0.5);
        assert!(report.mean_episode_length <= 30.0);
    }

    #[test]
    fn test_episode_seeds_follow_base_seed() {
        let mut policy = RandomPolicy::new(BoxSpace::symmetric(&[2], 1.0), 0);
        let evaluator = Evaluator::new(EvalConfig {
            episodes: 3,
            base_seed: 40,
            max_steps: 10,
        });
        let report = evaluator.run(&mut Plane::new(), &mut policy).unwrap();
        let seeds: Vec<u64> = report.episodes.iter().map(|e| e.seed).collect();
        assert_eq!(seeds, vec![40, 41, 42]);
        assert!(report.episodes.iter().all(|e| e.length <= 10));
    }

    #[test]
    fn test_episode_seeds_wrap_at_u64_max() {
        let mut policy = RandomPolicy::new(BoxSpace::symmetric(&[2], 1.0), 0);
        let evaluator = Evaluator::new(EvalConfig {
            episodes: 3,
            base_seed: u64::MAX - 1,
            max_steps: 5,
        });
        let report = evaluator.run(&mut Plane::new(), &mut policy).unwrap();
        let seeds: Vec<u64> = report.episodes.iter().map(|e| e.seed).collect();
        assert_eq!(seeds, vec![u64::MAX - 1, u64::MAX, 0]);
    }

    #[test]
    fn test_episode_stops_when_env_truncates() {
        let mut policy = RandomPolicy::new(BoxSpace::symmetric(&[2], 0.01), 0);
        let evaluator = Evaluator::new(EvalConfig {
            episodes: 1,
            base_seed: 3,
            max_steps: 100,
        });
        let report = evaluator.run(&mut Plane::new(), &mut policy).unwrap();
        assert!(!report.episodes[0].success);
        assert_eq!(report.episodes[0].length, 30);
    }

    #[test]
    fn test_zero_episodes_is_error() {
        let mut policy = RandomPolicy::new(BoxSpace::symmetric(&[2], 1.0), 0);
        assert!(Evaluator::new(config(0))
            .run(&mut Plane::new(), &mut policy)
            .is_err());
    }

    #[test]
    fn test_report_aggregates() {
        let outcomes = vec![
            EpisodeOutcome {
                seed: 0,
                success: true,
                final_distance: 0.0,
                length: 4,
            },
            EpisodeOutcome {
                seed: 1,
                success: false,
                final_distance: 2.0,
                length: 8,
            },
        ];
        let report = EvalReport::from_outcomes("x", outcomes);
        assert_eq!(report.success_rate, 0.5);
        assert_eq!(report.mean_final_distance, 1.0);
        assert_eq!(report.mean_episode_length, 6.0);
    }
}
