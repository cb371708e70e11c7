//! Environment wrappers for common functionality.

use super::{EnvInfo, GoalEnv, PldmEnv, StepResult};
use crate::spaces::BoxSpace;
use ndarray::ArrayD;

/// Implements `GoalEnv` for a wrapper by delegating to its `env` field.
macro_rules! forward_goal_env {
    ($wrapper:ident) => {
        impl<E: GoalEnv> GoalEnv for $wrapper<E> {
            fn goal_observation(&self) -> ArrayD<f32> {
                self.env.goal_observation()
            }

            fn goal_state(&self) -> Vec<f32> {
                self.env.goal_state()
            }

            fn distance_to_goal(&self) -> f32 {
                self.env.distance_to_goal()
            }

            fn is_success(&self) -> bool {
                self.env.is_success()
            }
        }
    };
}

/// Wrapper that tracks episode statistics (return and length).
///
/// Adds `episode_return` and `episode_length` to info on episode completion.
pub struct EpisodeStats<E: PldmEnv> {
    env: E,
    episode_return: f32,
    episode_length: u32,
}

impl<E: PldmEnv> EpisodeStats<E> {
    /// Wrap an environment with episode statistics tracking
    pub fn new(env: E) -> Self {
        Self {
            env,
            episode_return: 0.0,
            episode_length: 0,
        }
    }

    /// Get a reference to the inner environment
    pub fn inner(&self) -> &E {
        &self.env
    }

    /// Get a mutable reference to the inner environment
    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.env
    }
}

impl<E: PldmEnv> PldmEnv for EpisodeStats<E> {
    fn observation_space(&self) -> BoxSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> BoxSpace {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        self.episode_return = 0.0;
        self.episode_length = 0;
        self.env.reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let mut result = self.env.step(action);

        self.episode_return += result.reward;
        self.episode_length += 1;

        if result.done() {
            result.info = result
                .info
                .with_episode_stats(self.episode_return, self.episode_length);

            self.episode_return = 0.0;
            self.episode_length = 0;
        }

        result
    }

    fn state(&self) -> Vec<f32> {
        self.env.state()
    }

    fn render(&self) -> Option<String> {
        self.env.render()
    }

    fn close(&mut self) {
        self.env.close()
    }

    fn is_done(&self) -> bool {
        self.env.is_done()
    }
}

forward_goal_env!(EpisodeStats);

/// Wrapper that clips continuous actions to the action space bounds.
pub struct ClipAction<E: PldmEnv> {
    env: E,
    space: BoxSpace,
}

impl<E: PldmEnv> ClipAction<E> {
    /// Wrap an environment with action clipping
    pub fn new(env: E) -> Self {
        let space = env.action_space();
        Self { env, space }
    }
}

impl<E: PldmEnv> PldmEnv for ClipAction<E> {
    fn observation_space(&self) -> BoxSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> BoxSpace {
        self.space.clone()
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        self.env.reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let clipped = self.space.clip(action);
        self.env.step(&clipped)
    }

    fn state(&self) -> Vec<f32> {
        self.env.state()
    }

    fn render(&self) -> Option<String> {
        self.env.render()
    }

    fn close(&mut self) {
        self.env.close()
    }

    fn is_done(&self) -> bool {
        self.env.is_done()
    }
}

forward_goal_env!(ClipAction);

/// Wrapper that truncates episodes after a fixed number of steps.
pub struct TimeLimit<E: PldmEnv> {
    env: E,
    max_steps: u32,
    elapsed: u32,
}

impl<E: PldmEnv> TimeLimit<E> {
    pub fn new(env: E, max_steps: u32) -> Self {
        Self {
            env,
            max_steps,
            elapsed: 0,
        }
    }

    /// Steps taken in the current episode
    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }
}

impl<E: PldmEnv> PldmEnv for TimeLimit<E> {
    fn observation_space(&self) -> BoxSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> BoxSpace {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        self.elapsed = 0;
        self.env.reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let mut result = self.env.step(action);
        self.elapsed += 1;
        if self.elapsed >= self.max_steps && !result.terminated {
            result.truncated = true;
        }
        result
    }

    fn state(&self) -> Vec<f32> {
        self.env.state()
    }

    fn render(&self) -> Option<String> {
        self.env.render()
    }

    fn close(&mut self) {
        self.env.close()
    }

    fn is_done(&self) -> bool {
        self.env.is_done() || self.elapsed >= self.max_steps
    }
}

forward_goal_env!(TimeLimit);
