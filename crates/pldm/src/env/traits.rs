//! Core environment trait definitions.

use crate::spaces::BoxSpace;
use ndarray::ArrayD;

/// Information returned from environment steps
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    /// Episode return (if done)
    pub episode_return: Option<f32>,
    /// Episode length (if done)
    pub episode_length: Option<f32>,
    /// Custom metrics (kept minimal for performance)
    pub extra: smallvec::SmallVec<[(&'static str, f32); 4]>,
}

impl EnvInfo {
    /// Create empty info
    pub fn new() -> Self {
        Self::default()
    }

    /// Add episode stats
    pub fn with_episode_stats(mut self, ret: f32, len: u32) -> Self {
        self.episode_return = Some(ret);
        self.episode_length = Some(len as f32);
        self
    }

    /// Add a custom metric (use rarely)
    pub fn with_extra(mut self, key: &'static str, value: f32) -> Self {
        self.extra.push((key, value));
        self
    }

    /// Get a value by key (including defaults)
    pub fn get(&self, key: &str) -> Option<f32> {
        match key {
            "episode_return" => self.episode_return,
            "episode_length" => self.episode_length,
            _ => self.extra.iter().find(|(k, _)| k == &key).map(|(_, v)| *v),
        }
    }
}

/// Result from a single environment step
#[derive(Clone, Debug)]
pub struct StepResult {
    /// Observation after the step
    pub observation: ArrayD<f32>,
    /// Reward received (1.0 on reaching the goal, 0.0 otherwise)
    pub reward: f32,
    /// Whether episode terminated (goal reached)
    pub terminated: bool,
    /// Whether episode truncated (time limit)
    pub truncated: bool,
    /// Additional info
    pub info: EnvInfo,
}

impl StepResult {
    /// Check if episode is done (terminated or truncated)
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Core trait for PLDM environments.
///
/// Observations and actions are continuous. Besides the observation (which
/// may be an image), every environment exposes a low-dimensional simulator
/// `state`, stored alongside offline trajectories.
///
/// # Example
///
/// ```rust,ignore
/// use pldm::env::{EnvInfo, PldmEnv, StepResult};
/// use pldm::spaces::BoxSpace;
///
/// struct Line {
///     x: f32,
/// }
///
/// impl PldmEnv for Line {
///     fn observation_space(&self) -> BoxSpace {
///         BoxSpace::uniform(&[1], -10.0, 10.0)
///     }
///
///     fn action_space(&self) -> BoxSpace {
///         BoxSpace::symmetric(&[1], 1.0)
///     }
///
///     fn reset(&mut self, _seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
///         self.x = 0.0;
///         (ArrayD::from_elem(IxDyn(&[1]), self.x), EnvInfo::new())
///     }
///
///     fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
///         // ... implement step logic
///     }
///
///     fn state(&self) -> Vec<f32> {
///         vec![self.x]
///     }
/// }
/// ```
pub trait PldmEnv: Send {
    /// Get the observation space
    fn observation_space(&self) -> BoxSpace;

    /// Get the action space
    fn action_space(&self) -> BoxSpace;

    /// Reset the environment to initial state
    ///
    /// # Arguments
    /// * `seed` - Optional random seed for reproducibility
    ///
    /// # Returns
    /// Tuple of (initial observation, info)
    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo);

    /// Take a single step in the environment
    fn step(&mut self, action: &ArrayD<f32>) -> StepResult;

    /// Low-dimensional simulator state (e.g. agent position)
    fn state(&self) -> Vec<f32>;

    /// Optional: Render the environment as text
    fn render(&self) -> Option<String> {
        None
    }

    /// Optional: Close the environment and free resources
    fn close(&mut self) {}

    /// Check if environment is done and needs reset
    fn is_done(&self) -> bool {
        false
    }
}

/// Environments with a goal sampled on every reset.
pub trait GoalEnv: PldmEnv {
    /// Observation the agent would see when standing at the goal
    fn goal_observation(&self) -> ArrayD<f32>;

    /// Low-dimensional goal state
    fn goal_state(&self) -> Vec<f32>;

    /// Distance between the agent and the goal in simulator units
    fn distance_to_goal(&self) -> f32;

    /// Whether the agent is within the success radius of the goal
    fn is_success(&self) -> bool;
}

impl<E: PldmEnv + ?Sized> PldmEnv for Box<E> {
    fn observation_space(&self) -> BoxSpace {
        (**self).observation_space()
    }

    fn action_space(&self) -> BoxSpace {
        (**self).action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        (**self).reset(seed)
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        (**self).step(action)
    }

    fn state(&self) -> Vec<f32> {
        (**self).state()
    }

    fn render(&self) -> Option<String> {
        (**self).render()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }
}

impl<E: GoalEnv + ?Sized> GoalEnv for Box<E> {
    fn goal_observation(&self) -> ArrayD<f32> {
        (**self).goal_observation()
    }

    fn goal_state(&self) -> Vec<f32> {
        (**self).goal_state()
    }

    fn distance_to_goal(&self) -> f32 {
        (**self).distance_to_goal()
    }

    fn is_success(&self) -> bool {
        (**self).is_success()
    }
}
