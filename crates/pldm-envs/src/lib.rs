//! Goal-conditioned navigation environments for PLDM.
//!
//! - `Wall` - two rooms joined by a single door
//! - `PointMaze` - point mass in the `umaze`, `medium` and `large` grid mazes
//!
//! Both expose either the agent position or a top-down 64x64 image as the
//! observation, selected with [`ObsMode`].

mod point_maze;
pub mod render;
mod wall;

pub use point_maze::{MazeLayout, MazePreset, PointMaze, PointMazeConfig};
pub use wall::{wall_transition, Wall, WallConfig};

use pldm::env::GoalEnv;
use pldm::{PldmError, Result};
use serde::{Deserialize, Serialize};

/// What the agent observes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObsMode {
    /// Agent position
    #[default]
    State,
    /// Top-down image
    Pixels,
}

const ENVS: &[&str] = &["wall", "point_maze_umaze", "point_maze_medium", "point_maze_large"];

/// Names accepted by [`make_env`].
pub fn available_envs() -> &'static [&'static str] {
    ENVS
}

/// A validated environment description that can build any number of
/// identical environments, e.g. one per collection worker.
#[derive(Clone, Debug)]
pub enum EnvSpec {
    Wall(WallConfig),
    PointMaze(PointMazeConfig, MazeLayout),
}

impl EnvSpec {
    pub fn from_name(name: &str, obs_mode: ObsMode) -> Result<Self> {
        if name == "wall" {
            return Ok(EnvSpec::Wall(WallConfig::default().with_obs_mode(obs_mode)));
        }
        if let Some(layout) = name.strip_prefix("point_maze_") {
            let config = PointMazeConfig {
                preset: layout.parse()?,
                obs_mode,
                ..Default::default()
            };
            let layout = MazeLayout::parse(config.preset.layout())?;
            return Ok(EnvSpec::PointMaze(config, layout));
        }
        Err(PldmError::EnvError(format!(
            "unknown environment '{}', expected one of: {}",
            name,
            ENVS.join(", ")
        )))
    }

    pub fn build(&self) -> Box<dyn GoalEnv> {
        match self {
            EnvSpec::Wall(config) => Box::new(Wall::new(config.clone())),
            EnvSpec::PointMaze(config, layout) => {
                Box::new(PointMaze::with_layout(config.clone(), layout.clone()))
            }
        }
    }
}

/// Build an environment by name with default settings.
pub fn make_env(name: &str, obs_mode: ObsMode) -> Result<Box<dyn GoalEnv>> {
    Ok(EnvSpec::from_name(name, obs_mode)?.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pldm::env::PldmEnv;
    use pldm::spaces::Space;

    #[test]
    fn test_every_listed_env_builds() {
        for &name in available_envs() {
            for mode in [ObsMode::State, ObsMode::Pixels] {
                let mut env = make_env(name, mode).unwrap();
                let (obs, _) = env.reset(Some(0));
                assert_eq!(obs.shape(), env.observation_space().shape(), "{}", name);
                assert_eq!(env.goal_observation().shape(), obs.shape());
            }
        }
    }

    #[test]
    fn test_unknown_env() {
        assert!(make_env("cartpole", ObsMode::State).is_err());
        assert!(make_env("point_maze_spiral", ObsMode::State).is_err());
    }
}
