//! Two-room navigation separated by a wall with a single door.

use crate::render::{draw_blob, fill_mask, AsciiCanvas, IMAGE_SIZE};
use crate::ObsMode;
use ndarray::{arr1, s, Array3, ArrayD};
use pldm::env::{EnvInfo, GoalEnv, PldmEnv, StepResult};
use pldm::spaces::BoxSpace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Distance kept from the arena border and the wall when sampling positions.
const SPAWN_MARGIN: f32 = 3.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WallConfig {
    /// Side of the square arena
    pub size: f32,
    /// Centre of the wall along x
    pub wall_x: f32,
    pub wall_width: f32,
    pub door_height: f32,
    /// Door centre for every episode; sampled on reset when `None`
    pub fixed_door_y: Option<f32>,
    /// Maximum displacement per step
    pub max_step: f32,
    pub success_radius: f32,
    pub max_steps: u32,
    /// Agent blob width in pixels
    pub blob_sigma: f32,
    pub obs_mode: ObsMode,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            size: 64.0,
            wall_x: 32.0,
            wall_width: 4.0,
            door_height: 12.0,
            fixed_door_y: None,
            max_step: 2.5,
            success_radius: 4.5,
            max_steps: 200,
            blob_sigma: 1.5,
            obs_mode: ObsMode::State,
        }
    }
}

impl WallConfig {
    pub fn with_obs_mode(mut self, obs_mode: ObsMode) -> Self {
        self.obs_mode = obs_mode;
        self
    }

    fn wall_left(&self) -> f32 {
        self.wall_x - self.wall_width / 2.0
    }

    fn wall_right(&self) -> f32 {
        self.wall_x + self.wall_width / 2.0
    }

    /// Whether `(x, y)` lies inside solid wall for a door centred at `door_y`.
    pub fn is_wall(&self, door_y: f32, x: f32, y: f32) -> bool {
        x > self.wall_left()
            && x < self.wall_right()
            && (y - door_y).abs() > self.door_height / 2.0
    }

    /// -1 for the left room, 1 for the right room, 0 inside the doorway.
    pub fn room_of(&self, x: f32) -> i8 {
        if x <= self.wall_left() {
            -1
        } else if x >= self.wall_right() {
            1
        } else {
            0
        }
    }
}

/// Deterministic dynamics of the Wall environment.
///
/// The action is clipped to `max_step` in norm and the arena borders clamp
/// the result. A move that would pass through solid wall stops at the wall
/// face it hits; inside the doorway the agent slides along the door frame.
pub fn wall_transition(
    config: &WallConfig,
    door_y: f32,
    pos: [f32; 2],
    action: [f32; 2],
) -> [f32; 2] {
    let norm = (action[0] * action[0] + action[1] * action[1]).sqrt();
    let scale = if norm > config.max_step && norm > 0.0 {
        config.max_step / norm
    } else {
        1.0
    };
    let (dx, dy) = (action[0] * scale, action[1] * scale);
    let mut target = [
        (pos[0] + dx).clamp(0.0, config.size),
        (pos[1] + dy).clamp(0.0, config.size),
    ];

    let (left, right) = (config.wall_left(), config.wall_right());
    let half = config.door_height / 2.0;
    let (door_lo, door_hi) = (door_y - half, door_y + half);
    let in_door = |y: f32| y >= door_lo && y <= door_hi;

    let dx = target[0] - pos[0];
    let start_inside = pos[0] > left && pos[0] < right;
    if start_inside {
        // Already in the doorway: stay within the frame
        target[1] = target[1].clamp(door_lo, door_hi);
        return target;
    }
    if dx == 0.0 {
        return target;
    }

    // Portion of the segment inside the wall band [left, right]
    let s_at = |x: f32| (x - pos[0]) / dx;
    let (s_enter, s_exit) = if dx > 0.0 {
        (s_at(left), s_at(right))
    } else {
        (s_at(right), s_at(left))
    };
    if s_enter >= 1.0 || s_exit <= 0.0 {
        return target;
    }
    let y_at = |s: f32| pos[1] + (target[1] - pos[1]) * s;
    let y_enter = y_at(s_enter.max(0.0));
    let y_exit = y_at(s_exit.min(1.0));
    if in_door(y_enter) && in_door(y_exit) {
        return target;
    }

    let face = if dx > 0.0 { left } else { right };
    [face, y_enter]
}

/// Point agent in a two-room arena.
///
/// Start and goal are drawn in opposite rooms, so every episode requires
/// passing through the door.
pub struct Wall {
    config: WallConfig,
    pos: [f32; 2],
    goal: [f32; 2],
    door_y: f32,
    steps: u32,
    done: bool,
    rng: StdRng,
}

impl Wall {
    pub fn new(config: WallConfig) -> Self {
        let door_y = config.fixed_door_y.unwrap_or(config.size / 2.0);
        Self {
            pos: [config.size / 4.0, config.size / 2.0],
            goal: [3.0 * config.size / 4.0, config.size / 2.0],
            door_y,
            config,
            steps: 0,
            done: false,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn config(&self) -> &WallConfig {
        &self.config
    }

    pub fn door_y(&self) -> f32 {
        self.door_y
    }

    pub fn position(&self) -> [f32; 2] {
        self.pos
    }

    fn sample_in_room(&mut self, room: i8) -> [f32; 2] {
        let c = &self.config;
        let (lo, hi) = if room < 0 {
            (SPAWN_MARGIN, c.wall_left() - SPAWN_MARGIN)
        } else {
            (c.wall_right() + SPAWN_MARGIN, c.size - SPAWN_MARGIN)
        };
        let x = self.rng.gen_range(lo..hi);
        let y = self.rng.gen_range(SPAWN_MARGIN..c.size - SPAWN_MARGIN);
        [x, y]
    }

    fn observe(&self, pos: [f32; 2]) -> ArrayD<f32> {
        match self.config.obs_mode {
            ObsMode::State => arr1(&pos).into_dyn(),
            ObsMode::Pixels => self.render_pixels(pos).into_dyn(),
        }
    }

    /// Channel 0: agent blob, channel 1: walls.
    fn render_pixels(&self, pos: [f32; 2]) -> Array3<f32> {
        let world_per_pixel = self.config.size / IMAGE_SIZE as f32;
        let mut img = Array3::zeros((2, IMAGE_SIZE, IMAGE_SIZE));
        draw_blob(
            img.slice_mut(s![0, .., ..]),
            pos[0] / world_per_pixel,
            pos[1] / world_per_pixel,
            self.config.blob_sigma,
        );
        let door_y = self.door_y;
        let config = &self.config;
        fill_mask(img.slice_mut(s![1, .., ..]), world_per_pixel, |x, y| {
            config.is_wall(door_y, x, y)
        });
        img
    }

    fn distance(&self) -> f32 {
        let dx = self.pos[0] - self.goal[0];
        let dy = self.pos[1] - self.goal[1];
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Wall {
    fn default() -> Self {
        Self::new(WallConfig::default())
    }
}

impl PldmEnv for Wall {
    fn observation_space(&self) -> BoxSpace {
        match self.config.obs_mode {
            ObsMode::State => BoxSpace::uniform(&[2], 0.0, self.config.size),
            ObsMode::Pixels => BoxSpace::unit(&[2, IMAGE_SIZE, IMAGE_SIZE]),
        }
    }

    fn action_space(&self) -> BoxSpace {
        BoxSpace::symmetric(&[2], self.config.max_step)
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        let half = self.config.door_height / 2.0;
        self.door_y = match self.config.fixed_door_y {
            Some(y) => y,
            None => self
                .rng
                .gen_range(half + SPAWN_MARGIN..self.config.size - half - SPAWN_MARGIN),
        };
        let room: i8 = if self.rng.gen_bool(0.5) { -1 } else { 1 };
        self.pos = self.sample_in_room(room);
        self.goal = self.sample_in_room(-room);
        self.steps = 0;
        self.done = false;

        tracing::trace!(door_y = self.door_y, start = ?self.pos, goal = ?self.goal, "Wall reset");
        (self.observe(self.pos), EnvInfo::new())
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let mut it = action.iter().copied();
        let a = [it.next().unwrap_or(0.0), it.next().unwrap_or(0.0)];
        self.pos = wall_transition(&self.config, self.door_y, self.pos, a);
        self.steps += 1;

        let success = self.is_success();
        let truncated = self.steps >= self.config.max_steps;
        self.done = truncated;

        StepResult {
            observation: self.observe(self.pos),
            reward: if success { 1.0 } else { 0.0 },
            terminated: false,
            truncated,
            info: EnvInfo::new().with_extra("distance", self.distance()),
        }
    }

    fn state(&self) -> Vec<f32> {
        self.pos.to_vec()
    }

    fn render(&self) -> Option<String> {
        let cell = 2.0;
        let cols = (self.config.size / cell).ceil() as usize;
        let mut canvas = AsciiCanvas::new(cols, cols / 2);
        // Rows cover twice the world height of columns to keep the aspect ratio
        for row in 0..canvas.rows() {
            for col in 0..cols {
                let x = (col as f32 + 0.5) * cell;
                let y = (row as f32 + 0.5) * cell * 2.0;
                if self.config.is_wall(self.door_y, x, y) {
                    canvas.put(col, row, '#');
                }
            }
        }
        let goal_row = (self.goal[1] / (cell * 2.0)) as usize;
        let agent_row = (self.pos[1] / (cell * 2.0)) as usize;
        canvas.put((self.goal[0] / cell) as usize, goal_row, 'G');
        canvas.put((self.pos[0] / cell) as usize, agent_row, 'A');
        Some(canvas.render())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

impl GoalEnv for Wall {
    fn goal_observation(&self) -> ArrayD<f32> {
        self.observe(self.goal)
    }

    fn goal_state(&self) -> Vec<f32> {
        self.goal.to_vec()
    }

    fn distance_to_goal(&self) -> f32 {
        self.distance()
    }

    fn is_success(&self) -> bool {
        self.distance() <= self.config.success_radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use pldm::spaces::Space;

    fn action(x: f32, y: f32) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(&[2]), vec![x, y]).unwrap()
    }

    fn fixed_door() -> WallConfig {
        WallConfig {
            fixed_door_y: Some(10.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_reset_is_deterministic() {
        let mut a = Wall::default();
        let mut b = Wall::default();
        let (oa, _) = a.reset(Some(11));
        let (ob, _) = b.reset(Some(11));
        assert_eq!(oa, ob);
        assert_eq!(a.goal_state(), b.goal_state());
        assert_eq!(a.door_y(), b.door_y());
    }

    #[test]
    fn test_start_and_goal_in_opposite_rooms() {
        let mut env = Wall::default();
        for seed in 0..20 {
            env.reset(Some(seed));
            let c = env.config();
            assert_eq!(c.room_of(env.position()[0]), -c.room_of(env.goal_state()[0]));
            assert_ne!(c.room_of(env.position()[0]), 0);
        }
    }

    #[test]
    fn test_wall_blocks_outside_door() {
        let mut env = Wall::new(fixed_door());
        env.reset(Some(0));
        env.pos = [25.0, 50.0];
        for _ in 0..10 {
            env.step(&action(2.0, 0.0));
        }
        assert_eq!(env.position(), [30.0, 50.0]);

        env.pos = [40.0, 40.0];
        env.step(&action(-2.5, 0.0));
        env.step(&action(-2.5, 0.0));
        env.step(&action(-2.5, 0.0));
        assert_eq!(env.position()[0], 34.0);
    }

    #[test]
    fn test_door_crossing() {
        let mut env = Wall::new(fixed_door());
        env.reset(Some(0));
        env.pos = [26.0, 10.0];
        for _ in 0..6 {
            env.step(&action(2.0, 0.0));
        }
        assert_eq!(env.config().room_of(env.position()[0]), 1);
        assert!((env.position()[1] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_diagonal_into_wall_stops_at_face() {
        let c = fixed_door();
        // Starts beside the door but aims above it
        let next = wall_transition(&c, 10.0, [29.0, 15.5], [2.0, 1.0]);
        assert_eq!(next[0], 30.0);
        assert!((next[1] - 16.0).abs() < 1e-5);
    }

    #[test]
    fn test_doorway_slides_along_frame() {
        let c = fixed_door();
        let next = wall_transition(&c, 10.0, [32.0, 15.0], [0.0, 2.0]);
        assert_eq!(next, [32.0, 16.0]);
    }

    #[test]
    fn test_action_norm_is_clipped() {
        let c = WallConfig::default();
        let next = wall_transition(&c, 32.0, [10.0, 10.0], [30.0, 40.0]);
        assert!((next[0] - 11.5).abs() < 1e-5);
        assert!((next[1] - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_borders_clamp() {
        let c = WallConfig::default();
        assert_eq!(wall_transition(&c, 32.0, [1.0, 63.0], [-2.0, 2.0]), [0.0, 64.0]);
    }

    #[test]
    fn test_pixel_observation() {
        let mut env = Wall::new(fixed_door().with_obs_mode(ObsMode::Pixels));
        let (obs, _) = env.reset(Some(3));
        assert_eq!(obs.shape(), &[2, 64, 64]);
        // Wall pixel above the door, free pixel inside it
        assert_eq!(obs[[1, 40, 32]], 1.0);
        assert_eq!(obs[[1, 10, 32]], 0.0);
        assert!(obs.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(env.goal_observation().shape(), &[2, 64, 64]);
        assert!(env.observation_space().contains(&obs));
    }

    #[test]
    fn test_truncates_after_max_steps() {
        let mut env = Wall::new(WallConfig {
            max_steps: 3,
            ..Default::default()
        });
        env.reset(Some(1));
        assert!(!env.step(&action(0.0, 0.0)).done());
        assert!(!env.step(&action(0.0, 0.0)).done());
        assert!(env.step(&action(0.0, 0.0)).truncated);
        assert!(env.is_done());
    }

    #[test]
    fn test_render_marks_agent_and_goal() {
        let mut env = Wall::default();
        env.reset(Some(5));
        let frame = env.render().unwrap();
        assert!(frame.contains('A'));
        assert!(frame.contains('G'));
        assert!(frame.contains('#'));
        assert_eq!(frame.lines().count(), 16);
    }
}
