//! Continuous point navigation in an ASCII grid maze.

use crate::render::{draw_blob, fill_mask, AsciiCanvas, IMAGE_SIZE};
use crate::ObsMode;
use ndarray::{arr1, s, Array3, ArrayD};
use pldm::env::{EnvInfo, GoalEnv, PldmEnv, StepResult};
use pldm::spaces::BoxSpace;
use pldm::{PldmError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Collision half-width of the agent along its direction of motion.
const AGENT_RADIUS: f32 = 0.1;
/// Start and goal jitter around a cell centre.
const CELL_JITTER: f32 = 0.25;

const UMAZE: &[&str] = &["#####", "#...#", "###.#", "#...#", "#####"];

const MEDIUM: &[&str] = &[
    "########", "#..##..#", "#..#...#", "##...###", "#..#...#", "#.#..#.#", "#...#..#", "########",
];

const LARGE: &[&str] = &[
    "############",
    "#....#.....#",
    "#.##.#.#.#.#",
    "#......#...#",
    "#.####.###.#",
    "#.#.#......#",
    "#.#.####.#.#",
    "#...#....#.#",
    "############",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MazePreset {
    Umaze,
    Medium,
    Large,
}

impl MazePreset {
    pub fn layout(self) -> &'static [&'static str] {
        match self {
            MazePreset::Umaze => UMAZE,
            MazePreset::Medium => MEDIUM,
            MazePreset::Large => LARGE,
        }
    }
}

impl FromStr for MazePreset {
    type Err = PldmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "umaze" => Ok(MazePreset::Umaze),
            "medium" => Ok(MazePreset::Medium),
            "large" => Ok(MazePreset::Large),
            other => Err(PldmError::ConfigError(format!("unknown maze layout '{}'", other))),
        }
    }
}

/// Occupancy grid parsed from rows of `#` (wall) and `.` (free).
#[derive(Clone, Debug, PartialEq)]
pub struct MazeLayout {
    walls: Vec<Vec<bool>>,
}

impl MazeLayout {
    pub fn parse(rows: &[&str]) -> Result<Self> {
        let width = rows.first().map_or(0, |r| r.len());
        if width == 0 {
            return Err(PldmError::ConfigError("maze layout is empty".to_string()));
        }
        let mut walls = Vec::with_capacity(rows.len());
        for (r, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(PldmError::ConfigError(format!(
                    "maze row {} has {} cells, expected {}",
                    r,
                    row.len(),
                    width
                )));
            }
            let cells = row
                .chars()
                .map(|ch| match ch {
                    '#' => Ok(true),
                    '.' => Ok(false),
                    other => Err(PldmError::ConfigError(format!("invalid maze cell '{}'", other))),
                })
                .collect::<Result<Vec<bool>>>()?;
            walls.push(cells);
        }
        let layout = Self { walls };
        if layout.free_cells().is_empty() {
            return Err(PldmError::ConfigError("maze has no free cells".to_string()));
        }
        Ok(layout)
    }

    pub fn rows(&self) -> usize {
        self.walls.len()
    }

    pub fn cols(&self) -> usize {
        self.walls[0].len()
    }

    /// Cells outside the grid count as walls.
    pub fn is_wall_cell(&self, row: i64, col: i64) -> bool {
        if row < 0 || col < 0 {
            return true;
        }
        self.walls
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .copied()
            .unwrap_or(true)
    }

    /// Whether the continuous point `(x, y)` (cell units) is inside a wall.
    pub fn is_wall_at(&self, x: f32, y: f32) -> bool {
        self.is_wall_cell(y.floor() as i64, x.floor() as i64)
    }

    /// `(row, col)` of every free cell in row-major order.
    pub fn free_cells(&self) -> Vec<(usize, usize)> {
        self.walls
            .iter()
            .enumerate()
            .flat_map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, wall)| !**wall)
                    .map(move |(c, _)| (r, c))
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointMazeConfig {
    pub preset: MazePreset,
    /// Displacement per unit action, in cells
    pub speed: f32,
    pub success_radius: f32,
    /// Minimum start-goal distance between cell centres
    pub min_goal_distance: f32,
    pub max_steps: u32,
    pub blob_sigma: f32,
    pub obs_mode: ObsMode,
}

impl Default for PointMazeConfig {
    fn default() -> Self {
        Self {
            preset: MazePreset::Umaze,
            speed: 0.3,
            success_radius: 0.5,
            min_goal_distance: 2.0,
            max_steps: 300,
            blob_sigma: 1.5,
            obs_mode: ObsMode::State,
        }
    }
}

/// Point mass moving through a maze. Positions are in cell units with
/// `x` along columns and `y` along rows.
pub struct PointMaze {
    config: PointMazeConfig,
    layout: MazeLayout,
    pos: [f32; 2],
    goal: [f32; 2],
    steps: u32,
    done: bool,
    rng: StdRng,
}

impl PointMaze {
    /// Build the maze named by `config.preset`.
    pub fn new(config: PointMazeConfig) -> Result<Self> {
        let layout = MazeLayout::parse(config.preset.layout())?;
        Ok(Self::with_layout(config, layout))
    }

    /// Use a custom layout; `config.preset` is ignored.
    pub fn with_layout(config: PointMazeConfig, layout: MazeLayout) -> Self {
        let (r, c) = layout.free_cells().first().copied().unwrap_or((0, 0));
        let centre = [c as f32 + 0.5, r as f32 + 0.5];
        Self {
            config,
            layout,
            pos: centre,
            goal: centre,
            steps: 0,
            done: false,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn layout(&self) -> &MazeLayout {
        &self.layout
    }

    pub fn position(&self) -> [f32; 2] {
        self.pos
    }

    /// Move along one axis, stopping at the face of a wall cell.
    fn move_axis(&self, pos: [f32; 2], delta: f32, axis: usize) -> f32 {
        if delta == 0.0 {
            return pos[axis];
        }
        let offset = AGENT_RADIUS * delta.signum();
        let mut probe = pos;
        probe[axis] += delta + offset;
        if !self.layout.is_wall_at(probe[0], probe[1]) {
            return pos[axis] + delta;
        }
        let face = if delta > 0.0 {
            probe[axis].floor()
        } else {
            probe[axis].floor() + 1.0
        };
        face - offset
    }

    fn jittered_centre(&mut self, (r, c): (usize, usize)) -> [f32; 2] {
        [
            c as f32 + 0.5 + self.rng.gen_range(-CELL_JITTER..CELL_JITTER),
            r as f32 + 0.5 + self.rng.gen_range(-CELL_JITTER..CELL_JITTER),
        ]
    }

    fn sample_start_goal(&mut self) -> ((usize, usize), (usize, usize)) {
        let free = self.layout.free_cells();
        let dist = |a: (usize, usize), b: (usize, usize)| {
            let dr = a.0 as f32 - b.0 as f32;
            let dc = a.1 as f32 - b.1 as f32;
            (dr * dr + dc * dc).sqrt()
        };
        let start = *free.choose(&mut self.rng).unwrap_or(&free[0]);
        let far: Vec<_> = free
            .iter()
            .copied()
            .filter(|&cell| dist(cell, start) >= self.config.min_goal_distance)
            .collect();
        let goal = match far.choose(&mut self.rng) {
            Some(&cell) => cell,
            // Layout too small for the requested distance
            None => free
                .iter()
                .copied()
                .max_by(|&a, &b| dist(a, start).total_cmp(&dist(b, start)))
                .unwrap_or(start),
        };
        (start, goal)
    }

    fn observe(&self, pos: [f32; 2]) -> ArrayD<f32> {
        match self.config.obs_mode {
            ObsMode::State => arr1(&pos).into_dyn(),
            ObsMode::Pixels => self.render_pixels(pos).into_dyn(),
        }
    }

    /// Single channel holding walls and the agent blob.
    fn render_pixels(&self, pos: [f32; 2]) -> Array3<f32> {
        let extent = self.layout.rows().max(self.layout.cols()) as f32;
        let cells_per_pixel = extent / IMAGE_SIZE as f32;
        let mut img = Array3::zeros((1, IMAGE_SIZE, IMAGE_SIZE));
        let layout = &self.layout;
        fill_mask(img.slice_mut(s![0, .., ..]), cells_per_pixel, |x, y| {
            layout.is_wall_at(x, y)
        });
        draw_blob(
            img.slice_mut(s![0, .., ..]),
            pos[0] / cells_per_pixel,
            pos[1] / cells_per_pixel,
            self.config.blob_sigma,
        );
        img
    }

    fn distance(&self) -> f32 {
        let dx = self.pos[0] - self.goal[0];
        let dy = self.pos[1] - self.goal[1];
        (dx * dx + dy * dy).sqrt()
    }
}

impl PldmEnv for PointMaze {
    fn observation_space(&self) -> BoxSpace {
        match self.config.obs_mode {
            ObsMode::State => {
                let extent = self.layout.rows().max(self.layout.cols()) as f32;
                BoxSpace::uniform(&[2], 0.0, extent)
            }
            ObsMode::Pixels => BoxSpace::unit(&[1, IMAGE_SIZE, IMAGE_SIZE]),
        }
    }

    fn action_space(&self) -> BoxSpace {
        BoxSpace::symmetric(&[2], 1.0)
    }

    fn reset(&mut self, seed: Option<u64>) -> (ArrayD<f32>, EnvInfo) {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        let (start, goal) = self.sample_start_goal();
        self.pos = self.jittered_centre(start);
        self.goal = self.jittered_centre(goal);
        self.steps = 0;
        self.done = false;
        tracing::trace!(start = ?self.pos, goal = ?self.goal, "PointMaze reset");
        (self.observe(self.pos), EnvInfo::new())
    }

    fn step(&mut self, action: &ArrayD<f32>) -> StepResult {
        let mut it = action.iter().map(|a| a.clamp(-1.0, 1.0));
        let vx = it.next().unwrap_or(0.0) * self.config.speed;
        let vy = it.next().unwrap_or(0.0) * self.config.speed;

        // Resolve x then y so the agent slides along walls
        self.pos[0] = self.move_axis(self.pos, vx, 0);
        self.pos[1] = self.move_axis(self.pos, vy, 1);
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
        let mut canvas = AsciiCanvas::new(self.layout.cols(), self.layout.rows());
        for r in 0..self.layout.rows() {
            for c in 0..self.layout.cols() {
                if self.layout.is_wall_cell(r as i64, c as i64) {
                    canvas.put(c, r, '#');
                }
            }
        }
        canvas.mark(self.goal[0], self.goal[1], 1.0, 'G');
        canvas.mark(self.pos[0], self.pos[1], 1.0, 'A');
        Some(canvas.render())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

impl GoalEnv for PointMaze {
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
