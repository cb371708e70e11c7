//! Planning in latent space.
//!
//! Provides:
//! - `WorldModel` - the encoder/predictor interface planners roll out
//! - `MppiPlanner` / `CemPlanner` - sampling-based trajectory optimizers
//! - `PlanningAgent` - model-predictive control with periodic re-planning
//! - `GoalPolicy` - common interface for everything evaluated on goal tasks
//!
//! Planners operate on `ndarray` buffers so they work with any model,
//! including analytic ones in tests. Neural models implement `WorldModel`
//! under the `torch` feature.

mod agent;
mod cem;
mod cost;
mod mppi;

pub use crate::config::{PlannerConfig, PlannerKind};
pub use agent::PlanningAgent;
pub use cem::CemPlanner;
pub use cost::GoalCost;
pub use mppi::MppiPlanner;

use crate::spaces::{BoxSpace, Space};
use crate::Result;
use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView1, ArrayViewMut1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Learned (or analytic) latent dynamics.
///
/// Observations are passed flattened; actions are in environment units.
pub trait WorldModel {
    /// Encode observations [B, obs_dim] into latents [B, latent_dim].
    fn encode(&self, observations: &Array2<f32>) -> Result<Array2<f32>>;

    /// Predict next latents [B, latent_dim] from latents and actions [B, action_dim].
    fn predict(&self, latents: &Array2<f32>, actions: &Array2<f32>) -> Result<Array2<f32>>;

    /// Dimension of the action vector.
    fn action_dim(&self) -> usize;
}

/// An optimized action sequence.
#[derive(Clone, Debug)]
pub struct Plan {
    /// [horizon, action_dim]
    pub actions: Array2<f32>,
    /// Cost of `actions` under the model
    pub cost: f32,
}

/// Trajectory optimizer over a `WorldModel`.
pub trait Planner: Send {
    /// Optimize an action sequence that drives `start` toward `goal`.
    fn plan(
        &mut self,
        model: &dyn WorldModel,
        start: ArrayView1<f32>,
        goal: ArrayView1<f32>,
    ) -> Result<Plan>;

    /// Discard the first `steps` actions of the warm start after execution.
    fn advance(&mut self, steps: usize);

    /// Forget any warm start.
    fn reset(&mut self);

    fn horizon(&self) -> usize;
}

/// Build the planner selected by `config.kind`.
pub fn build_planner(config: &PlannerConfig) -> Box<dyn Planner> {
    match config.kind {
        PlannerKind::Mppi => Box::new(MppiPlanner::new(config.clone())),
        PlannerKind::Cem => Box::new(CemPlanner::new(config.clone())),
    }
}

impl Planner for Box<dyn Planner> {
    fn plan(
        &mut self,
        model: &dyn WorldModel,
        start: ArrayView1<f32>,
        goal: ArrayView1<f32>,
    ) -> Result<Plan> {
        (**self).plan(model, start, goal)
    }

    fn advance(&mut self, steps: usize) {
        (**self).advance(steps)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn horizon(&self) -> usize {
        (**self).horizon()
    }
}

/// Anything that picks actions for a goal-reaching task.
pub trait GoalPolicy {
    /// Called at the start of every episode.
    fn reset(&mut self) {}

    /// Choose an action for `observation` given the goal observation.
    fn act(&mut self, observation: &ArrayD<f32>, goal: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    fn name(&self) -> &str;
}

/// Uniformly random actions; the floor every method should beat.
pub struct RandomPolicy {
    space: BoxSpace,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(space: BoxSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl GoalPolicy for RandomPolicy {
    fn act(&mut self, _observation: &ArrayD<f32>, _goal: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(self.space.sample(&mut self.rng))
    }

    fn name(&self) -> &str {
        "random"
    }
}

impl PlannerConfig {
    /// Bound planned actions by the largest norm every action in `space`
    /// can take, so the environment executes exactly what was planned.
    pub fn fit_action_space(mut self, space: &BoxSpace) -> Self {
        self.max_norm = space.inscribed_radius();
        self
    }
}

/// Scale `action` down so its L2 norm is at most `max_norm`.
pub fn clip_norm(mut action: ArrayViewMut1<f32>, max_norm: f32) {
    let norm = action.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > max_norm && norm > 0.0 {
        action.mapv_inplace(|v| v * max_norm / norm);
    }
}

/// Roll `model` out from `start` for every candidate in `actions`
/// [K, H, A] and score the predicted latents with `cost`.
pub fn evaluate_sequences(
    model: &dyn WorldModel,
    start: ArrayView1<f32>,
    goal: ArrayView1<f32>,
    actions: &Array3<f32>,
    cost: &GoalCost,
) -> Result<Array1<f32>> {
    let (samples, horizon, _) = actions.dim();
    let mut latents = Array2::from_shape_fn((samples, start.len()), |(_, d)| start[d]);
    let mut total = Array1::zeros(samples);

    for t in 0..horizon {
        let step_actions = actions.index_axis(Axis(1), t).to_owned();
        latents = model.predict(&latents, &step_actions)?;
        let weight = cost.step_weight(t, horizon);
        if weight > 0.0 {
            for (k, row) in latents.outer_iter().enumerate() {
                total[k] += weight * cost.distance(row, goal);
            }
        }
    }
    Ok(total)
}

/// Index of the smallest finite entry.
pub(crate) fn argmin(values: &Array1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
