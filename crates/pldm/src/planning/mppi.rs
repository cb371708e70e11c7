use super::{
    argmin, clip_norm, evaluate_sequences, GoalCost, Plan, Planner, PlannerConfig, WorldModel,
};
use crate::{PldmError, Result};
use ndarray::{s, Array1, Array2, Array3, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Model Predictive Path Integral planner.
///
/// Perturbs a running mean action sequence with Gaussian noise, rolls every
/// candidate through the world model and replaces the mean with the
/// softmin-weighted average of the candidates.
pub struct MppiPlanner {
    config: PlannerConfig,
    cost: GoalCost,
    /// Warm start carried between calls: [horizon, action_dim]
    mean: Option<Array2<f32>>,
    rng: StdRng,
}

impl MppiPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        let cost = GoalCost::new(config.terminal_cost_only, config.cost_discount);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            cost,
            mean: None,
            rng,
        }
    }

    fn initial_mean(&mut self, action_dim: usize) -> Array2<f32> {
        match self.mean.take() {
            Some(mean) if mean.ncols() == action_dim => mean,
            _ => Array2::zeros((self.config.horizon, action_dim)),
        }
    }

    /// Draw `num_samples` candidates around `mean`. Candidate 0 is the
    /// unperturbed mean so the running solution is always re-scored.
    fn sample(&mut self, mean: &Array2<f32>, noise: &Normal<f32>) -> Array3<f32> {
        let (horizon, action_dim) = mean.dim();
        let samples = self.config.num_samples.max(1);
        let mut candidates = Array3::zeros((samples, horizon, action_dim));

        for (k, mut candidate) in candidates.outer_iter_mut().enumerate() {
            candidate.assign(mean);
            if k > 0 {
                candidate.mapv_inplace(|v| v + noise.sample(&mut self.rng));
            }
            for row in candidate.outer_iter_mut() {
                clip_norm(row, self.config.max_norm);
            }
        }
        candidates
    }

    /// Softmin weights with temperature, shifted by the minimum for stability.
    fn weights(&self, costs: &Array1<f32>) -> Array1<f32> {
        let min = costs[argmin(costs)];
        let mut weights = costs.mapv(|c| {
            if c.is_finite() {
                (-(c - min) / self.config.temperature).exp()
            } else {
                0.0
            }
        });
        let total = weights.sum();
        if total > 0.0 {
            weights /= total;
        }
        weights
    }
}

impl Planner for MppiPlanner {
    fn plan(
        &mut self,
        model: &dyn WorldModel,
        start: ArrayView1<f32>,
        goal: ArrayView1<f32>,
    ) -> Result<Plan> {
        let noise = Normal::new(0.0, self.config.noise_std)
            .map_err(|e| PldmError::ConfigError(format!("invalid noise_std: {}", e)))?;
        let mut mean = self.initial_mean(model.action_dim());

        for _ in 0..self.config.iterations {
            let candidates = self.sample(&mean, &noise);
            let costs = evaluate_sequences(model, start, goal, &candidates, &self.cost)?;
            let weights = self.weights(&costs);

            mean.fill(0.0);
            for (w, candidate) in weights.iter().zip(candidates.outer_iter()) {
                if *w > 0.0 {
                    mean.scaled_add(*w, &candidate);
                }
            }
        }
        for row in mean.outer_iter_mut() {
            clip_norm(row, self.config.max_norm);
        }

        let cost = evaluate_sequences(
            model,
            start,
            goal,
            &mean.clone().insert_axis(Axis(0)),
            &self.cost,
        )?[0];

        self.mean = Some(mean.clone());
        Ok(Plan {
            actions: mean,
            cost,
        })
    }

    fn advance(&mut self, steps: usize) {
        if let Some(mean) = self.mean.as_mut() {
            let horizon = mean.nrows();
            let steps = steps.min(horizon);
            let tail = mean.slice(s![steps.., ..]).to_owned();
            mean.fill(0.0);
            mean.slice_mut(s![..horizon - steps, ..]).assign(&tail);
        }
    }

    fn reset(&mut self) {
        self.mean = None;
    }

    fn horizon(&self) -> usize {
        self.config.horizon
    }
}
