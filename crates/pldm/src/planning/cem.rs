use super::{
    argmin, clip_norm, evaluate_sequences, GoalCost, Plan, Planner, PlannerConfig, WorldModel,
};
use crate::Result;
use ndarray::{s, Array2, Array3, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

const MIN_STD: f32 = 0.05;
const MAX_STD: f32 = 2.0;

/// Cross-Entropy Method planner.
///
/// Keeps a diagonal Gaussian over action sequences and refits it to the
/// lowest-cost fraction of the samples at every iteration.
pub struct CemPlanner {
    config: PlannerConfig,
    cost: GoalCost,
    mean: Option<Array2<f32>>,
    rng: StdRng,
}

impl CemPlanner {
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

    fn num_elites(&self) -> usize {
        let samples = self.config.num_samples.max(1);
        ((samples as f32 * self.config.elite_frac).round() as usize).clamp(1, samples)
    }

    fn sample(&mut self, mean: &Array2<f32>, std: &Array2<f32>) -> Array3<f32> {
        let (horizon, action_dim) = mean.dim();
        let samples = self.config.num_samples.max(1);
        let mut candidates = Array3::zeros((samples, horizon, action_dim));

        for (k, mut candidate) in candidates.outer_iter_mut().enumerate() {
            if k == 0 {
                candidate.assign(mean);
            } else {
                for ((value, m), sd) in candidate.iter_mut().zip(mean.iter()).zip(std.iter()) {
                    let z: f32 = StandardNormal.sample(&mut self.rng);
                    *value = m + sd * z;
                }
            }
            for row in candidate.outer_iter_mut() {
                clip_norm(row, self.config.max_norm);
            }
        }
        candidates
    }
}

impl Planner for CemPlanner {
    fn plan(
        &mut self,
        model: &dyn WorldModel,
        start: ArrayView1<f32>,
        goal: ArrayView1<f32>,
    ) -> Result<Plan> {
        let action_dim = model.action_dim();
        let mut mean = match self.mean.take() {
            Some(mean) if mean.ncols() == action_dim => mean,
            _ => Array2::zeros((self.config.horizon, action_dim)),
        };
        let mut std = Array2::from_elem(mean.dim(), self.config.noise_std);
        let elites = self.num_elites();

        let mut best: Option<(f32, Array2<f32>)> = None;
        for _ in 0..self.config.iterations {
            let candidates = self.sample(&mean, &std);
            let costs = evaluate_sequences(model, start, goal, &candidates, &self.cost)?;

            let mut order: Vec<usize> = (0..costs.len()).collect();
            order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
            let elite = candidates.select(Axis(0), &order[..elites]);

            let idx = argmin(&costs);
            if best.as_ref().map_or(true, |(c, _)| costs[idx] < *c) {
                best = Some((costs[idx], candidates.index_axis(Axis(0), idx).to_owned()));
            }

            if let Some(m) = elite.mean_axis(Axis(0)) {
                mean = m;
            }
            std = elite.std_axis(Axis(0), 0.0).mapv(|v| v.clamp(MIN_STD, MAX_STD));
        }

        for row in mean.outer_iter_mut() {
            clip_norm(row, self.config.max_norm);
        }
        let mean_cost = evaluate_sequences(
            model,
            start,
            goal,
            &mean.clone().insert_axis(Axis(0)),
            &self.cost,
        )?[0];

        // The refit mean can be worse than the best sample seen
        let (cost, actions) = match best {
            Some((c, seq)) if c < mean_cost => (c, seq),
            _ => (mean_cost, mean),
        };

        self.mean = Some(actions.clone());
        Ok(Plan { actions, cost })
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

#[cfg(test)]
mod tests {
    use super::super::test_models::PointMassModel;
    use super::*;
    use crate::config::PlannerKind;
    use ndarray::array;

    fn config() -> PlannerConfig {
        PlannerConfig {
            kind: PlannerKind::Cem,
            horizon: 6,
            num_samples: 200,
            iterations: 5,
            elite_frac: 0.1,
            max_norm: 1.0,
            terminal_cost_only: true,
            seed: 9,
            ..Default::default()
        }
    }

    #[test]
    fn test_elite_count() {
        assert_eq!(CemPlanner::new(config()).num_elites(), 20);
        let tiny = CemPlanner::new(PlannerConfig {
            num_samples: 3,
            elite_frac: 0.01,
            ..config()
        });
        assert_eq!(tiny.num_elites(), 1);
    }

    #[test]
    fn test_plan_reaches_goal() {
        let model = PointMassModel { action_dim: 2 };
        let mut planner = CemPlanner::new(config());
        let start = array![0.0f32, 0.0];
        let goal = array![-2.0f32, 3.0];

        let plan = planner.plan(&model, start.view(), goal.view()).unwrap();
        let end = &start + &plan.actions.sum_axis(Axis(0));
        let dist = (&end - &goal).mapv(|v| v * v).sum().sqrt();
        assert!(dist < 1.0, "final distance {} too large", dist);
        assert!(plan.cost < 1.0);
    }

    #[test]
    fn test_cost_never_worse_than_zero_plan() {
        let model = PointMassModel { action_dim: 2 };
        let mut planner = CemPlanner::new(config());
        let start = array![1.0f32, 1.0];
        let goal = array![1.5f32, 0.5];
        let plan = planner.plan(&model, start.view(), goal.view()).unwrap();
        // Standing still costs 0.5
        assert!(plan.cost <= 0.5 + 1e-5);
    }

    #[test]
    fn test_warm_start_is_shifted() {
        let model = PointMassModel { action_dim: 2 };
        let mut planner = CemPlanner::new(config());
        let start = array![0.0f32, 0.0];
        let goal = array![4.0f32, 0.0];
        let plan = planner.plan(&model, start.view(), goal.view()).unwrap();
        planner.advance(2);
        let warm = planner.mean.as_ref().unwrap();
        assert_eq!(warm.row(0), plan.actions.row(2));
        assert!(warm.row(5).iter().all(|&v| v == 0.0));
    }
}
