use super::{GoalPolicy, Planner, WorldModel};
use crate::{PldmError, Result};
use ndarray::{Array1, Array2, ArrayD};
use std::collections::VecDeque;

/// Model-predictive controller: plans a full horizon toward the goal,
/// executes the first `replan_every` actions, then plans again from the
/// newly observed state.
pub struct PlanningAgent<M: WorldModel, P: Planner> {
    model: M,
    planner: P,
    replan_every: usize,
    queue: VecDeque<Array1<f32>>,
    /// Actions executed since the last plan, used to shift the warm start
    executed: usize,
    goal_cache: Option<(Vec<f32>, Array1<f32>)>,
    last_plan_cost: Option<f32>,
}

impl<M: WorldModel, P: Planner> PlanningAgent<M, P> {
    pub fn new(model: M, planner: P, replan_every: usize) -> Self {
        let replan_every = replan_every.clamp(1, planner.horizon().max(1));
        Self {
            model,
            planner,
            replan_every,
            queue: VecDeque::new(),
            executed: 0,
            goal_cache: None,
            last_plan_cost: None,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    /// Predicted cost of the most recent plan.
    pub fn last_plan_cost(&self) -> Option<f32> {
        self.last_plan_cost
    }

    fn encode_one(&self, observation: &ArrayD<f32>) -> Result<Array1<f32>> {
        let flat: Vec<f32> = observation.iter().copied().collect();
        let batch = Array2::from_shape_vec((1, flat.len()), flat)
            .map_err(|e| PldmError::EnvError(e.to_string()))?;
        let latents = self.model.encode(&batch)?;
        Ok(latents.row(0).to_owned())
    }

    fn goal_latent(&mut self, goal: &ArrayD<f32>) -> Result<Array1<f32>> {
        let key: Vec<f32> = goal.iter().copied().collect();
        if let Some((cached, latent)) = &self.goal_cache {
            if *cached == key {
                return Ok(latent.clone());
            }
        }
        let latent = self.encode_one(goal)?;
        self.goal_cache = Some((key, latent.clone()));
        Ok(latent)
    }

    fn replan(&mut self, observation: &ArrayD<f32>, goal: &ArrayD<f32>) -> Result<()> {
        let start = self.encode_one(observation)?;
        let goal = self.goal_latent(goal)?;
        if self.executed > 0 {
            self.planner.advance(self.executed);
        }
        let plan = self.planner.plan(&self.model, start.view(), goal.view())?;
        tracing::trace!(cost = plan.cost, "replanned");

        self.last_plan_cost = Some(plan.cost);
        self.queue = plan
            .actions
            .outer_iter()
            .take(self.replan_every)
            .map(|row| row.to_owned())
            .collect();
        self.executed = 0;
        Ok(())
    }
}

impl<M: WorldModel, P: Planner> GoalPolicy for PlanningAgent<M, P> {
    fn reset(&mut self) {
        self.planner.reset();
        self.queue.clear();
        self.executed = 0;
        self.goal_cache = None;
        self.last_plan_cost = None;
    }

    fn act(&mut self, observation: &ArrayD<f32>, goal: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if self.queue.is_empty() {
            self.replan(observation, goal)?;
        }
        let action = self
            .queue
            .pop_front()
            .ok_or_else(|| PldmError::TrainingError("planner returned an empty plan".into()))?;
        self.executed += 1;
        Ok(action.into_dyn())
    }

    fn name(&self) -> &str {
        "pldm"
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_models::PointMassModel;
    use super::super::{MppiPlanner, Plan, PlannerConfig};
    use super::*;
    use ndarray::{array, ArrayView1, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Always plans a constant action and counts calls.
    struct FixedPlanner {
        calls: Arc<AtomicUsize>,
        advanced: Arc<AtomicUsize>,
        horizon: usize,
    }

    impl Planner for FixedPlanner {
        fn plan(
            &mut self,
            model: &dyn WorldModel,
            _start: ArrayView1<f32>,
            _goal: ArrayView1<f32>,
        ) -> Result<Plan> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as f32;
            Ok(Plan {
                actions: Array2::from_elem((self.horizon, model.action_dim()), n),
                cost: n,
            })
        }

        fn advance(&mut self, steps: usize) {
            self.advanced.fetch_add(steps, Ordering::SeqCst);
        }

        fn reset(&mut self) {}

        fn horizon(&self) -> usize {
            self.horizon
        }
    }

    fn obs(values: &[f32]) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap()
    }

    #[test]
    fn test_replans_every_n_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let advanced = Arc::new(AtomicUsize::new(0));
        let planner = FixedPlanner {
            calls: calls.clone(),
            advanced: advanced.clone(),
            horizon: 8,
        };
        let mut agent = PlanningAgent::new(PointMassModel { action_dim: 2 }, planner, 3);
        let o = obs(&[0.0, 0.0]);
        let g = obs(&[1.0, 1.0]);

        let actions: Vec<f32> = (0..7).map(|_| agent.act(&o, &g).unwrap()[[0]]).collect();
        assert_eq!(actions, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(advanced.load(Ordering::SeqCst), 6);
        assert_eq!(agent.last_plan_cost(), Some(2.0));
    }

    #[test]
    fn test_replan_interval_clamped_to_horizon() {
        let planner = FixedPlanner {
            calls: Arc::new(AtomicUsize::new(0)),
            advanced: Arc::new(AtomicUsize::new(0)),
            horizon: 4,
        };
        let agent = PlanningAgent::new(PointMassModel { action_dim: 1 }, planner, 100);
        assert_eq!(agent.replan_every, 4);
    }

    #[test]
    fn test_reset_clears_queue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let planner = FixedPlanner {
            calls: calls.clone(),
            advanced: Arc::new(AtomicUsize::new(0)),
            horizon: 8,
        };
        let mut agent = PlanningAgent::new(PointMassModel { action_dim: 2 }, planner, 4);
        let o = obs(&[0.0, 0.0]);
        agent.act(&o, &o).unwrap();
        agent.reset();
        assert!(agent.last_plan_cost().is_none());
        agent.act(&o, &o).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_loop_reaches_goal() {
        let config = PlannerConfig {
            horizon: 6,
            num_samples: 128,
            replan_every: 2,
            seed: 1,
            ..Default::default()
        };
        let mut agent = PlanningAgent::new(
            PointMassModel { action_dim: 2 },
            MppiPlanner::new(config),
            2,
        );
        let goal = array![3.0f32, -2.0];
        let mut pos = array![0.0f32, 0.0];
        for _ in 0..10 {
            let action = agent.act(&pos.clone().into_dyn(), &goal.clone().into_dyn()).unwrap();
            pos[0] += action[[0]];
            pos[1] += action[[1]];
        }
        let dist = (&pos - &goal).mapv(|v| v * v).sum().sqrt();
        assert!(dist < 1.0, "ended {} from goal", dist);
        assert_eq!(agent.name(), "pldm");
    }
}
