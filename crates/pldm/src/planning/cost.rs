//! Goal-reaching cost in latent space.

use ndarray::ArrayView1;

/// Squared L2 distance to the goal latent, either at the final step only or
/// accumulated over the horizon with geometrically growing weights.
#[derive(Clone, Debug, PartialEq)]
pub struct GoalCost {
    terminal_only: bool,
    discount: f32,
}

impl GoalCost {
    pub fn new(terminal_only: bool, discount: f32) -> Self {
        Self {
            terminal_only,
            discount,
        }
    }

    /// Weight of the prediction after step `t` of `horizon`.
    pub fn step_weight(&self, t: usize, horizon: usize) -> f32 {
        if self.terminal_only {
            if t + 1 == horizon {
                1.0
            } else {
                0.0
            }
        } else {
            self.discount.powi(t as i32)
        }
    }

    pub fn distance(&self, latent: ArrayView1<f32>, goal: ArrayView1<f32>) -> f32 {
        latent
            .iter()
            .zip(goal.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}
