use tch::{nn, Tensor};

/// Inverse dynamics head: recovers `a_t` from `(z_t, z_{t+1})`.
///
/// Keeps the latent informative about the controllable part of the state.
#[derive(Debug)]
pub struct InverseDynamics {
    seq: nn::Sequential,
}

impl InverseDynamics {
    pub fn new(p: &nn::Path, latent_dim: i64, action_dim: i64, hidden_dim: i64) -> Self {
        let seq = nn::seq()
            .add(nn::linear(p / "l0", 2 * latent_dim, hidden_dim, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(p / "l1", hidden_dim, hidden_dim, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(p / "out", hidden_dim, action_dim, Default::default()));
        Self { seq }
    }

    pub fn forward(&self, z_t: &Tensor, z_next: &Tensor) -> Tensor {
        Tensor::cat(&[z_t.flatten(1, -1), z_next.flatten(1, -1)], 1).apply(&self.seq)
    }
}
