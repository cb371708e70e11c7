//! VICReg-style regularizers on batches of encodings.
//!
//! All functions take `[..., B, D]` tensors: statistics are computed over
//! the batch axis (second to last) and averaged over any leading axes.

use tch::{Kind, Tensor};

/// Hinge on the per-dimension standard deviation:
/// `mean relu(target - sqrt(Var + eps))`.
pub fn variance_loss(z: &Tensor, std_target: f64, eps: f64) -> Tensor {
    let batch_axis = z.dim() as i64 - 2;
    let std = (z.var_dim(Some([batch_axis].as_slice()), true, false) + eps).sqrt();
    (std.neg() + std_target).relu().mean(Kind::Float)
}

/// Sum of squared off-diagonal covariances divided by the dimension.
pub fn covariance_loss(z: &Tensor) -> Tensor {
    let size = z.size();
    let n = size.len();
    let (b, d) = (size[n - 2], size[n - 1]);
    let centered = z - z.mean_dim(Some([n as i64 - 2].as_slice()), true, Kind::Float);
    let cov = centered.transpose(-2, -1).matmul(&centered) / ((b - 1).max(1) as f64);

    let opts = (Kind::Float, z.device());
    let off_diagonal = Tensor::ones([d, d], opts) - Tensor::eye(d, opts);
    let per_batch = (cov * off_diagonal)
        .pow_tensor_scalar(2)
        .sum_dim_intlist(Some([-2i64, -1].as_slice()), false, Kind::Float)
        / d as f64;
    per_batch.mean(Kind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn test_variance_loss_zero_for_spread_batch() {
        let z = Tensor::randn([512, 8], (Kind::Float, Device::Cpu)) * 3.0;
        let loss = variance_loss(&z, 1.0, 1e-4).double_value(&[]);
        assert!(loss < 1e-3, "loss {}", loss);
    }

    #[test]
    fn test_variance_loss_penalizes_collapse() {
        let z = Tensor::zeros([64, 4], (Kind::Float, Device::Cpu));
        let loss = variance_loss(&z, 1.0, 1e-4).double_value(&[]);
        assert!((loss - (1.0 - 1e-2)).abs() < 1e-4);
    }

    #[test]
    fn test_covariance_zero_for_decorrelated_features() {
        // Columns are orthogonal +-1 patterns with zero mean
        let z = Tensor::from_slice(&[
            1.0f32, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0, -1.0,
        ])
        .reshape([4, 2]);
        let loss = covariance_loss(&z).double_value(&[]);
        assert!(loss.abs() < 1e-8);
    }

    #[test]
    fn test_covariance_detects_duplicated_features() {
        let col = Tensor::randn([256, 1], (Kind::Float, Device::Cpu));
        let z = Tensor::cat(&[&col, &col], 1);
        assert!(covariance_loss(&z).double_value(&[]) > 0.5);
    }

    #[test]
    fn test_leading_axes_are_averaged() {
        let z = Tensor::randn([3, 128, 4], (Kind::Float, Device::Cpu));
        let per_step: f64 = (0..3)
            .map(|t| covariance_loss(&z.get(t)).double_value(&[]))
            .sum::<f64>()
            / 3.0;
        let batched = covariance_loss(&z).double_value(&[]);
        assert!((per_step - batched).abs() < 1e-5);
    }
}
