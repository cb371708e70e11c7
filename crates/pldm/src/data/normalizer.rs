//! Feature normalization from dataset statistics.

use super::OfflineDataset;
use crate::{PldmError, Result};
use ndarray::{ArrayViewMut, Axis, Dimension};
use serde::{Deserialize, Serialize};

/// Standard deviations are floored to this value.
pub const MIN_STD: f32 = 1e-6;

/// Mean/std normalization for observations and actions.
///
/// Flat observations get per-feature statistics. Image observations share
/// one scalar mean/std across all pixels, so pixels never visited in the
/// data cannot blow up at evaluation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub obs_mean: Vec<f32>,
    pub obs_std: Vec<f32>,
    pub action_mean: Vec<f32>,
    pub action_std: Vec<f32>,
}

impl Normalizer {
    /// A normalizer that leaves values unchanged.
    pub fn identity(obs_dim: usize, action_dim: usize) -> Self {
        Self {
            obs_mean: vec![0.0; obs_dim],
            obs_std: vec![1.0; obs_dim],
            action_mean: vec![0.0; action_dim],
            action_std: vec![1.0; action_dim],
        }
    }

    /// Compute statistics over every observation and action in the dataset.
    pub fn from_dataset(dataset: &OfflineDataset) -> Result<Self> {
        if dataset.is_empty() {
            return Err(PldmError::DatasetError(
                "cannot compute statistics of an empty dataset".to_string(),
            ));
        }
        let obs_dim = dataset.metadata.obs_dim();
        let action_dim = dataset.metadata.action_dim;
        let trajectories = dataset.trajectories();

        let (obs_mean, obs_std) = if dataset.metadata.obs_shape.len() == 1 {
            feature_stats(
                trajectories.iter().flat_map(|t| t.observations.iter()),
                obs_dim,
            )
        } else {
            let (mean, std) = scalar_stats(
                trajectories
                    .iter()
                    .flat_map(|t| t.observations.iter())
                    .flat_map(|o| o.iter().copied()),
            );
            (vec![mean; obs_dim], vec![std; obs_dim])
        };
        let (action_mean, action_std) =
            feature_stats(trajectories.iter().flat_map(|t| t.actions.iter()), action_dim);

        Ok(Self {
            obs_mean,
            obs_std,
            action_mean,
            action_std,
        })
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_mean.len()
    }

    pub fn action_dim(&self) -> usize {
        self.action_mean.len()
    }

    /// Normalize observations in place. The last axis must be the flattened
    /// observation.
    pub fn normalize_obs<D: Dimension>(&self, mut obs: ArrayViewMut<f32, D>) {
        let last = Axis(obs.ndim() - 1);
        for mut lane in obs.lanes_mut(last) {
            for ((v, m), s) in lane.iter_mut().zip(&self.obs_mean).zip(&self.obs_std) {
                *v = (*v - m) / s;
            }
        }
    }

    /// Normalize actions in place (last axis is the action).
    pub fn normalize_actions<D: Dimension>(&self, mut actions: ArrayViewMut<f32, D>) {
        let last = Axis(actions.ndim() - 1);
        for mut lane in actions.lanes_mut(last) {
            for ((v, m), s) in lane
                .iter_mut()
                .zip(&self.action_mean)
                .zip(&self.action_std)
            {
                *v = (*v - m) / s;
            }
        }
    }

    /// Map normalized actions back to environment units in place.
    pub fn denormalize_actions<D: Dimension>(&self, mut actions: ArrayViewMut<f32, D>) {
        let last = Axis(actions.ndim() - 1);
        for mut lane in actions.lanes_mut(last) {
            for ((v, m), s) in lane
                .iter_mut()
                .zip(&self.action_mean)
                .zip(&self.action_std)
            {
                *v = *v * s + m;
            }
        }
    }
}

fn feature_stats<'a>(rows: impl Iterator<Item = &'a Vec<f32>>, dim: usize) -> (Vec<f32>, Vec<f32>) {
    let mut sum = vec![0.0f64; dim];
    let mut sum_sq = vec![0.0f64; dim];
    let mut count = 0usize;
    for row in rows {
        for (d, &v) in row.iter().enumerate() {
            sum[d] += v as f64;
            sum_sq[d] += (v as f64) * (v as f64);
        }
        count += 1;
    }
    let n = count.max(1) as f64;
    let mean: Vec<f32> = sum.iter().map(|s| (s / n) as f32).collect();
    let std = sum_sq
        .iter()
        .zip(&sum)
        .map(|(sq, s)| {
            let var = (sq / n - (s / n) * (s / n)).max(0.0);
            (var.sqrt() as f32).max(MIN_STD)
        })
        .collect();
    (mean, std)
}

fn scalar_stats(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (mut sum, mut sum_sq, mut count) = (0.0f64, 0.0f64, 0usize);
    for v in values {
        sum += v as f64;
        sum_sq += (v as f64) * (v as f64);
        count += 1;
    }
    let n = count.max(1) as f64;
    let mean = sum / n;
    let var = (sum_sq / n - mean * mean).max(0.0);
    (mean as f32, (var.sqrt() as f32).max(MIN_STD))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetMetadata, Trajectory};
    use ndarray::{array, Array3};

    fn dataset() -> OfflineDataset {
        let mut ds = OfflineDataset::new(DatasetMetadata::new("test", vec![2], 1));
        let mut traj = Trajectory::new(vec![0.0, 5.0], vec![0.0]);
        traj.push(vec![1.0], vec![2.0, 5.0], vec![1.0]);
        traj.push(vec![3.0], vec![4.0, 5.0], vec![2.0]);
        ds.add_trajectory(traj).unwrap();
        ds
    }

    #[test]
    fn test_feature_statistics() {
        let norm = Normalizer::from_dataset(&dataset()).unwrap();
        assert!((norm.obs_mean[0] - 2.0).abs() < 1e-6);
        assert!((norm.obs_mean[1] - 5.0).abs() < 1e-6);
        // Constant feature is floored, not zero
        assert_eq!(norm.obs_std[1], MIN_STD);
        assert!((norm.action_mean[0] - 2.0).abs() < 1e-6);
        assert!((norm.action_std[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_action_round_trip() {
        let norm = Normalizer::from_dataset(&dataset()).unwrap();
        let mut actions = array![[1.0f32], [3.0]];
        norm.normalize_actions(actions.view_mut());
        assert!((actions[[0, 0]] + 1.0).abs() < 1e-6);
        norm.denormalize_actions(actions.view_mut());
        assert!((actions[[1, 0]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalizes_sequence_batches() {
        let norm = Normalizer::identity(2, 1);
        let mut obs = Array3::from_elem((2, 3, 2), 4.0f32);
        norm.normalize_obs(obs.view_mut());
        assert!(obs.iter().all(|&v| v == 4.0));
    }

    #[test]
    fn test_image_observations_share_scalar_stats() {
        let mut ds = OfflineDataset::new(DatasetMetadata::new("img", vec![1, 2, 2], 1));
        let mut traj = Trajectory::new(vec![0.0, 0.0, 0.0, 1.0], vec![0.0]);
        traj.push(vec![0.0], vec![0.0, 0.0, 0.0, 1.0], vec![0.0]);
        ds.add_trajectory(traj).unwrap();

        let norm = Normalizer::from_dataset(&ds).unwrap();
        assert!(norm.obs_mean.iter().all(|&m| (m - 0.25).abs() < 1e-6));
        assert!(norm.obs_std.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let ds = OfflineDataset::new(DatasetMetadata::new("empty", vec![2], 1));
        assert!(Normalizer::from_dataset(&ds).is_err());
    }
}
