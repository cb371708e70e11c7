//! Offline trajectory dataset with sequence and goal-conditioned sampling.

use super::Trajectory;
use crate::{PldmError, Result};
use ndarray::{Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Current dataset file format version.
pub const DATASET_VERSION: u32 = 1;

/// Description of how a dataset was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub version: u32,
    /// Environment the data was collected in
    pub env_name: String,
    /// Unflattened observation shape
    pub obs_shape: Vec<usize>,
    pub action_dim: usize,
    pub state_dim: usize,
    /// Exploration policy used for collection
    pub policy: String,
    pub seed: u64,
}

impl DatasetMetadata {
    pub fn new(env_name: impl Into<String>, obs_shape: Vec<usize>, action_dim: usize) -> Self {
        Self {
            version: DATASET_VERSION,
            env_name: env_name.into(),
            obs_shape,
            action_dim,
            state_dim: 0,
            policy: String::from("unknown"),
            seed: 0,
        }
    }

    /// Flattened observation size
    pub fn obs_dim(&self) -> usize {
        self.obs_shape.iter().product()
    }
}

/// Contiguous windows of `seq_len` transitions.
#[derive(Clone, Debug)]
pub struct SequenceBatch {
    /// [B, T + 1, obs_dim]
    pub observations: Array3<f32>,
    /// [B, T, action_dim]
    pub actions: Array3<f32>,
    /// [B, T + 1, state_dim]
    pub states: Array3<f32>,
}

/// Single transitions relabelled with a future observation as the goal.
#[derive(Clone, Debug)]
pub struct GoalBatch {
    /// [B, obs_dim]
    pub observations: Array2<f32>,
    /// [B, action_dim]
    pub actions: Array2<f32>,
    /// [B, obs_dim]
    pub goals: Array2<f32>,
}

/// Collection of reward-free trajectories.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfflineDataset {
    pub metadata: DatasetMetadata,
    trajectories: Vec<Trajectory>,
}

impl OfflineDataset {
    pub fn new(metadata: DatasetMetadata) -> Self {
        Self {
            metadata,
            trajectories: Vec::new(),
        }
    }

    /// Add a trajectory. Empty trajectories are skipped.
    pub fn add_trajectory(&mut self, traj: Trajectory) -> Result<()> {
        if traj.is_empty() {
            return Ok(());
        }
        traj.validate()?;

        let obs_dim = traj.observations[0].len();
        if obs_dim != self.metadata.obs_dim() {
            return Err(PldmError::ShapeMismatch {
                expected: vec![self.metadata.obs_dim()],
                actual: vec![obs_dim],
            });
        }
        let act_dim = traj.actions[0].len();
        if act_dim != self.metadata.action_dim {
            return Err(PldmError::ShapeMismatch {
                expected: vec![self.metadata.action_dim],
                actual: vec![act_dim],
            });
        }
        let state_dim = traj.states[0].len();
        if self.trajectories.is_empty() {
            self.metadata.state_dim = state_dim;
        } else if state_dim != self.metadata.state_dim {
            return Err(PldmError::ShapeMismatch {
                expected: vec![self.metadata.state_dim],
                actual: vec![state_dim],
            });
        }

        self.trajectories.push(traj);
        Ok(())
    }

    pub fn trajectories(&self) -> &[Trajectory] {
        &self.trajectories
    }

    pub fn num_trajectories(&self) -> usize {
        self.trajectories.len()
    }

    /// Total number of transitions
    pub fn num_transitions(&self) -> usize {
        self.trajectories.iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Observation and action statistics of the whole dataset.
    pub fn normalizer(&self) -> Result<super::Normalizer> {
        super::Normalizer::from_dataset(self)
    }

    /// Sample `batch_size` windows of `seq_len` transitions, uniformly over
    /// every window that fits inside a single trajectory.
    pub fn sample_sequences<R: Rng>(
        &self,
        batch_size: usize,
        seq_len: usize,
        rng: &mut R,
    ) -> Result<SequenceBatch> {
        let cumulative = self.cumulative_counts(|len| (len + 1).saturating_sub(seq_len));
        let total = cumulative.last().copied().unwrap_or(0);
        if total == 0 || seq_len == 0 {
            return Err(PldmError::DatasetError(format!(
                "no trajectory holds a window of {} transitions",
                seq_len
            )));
        }

        let obs_dim = self.metadata.obs_dim();
        let act_dim = self.metadata.action_dim;
        let state_dim = self.metadata.state_dim;

        let mut observations = Array3::zeros((batch_size, seq_len + 1, obs_dim));
        let mut actions = Array3::zeros((batch_size, seq_len, act_dim));
        let mut states = Array3::zeros((batch_size, seq_len + 1, state_dim));

        for b in 0..batch_size {
            let (traj, start) = locate(&self.trajectories, &cumulative, rng.gen_range(0..total));

            for t in 0..=seq_len {
                for (d, &v) in traj.observations[start + t].iter().enumerate() {
                    observations[[b, t, d]] = v;
                }
                for (d, &v) in traj.states[start + t].iter().enumerate() {
                    states[[b, t, d]] = v;
                }
                if t < seq_len {
                    for (d, &v) in traj.actions[start + t].iter().enumerate() {
                        actions[[b, t, d]] = v;
                    }
                }
            }
        }

        Ok(SequenceBatch {
            observations,
            actions,
            states,
        })
    }

    /// Sample transitions with a hindsight goal drawn uniformly from the
    /// observations that follow them in the same trajectory.
    pub fn sample_goal_conditioned<R: Rng>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<GoalBatch> {
        let cumulative = self.cumulative_counts(|len| len);
        let total = cumulative.last().copied().unwrap_or(0);
        if total == 0 {
            return Err(PldmError::DatasetError("dataset is empty".to_string()));
        }

        let obs_dim = self.metadata.obs_dim();
        let mut observations = Array2::zeros((batch_size, obs_dim));
        let mut actions = Array2::zeros((batch_size, self.metadata.action_dim));
        let mut goals = Array2::zeros((batch_size, obs_dim));

        for b in 0..batch_size {
            let (traj, t) = locate(&self.trajectories, &cumulative, rng.gen_range(0..total));
            let goal_idx = rng.gen_range(t + 1..=traj.len());

            for (d, &v) in traj.observations[t].iter().enumerate() {
                observations[[b, d]] = v;
            }
            for (d, &v) in traj.actions[t].iter().enumerate() {
                actions[[b, d]] = v;
            }
            for (d, &v) in traj.observations[goal_idx].iter().enumerate() {
                goals[[b, d]] = v;
            }
        }

        Ok(GoalBatch {
            observations,
            actions,
            goals,
        })
    }

    /// Write the dataset as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        tracing::info!(
            path = %path.as_ref().display(),
            trajectories = self.num_trajectories(),
            transitions = self.num_transitions(),
            "Saved dataset"
        );
        Ok(())
    }

    /// Read a dataset written by [`OfflineDataset::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let raw: Self = serde_json::from_reader(reader)?;

        if raw.metadata.version != DATASET_VERSION {
            return Err(PldmError::DatasetError(format!(
                "unsupported dataset version {} (expected {})",
                raw.metadata.version, DATASET_VERSION
            )));
        }

        // Re-add every trajectory so widths are checked against the metadata
        let stated_state_dim = raw.metadata.state_dim;
        let mut dataset = Self::new(raw.metadata);
        for traj in raw.trajectories {
            dataset.add_trajectory(traj)?;
        }
        if !dataset.is_empty() && dataset.metadata.state_dim != stated_state_dim {
            return Err(PldmError::ShapeMismatch {
                expected: vec![stated_state_dim],
                actual: vec![dataset.metadata.state_dim],
            });
        }

        tracing::info!(
            path = %path.as_ref().display(),
            env = %dataset.metadata.env_name,
            trajectories = dataset.num_trajectories(),
            transitions = dataset.num_transitions(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Running totals of `count(len)` over trajectories, starting at 0.
    fn cumulative_counts(&self, count: impl Fn(usize) -> usize) -> Vec<usize> {
        let mut cumulative = Vec::with_capacity(self.trajectories.len() + 1);
        cumulative.push(0);
        let mut total = 0;
        for traj in &self.trajectories {
            total += count(traj.len());
            cumulative.push(total);
        }
        cumulative
    }
}

/// Map a flat index into (trajectory, offset) using running totals.
fn locate<'a>(
    trajectories: &'a [Trajectory],
    cumulative: &[usize],
    idx: usize,
) -> (&'a Trajectory, usize) {
    // First entry strictly greater than idx marks the owning trajectory
    let traj_idx = cumulative.partition_point(|&c| c <= idx) - 1;
    (&trajectories[traj_idx], idx - cumulative[traj_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    /// Trajectory on a line where observation == state == step index.
    fn line_trajectory(offset: f32, len: usize) -> Trajectory {
        let mut traj = Trajectory::new(vec![offset], vec![offset]);
        for t in 1..=len {
            let x = offset + t as f32;
            traj.push(vec![1.0], vec![x], vec![x]);
        }
        traj
    }

    fn dataset(lengths: &[usize]) -> OfflineDataset {
        let mut ds = OfflineDataset::new(DatasetMetadata::new("line", vec![1], 1));
        for (i, &len) in lengths.iter().enumerate() {
            ds.add_trajectory(line_trajectory(1000.0 * i as f32, len))
                .unwrap();
        }
        ds
    }

    #[test]
    fn test_counts() {
        let ds = dataset(&[5, 0, 7]);
        assert_eq!(ds.num_trajectories(), 2);
        assert_eq!(ds.num_transitions(), 12);
        assert_eq!(ds.metadata.state_dim, 1);
    }

    #[test]
    fn test_rejects_wrong_obs_dim() {
        let mut ds = OfflineDataset::new(DatasetMetadata::new("line", vec![2], 1));
        let result = ds.add_trajectory(line_trajectory(0.0, 3));
        assert!(matches!(result, Err(PldmError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_windows_stay_inside_trajectories() {
        let ds = dataset(&[3, 10, 4]);
        let mut rng = StdRng::seed_from_u64(7);
        let batch = ds.sample_sequences(64, 4, &mut rng).unwrap();

        assert_eq!(batch.observations.shape(), &[64, 5, 1]);
        assert_eq!(batch.actions.shape(), &[64, 4, 1]);
        for b in 0..64 {
            let first = batch.observations[[b, 0, 0]];
            for t in 1..5 {
                // Consecutive steps of one trajectory differ by exactly 1
                assert_eq!(batch.observations[[b, t, 0]] - first, t as f32);
            }
        }
    }

    #[test]
    fn test_short_trajectories_are_never_sampled() {
        let ds = dataset(&[2, 6]);
        let mut rng = StdRng::seed_from_u64(0);
        let batch = ds.sample_sequences(32, 5, &mut rng).unwrap();
        for b in 0..32 {
            // Only the second trajectory (offset 1000) is long enough
            assert!(batch.observations[[b, 0, 0]] >= 1000.0);
        }
    }

    #[test]
    fn test_sequence_too_long_is_an_error() {
        let ds = dataset(&[3, 4]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ds.sample_sequences(4, 5, &mut rng).is_err());
    }

    #[test]
    fn test_goals_come_from_the_future() {
        let ds = dataset(&[8, 8]);
        let mut rng = StdRng::seed_from_u64(3);
        let batch = ds.sample_goal_conditioned(128, &mut rng).unwrap();

        for b in 0..128 {
            let obs = batch.observations[[b, 0]];
            let goal = batch.goals[[b, 0]];
            assert!(goal > obs);
            // Same trajectory: offsets are 1000 apart
            assert!(goal - obs <= 8.0);
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        let ds = dataset(&[4, 6]);
        ds.save(&path).unwrap();

        let loaded = OfflineDataset::load(&path).unwrap();
        assert_eq!(loaded.metadata, ds.metadata);
        assert_eq!(loaded.trajectories(), ds.trajectories());
    }

    #[test]
    fn test_load_rejects_widths_that_disagree_with_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        let mut ds = dataset(&[3]);
        ds.trajectories[0] = {
            let mut traj = Trajectory::new(vec![0.0, 0.0], vec![0.0]);
            for t in 1..=3 {
                traj.push(vec![1.0], vec![t as f32, 0.0], vec![t as f32]);
            }
            traj
        };
        ds.save(&path).unwrap();

        assert!(matches!(OfflineDataset::load(&path), Err(PldmError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_load_rejects_stale_state_dim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        let mut ds = dataset(&[3]);
        ds.metadata.state_dim = 2;
        ds.save(&path).unwrap();

        assert!(OfflineDataset::load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_other_versions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        let mut ds = dataset(&[4]);
        ds.metadata.version = DATASET_VERSION + 1;
        ds.save(&path).unwrap();

        assert!(matches!(OfflineDataset::load(&path), Err(PldmError::DatasetError(_))));
    }
}
