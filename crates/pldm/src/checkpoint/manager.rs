//! Checkpoint manager for automatic rotation and best model tracking.

use super::state::{CheckpointState, Checkpointable};
use crate::{PldmError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const EPOCH_PREFIX: &str = "checkpoint_epoch_";
const BEST_STEM: &str = "checkpoint_best";

/// Configuration for checkpoint management.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory to store checkpoints
    pub checkpoint_dir: PathBuf,
    /// Save checkpoint every N epochs
    pub save_every: u64,
    /// Keep only the last N checkpoints (0 = keep all)
    pub keep_last: usize,
    /// Also keep a "best" checkpoint by score
    pub save_best: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            save_every: 5,
            keep_last: 3,
            save_best: true,
        }
    }
}

impl CheckpointConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn save_every(mut self, epochs: u64) -> Self {
        self.save_every = epochs.max(1);
        self
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }

    pub fn save_best(mut self, enabled: bool) -> Self {
        self.save_best = enabled;
        self
    }
}

/// Manages checkpoint lifecycle.
///
/// Every checkpoint is a pair of files: `<stem>.bin` with the component
/// state and `<stem>.json` with its [`CheckpointState`]. Scores are
/// higher-is-better; trainers pass the negated loss.
///
/// # Example
///
/// ```ignore
/// let config = CheckpointConfig::new("./runs/wall")
///     .save_every(5)
///     .keep_last(3);
/// let mut manager = CheckpointManager::new(config);
///
/// // In the training loop:
/// manager.maybe_save(&model, &state, -loss)?;
///
/// // Later:
/// let state = manager.load_best(&mut model)?;
/// ```
pub struct CheckpointManager {
    config: CheckpointConfig,
    best_score: f64,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.checkpoint_dir) {
            tracing::warn!("Failed to create checkpoint directory: {}", e);
        }

        Self {
            config,
            best_score: f64::NEG_INFINITY,
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Save if `state.epoch` is a positive multiple of `save_every`.
    pub fn maybe_save<T: Checkpointable>(
        &mut self,
        component: &T,
        state: &CheckpointState,
        score: f64,
    ) -> Result<Option<PathBuf>> {
        if state.epoch == 0 || state.epoch % self.config.save_every != 0 {
            return Ok(None);
        }
        self.save(component, state, score).map(Some)
    }

    /// Save a checkpoint regardless of epoch. Returns the weight file path.
    pub fn save<T: Checkpointable>(
        &mut self,
        component: &T,
        state: &CheckpointState,
        score: f64,
    ) -> Result<PathBuf> {
        let stem = format!("{}{:06}", EPOCH_PREFIX, state.epoch);
        let path = self.write_pair(&stem, &component.save_state()?, state)?;
        tracing::info!(path = %path.display(), epoch = state.epoch, "Saved checkpoint");

        if self.config.save_best && score > self.best_score {
            self.best_score = score;
            fs::copy(&path, self.bin_path(BEST_STEM))?;
            fs::copy(self.json_path(&stem), self.json_path(BEST_STEM))?;
            tracing::info!(score, epoch = state.epoch, "New best checkpoint");
        }

        if self.config.keep_last > 0 {
            self.cleanup_old_checkpoints()?;
        }
        Ok(path)
    }

    /// Save the final model as `<stem>.bin` / `<stem>.json`, outside rotation.
    pub fn save_named<T: Checkpointable>(
        &self,
        component: &T,
        state: &CheckpointState,
        stem: &str,
    ) -> Result<PathBuf> {
        let path = self.write_pair(stem, &component.save_state()?, state)?;
        tracing::info!(path = %path.display(), "Saved checkpoint");
        Ok(path)
    }

    /// Load the newest epoch checkpoint, if any.
    pub fn load_latest<T: Checkpointable>(
        &self,
        component: &mut T,
    ) -> Result<Option<CheckpointState>> {
        match self.list_checkpoints()?.pop() {
            Some(path) => self.load_from_path(component, path).map(Some),
            None => Ok(None),
        }
    }

    /// Load the best checkpoint, if one was saved.
    pub fn load_best<T: Checkpointable>(
        &self,
        component: &mut T,
    ) -> Result<Option<CheckpointState>> {
        let path = self.bin_path(BEST_STEM);
        if path.exists() {
            self.load_from_path(component, path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Load a specific weight file and its metadata.
    pub fn load_from_path<T: Checkpointable>(
        &self,
        component: &mut T,
        path: impl AsRef<Path>,
    ) -> Result<CheckpointState> {
        let path = path.as_ref();
        let state = Self::read_state(path)?;
        let data = fs::read(path)?;
        component.load_state(&data)?;
        tracing::info!(path = %path.display(), epoch = state.epoch, "Loaded checkpoint");
        Ok(state)
    }

    /// Read the metadata belonging to a weight file without loading it.
    pub fn read_state(path: impl AsRef<Path>) -> Result<CheckpointState> {
        let meta = path.as_ref().with_extension("json");
        let text = fs::read_to_string(&meta).map_err(|e| {
            PldmError::DatasetError(format!(
                "missing checkpoint metadata {}: {}",
                meta.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Weight file to use from a run directory: best, then latest, then a
    /// `<stem>.bin` saved with [`save_named`](Self::save_named).
    pub fn resolve(&self, fallback_stem: &str) -> Result<PathBuf> {
        let best = self.bin_path(BEST_STEM);
        if best.exists() {
            return Ok(best);
        }
        if let Some(latest) = self.list_checkpoints()?.pop() {
            return Ok(latest);
        }
        let named = self.bin_path(fallback_stem);
        if named.exists() {
            return Ok(named);
        }
        Err(PldmError::DatasetError(format!(
            "no checkpoint found in {}",
            self.config.checkpoint_dir.display()
        )))
    }

    /// All epoch checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(EPOCH_PREFIX) && n.ends_with(".bin"))
                    .unwrap_or(false)
            })
            .collect();

        checkpoints.sort();
        Ok(checkpoints)
    }

    fn write_pair(&self, stem: &str, data: &[u8], state: &CheckpointState) -> Result<PathBuf> {
        let path = self.bin_path(stem);
        fs::write(&path, data)?;
        fs::write(self.json_path(stem), serde_json::to_string_pretty(state)?)?;
        Ok(path)
    }

    fn bin_path(&self, stem: &str) -> PathBuf {
        self.config.checkpoint_dir.join(format!("{}.bin", stem))
    }

    fn json_path(&self, stem: &str) -> PathBuf {
        self.config.checkpoint_dir.join(format!("{}.json", stem))
    }

    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let mut checkpoints = self.list_checkpoints()?;

        while checkpoints.len() > self.config.keep_last {
            let old = checkpoints.remove(0);
            for file in [old.clone(), old.with_extension("json")] {
                if let Err(e) = fs::remove_file(&file) {
                    tracing::warn!(
                        path = %file.display(),
                        "Failed to remove old checkpoint: {}",
                        e
                    );
                } else {
                    tracing::debug!(path = %file.display(), "Removed old checkpoint");
                }
            }
        }
        Ok(())
    }
}
