//! TensorBoard logging backend.

use super::{MetricLogger, Metrics};
use std::path::Path;
use std::sync::Mutex;
use tensorboard_rs::summary_writer::SummaryWriter;

/// Logger that writes scalars to TensorBoard event files under a run
/// directory. Writes are flushed per call so a crashed run keeps its curves.
pub struct TensorBoardLogger {
    writer: Mutex<SummaryWriter>,
    run_dir: std::path::PathBuf,
}

impl TensorBoardLogger {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        let run_dir = log_dir.as_ref().to_path_buf();
        let writer = SummaryWriter::new(&run_dir);
        tracing::info!(dir = %run_dir.display(), "TensorBoard logging enabled");
        Self {
            writer: Mutex::new(writer),
            run_dir,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl MetricLogger for TensorBoardLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.add_scalar(name, value as f32, step as usize);
            let _ = writer.flush();
        }
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        if let Ok(mut writer) = self.writer.lock() {
            for (name, value) in metrics {
                writer.add_scalar(name, *value as f32, step as usize);
            }
            let _ = writer.flush();
        }
    }

    fn close(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
