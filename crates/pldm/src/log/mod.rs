//! Metric logging for training and evaluation.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` writing through `tracing`
//! - `MemoryLogger` keeping every value, for tests and summaries
//! - `TensorBoardLogger` for visualization (optional)
//! - `CompositeLogger` for multi-backend logging

mod console;
mod logger;
#[cfg(feature = "tensorboard")]
mod tensorboard;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MemoryLogger, MetricLogger, Metrics, NoOpLogger};
#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardLogger;
