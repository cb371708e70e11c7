//! Baselines evaluated on the same goal-reaching tasks as PLDM.

mod gcbc;

pub use gcbc::{GcbcMeta, GcbcPolicy};
