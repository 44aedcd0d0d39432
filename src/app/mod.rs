pub mod observatory;
pub mod ports;

pub use observatory::{Observatory, RunSummary, SnapshotSelector};
