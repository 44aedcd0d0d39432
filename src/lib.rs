pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod snapshot;
pub mod storage;
pub mod types;

// Inbound service and outbound ports, and their infrastructure adapters
pub mod app;
pub mod infra;

pub use app::{Observatory, RunSummary, SnapshotSelector};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result, SourceError};
