//! Collection and quality pipeline: collector, inspector, imputer,
//! standardizer, indicators and scorer, driven by the orchestrator.

pub mod collector;
pub mod imputer;
pub mod indicators;
pub mod inspector;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod schema;
pub mod scorer;
pub mod standardizer;

pub use collector::{Collector, SourceManifest, SourceOutcome, SourceStatus};
pub use imputer::{ImputationEntry, ImputationLog, ImputationMethod};
pub use indicators::RegionIndicators;
pub use orchestrator::{Pipeline, RunOutcome};
pub use report::{Anomaly, AnomalyKind, Distribution, FieldQuality, ImputationShift, QualityReport, UnmappedRecord};
pub use schema::DeclaredSchema;
pub use scorer::{RecordScore, SnapshotScores};
pub use standardizer::{CanonicalRecord, CodeTables, FieldValue, UnknownCodeError};
