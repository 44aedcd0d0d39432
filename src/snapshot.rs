use crate::config::WeightConfig;
use crate::pipeline::collector::SourceManifest;
use crate::pipeline::imputer::ImputationLog;
use crate::pipeline::indicators::RegionIndicators;
use crate::pipeline::report::QualityReport;
use crate::pipeline::schema::DeclaredSchema;
use crate::pipeline::scorer::SnapshotScores;
use crate::pipeline::standardizer::CanonicalRecord;
use crate::types::TimeRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Mutex;

/// Run identifier: creation time in milliseconds plus a per-millisecond
/// sequence. Lexicographic order is creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn parse(raw: &str) -> Option<Self> {
        let (millis, seq) = raw.split_once('-')?;
        let valid = millis.len() == 13
            && seq.len() == 4
            && millis.bytes().all(|b| b.is_ascii_digit())
            && seq.bytes().all(|b| b.is_ascii_digit());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out strictly increasing run ids even when the clock stalls or
/// steps backwards.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: Mutex<(i64, u32)>,
}

impl RunIdGenerator {
    pub fn next(&self, now: DateTime<Utc>) -> RunId {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let millis = now.timestamp_millis().max(last.0);
        let seq = if millis == last.0 { last.1 + 1 } else { 0 };
        let (millis, seq) = if seq > 9999 { (millis + 1, 0) } else { (millis, seq) };
        *last = (millis, seq);
        RunId(format!("{:013}-{:04}", millis, seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    SucceededWithWarnings,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::SucceededWithWarnings => "succeeded_with_warnings",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub window: TimeRange,
    /// Source ids in ascending merge priority
    pub source_order: Vec<String>,
    pub weights: WeightConfig,
    /// sha256 over the parameters above, for grouping comparable runs
    pub fingerprint: String,
}

impl RunParameters {
    pub fn new(window: TimeRange, source_order: Vec<String>, weights: WeightConfig) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(window.to_string().as_bytes());
        for source in &source_order {
            hasher.update(b"\0");
            hasher.update(source.as_bytes());
        }
        for w in [weights.completeness, weights.consistency, weights.freshness] {
            hasher.update(w.to_bits().to_be_bytes());
        }
        let fingerprint = hex::encode(hasher.finalize())[..16].to_string();
        Self {
            window,
            source_order,
            weights,
            fingerprint,
        }
    }
}

/// Immutable output of one pipeline run. Carries the declared schema so the
/// scores can be recomputed from the snapshot alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub parameters: RunParameters,
    pub status: RunStatus,
    pub manifest: SourceManifest,
    pub schema: DeclaredSchema,
    pub records: Vec<CanonicalRecord>,
    pub report: QualityReport,
    pub imputation_log: ImputationLog,
    #[serde(default)]
    pub indicators: Vec<RegionIndicators>,
    pub scores: SnapshotScores,
}
