use crate::types::RecordKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    InvalidType,
    OutOfRange,
    /// Advisory: value lies beyond the IQR fences
    Outlier,
    DuplicateKey,
    BoundaryGap,
    Unimputable,
    InsufficientCoverage,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::InvalidType => "invalid_type",
            AnomalyKind::OutOfRange => "out_of_range",
            AnomalyKind::Outlier => "outlier",
            AnomalyKind::DuplicateKey => "duplicate_key",
            AnomalyKind::BoundaryGap => "boundary_gap",
            AnomalyKind::Unimputable => "unimputable",
            AnomalyKind::InsufficientCoverage => "insufficient_coverage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub key: Option<RecordKey>,
    pub field: Option<String>,
    pub kind: AnomalyKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldQuality {
    pub present: usize,
    pub missing: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub outliers: usize,
    pub missing_ratio: f64,
    /// Too sparse to impute; consumers may want to drop the field
    pub insufficient_coverage: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedRecord {
    pub key: RecordKey,
    pub error: String,
}

/// Count, mean and sample standard deviation of one numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub mean: f64,
    /// `None` below two values
    pub std_dev: Option<f64>,
}

impl Distribution {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std_dev = (count > 1).then(|| {
            let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        });
        Some(Self {
            count,
            mean,
            std_dev,
        })
    }
}

fn relative_change(before: f64, after: f64) -> Option<f64> {
    (before != 0.0).then(|| (after - before).abs() / before.abs())
}

/// How imputation moved the distribution of one numeric field: observed
/// values only, against observed plus imputed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationShift {
    pub field: String,
    pub imputed: usize,
    pub observed: Distribution,
    pub completed: Distribution,
}

impl ImputationShift {
    /// Relative change of the mean; `None` when the observed mean is zero.
    pub fn mean_shift(&self) -> Option<f64> {
        relative_change(self.observed.mean, self.completed.mean)
    }

    pub fn std_shift(&self) -> Option<f64> {
        relative_change(self.observed.std_dev?, self.completed.std_dev?)
    }
}

/// Per-snapshot findings of the inspector, later extended by the imputer
/// (boundary gaps, unimputable values, distribution shifts) and the
/// standardizer (unmapped records).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub fields: BTreeMap<String, FieldQuality>,
    pub duplicate_keys: usize,
    pub source_freshness: BTreeMap<String, DateTime<Utc>>,
    pub anomalies: Vec<Anomaly>,
    pub unmapped: Vec<UnmappedRecord>,
    #[serde(default)]
    pub imputation_shifts: Vec<ImputationShift>,
}

impl QualityReport {
    pub fn add_anomaly(
        &mut self,
        key: Option<&RecordKey>,
        field: Option<&str>,
        kind: AnomalyKind,
        detail: impl Into<String>,
    ) {
        self.anomalies.push(Anomaly {
            key: key.cloned(),
            field: field.map(str::to_string),
            kind,
            detail: detail.into(),
        });
    }

    /// True when the inspector rejected the value of `field` on `key`.
    pub fn is_invalid(&self, key: &RecordKey, field: &str) -> bool {
        self.anomalies.iter().any(|a| {
            matches!(a.kind, AnomalyKind::InvalidType | AnomalyKind::OutOfRange)
                && a.key.as_ref() == Some(key)
                && a.field.as_deref() == Some(field)
        })
    }

    pub fn has_insufficient_coverage(&self, field: &str) -> bool {
        self.fields
            .get(field)
            .map(|q| q.insufficient_coverage)
            .unwrap_or(false)
    }

    pub fn insufficient_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, q)| q.insufficient_coverage)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.anomalies.iter().filter(|a| a.kind == kind).count()
    }
}
