use crate::config::ImputationConfig;
use crate::metrics::QualityMetrics;
use crate::pipeline::report::{AnomalyKind, Distribution, ImputationShift, QualityReport};
use crate::pipeline::schema::DeclaredSchema;
use crate::types::{as_number, as_text, FieldKind, Granularity, Period, RecordKey, UnifiedRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationMethod {
    GroupMode,
    GlobalMode,
    NearestNeighbors,
    GroupMedian,
    GlobalMedian,
    Interpolation,
}

impl ImputationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImputationMethod::GroupMode => "group_mode",
            ImputationMethod::GlobalMode => "global_mode",
            ImputationMethod::NearestNeighbors => "nearest_neighbors",
            ImputationMethod::GroupMedian => "group_median",
            ImputationMethod::GlobalMedian => "global_median",
            ImputationMethod::Interpolation => "interpolation",
        }
    }
}

impl fmt::Display for ImputationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationEntry {
    pub seq: u64,
    pub key: RecordKey,
    pub field: String,
    pub original: Option<Value>,
    pub imputed: Value,
    pub method: ImputationMethod,
}

/// Audit trail of substituted values. Sequence numbers are assigned on
/// append and never reused, so discarded entries leave gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationLog {
    entries: Vec<ImputationEntry>,
    #[serde(default)]
    next_seq: u64,
}

impl ImputationLog {
    pub fn append(
        &mut self,
        key: &RecordKey,
        field: &str,
        original: Option<Value>,
        imputed: Value,
        method: ImputationMethod,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(ImputationEntry {
            seq,
            key: key.clone(),
            field: field.to_string(),
            original,
            imputed,
            method,
        });
        seq
    }

    /// Drop the entries for `superseded` (key, field) pairs, whose value
    /// never reached the snapshot.
    pub fn discard(&mut self, superseded: &[(RecordKey, String)]) {
        self.entries.retain(|e| {
            !superseded
                .iter()
                .any(|(key, field)| key == &e.key && field == &e.field)
        });
    }

    pub fn entries(&self) -> &[ImputationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &RecordKey, field: &str) -> bool {
        self.entries.iter().any(|e| &e.key == key && e.field == field)
    }

    /// Imputed field names per record.
    pub fn imputed_fields(&self) -> BTreeMap<&RecordKey, BTreeSet<&str>> {
        let mut out: BTreeMap<&RecordKey, BTreeSet<&str>> = BTreeMap::new();
        for entry in &self.entries {
            out.entry(&entry.key).or_default().insert(entry.field.as_str());
        }
        out
    }
}

/// Observed, valid values of one field, indexed by record position.
struct Observed<'a> {
    records: &'a [UnifiedRecord],
    invalid: &'a HashSet<(RecordKey, String)>,
}

impl<'a> Observed<'a> {
    fn value(&self, index: usize, field: &str) -> Option<&'a Value> {
        let record = &self.records[index];
        if self.invalid.contains(&(record.key.clone(), field.to_string())) {
            return None;
        }
        record.get(field)
    }

    fn number(&self, index: usize, field: &str) -> Option<f64> {
        self.value(index, field).and_then(as_number)
    }

    fn same_group(&self, a: usize, b: usize) -> bool {
        let (ka, kb) = (&self.records[a].key, &self.records[b].key);
        ka.region == kb.region && ka.period == kb.period
    }
}

fn mode<'v>(values: impl Iterator<Item = &'v Value>) -> Option<Value> {
    let mut counts: BTreeMap<String, (usize, &'v Value)> = BTreeMap::new();
    for value in values {
        if let Some(text) = as_text(value) {
            counts.entry(text).or_insert((0, value)).0 += 1;
        }
    }
    // BTreeMap iterates in ascending text order, so ties go to the smallest label
    let mut best: Option<(usize, &Value)> = None;
    for (count, value) in counts.values() {
        if best.map(|(c, _)| *count > c).unwrap_or(true) {
            best = Some((*count, value));
        }
    }
    best.map(|(_, v)| v.clone())
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

enum Estimate {
    Value(Value, ImputationMethod),
    BoundaryGap(String),
    Unimputable(String),
}

struct Imputer<'a> {
    observed: Observed<'a>,
    schema: &'a DeclaredSchema,
    config: &'a ImputationConfig,
}

impl<'a> Imputer<'a> {
    fn categorical(&self, target: usize, field: &str) -> Estimate {
        let n = self.observed.records.len();
        let group = mode(
            (0..n)
                .filter(|&i| i != target && self.observed.same_group(i, target))
                .filter_map(|i| self.observed.value(i, field)),
        );
        if let Some(value) = group {
            return Estimate::Value(value, ImputationMethod::GroupMode);
        }
        match mode((0..n).filter_map(|i| self.observed.value(i, field))) {
            Some(value) => Estimate::Value(value, ImputationMethod::GlobalMode),
            None => Estimate::Unimputable("no observed value to take a mode from".to_string()),
        }
    }

    fn continuous(&self, target: usize, field: &str) -> Estimate {
        if let Some(value) = self.nearest_neighbors(target, field) {
            return Estimate::Value(json!(value), ImputationMethod::NearestNeighbors);
        }
        self.median_fallback(target, field)
    }

    /// Mean of the k closest complete records in min-max normalised
    /// predictor space. `None` when predictors or complete neighbours are
    /// insufficient.
    fn nearest_neighbors(&self, target: usize, field: &str) -> Option<f64> {
        let predictors: Vec<(&str, f64)> = self
            .schema
            .fields()
            .filter(|spec| spec.kind.is_numeric() && spec.name != field)
            .filter_map(|spec| {
                self.observed
                    .number(target, &spec.name)
                    .map(|v| (spec.name.as_str(), v))
            })
            .collect();
        if predictors.is_empty() {
            return None;
        }

        let neighbors: Vec<(usize, f64, Vec<f64>)> = (0..self.observed.records.len())
            .filter(|&i| i != target)
            .filter_map(|i| {
                let y = self.observed.number(i, field)?;
                let xs = predictors
                    .iter()
                    .map(|(name, _)| self.observed.number(i, name))
                    .collect::<Option<Vec<f64>>>()?;
                Some((i, y, xs))
            })
            .collect();
        if neighbors.len() < self.config.min_complete_neighbors.max(1) {
            return None;
        }

        let ranges: Vec<(f64, f64)> = predictors
            .iter()
            .enumerate()
            .map(|(p, (_, own))| {
                neighbors
                    .iter()
                    .map(|(_, _, xs)| xs[p])
                    .fold((*own, *own), |(lo, hi), x| (lo.min(x), hi.max(x)))
            })
            .collect();
        let scale = |p: usize, x: f64| {
            let (lo, hi) = ranges[p];
            if hi > lo {
                (x - lo) / (hi - lo)
            } else {
                0.0
            }
        };

        let mut scored: Vec<(f64, &RecordKey, f64)> = neighbors
            .iter()
            .map(|(i, y, xs)| {
                let distance = predictors
                    .iter()
                    .enumerate()
                    .map(|(p, (_, own))| (scale(p, xs[p]) - scale(p, *own)).powi(2))
                    .sum::<f64>()
                    .sqrt();
                (distance, &self.observed.records[*i].key, *y)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        let nearest: Vec<f64> = scored
            .iter()
            .take(self.config.neighbors_k)
            .map(|(_, _, y)| *y)
            .collect();
        Some(nearest.iter().sum::<f64>() / nearest.len() as f64)
    }

    fn median_fallback(&self, target: usize, field: &str) -> Estimate {
        let n = self.observed.records.len();
        let group: Vec<f64> = (0..n)
            .filter(|&i| i != target && self.observed.same_group(i, target))
            .filter_map(|i| self.observed.number(i, field))
            .collect();
        if let Some(value) = median(group) {
            return Estimate::Value(json!(value), ImputationMethod::GroupMedian);
        }
        let global: Vec<f64> = (0..n).filter_map(|i| self.observed.number(i, field)).collect();
        match median(global) {
            Some(value) => Estimate::Value(json!(value), ImputationMethod::GlobalMedian),
            None => Estimate::Unimputable("no observed value to estimate from".to_string()),
        }
    }

    /// Linear interpolation between the closest known points of the same
    /// series. Never extrapolates.
    fn time_series(&self, target: usize, field: &str) -> Estimate {
        let key = &self.observed.records[target].key;
        let granularity: Granularity = key.period.granularity();
        let x = key.period.ordinal();
        let mut before: Option<(i64, f64)> = None;
        let mut after: Option<(i64, f64)> = None;
        for (i, record) in self.observed.records.iter().enumerate() {
            let other: &Period = &record.key.period;
            if i == target
                || record.key.series() != key.series()
                || other.granularity() != granularity
            {
                continue;
            }
            let Some(y) = self.observed.number(i, field) else {
                continue;
            };
            let ox = other.ordinal();
            if ox < x && before.map(|(bx, _)| ox > bx).unwrap_or(true) {
                before = Some((ox, y));
            }
            if ox > x && after.map(|(ax, _)| ox < ax).unwrap_or(true) {
                after = Some((ox, y));
            }
        }
        match (before, after) {
            (Some((x0, y0)), Some((x1, y1))) => {
                let t = (x - x0) as f64 / (x1 - x0) as f64;
                Estimate::Value(json!(y0 + (y1 - y0) * t), ImputationMethod::Interpolation)
            }
            (None, None) => Estimate::Unimputable("series has no known point".to_string()),
            (Some((x0, _)), None) => {
                Estimate::BoundaryGap(format!("after last known point of the series (ordinal {})", x0))
            }
            (None, Some((x1, _))) => {
                Estimate::BoundaryGap(format!("before first known point of the series (ordinal {})", x1))
            }
        }
    }
}

/// Distribution of every numeric field with imputed values, before and after
/// imputation.
fn imputation_shifts(
    records: &[UnifiedRecord],
    log: &ImputationLog,
    schema: &DeclaredSchema,
) -> Vec<ImputationShift> {
    let imputed = log.imputed_fields();
    let fields: BTreeSet<&str> = log.entries().iter().map(|e| e.field.as_str()).collect();
    let mut shifts = Vec::new();
    for field in fields {
        if !schema.spec(field).map(|s| s.kind.is_numeric()).unwrap_or(false) {
            continue;
        }
        let mut observed = Vec::new();
        let mut completed = Vec::new();
        let mut count = 0;
        for record in records {
            let Some(n) = record.number(field) else {
                continue;
            };
            completed.push(n);
            if imputed.get(&record.key).map(|f| f.contains(field)).unwrap_or(false) {
                count += 1;
            } else {
                observed.push(n);
            }
        }
        let (Some(observed), Some(completed)) = (Distribution::of(&observed), Distribution::of(&completed)) else {
            continue;
        };
        let shift = ImputationShift {
            field: field.to_string(),
            imputed: count,
            observed,
            completed,
        };
        debug!(
            "{}: mean shift {:?}, std shift {:?} after {} imputations",
            field,
            shift.mean_shift(),
            shift.std_shift(),
            count
        );
        shifts.push(shift);
    }
    shifts
}

/// Fill absent declared values field by field.
///
/// Estimates only ever read observed, valid values, so the outcome does not
/// depend on record order. Present values are never touched, and fields the
/// report marks as insufficiently covered are skipped entirely. Each
/// substitution is logged before it is written into the record. The report
/// receives the resulting distribution shift of each imputed numeric field.
pub fn impute(
    records: Vec<UnifiedRecord>,
    report: &mut QualityReport,
    schema: &DeclaredSchema,
    config: &ImputationConfig,
) -> (Vec<UnifiedRecord>, ImputationLog) {
    let invalid: HashSet<(RecordKey, String)> = report
        .anomalies
        .iter()
        .filter(|a| matches!(a.kind, AnomalyKind::InvalidType | AnomalyKind::OutOfRange))
        .filter_map(|a| Some((a.key.clone()?, a.field.clone()?)))
        .collect();

    let mut log = ImputationLog::default();
    let mut substitutions: Vec<(usize, String, Value)> = Vec::new();
    {
        let imputer = Imputer {
            observed: Observed {
                records: &records,
                invalid: &invalid,
            },
            schema,
            config,
        };

        for spec in schema.fields() {
            if report.has_insufficient_coverage(&spec.name) {
                debug!("skipping {}: insufficient coverage", spec.name);
                continue;
            }
            for (index, record) in records.iter().enumerate() {
                if record.is_present(&spec.name)
                    || !schema
                        .expected_fields(&record.contributors)
                        .contains(spec.name.as_str())
                {
                    continue;
                }
                let estimate = match spec.kind {
                    FieldKind::Categorical => imputer.categorical(index, &spec.name),
                    FieldKind::Continuous => imputer.continuous(index, &spec.name),
                    FieldKind::TimeSeries => imputer.time_series(index, &spec.name),
                };
                match estimate {
                    Estimate::Value(value, method) => {
                        log.append(&record.key, &spec.name, None, value.clone(), method);
                        substitutions.push((index, spec.name.clone(), value));
                    }
                    Estimate::BoundaryGap(detail) => report.add_anomaly(
                        Some(&record.key),
                        Some(&spec.name),
                        AnomalyKind::BoundaryGap,
                        detail,
                    ),
                    Estimate::Unimputable(detail) => report.add_anomaly(
                        Some(&record.key),
                        Some(&spec.name),
                        AnomalyKind::Unimputable,
                        detail,
                    ),
                }
            }
        }
    }

    let mut records = records;
    for (index, field, value) in substitutions {
        records[index].fields.insert(field, value);
    }

    let mut per_method: BTreeMap<ImputationMethod, usize> = BTreeMap::new();
    for entry in log.entries() {
        *per_method.entry(entry.method).or_default() += 1;
    }
    for (method, count) in &per_method {
        QualityMetrics::values_imputed(method.as_str(), *count);
    }
    report.imputation_shifts = imputation_shifts(&records, &log, schema);
    info!("imputed {} values ({:?})", log.len(), per_method);
    (records, log)
}
