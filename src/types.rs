use crate::config::SourceConfig;
use crate::constants::{INDICATOR_FIELD, PERIOD_FIELD, REGION_FIELD};
use crate::error::SourceError;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Inclusive collection window handed to every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// True when any day of the period falls inside the window.
    pub fn overlaps(&self, period: &Period) -> bool {
        let (first, last) = period.span();
        first <= self.end && last >= self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Year,
    Quarter,
    Month,
}

static PERIOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(?:-(?:[Qq]([1-4])|(0[1-9]|1[0-2])))?$").expect("valid period regex")
});

/// A reporting period: `2023`, `2023-Q1` or `2023-05`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    granularity: Granularity,
    /// Quarter (1-4), month (1-12), or 0 for whole years
    sub: u32,
}

impl Period {
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = PERIOD_RE.captures(raw.trim())?;
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        if let Some(q) = caps.get(2) {
            return Some(Self {
                year,
                granularity: Granularity::Quarter,
                sub: q.as_str().parse().ok()?,
            });
        }
        if let Some(m) = caps.get(3) {
            return Some(Self {
                year,
                granularity: Granularity::Month,
                sub: m.as_str().parse().ok()?,
            });
        }
        Some(Self {
            year,
            granularity: Granularity::Year,
            sub: 0,
        })
    }

    /// Accepts strings and bare integer years, which several providers emit.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n.as_i64().and_then(|y| Self::parse(&y.to_string())),
            _ => None,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Position on a per-granularity timeline; consecutive periods differ by one.
    pub fn ordinal(&self) -> i64 {
        let year = self.year as i64;
        match self.granularity {
            Granularity::Year => year,
            Granularity::Quarter => year * 4 + (self.sub as i64 - 1),
            Granularity::Month => year * 12 + (self.sub as i64 - 1),
        }
    }

    /// First and last calendar day covered by the period.
    pub fn span(&self) -> (NaiveDate, NaiveDate) {
        let (first_month, last_month) = match self.granularity {
            Granularity::Year => (1, 12),
            Granularity::Quarter => ((self.sub - 1) * 3 + 1, self.sub * 3),
            Granularity::Month => (self.sub, self.sub),
        };
        let first = NaiveDate::from_ymd_opt(self.year, first_month, 1).unwrap_or(NaiveDate::MIN);
        let next_month_start = if last_month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, last_month + 1, 1)
        };
        let last = next_month_start
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX);
        (first, last)
    }

    pub fn containing(date: NaiveDate, granularity: Granularity) -> Self {
        let sub = match granularity {
            Granularity::Year => 0,
            Granularity::Quarter => (date.month() - 1) / 3 + 1,
            Granularity::Month => date.month(),
        };
        Self {
            year: date.year(),
            granularity,
            sub,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Year => write!(f, "{}", self.year),
            Granularity::Quarter => write!(f, "{}-Q{}", self.year, self.sub),
            Granularity::Month => write!(f, "{}-{:02}", self.year, self.sub),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Period::parse(&value).ok_or_else(|| format!("invalid period '{}'", value))
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

/// Logical identity of a record: the same region, period and indicator
/// reported by different sources describe the same entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub region: String,
    pub period: Period,
    pub indicator: String,
}

impl RecordKey {
    pub fn new(region: impl Into<String>, period: Period, indicator: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            period,
            indicator: indicator.into(),
        }
    }

    /// Series identity used for interpolation: everything except the period.
    pub fn series(&self) -> (&str, &str) {
        (&self.region, &self.indicator)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.period, self.indicator)
    }
}

/// One row as returned by a provider, immutable once collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub source_record_id: String,
    pub collected_at: DateTime<Utc>,
    pub fields: BTreeMap<String, Value>,
}

impl RawRecord {
    /// Extract the logical key; `None` when region or period is unusable.
    pub fn key(&self) -> Option<RecordKey> {
        let region = match self.fields.get(REGION_FIELD)? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let period = Period::from_value(self.fields.get(PERIOD_FIELD)?)?;
        let indicator = match self.fields.get(INDICATOR_FIELD) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return None,
        };
        Some(RecordKey::new(region, period, indicator))
    }

    /// Non-key fields carrying an actual value (`null` counts as absent).
    pub fn supplied_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields
            .iter()
            .filter(|(name, value)| !crate::constants::is_key_field(name) && !value.is_null())
    }
}

/// Which raw row fed a unified record, and which fields it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub source_id: String,
    pub source_record_id: String,
    pub collected_at: DateTime<Utc>,
    pub supplied: Vec<String>,
}

/// Merge of every raw row sharing one logical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub key: RecordKey,
    pub fields: BTreeMap<String, Value>,
    /// field -> source that last won it
    pub provenance: BTreeMap<String, String>,
    pub contributors: Vec<Contributor>,
}

impl UnifiedRecord {
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
            provenance: BTreeMap::new(),
            contributors: Vec::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    pub fn is_present(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Numeric view of a field; numeric strings are accepted.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(as_number)
    }

    /// Overwrite `field` with `value` supplied by `source_id`.
    pub(crate) fn supply(&mut self, field: &str, value: Value, source_id: &str) {
        self.fields.insert(field.to_string(), value);
        self.provenance
            .insert(field.to_string(), source_id.to_string());
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Textual view of a categorical value.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Codes and labels; imputed by mode
    Categorical,
    /// Measurements; imputed from neighbouring records
    Continuous,
    /// Period-indexed measurements; imputed by interpolation along the series
    TimeSeries,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Continuous | FieldKind::TimeSeries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSystem {
    Drug,
}

/// Declared shape of one field, as published by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Unit of the values this source emits for the field
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub code_system: Option<CodeSystem>,
}

impl FieldSpec {
    pub fn categorical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Categorical,
            min: None,
            max: None,
            unit: None,
            code_system: None,
        }
    }

    pub fn continuous(name: &str) -> Self {
        Self {
            kind: FieldKind::Continuous,
            ..Self::categorical(name)
        }
    }

    pub fn time_series(name: &str) -> Self {
        Self {
            kind: FieldKind::TimeSeries,
            ..Self::categorical(name)
        }
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn drug_code(mut self) -> Self {
        self.code_system = Some(CodeSystem::Drug);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub source_id: String,
    pub fields: Vec<FieldSpec>,
}

impl SourceSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// What one successful fetch produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub records: Vec<RawRecord>,
    /// Rows the provider returned but the adapter could not use
    pub skipped_rows: Vec<String>,
}

/// Core trait that all provider adapters implement
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Configured identifier for this source
    fn source_id(&self) -> &str;

    /// Fetch every record of the window. Re-fetching the same window must
    /// return equivalent records.
    async fn fetch(
        &self,
        window: &TimeRange,
        config: &SourceConfig,
    ) -> std::result::Result<SourceBatch, SourceError>;

    /// Field names and types this source emits, used for validation
    fn describe_schema(&self) -> SourceSchema;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_period_granularities() {
        assert_eq!(Period::parse("2023-Q2").unwrap().to_string(), "2023-Q2");
        assert_eq!(Period::parse("2023-q2").unwrap().to_string(), "2023-Q2");
        assert_eq!(Period::parse("2022").unwrap().granularity(), Granularity::Year);
        assert_eq!(Period::parse("2022-07").unwrap().granularity(), Granularity::Month);
        assert!(Period::parse("2022-13").is_none());
        assert!(Period::parse("Q1 2022").is_none());
        assert_eq!(Period::from_value(&json!(2021)).unwrap().to_string(), "2021");
    }

    #[test]
    fn consecutive_quarters_have_consecutive_ordinals() {
        let q4 = Period::parse("2022-Q4").unwrap();
        let q1 = Period::parse("2023-Q1").unwrap();
        assert_eq!(q1.ordinal() - q4.ordinal(), 1);
    }

    #[test]
    fn window_overlap_uses_period_span() {
        let window = TimeRange::new(
            NaiveDate::from_ymd_opt(2023, 3, 15).unwrap(),
            NaiveDate::from_ymd_opt(2023, 4, 1).unwrap(),
        )
        .unwrap();
        assert!(window.overlaps(&Period::parse("2023-Q1").unwrap()));
        assert!(window.overlaps(&Period::parse("2023-Q2").unwrap()));
        assert!(!window.overlaps(&Period::parse("2023-Q3").unwrap()));
        assert!(window.overlaps(&Period::parse("2023").unwrap()));
        assert!(TimeRange::new(window.end, window.start).is_none());
    }

    #[test]
    fn raw_record_key_requires_region_period_and_indicator() {
        let mut fields = BTreeMap::new();
        fields.insert("region".to_string(), json!("R1"));
        fields.insert("period".to_string(), json!("2023-Q1"));
        fields.insert("indicator".to_string(), json!("adhd"));
        fields.insert("cases".to_string(), Value::Null);
        let record = RawRecord {
            source_id: "a".into(),
            source_record_id: "1".into(),
            collected_at: Utc::now(),
            fields,
        };
        let key = record.key().unwrap();
        assert_eq!(key.to_string(), "R1/2023-Q1/adhd");
        assert_eq!(record.supplied_fields().count(), 0);
    }
}
