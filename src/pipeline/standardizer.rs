use crate::config::{StandardizationOverrides, UnitConversion};
use crate::metrics::QualityMetrics;
use crate::pipeline::imputer::ImputationLog;
use crate::pipeline::report::{AnomalyKind, QualityReport, UnmappedRecord};
use crate::pipeline::schema::DeclaredSchema;
use crate::types::{as_number, as_text, CodeSystem, Contributor, RecordKey, UnifiedRecord};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Region names, legacy region names and INSEE codes onto current INSEE
/// region codes.
static REGIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("île-de-france", "11"),
        ("ile-de-france", "11"),
        ("idf", "11"),
        ("centre-val de loire", "24"),
        ("centre", "24"),
        ("bourgogne-franche-comté", "27"),
        ("bourgogne-franche-comte", "27"),
        ("bourgogne", "27"),
        ("franche-comté", "27"),
        ("normandie", "28"),
        ("hauts-de-france", "32"),
        ("nord-pas-de-calais", "32"),
        ("picardie", "32"),
        ("grand est", "44"),
        ("grand-est", "44"),
        ("alsace", "44"),
        ("lorraine", "44"),
        ("champagne-ardenne", "44"),
        ("pays de la loire", "52"),
        ("bretagne", "53"),
        ("nouvelle-aquitaine", "75"),
        ("aquitaine", "75"),
        ("occitanie", "76"),
        ("languedoc-roussillon", "76"),
        ("midi-pyrénées", "76"),
        ("auvergne-rhône-alpes", "84"),
        ("auvergne-rhone-alpes", "84"),
        ("provence-alpes-côte d'azur", "93"),
        ("provence-alpes-cote d'azur", "93"),
        ("paca", "93"),
        ("corse", "94"),
        ("corsica", "94"),
    ])
});

static DRUGS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("methylphenidate", "stimulant"),
        ("méthylphénidate", "stimulant"),
        ("ritaline", "stimulant"),
        ("concerta", "stimulant"),
        ("atomoxetine", "non_stimulant"),
        ("strattera", "non_stimulant"),
    ])
});

/// Source unit -> (canonical unit, multiplier)
static UNITS: Lazy<HashMap<&'static str, (&'static str, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("months", ("years", 1.0 / 12.0)),
        ("years", ("years", 1.0)),
        ("cents", ("eur", 0.01)),
        ("eur", ("eur", 1.0)),
        ("mg", ("mg", 1.0)),
        ("per_100k", ("per_100k", 1.0)),
        ("minutes", ("minutes", 1.0)),
    ])
});

fn normalize(code: &str) -> String {
    code.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownCodeError {
    #[error("unknown region code '{code}'")]
    Region { code: String },
    #[error("unknown drug code '{code}' in field '{field}'")]
    Drug { field: String, code: String },
    #[error("unknown unit '{unit}' for field '{field}'")]
    Unit { field: String, unit: String },
}

/// Deterministic lookup tables for the canonical schema.
#[derive(Debug, Clone)]
pub struct CodeTables {
    regions: HashMap<String, String>,
    drugs: HashMap<String, String>,
    units: HashMap<String, UnitConversion>,
}

impl Default for CodeTables {
    fn default() -> Self {
        Self::with_overrides(&StandardizationOverrides::default())
    }
}

impl CodeTables {
    /// Built-in tables with `overrides` merged on top. Every canonical code
    /// also maps to itself.
    pub fn with_overrides(overrides: &StandardizationOverrides) -> Self {
        let mut regions: HashMap<String, String> = REGIONS
            .iter()
            .map(|(k, v)| (normalize(k), v.to_string()))
            .collect();
        regions.extend(
            overrides
                .regions
                .iter()
                .map(|(k, v)| (normalize(k), v.clone())),
        );
        let canonical: Vec<String> = regions.values().cloned().collect();
        for code in canonical {
            regions.entry(normalize(&code)).or_insert(code);
        }

        let mut drugs: HashMap<String, String> = DRUGS
            .iter()
            .map(|(k, v)| (normalize(k), v.to_string()))
            .collect();
        drugs.extend(overrides.drugs.iter().map(|(k, v)| (normalize(k), v.clone())));
        let canonical: Vec<String> = drugs.values().cloned().collect();
        for code in canonical {
            drugs.entry(normalize(&code)).or_insert(code);
        }

        let mut units: HashMap<String, UnitConversion> = UNITS
            .iter()
            .map(|(k, (target, factor))| {
                (
                    normalize(k),
                    UnitConversion {
                        target: target.to_string(),
                        factor: *factor,
                    },
                )
            })
            .collect();
        units.extend(overrides.units.iter().map(|(k, v)| (normalize(k), v.clone())));

        Self {
            regions,
            drugs,
            units,
        }
    }

    pub fn region(&self, code: &str) -> Result<&str, UnknownCodeError> {
        self.regions
            .get(&normalize(code))
            .map(String::as_str)
            .ok_or_else(|| UnknownCodeError::Region {
                code: code.to_string(),
            })
    }

    pub fn drug(&self, field: &str, code: &str) -> Result<&str, UnknownCodeError> {
        self.drugs
            .get(&normalize(code))
            .map(String::as_str)
            .ok_or_else(|| UnknownCodeError::Drug {
                field: field.to_string(),
                code: code.to_string(),
            })
    }

    pub fn unit(&self, field: &str, unit: &str) -> Result<&UnitConversion, UnknownCodeError> {
        self.units
            .get(&normalize(unit))
            .ok_or_else(|| UnknownCodeError::Unit {
                field: field.to_string(),
                unit: unit.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

/// A record fully mapped onto canonical codes and units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub key: RecordKey,
    pub fields: BTreeMap<String, FieldValue>,
    /// field -> canonical unit, for unit-bearing fields
    pub units: BTreeMap<String, String>,
    pub provenance: BTreeMap<String, String>,
    pub imputed: BTreeSet<String>,
    /// Present fields whose value failed its type or range check
    #[serde(default)]
    pub invalid: BTreeSet<String>,
    pub contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, Default)]
pub struct StandardizeOutput {
    /// Sorted by canonical key
    pub canonical: Vec<CanonicalRecord>,
    pub unmapped: Vec<UnmappedRecord>,
    /// Imputations, by unified key and field, whose value lost to another
    /// value when spellings were folded together
    pub superseded: Vec<(RecordKey, String)>,
}

fn to_field_value(value: &Value, numeric: bool) -> FieldValue {
    if numeric {
        if let Some(n) = as_number(value) {
            return FieldValue::Number(n);
        }
    }
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(FieldValue::Number)
            .unwrap_or_else(|| FieldValue::Text(n.to_string())),
        other => FieldValue::Text(as_text(other).unwrap_or_else(|| other.to_string())),
    }
}

fn standardize_one(
    record: &UnifiedRecord,
    imputed: Option<&BTreeSet<&str>>,
    invalid: Option<&BTreeSet<&str>>,
    schema: &DeclaredSchema,
    tables: &CodeTables,
) -> Result<CanonicalRecord, UnknownCodeError> {
    let region = tables.region(&record.key.region)?;
    let key = RecordKey::new(region, record.key.period, record.key.indicator.clone());

    let mut fields = BTreeMap::new();
    let mut units = BTreeMap::new();
    for (name, value) in &record.fields {
        if value.is_null() {
            continue;
        }
        let spec = record
            .provenance
            .get(name)
            .and_then(|source| schema.source_spec(source, name))
            .or_else(|| schema.spec(name));
        let Some(spec) = spec else {
            fields.insert(name.clone(), to_field_value(value, false));
            continue;
        };

        if spec.code_system == Some(CodeSystem::Drug) {
            let code = as_text(value).unwrap_or_else(|| value.to_string());
            let mapped = tables.drug(name, &code)?;
            fields.insert(name.clone(), FieldValue::Text(mapped.to_string()));
            continue;
        }

        let mut field_value = to_field_value(value, spec.kind.is_numeric());
        if let Some(unit) = &spec.unit {
            let conversion = tables.unit(name, unit)?;
            if let FieldValue::Number(n) = field_value {
                field_value = FieldValue::Number(n * conversion.factor);
            }
            units.insert(name.clone(), conversion.target.clone());
        }
        fields.insert(name.clone(), field_value);
    }

    Ok(CanonicalRecord {
        key,
        units,
        provenance: record.provenance.clone(),
        imputed: imputed
            .map(|set| set.iter().map(|f| f.to_string()).collect())
            .unwrap_or_default(),
        invalid: invalid
            .map(|set| {
                set.iter()
                    .filter(|f| fields.contains_key(**f))
                    .map(|f| f.to_string())
                    .collect()
            })
            .unwrap_or_default(),
        fields,
        contributors: record.contributors.clone(),
    })
}

/// Fold `incoming` into `existing` when two source spellings land on the same
/// canonical key. A field goes to the source ranked higher in `source_order`;
/// imputed fields carry no provenance and lose to observed ones. The imputed
/// and invalid markers follow the value that wins.
fn absorb(existing: &mut CanonicalRecord, incoming: CanonicalRecord, rank: &HashMap<&str, usize>) {
    let rank_of = |provenance: &BTreeMap<String, String>, field: &str| {
        provenance
            .get(field)
            .and_then(|s| rank.get(s.as_str()).copied())
    };
    for (field, value) in incoming.fields {
        let take = !existing.fields.contains_key(&field)
            || rank_of(&incoming.provenance, &field) > rank_of(&existing.provenance, &field);
        if !take {
            continue;
        }
        existing.fields.insert(field.clone(), value);
        match incoming.provenance.get(&field) {
            Some(source) => {
                existing.provenance.insert(field.clone(), source.clone());
            }
            None => {
                existing.provenance.remove(&field);
            }
        }
        match incoming.units.get(&field) {
            Some(unit) => {
                existing.units.insert(field.clone(), unit.clone());
            }
            None => {
                existing.units.remove(&field);
            }
        }
        if incoming.invalid.contains(&field) {
            existing.invalid.insert(field.clone());
        } else {
            existing.invalid.remove(&field);
        }
        if incoming.imputed.contains(&field) {
            existing.imputed.insert(field);
        } else {
            existing.imputed.remove(&field);
        }
    }
    existing.contributors.extend(incoming.contributors);
}

/// Fields the inspector found malformed or out of range, per unified key.
fn invalid_fields(report: &QualityReport) -> BTreeMap<&RecordKey, BTreeSet<&str>> {
    let mut invalid: BTreeMap<&RecordKey, BTreeSet<&str>> = BTreeMap::new();
    for anomaly in &report.anomalies {
        if !matches!(anomaly.kind, AnomalyKind::InvalidType | AnomalyKind::OutOfRange) {
            continue;
        }
        if let (Some(key), Some(field)) = (&anomaly.key, &anomaly.field) {
            invalid.entry(key).or_default().insert(field.as_str());
        }
    }
    invalid
}

/// Map every record onto the canonical schema. A record with any unknown
/// code is excluded and reported as unmapped; nothing is guessed.
pub fn standardize(
    records: &[UnifiedRecord],
    report: &QualityReport,
    log: &ImputationLog,
    schema: &DeclaredSchema,
    tables: &CodeTables,
    source_order: &[String],
) -> StandardizeOutput {
    let imputed = log.imputed_fields();
    let invalid = invalid_fields(report);
    let rank: HashMap<&str, usize> = source_order
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let mut canonical: BTreeMap<RecordKey, CanonicalRecord> = BTreeMap::new();
    let mut unmapped = Vec::new();
    // (canonical key, field) -> unified key whose imputed value is held
    let mut held: HashMap<(RecordKey, String), RecordKey> = HashMap::new();
    let mut superseded = Vec::new();
    for record in records {
        let mapped = standardize_one(
            record,
            imputed.get(&record.key),
            invalid.get(&record.key),
            schema,
            tables,
        );
        match mapped {
            Ok(mapped) => match canonical.get_mut(&mapped.key) {
                Some(existing) => {
                    let had: BTreeSet<String> = existing.fields.keys().cloned().collect();
                    let held_before = existing.imputed.clone();
                    let incoming = mapped.imputed.clone();
                    absorb(existing, mapped, &rank);

                    for field in incoming {
                        if had.contains(&field) {
                            superseded.push((record.key.clone(), field));
                        } else {
                            held.insert((existing.key.clone(), field), record.key.clone());
                        }
                    }
                    for field in held_before {
                        if existing.imputed.contains(&field) {
                            continue;
                        }
                        if let Some(origin) = held.remove(&(existing.key.clone(), field.clone())) {
                            superseded.push((origin, field));
                        }
                    }
                }
                None => {
                    for field in &mapped.imputed {
                        held.insert((mapped.key.clone(), field.clone()), record.key.clone());
                    }
                    canonical.insert(mapped.key.clone(), mapped);
                }
            },
            Err(e) => {
                warn!("excluding {}: {}", record.key, e);
                unmapped.push(UnmappedRecord {
                    key: record.key.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    QualityMetrics::records_unmapped(unmapped.len());
    info!(
        "standardized {} records, {} unmapped",
        canonical.len(),
        unmapped.len()
    );
    if !superseded.is_empty() {
        debug!("{} imputed values lost to folded records", superseded.len());
    }
    StandardizeOutput {
        canonical: canonical.into_values().collect(),
        unmapped,
        superseded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::imputer::ImputationMethod;
    use crate::types::{FieldSpec, Period, SourceSchema};
    use chrono::Utc;
    use serde_json::json;

    fn schema() -> DeclaredSchema {
        DeclaredSchema::from_sources(&[
            SourceSchema {
                source_id: "claims".to_string(),
                fields: vec![
                    FieldSpec::categorical("drug").drug_code(),
                    FieldSpec::continuous("mean_age").unit("months"),
                    FieldSpec::time_series("prescriptions"),
                ],
            },
            SourceSchema {
                source_id: "registry".to_string(),
                fields: vec![
                    FieldSpec::continuous("mean_age").unit("years"),
                    FieldSpec::time_series("patients_treated"),
                ],
            },
        ])
    }

    fn record(region: &str, source: &str, fields: Vec<(&str, Value)>) -> UnifiedRecord {
        let key = RecordKey::new(region, Period::parse("2023").unwrap(), "adhd");
        let mut record = UnifiedRecord::new(key);
        let mut supplied = Vec::new();
        for (field, value) in fields {
            record.supply(field, value, source);
            supplied.push(field.to_string());
        }
        record.contributors.push(Contributor {
            source_id: source.to_string(),
            source_record_id: region.to_string(),
            collected_at: Utc::now(),
            supplied,
        });
        record
    }

    fn order() -> Vec<String> {
        vec!["claims".to_string(), "registry".to_string()]
    }

    #[test]
    fn maps_codes_and_converts_units_of_the_winning_source() {
        let records = vec![record(
            "Île-de-France",
            "claims",
            vec![("drug", json!("Ritaline")), ("mean_age", json!(120)), ("prescriptions", json!(40))],
        )];
        let out = standardize(&records, &QualityReport::default(), &ImputationLog::default(), &schema(), &CodeTables::default(), &order());
        assert!(out.unmapped.is_empty());
        let canonical = &out.canonical[0];
        assert_eq!(canonical.key.region, "11");
        assert_eq!(canonical.fields["drug"], FieldValue::Text("stimulant".to_string()));
        assert_eq!(canonical.fields["mean_age"], FieldValue::Number(10.0));
        assert_eq!(canonical.units["mean_age"], "years");
        assert_eq!(canonical.fields["prescriptions"], FieldValue::Number(40.0));
        assert_eq!(canonical.provenance["drug"], "claims");
    }

    #[test]
    fn unknown_codes_exclude_the_record() {
        let records = vec![
            record("Atlantis", "claims", vec![("prescriptions", json!(1))]),
            record("bretagne", "claims", vec![("drug", json!("aspirin"))]),
            record("53", "registry", vec![("patients_treated", json!(5))]),
        ];
        let out = standardize(&records, &QualityReport::default(), &ImputationLog::default(), &schema(), &CodeTables::default(), &order());
        assert_eq!(out.canonical.len(), 1);
        assert_eq!(out.unmapped.len(), 2);
        assert!(out.unmapped[0].error.contains("Atlantis"));
        assert!(out.unmapped[1].error.contains("aspirin"));
    }

    #[test]
    fn canonical_collisions_merge_by_priority() {
        let records = vec![
            record("53", "registry", vec![("mean_age", json!(9.0))]),
            record("Bretagne", "claims", vec![("mean_age", json!(120)), ("prescriptions", json!(7))]),
        ];
        let out = standardize(&records, &QualityReport::default(), &ImputationLog::default(), &schema(), &CodeTables::default(), &order());
        assert_eq!(out.canonical.len(), 1);
        let merged = &out.canonical[0];
        assert_eq!(merged.fields["mean_age"], FieldValue::Number(9.0));
        assert_eq!(merged.provenance["mean_age"], "registry");
        assert_eq!(merged.fields["prescriptions"], FieldValue::Number(7.0));
        assert_eq!(merged.contributors.len(), 2);
    }

    #[test]
    fn imputed_fields_are_marked() {
        let mut rec = record("bretagne", "claims", vec![("prescriptions", json!(7))]);
        rec.fields.insert("mean_age".to_string(), json!(60.0));
        let mut log = ImputationLog::default();
        log.append(&rec.key, "mean_age", None, json!(60.0), ImputationMethod::GlobalMedian);
        let out = standardize(&[rec], &QualityReport::default(), &log, &schema(), &CodeTables::default(), &order());
        let canonical = &out.canonical[0];
        assert!(canonical.imputed.contains("mean_age"));
        assert!(!canonical.provenance.contains_key("mean_age"));
        // falls back to the merged declaration, which is the registry's
        assert_eq!(canonical.fields["mean_age"], FieldValue::Number(60.0));
    }

    #[test]
    fn folded_spellings_keep_the_markers_of_the_winning_value() {
        let tables = CodeTables::with_overrides(&StandardizationOverrides {
            regions: BTreeMap::from([("R1".to_string(), "11".to_string())]),
            ..Default::default()
        });
        let mut gap = record("11", "claims", vec![("mean_age", json!(400))]);
        gap.fields.insert("prescriptions".to_string(), json!(7.0));
        let observed = record("R1", "registry", vec![("patients_treated", json!(3))]);
        let mut observed_rx = observed.clone();
        observed_rx.supply("prescriptions", json!(12), "registry");

        let mut log = ImputationLog::default();
        log.append(&gap.key, "prescriptions", None, json!(7.0), ImputationMethod::GroupMedian);
        let mut report = QualityReport::default();
        report.add_anomaly(Some(&gap.key), Some("mean_age"), AnomalyKind::OutOfRange, "400 months");
        report.add_anomaly(Some(&observed_rx.key), Some("prescriptions"), AnomalyKind::InvalidType, "x");

        let out = standardize(&[gap.clone(), observed_rx], &report, &log, &schema(), &tables, &order());
        let merged = &out.canonical[0];
        assert_eq!(merged.key.region, "11");
        assert_eq!(merged.fields["prescriptions"], FieldValue::Number(12.0));
        assert_eq!(merged.provenance["prescriptions"], "registry");
        assert!(merged.imputed.is_empty());
        assert_eq!(merged.invalid, BTreeSet::from(["mean_age".to_string(), "prescriptions".to_string()]));
        assert_eq!(out.superseded, vec![(gap.key.clone(), "prescriptions".to_string())]);

        // the imputed value survives when nothing observed competes with it
        let out = standardize(&[gap, observed], &report, &log, &schema(), &tables, &order());
        let merged = &out.canonical[0];
        assert!(merged.imputed.contains("prescriptions"));
        assert_eq!(merged.invalid, BTreeSet::from(["mean_age".to_string()]));
        assert!(out.superseded.is_empty());
    }

    #[test]
    fn overrides_extend_builtin_tables() {
        let mut overrides = StandardizationOverrides::default();
        overrides.regions.insert("R1".to_string(), "11".to_string());
        let tables = CodeTables::with_overrides(&overrides);
        assert_eq!(tables.region(" r1 ").unwrap(), "11");
        assert_eq!(tables.region("PACA").unwrap(), "93");
        assert_eq!(tables.drug("drug", "non_stimulant").unwrap(), "non_stimulant");
        assert!(tables.unit("x", "furlongs").is_err());
    }
}
