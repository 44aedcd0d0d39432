use crate::config::InspectionConfig;
use crate::metrics::QualityMetrics;
use crate::pipeline::report::{AnomalyKind, QualityReport};
use crate::pipeline::schema::DeclaredSchema;
use crate::types::{as_number, as_text, FieldSpec, UnifiedRecord};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Outcome of checking one present value against its declaration.
enum Validity {
    Valid,
    WrongType,
    OutOfRange(f64),
}

fn validate(spec: &FieldSpec, value: &Value) -> Validity {
    if !spec.kind.is_numeric() {
        return match as_text(value) {
            Some(_) => Validity::Valid,
            None => Validity::WrongType,
        };
    }
    let Some(n) = as_number(value) else {
        return Validity::WrongType;
    };
    let below = spec.min.map(|min| n < min).unwrap_or(false);
    let above = spec.max.map(|max| n > max).unwrap_or(false);
    if below || above {
        Validity::OutOfRange(n)
    } else {
        Validity::Valid
    }
}

/// Quartile by linear interpolation between closest ranks; `sorted` must be
/// ascending and non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Tukey fences for one field's distribution, `None` below four values.
pub fn iqr_bounds(values: &[f64], multiplier: f64) -> Option<(f64, f64)> {
    if values.len() < 4 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    Some((q1 - multiplier * iqr, q3 + multiplier * iqr))
}

/// Scan the unified table and build its quality report. Pure: records are
/// only read.
///
/// A field is counted for every record whose contributing sources declare it.
/// Each value is checked against the declaration of the source that supplied
/// it, and outlier fences are computed per declared unit. Coverage is
/// insufficient when the missing share strictly exceeds `coverage_threshold`.
pub fn inspect(
    records: &[UnifiedRecord],
    schema: &DeclaredSchema,
    config: &InspectionConfig,
    coverage_threshold: f64,
) -> QualityReport {
    let mut report = QualityReport::default();
    let mut numeric: BTreeMap<(&str, Option<&str>), Vec<(usize, f64)>> = BTreeMap::new();

    for (index, record) in records.iter().enumerate() {
        for contributor in &record.contributors {
            let entry = report
                .source_freshness
                .entry(contributor.source_id.clone())
                .or_insert(contributor.collected_at);
            if contributor.collected_at > *entry {
                *entry = contributor.collected_at;
            }
        }

        let mut seen_sources = BTreeSet::new();
        for contributor in &record.contributors {
            if !seen_sources.insert(contributor.source_id.as_str()) {
                report.duplicate_keys += 1;
                report.add_anomaly(
                    Some(&record.key),
                    None,
                    AnomalyKind::DuplicateKey,
                    format!("source '{}' reported the key more than once", contributor.source_id),
                );
            }
        }

        for field in schema.expected_fields(&record.contributors) {
            let spec = record
                .provenance
                .get(field)
                .and_then(|source| schema.source_spec(source, field))
                .or_else(|| schema.spec(field));
            let Some(spec) = spec else {
                continue;
            };
            let quality = report.fields.entry(field.to_string()).or_default();
            let Some(value) = record.get(field) else {
                quality.missing += 1;
                continue;
            };
            quality.present += 1;

            let suppliers = record
                .contributors
                .iter()
                .filter(|c| c.supplied.iter().any(|s| s == field))
                .count();
            if suppliers > 1 {
                quality.duplicates += 1;
            }

            match validate(spec, value) {
                Validity::Valid => {
                    if let Some(n) = spec.kind.is_numeric().then(|| as_number(value)).flatten() {
                        numeric
                            .entry((field, spec.unit.as_deref()))
                            .or_default()
                            .push((index, n));
                    }
                }
                Validity::WrongType => {
                    quality.invalid += 1;
                    report.add_anomaly(
                        Some(&record.key),
                        Some(field),
                        AnomalyKind::InvalidType,
                        format!("expected {:?} value, got {}", spec.kind, value),
                    );
                }
                Validity::OutOfRange(n) => {
                    quality.invalid += 1;
                    report.add_anomaly(
                        Some(&record.key),
                        Some(field),
                        AnomalyKind::OutOfRange,
                        format!("{} outside [{:?}, {:?}]", n, spec.min, spec.max),
                    );
                }
            }
        }
    }

    for ((field, _), values) in &numeric {
        let only: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
        let Some((low, high)) = iqr_bounds(&only, config.iqr_multiplier) else {
            continue;
        };
        for (index, value) in values {
            if *value < low || *value > high {
                if let Some(quality) = report.fields.get_mut(*field) {
                    quality.outliers += 1;
                }
                report.add_anomaly(
                    Some(&records[*index].key),
                    Some(field),
                    AnomalyKind::Outlier,
                    format!("{} outside IQR fences [{:.4}, {:.4}]", value, low, high),
                );
            }
        }
    }

    let mut sparse = Vec::new();
    for (field, quality) in report.fields.iter_mut() {
        let expected = quality.present + quality.missing;
        quality.missing_ratio = if expected == 0 {
            0.0
        } else {
            quality.missing as f64 / expected as f64
        };
        if quality.missing_ratio > coverage_threshold {
            quality.insufficient_coverage = true;
            sparse.push((field.clone(), quality.missing, expected));
        }
    }
    for (field, missing, expected) in sparse {
        debug!("{} is missing in {}/{} records", field, missing, expected);
        report.add_anomaly(
            None,
            Some(&field),
            AnomalyKind::InsufficientCoverage,
            format!("missing in {}/{} records", missing, expected),
        );
    }

    let flagged = report.anomalies.len();
    QualityMetrics::anomalies_detected(flagged);
    info!(
        "inspected {} records over {} fields: {} anomalies, {} duplicate keys",
        records.len(),
        report.fields.len(),
        flagged,
        report.duplicate_keys
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Contributor, Period, RecordKey, SourceSchema};
    use chrono::Utc;
    use serde_json::json;

    fn schema() -> DeclaredSchema {
        DeclaredSchema::from_sources(&[SourceSchema {
            source_id: "a".to_string(),
            fields: vec![
                FieldSpec::continuous("rate").range(Some(0.0), Some(1.0)),
                FieldSpec::categorical("sex"),
            ],
        }])
    }

    fn record(region: &str, fields: Vec<(&str, Value)>) -> UnifiedRecord {
        let key = RecordKey::new(region, Period::parse("2023").unwrap(), "adhd");
        let mut record = UnifiedRecord::new(key);
        let mut supplied = Vec::new();
        for (field, value) in fields {
            record.supply(field, value, "a");
            supplied.push(field.to_string());
        }
        record.contributors.push(Contributor {
            source_id: "a".to_string(),
            source_record_id: region.to_string(),
            collected_at: Utc::now(),
            supplied,
        });
        record
    }

    #[test]
    fn counts_missing_invalid_and_out_of_range() {
        let records = vec![
            record("R1", vec![("rate", json!(0.2)), ("sex", json!("F"))]),
            record("R2", vec![("rate", json!(1.7))]),
            record("R3", vec![("rate", json!("n/a")), ("sex", json!("M"))]),
        ];
        let report = inspect(&records, &schema(), &InspectionConfig::default(), 0.5);
        let rate = &report.fields["rate"];
        assert_eq!(rate.present, 3);
        assert_eq!(rate.invalid, 2);
        let sex = &report.fields["sex"];
        assert_eq!(sex.missing, 1);
        assert!(!sex.insufficient_coverage);
        assert!(report.is_invalid(&records[1].key, "rate"));
        assert_eq!(report.count(AnomalyKind::InvalidType), 1);
        assert_eq!(report.count(AnomalyKind::OutOfRange), 1);
    }

    #[test]
    fn flags_sparse_fields_strictly_above_threshold() {
        let records = vec![
            record("R1", vec![("sex", json!("F"))]),
            record("R2", vec![]),
            record("R3", vec![]),
            record("R4", vec![("sex", json!("M")), ("rate", json!(0.1))]),
        ];
        let report = inspect(&records, &schema(), &InspectionConfig::default(), 0.5);
        assert!(!report.has_insufficient_coverage("sex"));
        assert!(report.has_insufficient_coverage("rate"));
        assert_eq!(report.insufficient_fields(), vec!["rate"]);
    }

    #[test]
    fn outliers_are_advisory() {
        let records: Vec<_> = [0.10, 0.11, 0.12, 0.13, 0.95]
            .iter()
            .enumerate()
            .map(|(i, v)| record(&format!("R{}", i), vec![("rate", json!(v))]))
            .collect();
        let report = inspect(&records, &schema(), &InspectionConfig::default(), 0.5);
        assert_eq!(report.fields["rate"].outliers, 1);
        assert_eq!(report.fields["rate"].invalid, 0);
        assert!(!report.is_invalid(&records[4].key, "rate"));
    }

    #[test]
    fn values_are_checked_against_their_suppliers_declaration() {
        let schema = DeclaredSchema::from_sources(&[
            SourceSchema {
                source_id: "a".to_string(),
                fields: vec![FieldSpec::continuous("mean_age")
                    .range(Some(0.0), Some(216.0))
                    .unit("months")],
            },
            SourceSchema {
                source_id: "b".to_string(),
                fields: vec![FieldSpec::continuous("mean_age")
                    .range(Some(0.0), Some(18.0))
                    .unit("years")],
            },
        ]);
        let months = record("R1", vec![("mean_age", json!(120))]);
        let mut years = record("R2", vec![]);
        years.supply("mean_age", json!(19), "b");
        years.contributors[0].source_id = "b".to_string();
        years.contributors[0].supplied = vec!["mean_age".to_string()];

        let report = inspect(&[months.clone(), years.clone()], &schema, &InspectionConfig::default(), 0.5);
        assert!(!report.is_invalid(&months.key, "mean_age"));
        assert!(report.is_invalid(&years.key, "mean_age"));
        assert_eq!(report.count(AnomalyKind::OutOfRange), 1);
        assert_eq!(report.fields["mean_age"].invalid, 1);
    }

    #[test]
    fn repeated_keys_within_one_source_are_counted() {
        let mut twice = record("R1", vec![("rate", json!(0.2))]);
        let again = twice.contributors[0].clone();
        twice.contributors.push(Contributor {
            source_record_id: "R1-bis".to_string(),
            ..again
        });
        let once = record("R2", vec![("rate", json!(0.3))]);
        let report = inspect(&[twice.clone(), once], &schema(), &InspectionConfig::default(), 0.5);
        assert_eq!(report.duplicate_keys, 1);
        let duplicates: Vec<_> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::DuplicateKey)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].key.as_ref(), Some(&twice.key));
        assert!(duplicates[0].detail.contains("'a'"));
        assert_eq!(report.fields["rate"].duplicates, 1);
    }

    #[test]
    fn quartiles_interpolate() {
        let (low, high) = iqr_bounds(&[1.0, 2.0, 3.0, 4.0], 1.5).unwrap();
        // q1 = 1.75, q3 = 3.25
        assert!((low - (-0.5)).abs() < 1e-12);
        assert!((high - 5.5).abs() < 1e-12);
        assert!(iqr_bounds(&[1.0, 2.0, 3.0], 1.5).is_none());
    }

    #[test]
    fn tracks_newest_collection_per_source() {
        let mut first = record("R1", vec![]);
        let older = first.contributors[0].collected_at - chrono::Duration::hours(2);
        first.contributors[0].collected_at = older;
        let second = record("R2", vec![]);
        let newest = second.contributors[0].collected_at;
        let report = inspect(&[first, second], &schema(), &InspectionConfig::default(), 0.5);
        assert_eq!(report.source_freshness["a"], newest);
    }
}
