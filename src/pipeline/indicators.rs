use crate::config::IndicatorConfig;
use crate::constants::{
    HOSPITAL_ACCESS_FIELD, POPULATION_6_17_FIELD, POVERTY_RATE_FIELD, PSYCHIATRIST_DENSITY_FIELD,
};
use crate::pipeline::standardizer::CanonicalRecord;
use crate::types::Period;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Derived figures for one region and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionIndicators {
    pub region: String,
    pub period: Period,
    /// 6-17 year olds times the configured prevalence, truncated
    pub estimated_cases: Option<f64>,
    pub vulnerability: Option<f64>,
    /// Estimated cases weighted by vulnerability
    pub unmet_needs: Option<f64>,
    /// 1 is the most vulnerable region of the period; ties share their mean rank
    pub vulnerability_rank: Option<f64>,
}

#[derive(Debug, Default)]
struct Inputs {
    population: Option<f64>,
    poverty: Option<f64>,
    density: Option<f64>,
    access: Option<f64>,
}

/// Weighted sum of poverty, specialist shortage and hospital access time.
pub fn vulnerability(poverty: f64, density: f64, access_minutes: f64, config: &IndicatorConfig) -> f64 {
    poverty * config.poverty_weight
        + (100.0 - density * 10.0) * config.specialist_shortage_weight
        + (access_minutes / 10.0) * config.hospital_access_weight
}

/// Descending ranks with ties averaged, aligned with `values`.
fn rank_descending(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let shared = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = shared;
        }
        start = end;
    }
    ranks
}

/// Combine the canonical records of each region and period into the derived
/// indicators. Inputs may come from different indicator keys; the first
/// record in key order carrying a field supplies it. Regions with none of
/// the inputs are left out.
pub fn derive_indicators(records: &[CanonicalRecord], config: &IndicatorConfig) -> Vec<RegionIndicators> {
    let mut inputs: BTreeMap<(&str, Period), Inputs> = BTreeMap::new();
    for record in records {
        let number = |field: &str| record.fields.get(field).and_then(|v| v.as_f64());
        let entry = inputs
            .entry((record.key.region.as_str(), record.key.period))
            .or_default();
        entry.population = entry.population.or_else(|| number(POPULATION_6_17_FIELD));
        entry.poverty = entry.poverty.or_else(|| number(POVERTY_RATE_FIELD));
        entry.density = entry.density.or_else(|| number(PSYCHIATRIST_DENSITY_FIELD));
        entry.access = entry.access.or_else(|| number(HOSPITAL_ACCESS_FIELD));
    }

    let mut derived: Vec<RegionIndicators> = Vec::new();
    for ((region, period), input) in inputs {
        let estimated_cases = input
            .population
            .map(|population| (population * config.prevalence_rate).floor());
        let vulnerability = match (input.poverty, input.density, input.access) {
            (Some(poverty), Some(density), Some(access)) => {
                Some(vulnerability(poverty, density, access, config))
            }
            _ => None,
        };
        if estimated_cases.is_none() && vulnerability.is_none() {
            continue;
        }
        let unmet_needs = estimated_cases
            .zip(vulnerability)
            .map(|(cases, v)| cases * v / 100.0);
        debug!(
            "{}/{}: cases {:?} vulnerability {:?}",
            region, period, estimated_cases, vulnerability
        );
        derived.push(RegionIndicators {
            region: region.to_string(),
            period,
            estimated_cases,
            vulnerability,
            unmet_needs,
            vulnerability_rank: None,
        });
    }

    let mut by_period: BTreeMap<Period, Vec<usize>> = BTreeMap::new();
    for (index, row) in derived.iter().enumerate() {
        if row.vulnerability.is_some() {
            by_period.entry(row.period).or_default().push(index);
        }
    }
    for indices in by_period.values() {
        let scores: Vec<f64> = indices
            .iter()
            .filter_map(|&i| derived[i].vulnerability)
            .collect();
        for (&index, rank) in indices.iter().zip(rank_descending(&scores)) {
            derived[index].vulnerability_rank = Some(rank);
        }
    }

    info!("derived indicators for {} region-periods", derived.len());
    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::standardizer::FieldValue;
    use crate::types::RecordKey;
    use std::collections::BTreeSet;

    fn record(region: &str, period: &str, indicator: &str, fields: &[(&str, f64)]) -> CanonicalRecord {
        CanonicalRecord {
            key: RecordKey::new(region, Period::parse(period).unwrap(), indicator),
            fields: fields
                .iter()
                .map(|(name, v)| (name.to_string(), FieldValue::Number(*v)))
                .collect(),
            units: BTreeMap::new(),
            provenance: BTreeMap::new(),
            imputed: BTreeSet::new(),
            invalid: BTreeSet::new(),
            contributors: Vec::new(),
        }
    }

    fn region(region: &str, poverty: f64, density: f64, access: f64) -> CanonicalRecord {
        record(
            region,
            "2022",
            "adhd",
            &[
                (POVERTY_RATE_FIELD, poverty),
                (PSYCHIATRIST_DENSITY_FIELD, density),
                (HOSPITAL_ACCESS_FIELD, access),
            ],
        )
    }

    #[test]
    fn combines_inputs_spread_over_indicators() {
        let records = vec![
            record("11", "2022", "adhd", &[(POPULATION_6_17_FIELD, 1_800_000.0)]),
            record("11", "2022", "adhd:ritaline", &[(POVERTY_RATE_FIELD, 15.0)]),
            record(
                "11",
                "2022",
                "care",
                &[(PSYCHIATRIST_DENSITY_FIELD, 4.0), (HOSPITAL_ACCESS_FIELD, 30.0)],
            ),
        ];
        let derived = derive_indicators(&records, &IndicatorConfig::default());
        assert_eq!(derived.len(), 1);
        let row = &derived[0];
        assert_eq!(row.estimated_cases, Some(63_000.0));
        // 15 * 0.4 + (100 - 40) * 0.3 + 3 * 0.3
        let expected = 6.0 + 18.0 + 0.9;
        assert!((row.vulnerability.unwrap() - expected).abs() < 1e-9);
        assert!((row.unmet_needs.unwrap() - 63_000.0 * expected / 100.0).abs() < 1e-6);
        assert_eq!(row.vulnerability_rank, Some(1.0));
    }

    #[test]
    fn estimated_cases_are_truncated() {
        let records = vec![record("53", "2022", "adhd", &[(POPULATION_6_17_FIELD, 1001.0)])];
        let derived = derive_indicators(&records, &IndicatorConfig::default());
        assert_eq!(derived[0].estimated_cases, Some(35.0));
        assert_eq!(derived[0].vulnerability, None);
        assert_eq!(derived[0].unmet_needs, None);
        assert_eq!(derived[0].vulnerability_rank, None);
    }

    #[test]
    fn ranks_are_descending_per_period_with_shared_ties() {
        let mut records = vec![
            region("11", 10.0, 5.0, 20.0),
            region("24", 20.0, 2.0, 60.0),
            region("27", 20.0, 2.0, 60.0),
            region("28", 5.0, 8.0, 10.0),
        ];
        let mut later = region("11", 1.0, 9.0, 5.0);
        later.key.period = Period::parse("2023").unwrap();
        records.push(later);
        let derived = derive_indicators(&records, &IndicatorConfig::default());
        let rank = |r: &str, p: &str| {
            derived
                .iter()
                .find(|d| d.region == r && d.period.to_string() == p)
                .and_then(|d| d.vulnerability_rank)
        };
        assert_eq!(rank("24", "2022"), Some(1.5));
        assert_eq!(rank("27", "2022"), Some(1.5));
        assert_eq!(rank("11", "2022"), Some(3.0));
        assert_eq!(rank("28", "2022"), Some(4.0));
        assert_eq!(rank("11", "2023"), Some(1.0));
    }

    #[test]
    fn records_without_inputs_yield_nothing() {
        let records = vec![record("11", "2022", "adhd", &[("prescriptions", 40.0)])];
        assert!(derive_indicators(&records, &IndicatorConfig::default()).is_empty());
    }
}
