use crate::apis::base::ProviderParser;
use crate::types::{FieldSpec, TimeRange};
use chrono::Datelike;

/// Population-statistics provider: yearly population counts and poverty rate
/// per region code, served behind an OAuth2 client-credentials token
/// endpoint.
pub struct PopulationParser;

impl Default for PopulationParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PopulationParser {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderParser for PopulationParser {
    fn endpoint(&self) -> &'static str {
        "population"
    }

    fn rows_key(&self) -> &'static str {
        "data"
    }

    fn region_column(&self) -> &'static str {
        "codeGeo"
    }

    fn period_column(&self) -> &'static str {
        "year"
    }

    fn columns(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("population_6_17", "population_6_17"),
            ("population_total", "population_total"),
            ("taux_pauvrete", "poverty_rate"),
        ]
    }

    fn schema_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::time_series("population_6_17").range(Some(0.0), None),
            FieldSpec::time_series("population_total").range(Some(0.0), None),
            FieldSpec::continuous("poverty_rate").range(Some(0.0), Some(100.0)),
        ]
    }

    // The statistics API is indexed by year, not by date
    fn window_params(&self, window: &TimeRange) -> Vec<(String, String)> {
        vec![
            ("startYear".to_string(), window.start.year().to_string()),
            ("endYear".to_string(), window.end.year().to_string()),
        ]
    }
}
