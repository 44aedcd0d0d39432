use crate::apis::base::ProviderParser;
use crate::types::FieldSpec;

/// Facility-census provider: specialist density and hospital access time
/// per region.
pub struct FacilityParser;

impl Default for FacilityParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FacilityParser {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderParser for FacilityParser {
    fn endpoint(&self) -> &'static str {
        "facilities"
    }

    fn rows_key(&self) -> &'static str {
        "facilities"
    }

    fn region_column(&self) -> &'static str {
        "region"
    }

    fn period_column(&self) -> &'static str {
        "year"
    }

    fn columns(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("densite_pedopsychiatres_pour_100k", "psychiatrist_density"),
            ("temps_acces_chu_minutes", "hospital_access_minutes"),
            ("niveau_accessibilite", "accessibility_level"),
        ]
    }

    fn schema_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::continuous("psychiatrist_density")
                .range(Some(0.0), Some(100.0))
                .unit("per_100k"),
            FieldSpec::continuous("hospital_access_minutes")
                .range(Some(0.0), Some(600.0))
                .unit("minutes"),
            FieldSpec::categorical("accessibility_level"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn census_columns_are_renamed() {
        let row = json!({"region": "Bretagne", "year": 2022,
                         "densite_pedopsychiatres_pour_100k": 2.3,
                         "temps_acces_chu_minutes": 65});
        let fields = FacilityParser::new().parse_row(&row, "adhd").unwrap();
        assert_eq!(fields["psychiatrist_density"], json!(2.3));
        assert_eq!(fields["hospital_access_minutes"], json!(65));
        assert!(!fields.contains_key("accessibility_level"));
    }
}
