/// Source kind names accepted in the `kind` field of a `[[sources]]` entry.
/// These are the provider families the crate ships adapters for.
pub const CLAIMS_SOURCE: &str = "claims";
pub const POPULATION_SOURCE: &str = "population";
pub const MEDICATION_SOURCE: &str = "medication";
pub const FACILITY_SOURCE: &str = "facility";

// Reserved field names that form the logical record key
pub const REGION_FIELD: &str = "region";
pub const PERIOD_FIELD: &str = "period";
pub const INDICATOR_FIELD: &str = "indicator";

pub const KEY_FIELDS: [&str; 3] = [REGION_FIELD, PERIOD_FIELD, INDICATOR_FIELD];

// Canonical inputs of the derived regional indicators
pub const POPULATION_6_17_FIELD: &str = "population_6_17";
pub const POVERTY_RATE_FIELD: &str = "poverty_rate";
pub const PSYCHIATRIST_DENSITY_FIELD: &str = "psychiatrist_density";
pub const HOSPITAL_ACCESS_FIELD: &str = "hospital_access_minutes";

/// Indicator assigned to rows whose provider does not name one
pub const DEFAULT_INDICATOR: &str = "adhd";

pub const DEFAULT_CONFIG_PATH: &str = "observatory.toml";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Get all supported source kinds
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![
        CLAIMS_SOURCE,
        POPULATION_SOURCE,
        MEDICATION_SOURCE,
        FACILITY_SOURCE,
    ]
}

pub fn is_key_field(name: &str) -> bool {
    KEY_FIELDS.contains(&name)
}
