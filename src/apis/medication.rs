use crate::apis::base::ProviderParser;
use crate::types::FieldSpec;

/// Medication-registry provider: treated patients per substance and year.
/// The substance becomes part of the indicator.
pub struct MedicationParser;

impl Default for MedicationParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MedicationParser {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderParser for MedicationParser {
    fn endpoint(&self) -> &'static str {
        "utilisation"
    }

    fn rows_key(&self) -> &'static str {
        "records"
    }

    fn region_column(&self) -> &'static str {
        "region"
    }

    fn period_column(&self) -> &'static str {
        "annee"
    }

    fn id_column(&self) -> Option<&'static str> {
        Some("record_id")
    }

    fn breakdown_column(&self) -> Option<&'static str> {
        Some("substance")
    }

    fn columns(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("substance", "drug"),
            ("nb_patients_traites", "patients_treated"),
            ("dose_mg", "mean_dose"),
        ]
    }

    fn schema_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::categorical("drug").drug_code(),
            FieldSpec::time_series("patients_treated").range(Some(0.0), None),
            FieldSpec::continuous("mean_dose")
                .range(Some(0.0), Some(200.0))
                .unit("mg"),
        ]
    }
}
