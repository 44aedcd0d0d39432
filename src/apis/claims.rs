use crate::apis::base::ProviderParser;
use crate::types::FieldSpec;

/// Administrative-claims provider: prescriptions reimbursed per region and
/// period, one row per drug. The drug becomes part of the indicator.
pub struct ClaimsParser;

impl Default for ClaimsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimsParser {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderParser for ClaimsParser {
    fn endpoint(&self) -> &'static str {
        "prescriptions"
    }

    fn rows_key(&self) -> &'static str {
        "results"
    }

    fn region_column(&self) -> &'static str {
        "region"
    }

    fn period_column(&self) -> &'static str {
        "period"
    }

    fn id_column(&self) -> Option<&'static str> {
        Some("id")
    }

    fn breakdown_column(&self) -> Option<&'static str> {
        Some("drug")
    }

    fn columns(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("drug", "drug"),
            ("prescriptions", "prescriptions"),
            ("patients", "patients_treated"),
            ("sex", "sex"),
            ("mean_age_months", "mean_age"),
            ("reimbursed_cents", "reimbursed_amount"),
        ]
    }

    fn schema_fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::categorical("drug").drug_code(),
            FieldSpec::time_series("prescriptions").range(Some(0.0), None),
            FieldSpec::time_series("patients_treated").range(Some(0.0), None),
            FieldSpec::categorical("sex"),
            FieldSpec::continuous("mean_age")
                .range(Some(0.0), Some(18.0 * 12.0))
                .unit("months"),
            FieldSpec::continuous("reimbursed_amount")
                .range(Some(0.0), None)
                .unit("cents"),
        ]
    }
}
