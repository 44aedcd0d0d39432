use crate::types::{Contributor, FieldSpec, SourceSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Union of the schemas published by the sources of one run.
///
/// When two sources declare the same field, the higher-priority source's
/// declaration is the merged one; per-source declarations stay available for
/// unit lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredSchema {
    merged: BTreeMap<String, FieldSpec>,
    by_source: BTreeMap<String, SourceSchema>,
}

impl DeclaredSchema {
    /// `schemas` must be in ascending priority order.
    pub fn from_sources(schemas: &[SourceSchema]) -> Self {
        let mut declared = Self::default();
        for schema in schemas {
            for spec in &schema.fields {
                declared.merged.insert(spec.name.clone(), spec.clone());
            }
            declared
                .by_source
                .insert(schema.source_id.clone(), schema.clone());
        }
        declared
    }

    pub fn spec(&self, field: &str) -> Option<&FieldSpec> {
        self.merged.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.merged.values()
    }

    /// Declaration of `field` as emitted by one particular source.
    pub fn source_spec(&self, source_id: &str, field: &str) -> Option<&FieldSpec> {
        self.by_source.get(source_id)?.field(field)
    }

    /// Fields a record is expected to carry: everything declared by the
    /// sources that contributed to it.
    pub fn expected_fields<'a>(&'a self, contributors: &[Contributor]) -> BTreeSet<&'a str> {
        contributors
            .iter()
            .filter_map(|c| self.by_source.get(&c.source_id))
            .flat_map(|schema| schema.fields.iter().map(|f| f.name.as_str()))
            .collect()
    }
}
