use crate::apis::base::{HttpSource, ProviderParser};
use crate::apis::{ClaimsParser, FacilityParser, MedicationParser, PopulationParser};
use crate::app::ports::{AdapterFactory, HttpClientPort};
use crate::config::SourceConfig;
use crate::constants::*;
use crate::types::SourceAdapter;
use std::sync::Arc;

/// Factory function to create parsers directly
pub fn create_parser(kind: &str) -> Option<Box<dyn ProviderParser>> {
    match kind {
        CLAIMS_SOURCE => Some(Box::new(ClaimsParser::new())),
        POPULATION_SOURCE => Some(Box::new(PopulationParser::new())),
        MEDICATION_SOURCE => Some(Box::new(MedicationParser::new())),
        FACILITY_SOURCE => Some(Box::new(FacilityParser::new())),
        _ => None,
    }
}

/// Build the adapter for a configured source
pub fn create_adapter(
    config: &SourceConfig,
    http: Arc<dyn HttpClientPort>,
) -> Option<Arc<dyn SourceAdapter>> {
    let parser = create_parser(&config.kind)?;
    Some(Arc::new(HttpSource::new(&config.id, http, parser)))
}

/// Production factory: every adapter shares one HTTP client.
pub struct HttpAdapterFactory {
    http: Arc<dyn HttpClientPort>,
}

impl HttpAdapterFactory {
    pub fn new(http: Arc<dyn HttpClientPort>) -> Self {
        Self { http }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn create(&self, source: &SourceConfig) -> Option<Arc<dyn SourceAdapter>> {
        create_adapter(source, Arc::clone(&self.http))
    }
}
