#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use observatory::app::ports::AdapterFactory;
use observatory::config::{PipelineConfig, SourceConfig};
use observatory::error::SourceError;
use observatory::types::{FieldSpec, RawRecord, SourceAdapter, SourceBatch, SourceSchema, TimeRange};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-process adapter serving fixed rows, optionally failing first.
pub struct MockSource {
    pub id: String,
    pub fields: Vec<FieldSpec>,
    pub rows: Vec<Value>,
    pub failures: AtomicU32,
    pub error: Option<SourceError>,
    pub delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl MockSource {
    pub fn new(id: &str, fields: Vec<FieldSpec>, rows: Vec<Value>) -> Self {
        Self {
            id: id.to_string(),
            fields,
            rows,
            failures: AtomicU32::new(0),
            error: None,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `times` calls with `error`; `u32::MAX` fails forever.
    pub fn failing(mut self, times: u32, error: SourceError) -> Self {
        self.failures = AtomicU32::new(times);
        self.error = Some(error);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, _window: &TimeRange, config: &SourceConfig) -> Result<SourceBatch, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.failures.store(remaining - 1, Ordering::SeqCst);
                }
                return Err(error.clone());
            }
        }
        let records = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut fields: BTreeMap<String, Value> =
                    serde_json::from_value(row.clone()).expect("mock rows are objects");
                fields
                    .entry("indicator".to_string())
                    .or_insert_with(|| Value::String(config.indicator.clone()));
                RawRecord {
                    source_id: self.id.clone(),
                    source_record_id: format!("{}-{}", self.id, i),
                    collected_at: Utc::now(),
                    fields,
                }
            })
            .collect();
        Ok(SourceBatch {
            records,
            skipped_rows: Vec::new(),
        })
    }

    fn describe_schema(&self) -> SourceSchema {
        SourceSchema {
            source_id: self.id.clone(),
            fields: self.fields.clone(),
        }
    }
}

/// Hands out pre-built adapters by source id.
#[derive(Default)]
pub struct MapFactory {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl MapFactory {
    pub fn with(mut self, adapter: MockSource) -> Self {
        self.adapters.insert(adapter.id.clone(), Arc::new(adapter));
        self
    }

    pub fn with_shared(mut self, adapter: Arc<MockSource>) -> Self {
        self.adapters.insert(adapter.id.clone(), adapter);
        self
    }
}

impl AdapterFactory for MapFactory {
    fn create(&self, source: &SourceConfig) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source.id).cloned()
    }
}

/// Configuration for sources `ids` (ascending priority) with fast retries.
/// `extra` is placed first, so it may hold top-level keys and tables.
pub fn config(ids: &[&str], extra: &str) -> PipelineConfig {
    let mut toml = format!("{}\n", extra);
    for id in ids {
        toml.push_str(&format!(
            "[[sources]]\nid = \"{}\"\nkind = \"claims\"\nbase_url = \"http://unused.invalid\"\n\n",
            id
        ));
    }
    toml.push_str(
        "[weights]\ncompleteness = 0.5\nconsistency = 0.3\nfreshness = 0.2\n\n\
         [retry]\nbase_delay_ms = 1\nmax_delay_ms = 5\n\n\
         [standardization.regions]\nR1 = \"11\"\nR2 = \"53\"\n",
    );
    PipelineConfig::from_toml(&toml).expect("valid test config")
}

pub fn year_2023() -> TimeRange {
    TimeRange::new(
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
    )
    .unwrap()
}
