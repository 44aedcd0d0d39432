use crate::config::PipelineConfig;
use crate::error::SourceError;
use crate::metrics::{QualityMetrics, SourcesMetrics};
use crate::pipeline::retry::{fetch_with_retry, FetchAttempt};
use crate::types::{Contributor, RawRecord, RecordKey, SourceAdapter, SourceSchema, TimeRange, UnifiedRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded,
    /// Fetched, but some rows were unusable
    PartiallyFailed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Succeeded => "succeeded",
            SourceStatus::PartiallyFailed => "partially_failed",
            SourceStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub status: SourceStatus,
    pub attempts: u32,
    pub records: usize,
    pub skipped_rows: Vec<String>,
    pub error: Option<String>,
}

/// Per-source result of one collection, in configured priority order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    pub entries: Vec<SourceOutcome>,
}

impl SourceManifest {
    pub fn succeeded_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status != SourceStatus::Failed)
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status == SourceStatus::Succeeded)
    }

    pub fn outcome(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.entries.iter().find(|e| e.source_id == source_id)
    }
}

#[derive(Debug, Clone)]
pub struct CollectionOutput {
    /// Sorted by key
    pub records: Vec<UnifiedRecord>,
    pub manifest: SourceManifest,
    /// Schemas of the sources that returned data, in priority order
    pub schemas: Vec<SourceSchema>,
    /// The deadline passed before every fetch finished. Nothing is merged.
    pub timed_out: bool,
}

/// Fans out one fetch task per source, waits for every task to reach a
/// terminal state or for the run deadline, then merges single-threaded in
/// priority order.
pub struct Collector {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl Collector {
    /// `adapters` must line up with `config.sources`.
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    /// Fetches still running at `deadline` are aborted and reported as
    /// unavailable in the manifest.
    #[instrument(skip_all, fields(window = %window))]
    pub async fn collect(
        &self,
        window: &TimeRange,
        config: &PipelineConfig,
        deadline: Instant,
    ) -> CollectionOutput {
        let (attempts, timed_out) = self.fetch_all(window, config, deadline).await;

        let mut manifest = SourceManifest::default();
        let mut schemas = Vec::new();
        let mut batches = Vec::new();
        for ((source, adapter), attempt) in config.sources.iter().zip(&self.adapters).zip(attempts) {
            let outcome = match attempt.result {
                Ok(batch) => {
                    let status = if batch.skipped_rows.is_empty() {
                        SourceStatus::Succeeded
                    } else {
                        SourceStatus::PartiallyFailed
                    };
                    let outcome = SourceOutcome {
                        source_id: source.id.clone(),
                        status,
                        attempts: attempt.attempts,
                        records: batch.records.len(),
                        skipped_rows: batch.skipped_rows,
                        error: None,
                    };
                    schemas.push(adapter.describe_schema());
                    batches.push(batch.records);
                    outcome
                }
                Err(e) => SourceOutcome {
                    source_id: source.id.clone(),
                    status: SourceStatus::Failed,
                    attempts: attempt.attempts,
                    records: 0,
                    skipped_rows: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            SourcesMetrics::record_outcome(&outcome.source_id, outcome.status.as_str());
            manifest.entries.push(outcome);
        }

        if timed_out {
            warn!(
                "deadline reached with {}/{} sources finished",
                manifest.succeeded_count(),
                manifest.entries.len()
            );
            return CollectionOutput {
                records: Vec::new(),
                manifest,
                schemas,
                timed_out,
            };
        }

        let (records, rejected) = merge(batches);
        if rejected > 0 {
            warn!("{} raw records had no usable key and were dropped", rejected);
        }
        QualityMetrics::records_unified(records.len());
        info!(
            "collected {} unified records from {}/{} sources",
            records.len(),
            manifest.succeeded_count(),
            manifest.entries.len()
        );
        CollectionOutput {
            records,
            manifest,
            schemas,
            timed_out,
        }
    }

    /// Join barrier over one task per source, bounded by `deadline`. Results
    /// come back in the configured order regardless of completion order.
    /// Dropping this future aborts every in-flight task.
    async fn fetch_all(
        &self,
        window: &TimeRange,
        config: &PipelineConfig,
        deadline: Instant,
    ) -> (Vec<FetchAttempt>, bool) {
        let mut tasks = JoinSet::new();
        for (index, (source, adapter)) in config.sources.iter().zip(&self.adapters).enumerate() {
            let adapter = Arc::clone(adapter);
            let source = source.clone();
            let policy = config.retry.clone();
            let window = *window;
            tasks.spawn(async move {
                let attempt = fetch_with_retry(adapter.as_ref(), &window, &source, &policy).await;
                (index, attempt)
            });
        }

        let mut results: Vec<Option<FetchAttempt>> = vec![None; config.sources.len()];
        let mut timed_out = false;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, attempt)))) => results[index] = Some(attempt),
                Ok(Some(Err(e))) => warn!("source fetch task ended abnormally: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    timed_out = true;
                    break;
                }
            }
        }

        let reason = if timed_out {
            "run timed out"
        } else {
            "fetch task aborted"
        };
        let attempts = results
            .into_iter()
            .zip(&config.sources)
            .map(|(result, source)| {
                result.unwrap_or_else(|| FetchAttempt {
                    result: Err(SourceError::unavailable(&source.id, reason)),
                    attempts: 0,
                })
            })
            .collect();
        (attempts, timed_out)
    }
}

/// Merge raw batches given in ascending priority order. A later batch
/// overwrites a field only when it actually supplies a value for it.
/// Returns the unified records sorted by key and the number of rows dropped
/// for lacking a usable key.
pub fn merge(batches: Vec<Vec<RawRecord>>) -> (Vec<UnifiedRecord>, usize) {
    let mut unified: BTreeMap<RecordKey, UnifiedRecord> = BTreeMap::new();
    let mut rejected = 0;
    for batch in batches {
        for raw in batch {
            let Some(key) = raw.key() else {
                rejected += 1;
                continue;
            };
            let record = unified
                .entry(key.clone())
                .or_insert_with(|| UnifiedRecord::new(key));
            let mut supplied = Vec::new();
            for (field, value) in raw.supplied_fields() {
                record.supply(field, value.clone(), &raw.source_id);
                supplied.push(field.clone());
            }
            record.contributors.push(Contributor {
                source_id: raw.source_id.clone(),
                source_record_id: raw.source_record_id.clone(),
                collected_at: raw.collected_at,
                supplied,
            });
        }
    }
    (unified.into_values().collect(), rejected)
}
