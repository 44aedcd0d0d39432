use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::QualityMetrics;
use crate::pipeline::collector::{CollectionOutput, Collector, SourceManifest};
use crate::pipeline::imputer::impute;
use crate::pipeline::indicators::derive_indicators;
use crate::pipeline::inspector::inspect;
use crate::pipeline::report::QualityReport;
use crate::pipeline::schema::DeclaredSchema;
use crate::pipeline::scorer::score;
use crate::pipeline::standardizer::{standardize, CodeTables};
use crate::snapshot::{RunId, RunParameters, RunStatus, Snapshot};
use crate::types::{SourceAdapter, TimeRange};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Terminal result of one run. `snapshot` is `None` for failed runs.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub manifest: SourceManifest,
    pub snapshot: Option<Snapshot>,
}

/// Collect, inspect, impute, standardize, derive indicators and score one
/// window.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    tables: &'a CodeTables,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, tables: &'a CodeTables) -> Self {
        Self { config, tables }
    }

    /// Run under the configured whole-run timeout. Fetches still running at
    /// the deadline are aborted and the run fails with
    /// `PipelineError::PipelineTimeout`, whose manifest marks them
    /// unavailable. No snapshot exists for a timed-out run.
    #[instrument(skip_all, fields(run_id = %run_id, window = %window))]
    pub async fn run(
        &self,
        run_id: RunId,
        window: TimeRange,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let limit = self.config.run_timeout();
        let deadline = started + limit;

        let collection = Collector::new(adapters)
            .collect(&window, self.config, deadline)
            .await;
        if collection.timed_out {
            return Err(self.timed_out(run_id, limit, started, collection.manifest));
        }
        if collection.manifest.succeeded_count() == 0 {
            warn!("no source succeeded; run failed");
            QualityMetrics::run_finished(RunStatus::Failed.as_str(), started.elapsed().as_secs_f64());
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::Failed,
                manifest: collection.manifest,
                snapshot: None,
            });
        }

        let snapshot = self.process(run_id, window, collection);
        if Instant::now() >= deadline {
            return Err(self.timed_out(snapshot.run_id, limit, started, snapshot.manifest));
        }
        QualityMetrics::run_finished(snapshot.status.as_str(), started.elapsed().as_secs_f64());
        info!("run {} finished: {}", snapshot.run_id, snapshot.status);
        Ok(RunOutcome {
            run_id: snapshot.run_id.clone(),
            status: snapshot.status,
            manifest: snapshot.manifest.clone(),
            snapshot: Some(snapshot),
        })
    }

    fn timed_out(
        &self,
        run_id: RunId,
        limit: Duration,
        started: Instant,
        manifest: SourceManifest,
    ) -> PipelineError {
        warn!("run {} timed out after {:?}; discarding it", run_id, limit);
        QualityMetrics::run_finished("timeout", started.elapsed().as_secs_f64());
        PipelineError::PipelineTimeout {
            run_id,
            limit,
            manifest,
        }
    }

    /// The single-threaded tail of a run over one in-memory table.
    fn process(&self, run_id: RunId, window: TimeRange, collection: CollectionOutput) -> Snapshot {
        let config = self.config;
        let schema = DeclaredSchema::from_sources(&collection.schemas);

        let mut report = inspect(
            &collection.records,
            &schema,
            &config.inspection,
            config.imputation.coverage_threshold,
        );
        let (records, mut log) = impute(collection.records, &mut report, &schema, &config.imputation);

        let source_order = config.source_order();
        let standardized = standardize(&records, &report, &log, &schema, self.tables, &source_order);
        report.unmapped = standardized.unmapped;
        log.discard(&standardized.superseded);
        let indicators = derive_indicators(&standardized.canonical, &config.indicators);

        let created_at = Utc::now();
        let scores = score(
            &standardized.canonical,
            &schema,
            &config.weights,
            &config.scoring,
            created_at,
        );

        let status = run_status(&collection.manifest, &report, standardized.canonical.is_empty());
        Snapshot {
            run_id,
            created_at,
            parameters: RunParameters::new(window, source_order, config.weights),
            status,
            manifest: collection.manifest,
            schema,
            records: standardized.canonical,
            report,
            imputation_log: log,
            indicators,
            scores,
        }
    }
}

/// Status of a run in which at least one source succeeded.
fn run_status(
    manifest: &SourceManifest,
    report: &QualityReport,
    canonical_empty: bool,
) -> RunStatus {
    let warnings = !manifest.all_succeeded()
        || !report.unmapped.is_empty()
        || !report.insufficient_fields().is_empty()
        || canonical_empty;
    if warnings {
        RunStatus::SucceededWithWarnings
    } else {
        RunStatus::Succeeded
    }
}
