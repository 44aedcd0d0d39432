use crate::app::ports::AdapterFactory;
use crate::config::{PipelineConfig, SourceConfig, WeightConfig};
use crate::error::{PipelineError, Result};
use crate::pipeline::collector::SourceManifest;
use crate::pipeline::orchestrator::Pipeline;
use crate::pipeline::report::{AnomalyKind, QualityReport};
use crate::pipeline::standardizer::CodeTables;
use crate::snapshot::{RunId, RunIdGenerator, RunStatus, Snapshot};
use crate::storage::SnapshotStore;
use crate::types::{SourceAdapter, TimeRange};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Which snapshot a caller wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelector {
    Latest,
    Run(RunId),
}

impl FromStr for SnapshotSelector {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(SnapshotSelector::Latest);
        }
        RunId::parse(s)
            .map(SnapshotSelector::Run)
            .ok_or_else(|| PipelineError::SnapshotNotFound(s.to_string()))
    }
}

/// What a caller gets back from a run, whether or not a snapshot was stored.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub manifest: SourceManifest,
    pub overall_score: Option<f64>,
}

/// Inbound surface for schedulers and presentation layers.
pub struct Observatory {
    config: PipelineConfig,
    tables: CodeTables,
    factory: Arc<dyn AdapterFactory>,
    store: SnapshotStore,
    run_ids: RunIdGenerator,
}

impl Observatory {
    pub fn new(config: PipelineConfig, factory: Arc<dyn AdapterFactory>, store: SnapshotStore) -> Self {
        let tables = CodeTables::with_overrides(&config.standardization);
        Self {
            config,
            tables,
            factory,
            store,
            run_ids: RunIdGenerator::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run with the sources and weights of the loaded configuration.
    pub async fn run_configured(&self, window: TimeRange) -> Result<RunSummary> {
        self.run_pipeline(window, self.config.sources.clone(), self.config.weights)
            .await
    }

    /// Run one window with an explicit source list (ascending priority) and
    /// weights; everything else comes from the loaded configuration.
    pub async fn run_pipeline(
        &self,
        window: TimeRange,
        sources: Vec<SourceConfig>,
        weights: WeightConfig,
    ) -> Result<RunSummary> {
        let config = PipelineConfig {
            sources,
            weights,
            ..self.config.clone()
        };
        config.validate()?;

        let adapters = config
            .sources
            .iter()
            .map(|source| {
                self.factory.create(source).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "no adapter for source '{}' of kind '{}'",
                        source.id, source.kind
                    ))
                })
            })
            .collect::<Result<Vec<Arc<dyn SourceAdapter>>>>()?;

        let run_id = self.run_ids.next(Utc::now());
        info!("starting run {} for {} with {} sources", run_id, window, adapters.len());
        let outcome = Pipeline::new(&config, &self.tables)
            .run(run_id, window, adapters)
            .await?;

        let overall_score = outcome.snapshot.as_ref().map(|s| s.scores.overall);
        if let Some(snapshot) = outcome.snapshot {
            self.store.put(snapshot)?;
        }
        let expired = self.store.evict_expired();
        if !expired.is_empty() {
            info!("evicted {} expired snapshot(s)", expired.len());
        }

        Ok(RunSummary {
            run_id: outcome.run_id,
            status: outcome.status,
            manifest: outcome.manifest,
            overall_score,
        })
    }

    pub fn get_snapshot(&self, selector: &SnapshotSelector) -> Result<Arc<Snapshot>> {
        let found = match selector {
            SnapshotSelector::Latest => self.store.latest(),
            SnapshotSelector::Run(run_id) => self.store.get(run_id),
        };
        found.ok_or_else(|| {
            let wanted = match selector {
                SnapshotSelector::Latest => "latest".to_string(),
                SnapshotSelector::Run(run_id) => run_id.to_string(),
            };
            warn!("snapshot {} not found", wanted);
            PipelineError::SnapshotNotFound(wanted)
        })
    }

    pub fn get_quality_report(&self, selector: &SnapshotSelector) -> Result<QualityReport> {
        Ok(self.get_snapshot(selector)?.report.clone())
    }

    /// Markdown summary of a run's collection and quality.
    pub fn collection_report(&self, selector: &SnapshotSelector) -> Result<String> {
        let snapshot = self.get_snapshot(selector)?;
        Ok(render_collection_report(&snapshot))
    }
}

fn decimal(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_default()
}

fn percent(ratio: Option<f64>) -> String {
    ratio.map(|r| format!("{:.1}", r * 100.0)).unwrap_or_default()
}

pub fn render_collection_report(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Collection report {}", snapshot.run_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Created: {}", snapshot.created_at.to_rfc3339());
    let _ = writeln!(out, "- Window: {}", snapshot.parameters.window);
    let _ = writeln!(out, "- Status: {}", snapshot.status);
    let _ = writeln!(out, "- Records: {}", snapshot.records.len());
    let _ = writeln!(out, "- Overall score: {:.3}", snapshot.scores.overall);
    let _ = writeln!(out, "- Parameters fingerprint: {}", snapshot.parameters.fingerprint);

    let _ = writeln!(out, "\n## Sources\n");
    let _ = writeln!(out, "| Source | Status | Attempts | Records | Skipped rows | Error |");
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    for entry in &snapshot.manifest.entries {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            entry.source_id,
            entry.status.as_str(),
            entry.attempts,
            entry.records,
            entry.skipped_rows.len(),
            entry.error.as_deref().unwrap_or("")
        );
    }

    let report = &snapshot.report;
    let _ = writeln!(out, "\n## Fields\n");
    let _ = writeln!(out, "| Field | Present | Missing | Missing % | Invalid | Duplicates | Outliers | Coverage |");
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|");
    for (name, q) in &report.fields {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.1} | {} | {} | {} | {} |",
            name,
            q.present,
            q.missing,
            q.missing_ratio * 100.0,
            q.invalid,
            q.duplicates,
            q.outliers,
            if q.insufficient_coverage { "insufficient" } else { "ok" }
        );
    }

    let mut by_kind: BTreeMap<AnomalyKind, usize> = BTreeMap::new();
    for anomaly in &report.anomalies {
        *by_kind.entry(anomaly.kind).or_default() += 1;
    }
    if !by_kind.is_empty() {
        let _ = writeln!(out, "\n## Anomalies\n");
        for (kind, count) in &by_kind {
            let _ = writeln!(out, "- {}: {}", kind.as_str(), count);
        }
    }

    let mut by_method: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in snapshot.imputation_log.entries() {
        *by_method.entry(entry.method.as_str()).or_default() += 1;
    }
    if !by_method.is_empty() {
        let _ = writeln!(out, "\n## Imputation\n");
        for (method, count) in &by_method {
            let _ = writeln!(out, "- {}: {}", method, count);
        }
    }

    if !report.imputation_shifts.is_empty() {
        let _ = writeln!(out, "\n## Imputation quality\n");
        let _ = writeln!(out, "| Field | Imputed | Mean before | Mean after | Mean shift % | Std before | Std after | Std shift % |");
        let _ = writeln!(out, "|---|---|---|---|---|---|---|---|");
        for shift in &report.imputation_shifts {
            let _ = writeln!(
                out,
                "| {} | {} | {:.4} | {:.4} | {} | {} | {} | {} |",
                shift.field,
                shift.imputed,
                shift.observed.mean,
                shift.completed.mean,
                percent(shift.mean_shift()),
                decimal(shift.observed.std_dev),
                decimal(shift.completed.std_dev),
                percent(shift.std_shift())
            );
        }
    }

    if !snapshot.indicators.is_empty() {
        let _ = writeln!(out, "\n## Regional indicators\n");
        let _ = writeln!(out, "| Region | Period | Estimated cases | Vulnerability | Unmet needs | Rank |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        for row in &snapshot.indicators {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                row.region,
                row.period,
                row.estimated_cases.map(|c| format!("{:.0}", c)).unwrap_or_default(),
                decimal(row.vulnerability),
                row.unmet_needs.map(|n| format!("{:.0}", n)).unwrap_or_default(),
                row.vulnerability_rank.map(|r| r.to_string()).unwrap_or_default()
            );
        }
    }

    if !report.unmapped.is_empty() {
        let _ = writeln!(out, "\n## Unmapped records\n");
        for unmapped in &report.unmapped {
            let _ = writeln!(out, "- {}: {}", unmapped.key, unmapped.error);
        }
    }
    out
}
