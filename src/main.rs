use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use observatory::apis::factory::HttpAdapterFactory;
use observatory::constants::{DEFAULT_CONFIG_PATH, DEFAULT_LOG_DIR};
use observatory::infra::http_client::ReqwestHttp;
use observatory::pipeline::{SourceManifest, SourceStatus};
use observatory::snapshot::RunStatus;
use observatory::storage::SnapshotStore;
use observatory::types::TimeRange;
use observatory::{logging, metrics, Observatory, PipelineConfig, PipelineError, SnapshotSelector};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "observatory")]
#[command(about = "Collects, inspects, imputes and scores regional health-administration data")]
#[command(version = "0.1.0")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a collection window
    Run {
        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day of the window, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
    },
    /// Print a stored snapshot as JSON
    Show {
        /// Run id, or "latest"
        #[arg(default_value = "latest")]
        run: String,
    },
    /// Print the quality report of a stored snapshot
    Report {
        /// Run id, or "latest"
        #[arg(default_value = "latest")]
        run: String,
        /// Render the collection report as Markdown instead of JSON
        #[arg(long)]
        markdown: bool,
    },
}

fn build_observatory(config_path: &str) -> anyhow::Result<Observatory> {
    let config = PipelineConfig::load(config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    if config.store.archive_dir.is_none() {
        info!("no store.archive_dir configured; snapshots live only for this process");
    }
    let store = SnapshotStore::open(&config.store).context("opening snapshot store")?;
    let factory = Arc::new(HttpAdapterFactory::new(Arc::new(ReqwestHttp::new())));
    Ok(Observatory::new(config, factory, store))
}

fn print_manifest(manifest: &SourceManifest) {
    for entry in &manifest.entries {
        let marker = match entry.status {
            SourceStatus::Succeeded => "✅",
            SourceStatus::PartiallyFailed => "⚠️ ",
            SourceStatus::Failed => "❌",
        };
        println!(
            "   {} {} ({} records, {} attempt(s))",
            marker, entry.source_id, entry.records, entry.attempts
        );
        if let Some(err) = &entry.error {
            println!("      {}", err);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging(DEFAULT_LOG_DIR);
    metrics::init_metrics();

    let cli = Cli::parse();
    let observatory = build_observatory(&cli.config)?;

    match cli.command {
        Commands::Run { from, to } => {
            let Some(window) = TimeRange::new(from, to) else {
                bail!("--from {} is after --to {}", from, to);
            };
            println!("🔄 Running pipeline for {}...", window);
            let summary = match observatory.run_configured(window).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Pipeline run failed: {}", e);
                    if let PipelineError::PipelineTimeout { run_id, manifest, .. } = &e {
                        println!("\n⏱️  Run {}: {}", run_id, RunStatus::Failed);
                        print_manifest(manifest);
                    }
                    return Err(e.into());
                }
            };

            println!("\n📊 Run {}: {}", summary.run_id, summary.status);
            print_manifest(&summary.manifest);
            if let Some(score) = summary.overall_score {
                println!("   Overall quality score: {:.3}", score);
            }
            if summary.status == RunStatus::Failed {
                bail!("no source could be collected");
            }
        }
        Commands::Show { run } => {
            let selector: SnapshotSelector = run.parse()?;
            let snapshot = observatory.get_snapshot(&selector)?;
            println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
        }
        Commands::Report { run, markdown } => {
            let selector: SnapshotSelector = run.parse()?;
            if markdown {
                print!("{}", observatory.collection_report(&selector)?);
            } else {
                let report = observatory.get_quality_report(&selector)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }
    Ok(())
}
