mod common;

use common::{config, year_2023, MapFactory, MockSource};
use observatory::config::PipelineConfig;
use observatory::error::PipelineError;
use observatory::infra::snapshot_archive::SnapshotArchive;
use observatory::pipeline::scorer::score;
use observatory::storage::SnapshotStore;
use observatory::types::FieldSpec;
use observatory::{Observatory, SnapshotSelector};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn archived_config(dir: &Path, capacity: usize) -> PipelineConfig {
    let store = format!(
        "[store]\ncapacity = {}\nttl_hours = 24\narchive_dir = \"{}\"\n",
        capacity,
        dir.display()
    );
    config(&["a"], &store)
}

fn source() -> MockSource {
    MockSource::new(
        "a",
        vec![
            FieldSpec::continuous("prevalence").range(Some(0.0), Some(1.0)),
            FieldSpec::time_series("cases"),
        ],
        vec![
            json!({"region": "R1", "period": "2023-Q1", "prevalence": 0.04, "cases": 10}),
            json!({"region": "R1", "period": "2023-Q2", "prevalence": 0.05}),
            json!({"region": "R1", "period": "2023-Q3", "prevalence": 0.06, "cases": 20}),
        ],
    )
}

fn service(config: PipelineConfig) -> Observatory {
    let store = SnapshotStore::open(&config.store).unwrap();
    Observatory::new(config, Arc::new(MapFactory::default().with(source())), store)
}

#[tokio::test]
async fn snapshots_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let obs = service(archived_config(dir.path(), 10));
    let summary = obs.run_configured(year_2023()).await.unwrap();
    let original = obs.get_snapshot(&SnapshotSelector::Latest).unwrap();
    drop(obs);

    let reopened = service(archived_config(dir.path(), 10));
    assert_eq!(reopened.store().len(), 1);
    let restored = reopened
        .get_snapshot(&SnapshotSelector::Run(summary.run_id))
        .unwrap();
    assert_eq!(*restored, *original);
    assert_eq!(restored.imputation_log.len(), 1);
}

#[tokio::test]
async fn archived_snapshots_can_be_rescored() {
    let dir = tempfile::tempdir().unwrap();
    let obs = service(archived_config(dir.path(), 10));
    let summary = obs.run_configured(year_2023()).await.unwrap();
    drop(obs);

    let reopened = service(archived_config(dir.path(), 10));
    let restored = reopened
        .get_snapshot(&SnapshotSelector::Run(summary.run_id))
        .unwrap();
    assert!(restored.schema.spec("cases").is_some());
    let rescored = score(
        &restored.records,
        &restored.schema,
        &restored.parameters.weights,
        &reopened.config().scoring,
        restored.created_at,
    );
    assert_eq!(rescored, restored.scores);
    assert_eq!(rescored.overall.to_bits(), restored.scores.overall.to_bits());
}

#[tokio::test]
async fn tampered_archive_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let obs = service(archived_config(dir.path(), 10));
    let summary = obs.run_configured(year_2023()).await.unwrap();
    drop(obs);

    let path = dir.path().join(format!("{}.json", summary.run_id));
    let content = fs::read_to_string(&path).unwrap();
    fs::write(&path, content.replace("0.05", "0.5")).unwrap();

    let archive = SnapshotArchive::open(dir.path()).unwrap();
    let err = archive.read(&summary.run_id).unwrap_err();
    assert!(matches!(err, PipelineError::Store { .. }));

    let reopened = service(archived_config(dir.path(), 10));
    assert!(reopened.store().is_empty());
}

#[tokio::test]
async fn evicted_snapshots_leave_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let obs = service(archived_config(dir.path(), 1));
    let first = obs.run_configured(year_2023()).await.unwrap();
    let second = obs.run_configured(year_2023()).await.unwrap();

    assert_eq!(obs.store().run_ids(), vec![second.run_id.clone()]);
    assert!(!dir.path().join(format!("{}.json", first.run_id)).exists());
    assert!(dir.path().join(format!("{}.json", second.run_id)).exists());
    assert!(matches!(
        obs.get_snapshot(&SnapshotSelector::Run(first.run_id)),
        Err(PipelineError::SnapshotNotFound(_))
    ));
}
