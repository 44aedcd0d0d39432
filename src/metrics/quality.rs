//! Quality phase metrics: inspection, imputation, scoring and snapshot store

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct QualityMetrics;

impl QualityMetrics {
    pub fn records_unified(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "quality", "records_unified")).increment(count as u64);
    }

    pub fn anomalies_detected(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "quality", "anomalies")).increment(count as u64);
    }

    pub fn values_imputed(method: &str, count: usize) {
        ::metrics::counter!(
            phase_metric!(counter, "quality", "values_imputed"),
            "method" => method.to_string()
        )
        .increment(count as u64);
    }

    pub fn records_unmapped(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "quality", "records_unmapped")).increment(count as u64);
    }

    pub fn snapshot_scored(score: f64) {
        ::metrics::gauge!(phase_metric!(gauge, "quality", "snapshot_score")).set(score);
    }

    pub fn run_finished(status: &str, duration_secs: f64) {
        ::metrics::counter!(
            phase_metric!(counter, "quality", "runs"),
            "status" => status.to_string()
        )
        .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "quality", "run_duration_seconds"))
            .record(duration_secs);
    }

    pub fn snapshots_evicted(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "quality", "snapshots_evicted")).increment(count as u64);
    }
}

impl PhaseMetrics for QualityMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "quality", "records_unified"));
        let _ = counter!(phase_metric!(counter, "quality", "anomalies"));
        let _ = counter!(phase_metric!(counter, "quality", "values_imputed"));
        let _ = counter!(phase_metric!(counter, "quality", "records_unmapped"));
        let _ = counter!(phase_metric!(counter, "quality", "runs"));
        let _ = counter!(phase_metric!(counter, "quality", "snapshots_evicted"));
        let _ = gauge!(phase_metric!(gauge, "quality", "snapshot_score"));
        let _ = histogram!(phase_metric!(histogram, "quality", "run_duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "quality"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "quality", "records_unified"),
                metric_type: MetricType::Counter,
                help: "Unified records produced by the collector",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "quality", "anomalies"),
                metric_type: MetricType::Counter,
                help: "Anomalies reported by the inspector",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "quality", "values_imputed"),
                metric_type: MetricType::Counter,
                help: "Values filled by the imputer",
                labels: vec!["method"],
            },
            MetricDoc {
                name: phase_metric!(counter, "quality", "records_unmapped"),
                metric_type: MetricType::Counter,
                help: "Records excluded for unknown codes",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "quality", "runs"),
                metric_type: MetricType::Counter,
                help: "Pipeline runs by terminal status",
                labels: vec!["status"],
            },
            MetricDoc {
                name: phase_metric!(counter, "quality", "snapshots_evicted"),
                metric_type: MetricType::Counter,
                help: "Snapshots evicted from the store",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "quality", "snapshot_score"),
                metric_type: MetricType::Gauge,
                help: "Quality score of the latest snapshot",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "quality", "run_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of a pipeline run",
                labels: vec![],
            },
        ]
    }
}
