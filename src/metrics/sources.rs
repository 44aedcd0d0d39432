//! Source phase metrics: provider requests, retries and per-source outcomes

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct SourcesMetrics;

impl SourcesMetrics {
    pub fn record_request_success(source_id: &str, duration_secs: f64, payload_bytes: usize) {
        ::metrics::counter!(
            phase_metric!(counter, "sources", "requests_success"),
            "source_id" => source_id.to_string()
        )
        .increment(1);
        ::metrics::histogram!(
            phase_metric!(histogram, "sources", "request_duration_seconds"),
            "source_id" => source_id.to_string()
        )
        .record(duration_secs);
        ::metrics::histogram!(phase_metric!(histogram, "sources", "payload_bytes"))
            .record(payload_bytes as f64);
    }

    pub fn record_request_error(source_id: &str, error_type: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "sources", "requests_error"),
            "source_id" => source_id.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }

    pub fn record_retry(source_id: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "sources", "retries"),
            "source_id" => source_id.to_string()
        )
        .increment(1);
    }

    /// Terminal outcome of one source within a run
    pub fn record_outcome(source_id: &str, status: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "sources", "outcomes"),
            "source_id" => source_id.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }
}

impl PhaseMetrics for SourcesMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "sources", "requests_success"));
        let _ = counter!(phase_metric!(counter, "sources", "requests_error"));
        let _ = counter!(phase_metric!(counter, "sources", "retries"));
        let _ = counter!(phase_metric!(counter, "sources", "outcomes"));
        let _ = histogram!(phase_metric!(histogram, "sources", "request_duration_seconds"));
        let _ = histogram!(phase_metric!(histogram, "sources", "payload_bytes"));
    }

    fn phase_name() -> &'static str {
        "sources"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "sources", "requests_success"),
                metric_type: MetricType::Counter,
                help: "Successful provider requests",
                labels: vec!["source_id"],
            },
            MetricDoc {
                name: phase_metric!(counter, "sources", "requests_error"),
                metric_type: MetricType::Counter,
                help: "Failed provider requests",
                labels: vec!["source_id", "error_type"],
            },
            MetricDoc {
                name: phase_metric!(counter, "sources", "retries"),
                metric_type: MetricType::Counter,
                help: "Retries after transient source failures",
                labels: vec!["source_id"],
            },
            MetricDoc {
                name: phase_metric!(counter, "sources", "outcomes"),
                metric_type: MetricType::Counter,
                help: "Terminal per-run source outcomes",
                labels: vec!["source_id", "status"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "sources", "request_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Provider request duration in seconds",
                labels: vec!["source_id"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "sources", "payload_bytes"),
                metric_type: MetricType::Histogram,
                help: "Size of provider payloads in bytes",
                labels: vec![],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_convention() {
        for doc in SourcesMetrics::metrics_documentation() {
            assert!(doc.name.starts_with("observatory_sources_"));
        }
    }
}
