//! Metrics for the observatory pipeline
//!
//! Each phase owns its metric names in a dedicated submodule. Names follow
//! `observatory_{phase}_{name}` (counters get a `_total` suffix). Without an
//! installed recorder every call is a no-op, so library users pay nothing.

pub mod quality;
pub mod sources;

pub use quality::QualityMetrics;
pub use sources::SourcesMetrics;

use std::collections::HashMap;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install a Prometheus exporter when `OBSERVATORY_METRICS_ADDR` is set.
///
/// Idempotent.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr = match std::env::var("OBSERVATORY_METRICS_ADDR") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                info!("metrics: OBSERVATORY_METRICS_ADDR not set, exporter disabled");
                return;
            }
        };
        let addr = match addr.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("metrics: invalid OBSERVATORY_METRICS_ADDR '{}': {}", addr, e);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => {
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                register_all_metrics();
            }
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

/// Phase-specific metric collections
pub trait PhaseMetrics {
    /// Pre-register every metric so it shows up before first use
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    #[allow(dead_code)]
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("observatory_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("observatory_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("observatory_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

/// Register all phases, warning on name conflicts
pub fn register_all_metrics() -> usize {
    let mut all = HashMap::new();
    register_phase::<SourcesMetrics>(&mut all);
    register_phase::<QualityMetrics>(&mut all);
    info!("Registered {} metrics across all phases", all.len());
    all.len()
}

fn register_phase<T: PhaseMetrics>(all: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    for doc in T::metrics_documentation() {
        if all.contains_key(doc.name) {
            warn!(
                "Metric name conflict: '{}' redefined by phase '{}'",
                doc.name,
                T::phase_name()
            );
        } else {
            all.insert(doc.name, doc);
        }
    }
}
