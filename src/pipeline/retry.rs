use crate::config::{RetryPolicy, SourceConfig};
use crate::error::SourceError;
use crate::metrics::SourcesMetrics;
use crate::types::{SourceAdapter, SourceBatch, TimeRange};
use std::time::Duration;
use tracing::{debug, warn};

impl RetryPolicy {
    /// Delay to wait after the `failed_attempts`-th failure (1-based):
    /// base * factor^(n-1), capped at `max_delay_ms`.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1) as i32;
        let raw = self.base_delay_ms as f64 * self.factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Terminal result of fetching one source.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub result: Result<SourceBatch, SourceError>,
    pub attempts: u32,
}

/// Fetch with bounded exponential backoff. Only `SourceError::Unavailable`
/// is retried; auth and schema failures return after the first attempt.
pub async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    window: &TimeRange,
    config: &SourceConfig,
    policy: &RetryPolicy,
) -> FetchAttempt {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match adapter.fetch(window, config).await {
            Ok(batch) => {
                if attempts > 1 {
                    debug!("{} succeeded after {} attempts", config.id, attempts);
                }
                return FetchAttempt {
                    result: Ok(batch),
                    attempts,
                };
            }
            Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                let delay = policy.delay_after(attempts);
                warn!(
                    "attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempts, policy.max_attempts, config.id, e, delay
                );
                SourcesMetrics::record_retry(&config.id);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!("{} failed after {} attempt(s): {}", config.id, attempts, e);
                return FetchAttempt {
                    result: Err(e),
                    attempts,
                };
            }
        }
    }
}
