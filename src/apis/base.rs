use crate::app::ports::{HttpClientPort, HttpGetResult, HttpRequest, TransportError};
use crate::config::{AuthConfig, Secret, SourceConfig};
use crate::constants::{INDICATOR_FIELD, PERIOD_FIELD, REGION_FIELD};
use crate::error::SourceError;
use crate::metrics::SourcesMetrics;
use crate::types::{as_text, FieldSpec, Period, RawRecord, SourceAdapter, SourceBatch, SourceSchema, TimeRange};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Provider-specific knowledge: where rows live and how columns map onto
/// the common field names.
pub trait ProviderParser: Send + Sync {
    /// Path appended to the configured base URL
    fn endpoint(&self) -> &'static str;

    /// Top-level JSON key holding the row array
    fn rows_key(&self) -> &'static str;

    fn region_column(&self) -> &'static str;

    fn period_column(&self) -> &'static str;

    fn id_column(&self) -> Option<&'static str> {
        None
    }

    /// Column splitting one region and period into several rows. Its value
    /// is appended to the indicator, e.g. `adhd:ritaline`.
    fn breakdown_column(&self) -> Option<&'static str> {
        None
    }

    /// (provider column, common field) pairs for non-key fields
    fn columns(&self) -> &'static [(&'static str, &'static str)];

    fn schema_fields(&self) -> Vec<FieldSpec>;

    fn window_params(&self, window: &TimeRange) -> Vec<(String, String)> {
        vec![
            ("from".to_string(), window.start.to_string()),
            ("to".to_string(), window.end.to_string()),
        ]
    }

    /// Map one provider row onto common field names, key fields included.
    fn parse_row(&self, row: &Value, indicator: &str) -> Result<BTreeMap<String, Value>, String> {
        let obj = row
            .as_object()
            .ok_or_else(|| "row is not a JSON object".to_string())?;
        let mut fields = BTreeMap::new();

        let region = obj
            .get(self.region_column())
            .filter(|v| !v.is_null())
            .ok_or_else(|| format!("missing '{}'", self.region_column()))?;
        fields.insert(REGION_FIELD.to_string(), region.clone());

        let period = obj
            .get(self.period_column())
            .and_then(Period::from_value)
            .ok_or_else(|| format!("missing or malformed '{}'", self.period_column()))?;
        fields.insert(PERIOD_FIELD.to_string(), Value::String(period.to_string()));

        let indicator = obj
            .get(INDICATOR_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(indicator);
        let breakdown = self
            .breakdown_column()
            .and_then(|column| obj.get(column))
            .and_then(as_text)
            .map(|part| part.trim().to_lowercase())
            .filter(|part| !part.is_empty());
        let indicator = match breakdown {
            Some(part) => format!("{}:{}", indicator, part),
            None => indicator.to_string(),
        };
        fields.insert(INDICATOR_FIELD.to_string(), Value::String(indicator));

        for (column, field) in self.columns() {
            if let Some(value) = obj.get(*column) {
                fields.insert(field.to_string(), value.clone());
            }
        }
        Ok(fields)
    }
}

/// HTTP(S) JSON adapter shared by every provider; the parser supplies the
/// provider-specific row mapping.
pub struct HttpSource {
    source_id: String,
    http: Arc<dyn HttpClientPort>,
    parser: Box<dyn ProviderParser>,
    token_cache: Mutex<Option<Secret>>,
}

impl HttpSource {
    pub fn new(source_id: &str, http: Arc<dyn HttpClientPort>, parser: Box<dyn ProviderParser>) -> Self {
        Self {
            source_id: source_id.to_string(),
            http,
            parser,
            token_cache: Mutex::new(None),
        }
    }

    fn secret(&self, var: &str) -> Result<Secret, SourceError> {
        Secret::from_env(var).map_err(|e| SourceError::auth(&self.source_id, e.to_string()))
    }

    async fn auth_headers(&self, config: &SourceConfig) -> Result<Vec<(String, Secret)>, SourceError> {
        match &config.auth {
            AuthConfig::None => Ok(Vec::new()),
            AuthConfig::Bearer { token_env } => {
                let token = self.secret(token_env)?;
                Ok(vec![bearer(&token)])
            }
            AuthConfig::ApiKey { header, key_env } => {
                let key = self.secret(key_env)?;
                Ok(vec![(header.clone(), key)])
            }
            AuthConfig::ClientCredentials {
                token_url,
                key_env,
                secret_env,
            } => {
                let mut cached = self.token_cache.lock().await;
                if cached.is_none() {
                    let key = self.secret(key_env)?;
                    let secret = self.secret(secret_env)?;
                    *cached = Some(self.exchange_token(token_url, &key, &secret, config).await?);
                }
                match cached.as_ref() {
                    Some(token) => Ok(vec![bearer(token)]),
                    None => Err(SourceError::auth(&self.source_id, "no access token")),
                }
            }
        }
    }

    async fn exchange_token(
        &self,
        token_url: &str,
        key: &Secret,
        secret: &Secret,
        config: &SourceConfig,
    ) -> Result<Secret, SourceError> {
        let resp = self
            .http
            .post_form_basic(
                token_url,
                key,
                secret,
                &[("grant_type", "client_credentials")],
                config.request_timeout(),
            )
            .await
            .map_err(|e| self.transport_failure(e))?;
        self.check_status(&resp)?;
        let body: Value = serde_json::from_slice(&resp.bytes)
            .map_err(|e| SourceError::auth(&self.source_id, format!("token response is not JSON: {}", e)))?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::auth(&self.source_id, "token response has no access_token"))?;
        debug!("obtained access token for {}", self.source_id);
        Ok(Secret::new(token))
    }

    fn transport_failure(&self, e: TransportError) -> SourceError {
        if e.timed_out {
            SourceError::unavailable(&self.source_id, format!("request timed out: {}", e.message))
        } else {
            SourceError::unavailable(&self.source_id, e.message)
        }
    }

    fn check_status(&self, resp: &HttpGetResult) -> Result<(), SourceError> {
        match resp.status {
            200..=299 => Ok(()),
            401 | 403 => Err(SourceError::auth(
                &self.source_id,
                format!("HTTP {}", resp.status),
            )),
            408 | 429 | 500..=599 => Err(SourceError::unavailable(
                &self.source_id,
                format!("HTTP {}", resp.status),
            )),
            other => Err(SourceError::schema(
                &self.source_id,
                format!("request rejected with HTTP {}", other),
            )),
        }
    }

    fn to_batch(&self, body: &Value, window: &TimeRange, config: &SourceConfig) -> Result<SourceBatch, SourceError> {
        let rows = body
            .get(self.parser.rows_key())
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SourceError::schema(
                    &self.source_id,
                    format!("payload has no '{}' array", self.parser.rows_key()),
                )
            })?;

        let collected_at = Utc::now();
        let mut batch = SourceBatch::default();
        for (index, row) in rows.iter().enumerate() {
            let fields = match self.parser.parse_row(row, &config.indicator) {
                Ok(fields) => fields,
                Err(reason) => {
                    batch.skipped_rows.push(format!("row {}: {}", index, reason));
                    continue;
                }
            };
            let source_record_id = self
                .parser
                .id_column()
                .and_then(|col| row.get(col))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| content_id(row));
            let record = RawRecord {
                source_id: self.source_id.clone(),
                source_record_id,
                collected_at,
                fields,
            };
            match record.key() {
                Some(key) if window.overlaps(&key.period) => batch.records.push(record),
                Some(_) => {}
                None => batch
                    .skipped_rows
                    .push(format!("row {}: unusable record key", index)),
            }
        }

        if batch.records.is_empty() && !batch.skipped_rows.is_empty() {
            return Err(SourceError::schema(
                &self.source_id,
                format!("no usable rows ({} rejected)", batch.skipped_rows.len()),
            ));
        }
        Ok(batch)
    }
}

fn bearer(token: &Secret) -> (String, Secret) {
    (
        "Authorization".to_string(),
        Secret::new(format!("Bearer {}", token.expose())),
    )
}

/// Stable id for rows the provider does not identify, so re-fetches of the
/// same window produce the same ids.
fn content_id(row: &Value) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, row.to_string().as_bytes()).to_string()
}

#[async_trait::async_trait]
impl SourceAdapter for HttpSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    #[instrument(skip(self, config), fields(source_id = %self.source_id))]
    async fn fetch(&self, window: &TimeRange, config: &SourceConfig) -> Result<SourceBatch, SourceError> {
        let started = Instant::now();
        let url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            self.parser.endpoint().trim_start_matches('/')
        );
        let mut request = HttpRequest::get(url, config.request_timeout());
        request.query = self.parser.window_params(window);
        request
            .query
            .extend(config.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        request.headers = self.auth_headers(config).await?;

        let resp = match self.http.get(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                SourcesMetrics::record_request_error(&self.source_id, "transport");
                return Err(self.transport_failure(e));
            }
        };
        if let Err(e) = self.check_status(&resp) {
            if matches!(e, SourceError::Auth { .. }) {
                // a cached token may have expired; fetch a new one next attempt
                self.token_cache.lock().await.take();
            }
            SourcesMetrics::record_request_error(&self.source_id, e.kind());
            warn!("{} answered HTTP {}", self.source_id, resp.status);
            return Err(e);
        }

        let body: Value = serde_json::from_slice(&resp.bytes).map_err(|e| {
            SourcesMetrics::record_request_error(&self.source_id, "schema");
            SourceError::schema(&self.source_id, format!("body is not JSON: {}", e))
        })?;
        let batch = self.to_batch(&body, window, config)?;

        SourcesMetrics::record_request_success(
            &self.source_id,
            started.elapsed().as_secs_f64(),
            resp.bytes.len(),
        );
        info!(
            "fetched {} records from {} ({} rows skipped)",
            batch.records.len(),
            self.source_id,
            batch.skipped_rows.len()
        );
        Ok(batch)
    }

    fn describe_schema(&self) -> SourceSchema {
        SourceSchema {
            source_id: self.source_id.clone(),
            fields: self.parser.schema_fields(),
        }
    }
}
