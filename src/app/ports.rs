use crate::config::{Secret, SourceConfig};
use crate::types::SourceAdapter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Outbound GET against a provider.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Header values are secrets more often than not, so they never print
    pub headers: Vec<(String, Secret)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Transport-level failure: the request never produced a status code.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpGetResult, TransportError>;

    /// Form-encoded POST with HTTP basic credentials (token endpoints).
    async fn post_form_basic(
        &self,
        url: &str,
        username: &Secret,
        password: &Secret,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpGetResult, TransportError>;
}

/// Builds the adapter for one configured source; `None` for unknown kinds.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, source: &SourceConfig) -> Option<Arc<dyn SourceAdapter>>;
}
