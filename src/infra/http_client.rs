use crate::app::ports::{HttpClientPort, HttpGetResult, HttpRequest, TransportError};
use crate::config::Secret;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestHttp {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn into_result(resp: reqwest::Response) -> Result<HttpGetResult, TransportError> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await.map_err(transport_error)?.to_vec();
        Ok(HttpGetResult {
            status,
            bytes,
            content_type,
        })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    // reqwest includes the URL in its message but never header values
    TransportError {
        timed_out: e.is_timeout(),
        message: e.to_string(),
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, request: &HttpRequest) -> Result<HttpGetResult, TransportError> {
        let mut builder = self
            .client
            .get(&request.url)
            .query(&request.query)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.expose());
        }
        let resp = builder.send().await.map_err(transport_error)?;
        Self::into_result(resp).await
    }

    async fn post_form_basic(
        &self,
        url: &str,
        username: &Secret,
        password: &Secret,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpGetResult, TransportError> {
        let resp = self
            .client
            .post(url)
            .basic_auth(username.expose(), Some(password.expose()))
            .form(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;
        Self::into_result(resp).await
    }
}
