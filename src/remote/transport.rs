//! The remote data source as seen by the network client.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use super::error::NetworkError;

/// A single logical call against the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the remote base URL, e.g. `packages` or `packages/P-1`
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.push((key.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

/// Anything that can carry an [`ApiRequest`] to the remote store and back.
///
/// A transport makes exactly one attempt; timeouts and retries are layered on
/// top by the client.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> Result<Value, NetworkError>;
}

/// JSON-over-HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: String,
  api_key: Option<String>,
}

impl HttpTransport {
  pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
    Url::parse(base_url).map_err(|e| eyre!("Invalid remote URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base: base_url.trim_end_matches('/').to_string(),
      api_key,
    })
  }

  fn url(&self, request: &ApiRequest) -> Result<Url, NetworkError> {
    let raw = format!("{}/{}", self.base, request.path.trim_start_matches('/'));
    let mut url = Url::parse(&raw).map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&request.query);
    }
    Ok(url)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> Result<Value, NetworkError> {
    let url = self.url(request)?;

    let mut builder = self.client.request(request.method.clone(), url);
    if let Some(key) = &self.api_key {
      builder = builder.header("apikey", key).bearer_auth(key);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::Connection(e.to_string()))?;

    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| NetworkError::Connection(e.to_string()))?;

    if !status.is_success() {
      return Err(NetworkError::Status {
        status: status.as_u16(),
        body: text,
      });
    }

    Ok(parse_body(&text))
  }
}

/// Empty bodies read as `null`, anything that is not JSON as a string.
fn parse_body(text: &str) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
