//! Network client with timeout racing and retry with exponential backoff.

use rand::Rng;
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::NetworkError;
use super::transport::{ApiRequest, Transport};

/// How hard the client tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
  /// Per-attempt timeout
  pub timeout: Duration,
  /// Retries after the first attempt
  pub max_retries: u32,
  pub base_delay: Duration,
  /// Random stretch applied to each delay, as a fraction (0.2 = up to +20%).
  /// 0 disables. Delays never drop below the plain backoff.
  pub jitter: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      max_retries: 3,
      base_delay: Duration::from_secs(1),
      jitter: 0.2,
    }
  }
}

impl RetryPolicy {
  /// Delay before retry `n` (1-based): `base_delay * 2^n`, without jitter.
  pub fn backoff_delay(&self, retry: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(retry))
  }

  /// Backoff delay stretched by a factor in `[1, 1 + jitter)`.
  ///
  /// With `jitter <= 1` retry `n + 1` still waits longer than retry `n`.
  pub fn retry_delay(&self, retry: u32) -> Duration {
    let delay = self.backoff_delay(retry);
    if self.jitter.is_nan() || self.jitter <= 0.0 {
      return delay;
    }
    let jitter = self.jitter.min(1.0);
    let factor = rand::thread_rng().gen_range(1.0..1.0 + jitter);
    delay.mul_f64(factor)
  }
}

/// Per-call overrides of the client's [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
  pub timeout: Option<Duration>,
  pub max_retries: Option<u32>,
  /// Replaces the default retryable classification
  pub retry_condition: Option<fn(&NetworkError) -> bool>,
}

/// The only component that talks to the remote store.
///
/// A call either returns the full response or, once the retry policy is
/// exhausted, the last classified error. Deciding whether that error is shown
/// to the user or the write is queued for later is left to the caller.
pub struct NetworkClient<T> {
  transport: Arc<T>,
  policy: RetryPolicy,
}

impl<T> Clone for NetworkClient<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      policy: self.policy,
    }
  }
}

impl<T: Transport> NetworkClient<T> {
  pub fn new(transport: T, policy: RetryPolicy) -> Self {
    Self {
      transport: Arc::new(transport),
      policy,
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Send a request, retrying transient failures.
  pub async fn request(
    &self,
    request: &ApiRequest,
    options: &RequestOptions,
  ) -> Result<Value, NetworkError> {
    let timeout = options.timeout.unwrap_or(self.policy.timeout);
    let max_retries = options.max_retries.unwrap_or(self.policy.max_retries);
    let mut attempt: u32 = 0;

    loop {
      attempt += 1;

      let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout(timeout)),
      };

      let error = match outcome {
        Ok(value) => return Ok(value),
        Err(error) => error,
      };

      let retryable = match options.retry_condition {
        Some(condition) => condition(&error),
        None => error.is_retryable(),
      };

      if !retryable || attempt > max_retries {
        warn!(
          method = %request.method,
          path = %request.path,
          attempts = attempt,
          error = %error,
          "request failed"
        );
        return Err(error);
      }

      let delay = self.policy.retry_delay(attempt);
      debug!(
        method = %request.method,
        path = %request.path,
        attempt,
        max_retries,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "retrying request"
      );
      tokio::time::sleep(delay).await;
    }
  }

  async fn call<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, NetworkError> {
    let value = self.request(&request, &RequestOptions::default()).await?;
    serde_json::from_value(value).map_err(|e| NetworkError::Decode(e.to_string()))
  }

  fn with_body<B: Serialize>(method: Method, path: &str, body: &B) -> Result<ApiRequest, NetworkError> {
    let body = serde_json::to_value(body).map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
    Ok(ApiRequest::new(method, path).with_body(body))
  }

  pub async fn get<R: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, &str)],
  ) -> Result<R, NetworkError> {
    let mut request = ApiRequest::new(Method::GET, path);
    for (key, value) in query {
      request = request.with_query(*key, *value);
    }
    self.call(request).await
  }

  pub async fn post<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<R, NetworkError> {
    self.call(Self::with_body(Method::POST, path, body)?).await
  }

  pub async fn put<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<R, NetworkError> {
    self.call(Self::with_body(Method::PUT, path, body)?).await
  }

  pub async fn patch<B: Serialize, R: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<R, NetworkError> {
    self.call(Self::with_body(Method::PATCH, path, body)?).await
  }

  pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, NetworkError> {
    self.call(ApiRequest::new(Method::DELETE, path)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::Mutex;
  use tokio::time::Instant;

  /// Transport that replays scripted outcomes and records when it was called.
  struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<Value, NetworkError>>>,
    calls: Arc<Mutex<Vec<(Instant, ApiRequest)>>>,
  }

  impl ScriptedTransport {
    fn new(outcomes: Vec<Result<Value, NetworkError>>) -> Self {
      Self {
        outcomes: Mutex::new(outcomes.into()),
        calls: Arc::new(Mutex::new(Vec::new())),
      }
    }
  }

  #[async_trait]
  impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, NetworkError> {
      self
        .calls
        .lock()
        .unwrap()
        .push((Instant::now(), request.clone()));
      self
        .outcomes
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Ok(Value::Null))
    }
  }

  /// Transport that never answers.
  struct HangingTransport;

  #[async_trait]
  impl Transport for HangingTransport {
    async fn send(&self, _request: &ApiRequest) -> Result<Value, NetworkError> {
      std::future::pending().await
    }
  }

  fn status(status: u16) -> Result<Value, NetworkError> {
    Err(NetworkError::Status {
      status,
      body: String::new(),
    })
  }

  fn policy() -> RetryPolicy {
    RetryPolicy {
      timeout: Duration::from_secs(30),
      max_retries: 3,
      base_delay: Duration::from_millis(100),
      jitter: 0.0,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_503_then_succeeds() {
    let transport = ScriptedTransport::new(vec![
      status(503),
      status(503),
      Ok(serde_json::json!({"id": "P-1"})),
    ]);
    let calls = transport.calls.clone();
    let client = NetworkClient::new(transport, policy());

    let result: Value = client.get("packages/P-1", &[]).await.unwrap();
    assert_eq!(result["id"], "P-1");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);

    let base = policy().base_delay;
    let second_delay = calls[1].0 - calls[0].0;
    assert!(second_delay >= base * 2, "{:?}", second_delay);
    assert!(second_delay < base * 4, "{:?}", second_delay);

    let third_delay = calls[2].0 - calls[1].0;
    assert!(third_delay >= base * 4, "{:?}", third_delay);
    assert!(third_delay < base * 8, "{:?}", third_delay);
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_status_not_retried() {
    let transport = ScriptedTransport::new(vec![status(404)]);
    let calls = transport.calls.clone();
    let client = NetworkClient::new(transport, policy());

    let error = client.get::<Value>("packages/none", &[]).await.unwrap_err();
    assert_eq!(error.status(), Some(404));
    assert!(!error.is_retryable());
    assert_eq!(calls.lock().unwrap().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_retries_surface_last_error() {
    let transport = ScriptedTransport::new(vec![
      status(500),
      Err(NetworkError::Connection("reset".into())),
      status(502),
      status(429),
      Ok(Value::Null),
    ]);
    let calls = transport.calls.clone();
    let client = NetworkClient::new(transport, policy());

    let error = client.get::<Value>("packages", &[]).await.unwrap_err();
    assert_eq!(error.status(), Some(429));
    assert_eq!(calls.lock().unwrap().len(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_retried_then_surfaced() {
    let client = NetworkClient::new(HangingTransport, policy());
    let options = RequestOptions {
      timeout: Some(Duration::from_secs(5)),
      max_retries: Some(1),
      ..RequestOptions::default()
    };

    let start = Instant::now();
    let error = client
      .request(&ApiRequest::new(Method::GET, "packages"), &options)
      .await
      .unwrap_err();

    assert_eq!(error, NetworkError::Timeout(Duration::from_secs(5)));
    // Two timed-out attempts plus one backoff of base * 2
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(10_200), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(10_300), "{:?}", elapsed);
  }

  fn conflict_is_retryable(error: &NetworkError) -> bool {
    error.status() == Some(409)
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_condition_override() {
    let transport = ScriptedTransport::new(vec![status(409), Ok(serde_json::json!(1))]);
    let calls = transport.calls.clone();
    let client = NetworkClient::new(transport, policy());
    let options = RequestOptions {
      retry_condition: Some(conflict_is_retryable as fn(&NetworkError) -> bool),
      ..RequestOptions::default()
    };

    let value = client
      .request(&ApiRequest::new(Method::POST, "packages"), &options)
      .await
      .unwrap();
    assert_eq!(value, serde_json::json!(1));
    assert_eq!(calls.lock().unwrap().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_helpers_build_requests() {
    let transport = ScriptedTransport::new(vec![
      Ok(serde_json::json!({"ok": true})),
      Ok(Value::Null),
      Ok(Value::Null),
    ]);
    let calls = transport.calls.clone();
    let client = NetworkClient::new(transport, policy());

    let _: Value = client
      .patch("packages/P-1", &serde_json::json!({"status": "delivered"}))
      .await
      .unwrap();
    let _: Value = client.delete("addresses/A-1").await.unwrap();
    let _: Value = client
      .get("packages", &[("courier", "eq.r1")])
      .await
      .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].1.method, Method::PATCH);
    assert_eq!(calls[0].1.body, Some(serde_json::json!({"status": "delivered"})));
    assert_eq!(calls[1].1.method, Method::DELETE);
    assert_eq!(calls[1].1.path, "addresses/A-1");
    assert_eq!(
      calls[2].1.query,
      vec![("courier".to_string(), "eq.r1".to_string())]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_decode_failure_is_terminal() {
    let transport = ScriptedTransport::new(vec![Ok(serde_json::json!("not a number"))]);
    let client = NetworkClient::new(transport, policy());

    let error = client.get::<u32>("count", &[]).await.unwrap_err();
    assert!(matches!(error, NetworkError::Decode(_)));
  }

  #[test]
  fn test_backoff_doubles() {
    let policy = policy();
    assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
    assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
  }

  #[test]
  fn test_jitter_stays_in_band() {
    let policy = RetryPolicy {
      jitter: 0.2,
      ..policy()
    };
    for _ in 0..1000 {
      let delay = policy.retry_delay(1);
      assert!(delay >= Duration::from_millis(200), "{:?}", delay);
      assert!(delay < Duration::from_millis(240), "{:?}", delay);
      assert!(policy.retry_delay(2) > delay);
    }
  }

  #[test]
  fn test_jitter_nan_disables_spread() {
    let policy = RetryPolicy {
      jitter: f64::NAN,
      ..policy()
    };
    assert_eq!(policy.retry_delay(1), Duration::from_millis(200));
  }
}
