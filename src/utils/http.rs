//! HTTP client utilities.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::sources::SourceError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default request rate per client
pub const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = nonzero!(5u32);

/// Settings used to build an [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Requests per second; `None` or a non-positive value disables rate limiting
    pub requests_per_second: Option<f32>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent().to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            requests_per_second: Some(DEFAULT_REQUESTS_PER_SECOND.get() as f32),
        }
    }
}

/// User agent sent when none is configured
pub fn default_user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

/// Shared HTTP client with sensible defaults and built-in rate limiting
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, SourceError> {
        Self::with_settings(&HttpSettings::default())
    }

    /// Create a new HTTP client from explicit settings
    pub fn with_settings(settings: &HttpSettings) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        let limiter = settings
            .requests_per_second
            .and_then(quota_for)
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self {
            client: Arc::new(client),
            limiter,
        })
    }

    /// Start a rate-limited GET request
    pub fn get(&self, url: &str) -> RateLimitedRequestBuilder {
        RateLimitedRequestBuilder {
            inner: self.client.get(url),
            limiter: self.limiter.clone(),
        }
    }

    /// Start a rate-limited POST request
    pub fn post(&self, url: &str) -> RateLimitedRequestBuilder {
        RateLimitedRequestBuilder {
            inner: self.client.post(url),
            limiter: self.limiter.clone(),
        }
    }
}

fn quota_for(requests_per_second: f32) -> Option<Quota> {
    if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
        return None;
    }
    if requests_per_second >= 1.0 {
        NonZeroU32::new(requests_per_second.round() as u32).map(Quota::per_second)
    } else {
        Quota::with_period(Duration::from_secs_f32(1.0 / requests_per_second))
    }
}

/// Builder for rate-limited HTTP requests
pub struct RateLimitedRequestBuilder {
    inner: RequestBuilder,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl RateLimitedRequestBuilder {
    pub fn query<T: serde::Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.inner = self.inner.query(query);
        self
    }

    pub fn json<T: serde::Serialize + ?Sized>(mut self, json: &T) -> Self {
        self.inner = self.inner.json(json);
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.inner = self.inner.header(key, value);
        self
    }

    pub fn bearer_auth(mut self, token: &str) -> Self {
        self.inner = self.inner.bearer_auth(token);
        self
    }

    /// Wait for a rate-limit slot, then send
    pub async fn send(self) -> Result<Response, SourceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        Ok(self.inner.send().await?)
    }

    /// Send and decode a JSON body, mapping HTTP failures to [`SourceError`]
    pub async fn send_json<T: DeserializeOwned>(self) -> Result<T, SourceError> {
        let response = self.send().await?;
        decode_json(response).await
    }
}

/// Map a non-success status to the error taxonomy
///
/// A 404 stays a [`SourceError::Status`]; lookups turn it into `NotFound`
/// with [`SourceError::or_not_found`].
pub fn check_status(status: StatusCode, url: &str) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimit,
        _ => SourceError::Status {
            status: status.as_u16(),
            message: format!(
                "{} from {}",
                status.canonical_reason().unwrap_or("HTTP error"),
                url
            ),
        },
    })
}

/// Check the status and decode the body as JSON
pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let url = response.url().to_string();
    check_status(response.status(), &url)?;

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        SourceError::MalformedResponse(format!("invalid JSON from {}: {}", url, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_for() {
        assert!(quota_for(0.0).is_none());
        assert!(quota_for(-1.0).is_none());
        assert!(quota_for(f32::NAN).is_none());
        assert!(quota_for(0.5).is_some());
        assert!(quota_for(5.0).is_some());
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(StatusCode::OK, "u").is_ok());
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND, "u"),
            Err(SourceError::Status { status: 404, .. })
        ));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS, "u"),
            Err(SourceError::RateLimit)
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, "u"),
            Err(SourceError::Status { status: 502, .. })
        ));
    }

    #[test]
    fn test_client_builds() {
        let client = HttpClient::with_settings(&HttpSettings {
            requests_per_second: None,
            ..HttpSettings::default()
        })
        .unwrap();
        assert!(format!("{:?}", client).contains("rate_limited: false"));
    }

    #[tokio::test]
    async fn test_decode_json_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/broken")
            .with_status(200)
            .with_body("{not json")
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let result: Result<serde_json::Value, _> = client
            .get(&format!("{}/broken", server.url()))
            .send_json()
            .await;

        assert!(matches!(result, Err(SourceError::MalformedResponse(_))));
    }
}
