//! Delivery API client with retry, backoff and cancellation.
//!
//! Request model:
//! - `GET {endpoint}/delivery/{slot}?width=..&height=..&referer=..`
//! - every attempt races its own timeout and the caller's cancellation token
//! - transport failures, timeouts, 408, 429 and 5xx are retried with
//!   exponential backoff (8s ceiling, up to 500ms jitter)
//! - any other status, a malformed success body or cancellation is terminal
//!
//! The HTTP layer sits behind [`Transport`] so the retry policy can be driven
//! without a network.

use crate::error::DeliveryError;
use crate::validate::{validate_slot_id, validate_url};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Hard ceiling for a single backoff delay (before jitter)
pub const MAX_BACKOFF: Duration = Duration::from_millis(8_000);

/// Upper bound of the random jitter added to each backoff delay
pub const MAX_JITTER_MS: u64 = 500;

/// A creative ready to render: markup, declared size and tracking URLs.
///
/// This is also the cached representation, so the serialized field names
/// are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creative {
    pub html: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "clickURL")]
    pub click_url: String,
    #[serde(rename = "impressionURL", alias = "impression")]
    pub impression_url: String,
    #[serde(rename = "campaignID", default)]
    pub campaign_id: String,
}

/// Creative block of a delivery response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreativePayload {
    pub html: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Tracking block of a delivery response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackingPayload {
    #[serde(default)]
    pub impression: String,
    #[serde(default)]
    pub click: String,
}

/// Optional server-side fallback hint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackPayload {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub html: Option<String>,
}

/// A structurally valid delivery response.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    pub creative: CreativePayload,
    pub tracking: TrackingPayload,
    pub fallback: Option<FallbackPayload>,
}

impl From<DeliveryResponse> for Creative {
    fn from(response: DeliveryResponse) -> Self {
        Creative {
            html: response.creative.html,
            width: response.creative.width,
            height: response.creative.height,
            click_url: response.tracking.click,
            impression_url: response.tracking.impression,
            campaign_id: String::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawDeliveryResponse {
    creative: Option<CreativePayload>,
    tracking: Option<TrackingPayload>,
    #[serde(default)]
    fallback: Option<FallbackPayload>,
}

/// Parse and shape-check a success body.
pub fn parse_delivery_response(body: &str) -> Result<DeliveryResponse, DeliveryError> {
    let raw: RawDeliveryResponse = serde_json::from_str(body)
        .map_err(|e| DeliveryError::InvalidResponse(format!("malformed JSON: {}", e)))?;

    let (creative, tracking) = match (raw.creative, raw.tracking) {
        (Some(creative), Some(tracking)) => (creative, tracking),
        _ => {
            return Err(DeliveryError::InvalidResponse(
                "missing creative or tracking".to_string(),
            ))
        }
    };

    for (name, url) in [("impression", &tracking.impression), ("click", &tracking.click)] {
        if url.is_empty() {
            continue;
        }
        validate_url(url).map_err(|e| {
            DeliveryError::InvalidResponse(format!("{} tracking URL rejected: {}", name, e))
        })?;
    }

    Ok(DeliveryResponse {
        creative,
        tracking,
        fallback: raw.fallback,
    })
}

/// Raw HTTP response as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP layer used by the delivery client and the impression fallback.
pub trait Transport: Send + Sync + 'static {
    /// GET `url` expecting JSON.
    fn get(&self, url: &Url) -> impl Future<Output = Result<HttpResponse, DeliveryError>> + Send;

    /// Fire-and-forget POST with an empty body.
    fn post(&self, url: &Url) -> impl Future<Output = Result<HttpResponse, DeliveryError>> + Send;
}

/// [`Transport`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse, DeliveryError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(format!("failed to read body: {}", e)))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body,
        })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<HttpResponse, DeliveryError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Self::read(response).await
    }

    async fn post(&self, url: &Url) -> Result<HttpResponse, DeliveryError> {
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Self::read(response).await
    }
}

/// Retry behaviour of the delivery client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Extra attempts after the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn extra_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts
        } else {
            0
        }
    }

    /// Delay before retry number `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
        backoff_delay(self.base_delay, attempt) + Duration::from_millis(jitter)
    }
}

/// `min(base * 2^(attempt-1), 8s)` for retry number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).min(MAX_BACKOFF)
}

/// Settings the delivery client reads from the SDK configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySettings {
    pub api_endpoint: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// One delivery request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryRequest {
    pub slot_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub referer: Option<String>,
}

impl DeliveryRequest {
    pub fn new(slot_id: impl Into<String>) -> Self {
        Self {
            slot_id: slot_id.into(),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// Build the delivery URL for `request`, resolving a relative endpoint
/// against the page location.
pub fn delivery_url(
    endpoint: &str,
    page_location: &Url,
    request: &DeliveryRequest,
) -> Result<Url, DeliveryError> {
    validate_slot_id(&request.slot_id)?;

    let path = format!("{}/delivery/{}", endpoint.trim_end_matches('/'), request.slot_id);
    let mut url = page_location
        .join(&path)
        .map_err(|e| DeliveryError::Transport(format!("invalid delivery URL '{}': {}", path, e)))?;

    {
        let mut query = url.query_pairs_mut();
        if let Some(width) = request.width.filter(|w| *w > 0) {
            query.append_pair("width", &width.to_string());
        }
        if let Some(height) = request.height.filter(|h| *h > 0) {
            query.append_pair("height", &height.to_string());
        }
        if let Some(referer) = request.referer.as_deref().filter(|r| !r.is_empty()) {
            query.append_pair("referer", referer);
        }
    }

    // `query_pairs_mut` leaves a dangling `?` when nothing was appended
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

/// Delivery API client.
pub struct DeliveryClient<T: Transport = HttpTransport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for DeliveryClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Fetch a creative for `request`.
    pub async fn fetch_creative(
        &self,
        settings: &DeliverySettings,
        page_location: &Url,
        request: &DeliveryRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Creative, DeliveryError> {
        self.fetch(settings, page_location, request, cancel)
            .await
            .map(Creative::from)
    }

    /// Fetch the full delivery response for `request`, retrying per
    /// `settings.retry`. Returns the last error once attempts run out.
    pub async fn fetch(
        &self,
        settings: &DeliverySettings,
        page_location: &Url,
        request: &DeliveryRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let url = delivery_url(&settings.api_endpoint, page_location, request)?;
        let cancel = cancel.cloned().unwrap_or_else(CancellationToken::new);
        let extra = settings.retry.extra_attempts();

        let mut last_error = None;
        for attempt in 0..=extra {
            if cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }

            if attempt > 0 {
                let delay = settings.retry.delay_for(attempt);
                debug!(
                    slot = %request.slot_id,
                    attempt,
                    max_attempts = extra,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying delivery request"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.attempt(&url, settings.timeout, &cancel).await {
                Ok(response) => {
                    debug!(slot = %request.slot_id, attempt, "Delivery request succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        slot = %request.slot_id,
                        attempt,
                        status = e.status(),
                        error = %e,
                        "Delivery request failed"
                    );

                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DeliveryError::Transport("failed to fetch banner after retries".to_string())
        }))
    }

    async fn attempt(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.get(url)) => match result {
                Ok(response) => response?,
                Err(_) => return Err(DeliveryError::Timeout(timeout)),
            },
        };

        if !response.is_success() {
            return Err(DeliveryError::Status {
                status: response.status,
                status_text: response.status_text,
            });
        }

        parse_delivery_response(&response.body)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted transport: pops one canned GET result per call and records
    /// every URL it sees.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, DeliveryError>>>,
        /// Used once the script runs dry
        default: Mutex<Option<Result<HttpResponse, DeliveryError>>>,
        delay: Option<Duration>,
        pub gets: Mutex<Vec<Url>>,
        pub posts: Mutex<Vec<Url>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn push(&self, result: Result<HttpResponse, DeliveryError>) -> &Self {
            self.responses.lock().push_back(result);
            self
        }

        pub fn push_status(&self, status: u16) -> &Self {
            self.push(Ok(HttpResponse {
                status,
                status_text: format!("Status {}", status),
                body: String::new(),
            }))
        }

        pub fn push_body(&self, body: &str) -> &Self {
            self.push(Ok(HttpResponse::ok(body)))
        }

        pub fn always(&self, result: Result<HttpResponse, DeliveryError>) -> &Self {
            *self.default.lock() = Some(result);
            self
        }

        pub fn get_count(&self) -> usize {
            self.gets.lock().len()
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, url: &Url) -> Result<HttpResponse, DeliveryError> {
            self.gets.lock().push(url.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().pop_front();
            match next {
                Some(result) => result,
                None => self
                    .default
                    .lock()
                    .clone()
                    .unwrap_or_else(|| Err(DeliveryError::Transport("script exhausted".into()))),
            }
        }

        async fn post(&self, url: &Url) -> Result<HttpResponse, DeliveryError> {
            self.posts.lock().push(url.clone());
            Ok(HttpResponse::ok(""))
        }
    }

    pub fn creative_body(html: &str, width: u32, height: u32) -> String {
        serde_json::json!({
            "creative": { "html": html, "width": width, "height": height },
            "tracking": { "impression": "https://api/imp", "click": "https://api/click" },
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn settings(max_attempts: u32) -> DeliverySettings {
        DeliverySettings {
            api_endpoint: "https://ads.example.com/api/v1".to_string(),
            timeout: Duration::from_millis(5_000),
            retry: RetryPolicy {
                enabled: true,
                max_attempts,
                base_delay: Duration::from_millis(1_000),
            },
        }
    }

    fn page() -> Url {
        Url::parse("https://publisher.example.com/article?id=1").unwrap()
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_millis(1_000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(base, 4), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, 30), MAX_BACKOFF);

        let policy = settings(3).retry;
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay < Duration::from_millis(1_500));
        }
    }

    #[test]
    fn test_extra_attempts() {
        let mut policy = settings(3).retry;
        assert_eq!(policy.extra_attempts(), 3);
        policy.enabled = false;
        assert_eq!(policy.extra_attempts(), 0);
    }

    #[test]
    fn test_delivery_url() {
        let request = DeliveryRequest::new("demo-leaderboard")
            .with_size(728, 90)
            .with_referer("https://publisher.example.com/a b");
        let url = delivery_url("https://ads.example.com/api/v1/", &page(), &request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ads.example.com/api/v1/delivery/demo-leaderboard?width=728&height=90&referer=https%3A%2F%2Fpublisher.example.com%2Fa+b"
        );

        let url = delivery_url("/api/v1", &page(), &DeliveryRequest::new("top")).unwrap();
        assert_eq!(url.as_str(), "https://publisher.example.com/api/v1/delivery/top");

        let bad = delivery_url("/api/v1", &page(), &DeliveryRequest::new("../admin"));
        assert!(matches!(bad, Err(DeliveryError::Validation(_))));
    }

    #[test]
    fn test_parse_response() {
        let response = parse_delivery_response(&creative_body("<p>x</p>", 300, 250)).unwrap();
        assert_eq!(response.creative.width, 300);
        assert_eq!(response.tracking.click, "https://api/click");

        let creative = Creative::from(response);
        assert_eq!(creative.impression_url, "https://api/imp");
        assert_eq!(creative.campaign_id, "");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for body in [
            "not json",
            r#"{"creative":{"html":"x"}}"#,
            r#"{"tracking":{"impression":"","click":""}}"#,
            r#"{"creative":{"html":"x"},"tracking":{"impression":"javascript:alert(1)","click":""}}"#,
        ] {
            assert!(
                matches!(parse_delivery_response(body), Err(DeliveryError::InvalidResponse(_))),
                "{body}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let transport = ScriptedTransport::new();
        transport.push_status(400);
        let client = DeliveryClient::new(transport);

        let err = client
            .fetch_creative(&settings(3), &page(), &DeliveryRequest::new("slot"), None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(client.transport().get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retried_until_success() {
        let transport = ScriptedTransport::new();
        transport
            .push_status(503)
            .push_status(503)
            .push_status(503)
            .push_body(&creative_body("<p>ad</p>", 300, 250));
        let client = DeliveryClient::new(transport);

        let creative = client
            .fetch_creative(&settings(3), &page(), &DeliveryRequest::new("slot"), None)
            .await
            .unwrap();

        assert_eq!(creative.html, "<p>ad</p>");
        assert_eq!(client.transport().get_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let transport = ScriptedTransport::new();
        transport.push_status(500).push_status(502).push_status(429);
        let client = DeliveryClient::new(transport);

        let err = client
            .fetch_creative(&settings(2), &page(), &DeliveryRequest::new("slot"), None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(429));
        assert_eq!(client.transport().get_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disabled() {
        let transport = ScriptedTransport::new();
        transport.push_status(503).push_body(&creative_body("x", 1, 1));
        let client = DeliveryClient::new(transport);

        let mut settings = settings(3);
        settings.retry.enabled = false;
        let err = client
            .fetch_creative(&settings, &page(), &DeliveryRequest::new("slot"), None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(client.transport().get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_success_not_retried() {
        let transport = ScriptedTransport::new();
        transport.always(Ok(HttpResponse::ok(r#"{"creative":{"html":"x"}}"#)));
        let client = DeliveryClient::new(transport);

        let err = client
            .fetch_creative(&settings(3), &page(), &DeliveryRequest::new("slot"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::InvalidResponse(_)));
        assert_eq!(client.transport().get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(10));
        transport.always(Ok(HttpResponse::ok(creative_body("x", 1, 1))));
        let client = DeliveryClient::new(transport);

        let mut settings = settings(1);
        settings.timeout = Duration::from_millis(100);
        let err = client
            .fetch_creative(&settings, &page(), &DeliveryRequest::new("slot"), None)
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::Timeout(Duration::from_millis(100)));
        assert_eq!(client.transport().get_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retries() {
        let transport = ScriptedTransport::new();
        transport.always(Err(DeliveryError::Transport("connection refused".into())));
        let client = DeliveryClient::new(transport);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = client
            .fetch_creative(&settings(5), &page(), &DeliveryRequest::new("slot"), Some(&cancel))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::Cancelled);
        // First attempt fails immediately, cancellation lands during the first backoff
        assert_eq!(client.transport().get_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_precancelled_token() {
        let client = DeliveryClient::new(ScriptedTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .fetch_creative(&settings(3), &page(), &DeliveryRequest::new("slot"), Some(&cancel))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::Cancelled);
        assert_eq!(client.transport().get_count(), 0);
    }
}
