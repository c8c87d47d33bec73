//! Kalshi trade API client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{AppError, KalshiError};
use crate::metrics;
use crate::signing::RequestSigner;

use super::pagination::Page;
use super::types::{Event, Market, Series};

/// Path prefix shared by every trade API endpoint.
pub const API_PREFIX: &str = "/trade-api/v2";

/// Query for `GET /series`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesQuery {
    /// Page size.
    pub limit: Option<u32>,
    /// Continuation cursor.
    pub cursor: Option<String>,
}

/// Query for `GET /markets`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketsQuery {
    /// Page size.
    pub limit: Option<u32>,
    /// Continuation cursor.
    pub cursor: Option<String>,
    /// Restrict to one series.
    pub series_ticker: Option<String>,
    /// Exact status filter.
    pub status: Option<String>,
    /// Close time lower bound (unix seconds).
    pub min_close_ts: Option<i64>,
    /// Close time upper bound (unix seconds).
    pub max_close_ts: Option<i64>,
}

/// Query for `GET /events`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventsQuery {
    /// Page size.
    pub limit: Option<u32>,
    /// Continuation cursor.
    pub cursor: Option<String>,
    /// Restrict to one series.
    pub series_ticker: Option<String>,
    /// Exact status filter.
    pub status: Option<String>,
    /// Include each event's markets.
    pub with_nested_markets: bool,
    /// Close time lower bound (unix seconds).
    pub min_close_ts: Option<i64>,
    /// Close time upper bound (unix seconds).
    pub max_close_ts: Option<i64>,
}

/// Query string pairs; absent values are omitted.
pub type QueryPairs = Vec<(&'static str, String)>;

fn push<T: ToString>(pairs: &mut QueryPairs, key: &'static str, value: Option<T>) {
    if let Some(value) = value {
        pairs.push((key, value.to_string()));
    }
}

impl SeriesQuery {
    /// Query string pairs.
    pub fn to_pairs(&self) -> QueryPairs {
        let mut pairs = QueryPairs::new();
        push(&mut pairs, "limit", self.limit);
        push(&mut pairs, "cursor", self.cursor.as_deref());
        pairs
    }
}

impl MarketsQuery {
    /// Query string pairs.
    pub fn to_pairs(&self) -> QueryPairs {
        let mut pairs = QueryPairs::new();
        push(&mut pairs, "limit", self.limit);
        push(&mut pairs, "cursor", self.cursor.as_deref());
        push(&mut pairs, "series_ticker", self.series_ticker.as_deref());
        push(&mut pairs, "status", self.status.as_deref());
        push(&mut pairs, "min_close_ts", self.min_close_ts);
        push(&mut pairs, "max_close_ts", self.max_close_ts);
        pairs
    }
}

impl EventsQuery {
    /// Query string pairs.
    pub fn to_pairs(&self) -> QueryPairs {
        let mut pairs = QueryPairs::new();
        push(&mut pairs, "limit", self.limit);
        push(&mut pairs, "cursor", self.cursor.as_deref());
        push(&mut pairs, "series_ticker", self.series_ticker.as_deref());
        push(&mut pairs, "status", self.status.as_deref());
        if self.with_nested_markets {
            pairs.push(("with_nested_markets", "true".to_string()));
        }
        push(&mut pairs, "min_close_ts", self.min_close_ts);
        push(&mut pairs, "max_close_ts", self.max_close_ts);
        pairs
    }
}

/// Read-side Kalshi operations the engine depends on.
///
/// [`KalshiClient`] talks to the real API; `MockKalshiClient` serves scripted
/// pages in tests.
#[async_trait]
pub trait KalshiApi: Send + Sync {
    /// One page of series.
    async fn list_series(&self, query: &SeriesQuery) -> Result<Page<Series>, KalshiError>;

    /// One page of markets.
    async fn list_markets(&self, query: &MarketsQuery) -> Result<Page<Market>, KalshiError>;

    /// One page of events.
    async fn list_events(&self, query: &EventsQuery) -> Result<Page<Event>, KalshiError>;

    /// A single event with its markets.
    async fn get_event(&self, event_ticker: &str) -> Result<Event, KalshiError>;
}

/// HTTP behaviour knobs for [`KalshiClient`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Idle connections kept per host.
    pub pool_size: usize,
    /// Retries for transient failures in the list helpers.
    pub max_retries: u32,
    /// First retry delay; doubles each attempt.
    pub retry_base: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            pool_size: 10,
            max_retries: 2,
            retry_base: Duration::from_millis(250),
        }
    }
}

impl From<&Config> for HttpSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.http_timeout(),
            pool_size: config.http_pool_size,
            max_retries: config.http_max_retries,
            retry_base: Duration::from_millis(config.http_retry_base_ms),
        }
    }
}

/// Signed HTTP client for the Kalshi trade API.
#[derive(Debug, Clone)]
pub struct KalshiClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Shared request signer.
    signer: Arc<RequestSigner>,
    /// Timeouts and retry policy.
    settings: HttpSettings,
}

impl KalshiClient {
    /// Create a client from explicit parts.
    pub fn new(
        base_url: impl Into<String>,
        signer: Arc<RequestSigner>,
        settings: HttpSettings,
    ) -> Result<Self, KalshiError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(5))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(settings.pool_size)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            http,
            base_url,
            signer,
            settings,
        })
    }

    /// Create a client from config. A missing or unparsable key fails here,
    /// never per request.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        config.validate()?;
        let pem = config.private_key_pem()?;
        let signer = RequestSigner::from_pem(config.kalshi_api_key_id.trim(), &pem)?;
        Ok(Self::new(
            config.base_url(),
            Arc::new(signer),
            HttpSettings::from(config),
        )?)
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Signer used for every request.
    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    /// Execute one signed request.
    ///
    /// Returns the status and the JSON body, or `{"raw": text}` when the body is
    /// not JSON. Non-2xx statuses are returned, not raised. Never retries.
    #[instrument(skip(self, query, body), fields(method = %method, path = %path))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<(u16, Value), KalshiError> {
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);

        let body_bytes = body.map(serde_json::to_vec).transpose().map_err(|e| {
            KalshiError::Signing(format!("request body is not serializable: {}", e))
        })?;
        let auth = self
            .signer
            .sign_now(method.as_str(), path, body_bytes.as_deref())?;

        let mut request = self
            .http
            .request(method, &url)
            .timeout(timeout.unwrap_or(self.settings.timeout));
        if !query.is_empty() {
            request = request.query(query);
        }
        for (name, value) in auth.to_pairs() {
            request = request.header(name, value);
        }
        if let Some(bytes) = body_bytes {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        metrics::record_http_request_latency(start, status);
        debug!(status, bytes = text.len(), "Kalshi response");

        Ok((status, decode_body(&text)))
    }

    /// Raw request for diagnostics: `{"status": .., "data": ..}`.
    pub async fn request_debug(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, KalshiError> {
        let (status, data) = self.request(method, path, query, None, None).await?;
        Ok(json!({ "status": status, "data": data }))
    }

    /// GET that must answer 200, with bounded retry on transient failures.
    #[instrument(skip(self, query), fields(path = %path))]
    pub async fn get_ok(&self, path: &str, query: &[(&str, String)]) -> Result<Value, KalshiError> {
        let mut attempt = 0;
        loop {
            let outcome = match self.request(Method::GET, path, query, None, None).await {
                Ok((200, body)) => return Ok(body),
                Ok((status, body)) => KalshiError::RequestFailed { status, body },
                Err(e) => e,
            };

            if attempt >= self.settings.max_retries || !outcome.is_transient() {
                return Err(outcome);
            }

            let delay = self.settings.retry_base * 2u32.saturating_pow(attempt);
            attempt += 1;
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %outcome, "Retrying Kalshi request");
            metrics::record_retry();
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl KalshiApi for KalshiClient {
    async fn list_series(&self, query: &SeriesQuery) -> Result<Page<Series>, KalshiError> {
        let body = self
            .get_ok(&format!("{}/series", API_PREFIX), &query.to_pairs())
            .await?;
        Page::from_body(&body, "series")
    }

    async fn list_markets(&self, query: &MarketsQuery) -> Result<Page<Market>, KalshiError> {
        let body = self
            .get_ok(&format!("{}/markets", API_PREFIX), &query.to_pairs())
            .await?;
        Page::from_body(&body, "markets")
    }

    async fn list_events(&self, query: &EventsQuery) -> Result<Page<Event>, KalshiError> {
        let body = self
            .get_ok(&format!("{}/events", API_PREFIX), &query.to_pairs())
            .await?;
        Page::from_body(&body, "events")
    }

    async fn get_event(&self, event_ticker: &str) -> Result<Event, KalshiError> {
        let path = format!("{}/events/{}", API_PREFIX, event_ticker);
        let body = self
            .get_ok(&path, &[("with_nested_markets", "true".to_string())])
            .await?;
        event_from_body(body)
    }
}

/// JSON when possible, otherwise `{"raw": text}`.
pub fn decode_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

/// `GET /events/{ticker}` answers `{event, markets}`; markets may also be nested.
fn event_from_body(mut body: Value) -> Result<Event, KalshiError> {
    let sibling_markets = body.get_mut("markets").map(Value::take);
    let raw_event = body
        .get_mut("event")
        .map(Value::take)
        .filter(Value::is_object)
        .ok_or_else(|| KalshiError::MalformedResponse("missing `event` object".to_string()))?;

    let mut event: Event = serde_json::from_value(raw_event)
        .map_err(|e| KalshiError::MalformedResponse(format!("event does not decode: {}", e)))?;

    if event.markets.is_empty() {
        if let Some(Value::Array(items)) = sibling_markets {
            event.markets = items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect();
        }
    }

    Ok(event)
}
