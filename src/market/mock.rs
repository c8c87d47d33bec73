//! Mock Kalshi client for unit testing.
//!
//! Serves scripted, cursor-paginated data through [`KalshiApi`] without making
//! network requests, and records every query it receives.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::error::KalshiError;

use super::client::{EventsQuery, KalshiApi, MarketsQuery, SeriesQuery};
use super::pagination::Page;
use super::types::{Event, Market, Series};

/// Configuration for mock client behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Items per page when the query has no limit.
    pub page_size: usize,
    /// Fail every series request.
    pub fail_series: bool,
    /// Fail event requests for these series tickers.
    pub fail_series_tickers: HashSet<String>,
    /// Fail event/market requests for these statuses.
    pub fail_statuses: HashSet<String>,
    /// Keep returning a cursor even after the data runs out.
    pub endless_cursor: bool,
    /// Simulated latency in milliseconds.
    pub latency_ms: u64,
}

/// A query received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// `list_series`.
    Series(SeriesQuery),
    /// `list_markets`.
    Markets(MarketsQuery),
    /// `list_events`.
    Events(EventsQuery),
    /// `get_event`.
    Event(String),
}

#[derive(Debug, Default)]
struct MockData {
    series: Vec<Series>,
    markets: Vec<Market>,
    events: Vec<Event>,
}

/// Mock Kalshi client for testing.
///
/// Listing filters mirror upstream: `status` and `series_ticker` are exact
/// matches; close-time bounds are ignored so local filtering gets exercised.
#[derive(Debug, Clone)]
pub struct MockKalshiClient {
    config: MockConfig,
    data: Arc<Mutex<MockData>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockKalshiClient {
    /// Create a new mock client with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    /// Create a mock client with custom configuration.
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            data: Arc::new(Mutex::new(MockData::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a series.
    pub fn add_series(&self, series: Series) {
        self.data.lock().unwrap().series.push(series);
    }

    /// Add a flat market.
    pub fn add_market(&self, market: Market) {
        self.data.lock().unwrap().markets.push(market);
    }

    /// Add an event (with its nested markets).
    pub fn add_event(&self, event: Event) {
        self.data.lock().unwrap().events.push(event);
    }

    /// Every query received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Clear all mock data and recorded calls.
    pub fn clear(&self) {
        let mut data = self.data.lock().unwrap();
        data.series.clear();
        data.markets.clear();
        data.events.clear();
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn page_of<T: Clone>(&self, items: Vec<T>, limit: Option<u32>, cursor: Option<&str>) -> Page<T> {
        let size = limit
            .map(|l| l as usize)
            .filter(|l| *l > 0)
            .unwrap_or(if self.config.page_size > 0 {
                self.config.page_size
            } else {
                100
            });
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (offset + size).min(items.len());
        let page_items = if offset < items.len() {
            items[offset..end].to_vec()
        } else {
            Vec::new()
        };

        let cursor = if end < items.len() || self.config.endless_cursor {
            Some(end.max(offset + size).to_string())
        } else {
            None
        };

        Page {
            items: page_items,
            cursor,
        }
    }

    fn scripted_failure(status: u16, reason: &str) -> KalshiError {
        KalshiError::RequestFailed {
            status,
            body: json!({ "raw": reason }),
        }
    }
}

impl Default for MockKalshiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(value: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => value.is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
    }
}

#[async_trait]
impl KalshiApi for MockKalshiClient {
    async fn list_series(&self, query: &SeriesQuery) -> Result<Page<Series>, KalshiError> {
        self.record(RecordedCall::Series(query.clone()));
        self.simulate_latency().await;

        if self.config.fail_series {
            return Err(Self::scripted_failure(500, "Mock series failure"));
        }

        let items = self.data.lock().unwrap().series.clone();
        Ok(self.page_of(items, query.limit, query.cursor.as_deref()))
    }

    async fn list_markets(&self, query: &MarketsQuery) -> Result<Page<Market>, KalshiError> {
        self.record(RecordedCall::Markets(query.clone()));
        self.simulate_latency().await;

        if let Some(status) = &query.status {
            if self.config.fail_statuses.contains(status) {
                return Err(Self::scripted_failure(503, "Mock status failure"));
            }
        }

        let items: Vec<Market> = self
            .data
            .lock()
            .unwrap()
            .markets
            .iter()
            .filter(|m| matches_filter(m.status.as_deref(), query.status.as_deref()))
            .filter(|m| matches_filter(m.series_ticker.as_deref(), query.series_ticker.as_deref()))
            .cloned()
            .collect();
        Ok(self.page_of(items, query.limit, query.cursor.as_deref()))
    }

    async fn list_events(&self, query: &EventsQuery) -> Result<Page<Event>, KalshiError> {
        self.record(RecordedCall::Events(query.clone()));
        self.simulate_latency().await;

        if let Some(status) = &query.status {
            if self.config.fail_statuses.contains(status) {
                return Err(Self::scripted_failure(503, "Mock status failure"));
            }
        }
        if let Some(series) = &query.series_ticker {
            if self.config.fail_series_tickers.contains(series) {
                return Err(Self::scripted_failure(500, "Mock series-scope failure"));
            }
        }

        let items: Vec<Event> = self
            .data
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| matches_filter(e.status.as_deref(), query.status.as_deref()))
            .filter(|e| matches_filter(e.series_ticker.as_deref(), query.series_ticker.as_deref()))
            .map(|e| {
                let mut event = e.clone();
                if !query.with_nested_markets {
                    event.markets.clear();
                }
                event
            })
            .collect();
        Ok(self.page_of(items, query.limit, query.cursor.as_deref()))
    }

    async fn get_event(&self, event_ticker: &str) -> Result<Event, KalshiError> {
        self.record(RecordedCall::Event(event_ticker.to_string()));
        self.simulate_latency().await;

        self.data
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.event_ticker.as_deref() == Some(event_ticker))
            .cloned()
            .ok_or_else(|| Self::scripted_failure(404, "event not found"))
    }
}

/// Builder for test markets.
pub struct MockMarketBuilder {
    market: Market,
}

impl MockMarketBuilder {
    /// Start a market with the given ticker.
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            market: Market {
                ticker: Some(ticker.into()),
                ..Market::default()
            },
        }
    }

    /// Set the event ticker.
    pub fn event(mut self, event_ticker: impl Into<String>) -> Self {
        self.market.event_ticker = Some(event_ticker.into());
        self
    }

    /// Set the series ticker.
    pub fn series(mut self, series_ticker: impl Into<String>) -> Self {
        self.market.series_ticker = Some(series_ticker.into());
        self
    }

    /// Set the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.market.title = Some(title.into());
        self
    }

    /// Set the status.
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.market.status = Some(status.into());
        self
    }

    /// Set the volume.
    pub fn volume(mut self, volume: i64) -> Self {
        self.market.volume = Some(volume);
        self
    }

    /// Set `close_time`.
    pub fn closes(mut self, close_time: impl Into<String>) -> Self {
        self.market.close_time = Some(close_time.into());
        self
    }

    /// Set the result.
    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.market.result = Some(result.into());
        self
    }

    /// Build the market.
    pub fn build(self) -> Market {
        self.market
    }
}
