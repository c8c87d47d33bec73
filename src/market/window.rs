//! Time-window planning over the events and markets listings.
//!
//! A window fetch fans out one paginator run per (status, series scope),
//! runs them with bounded concurrency, merges the batches in task order and
//! filters nested markets by end time locally. Upstream close-time filters
//! are treated as hints only.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::KalshiError;
use crate::metrics;

use super::classifier::filter_mention_like;
use super::client::{EventsQuery, KalshiApi, MarketsQuery, SeriesQuery};
use super::pagination::{paginate, Paged};
use super::types::{Event, Market, MarketStatus};

/// Days counted per month of lookback.
pub const DAYS_PER_MONTH: i64 = 30;

/// Lookback used by [`WindowPlanner::recent_closed`].
pub const RECENT_WINDOW_MONTHS: i64 = 1;

/// Statuses searched for history, most final first.
pub const HISTORY_STATUSES: [&str; 2] = ["settled", "determined"];

/// Longest accepted lookback; larger values are clamped to it.
pub const MAX_LOOKBACK_MONTHS: i64 = 1200;

/// Lookback clamped to `1..=MAX_LOOKBACK_MONTHS`.
pub fn clamp_months(months_back: i64) -> i64 {
    months_back.clamp(1, MAX_LOOKBACK_MONTHS)
}

/// Window start for a lookback of `months_back` months; non-positive means one.
///
/// Saturates at the earliest representable instant.
pub fn cutoff(now: OffsetDateTime, months_back: i64) -> OffsetDateTime {
    let days = clamp_months(months_back) * DAYS_PER_MONTH;
    now.checked_sub(Duration::days(days))
        .unwrap_or_else(|| PrimitiveDateTime::MIN.assume_utc())
}

/// Keep events' markets ending at or after `cutoff`; drop events left empty.
///
/// Markets whose end time is missing or unparsable are dropped.
pub fn filter_events_since(events: Vec<Event>, cutoff: OffsetDateTime) -> Vec<Event> {
    events
        .into_iter()
        .filter_map(|mut event| {
            event.markets = filter_markets_since(std::mem::take(&mut event.markets), cutoff);
            (!event.markets.is_empty()).then_some(event)
        })
        .collect()
}

/// Keep markets ending at or after `cutoff`.
pub fn filter_markets_since(markets: Vec<Market>, cutoff: OffsetDateTime) -> Vec<Market> {
    markets
        .into_iter()
        .filter(|m| m.end_time().is_some_and(|end| end >= cutoff))
        .collect()
}

/// Records with a lifecycle status.
pub trait Finality {
    /// Rank of the record's status; see [`MarketStatus::finality`].
    fn finality(&self) -> u8;
}

impl Finality for Event {
    fn finality(&self) -> u8 {
        MarketStatus::finality_of(self.status.as_deref())
    }
}

impl Finality for Market {
    fn finality(&self) -> u8 {
        MarketStatus::finality_of(self.status.as_deref())
    }
}

/// Merge batches in order, de-duplicating by ticker.
///
/// A duplicate replaces the kept record only when its status is strictly more
/// final; the record keeps its first-seen position. Records without a ticker
/// are dropped.
pub fn merge_by_finality<T>(batches: impl IntoIterator<Item = Vec<T>>) -> Vec<T>
where
    T: Paged + Finality,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<T> = Vec::new();

    for item in batches.into_iter().flatten() {
        let Some(ticker) = item.ticker().map(str::to_string) else {
            continue;
        };
        match index.get(&ticker) {
            Some(&pos) => {
                if item.finality() > merged[pos].finality() {
                    merged[pos] = item;
                }
            }
            None => {
                index.insert(ticker, merged.len());
                merged.push(item);
            }
        }
    }

    merged
}

/// Rebuild events from flat markets, bucketing by `event_ticker`, else title.
///
/// Buckets keep first-seen order; each event takes its identity from the
/// bucket's first market.
pub fn events_from_markets(markets: Vec<Market>) -> Vec<Event> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut events: Vec<Event> = Vec::new();

    for market in markets {
        let key = market
            .event_ticker
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| market.title.as_deref())
            .or_else(|| market.ticker.as_deref())
            .unwrap_or("Unknown")
            .to_string();

        match index.get(&key) {
            Some(&pos) => events[pos].markets.push(market),
            None => {
                index.insert(key.clone(), events.len());
                events.push(Event {
                    event_ticker: Some(key),
                    series_ticker: market.series_ticker.clone(),
                    title: market.title.clone(),
                    category: market.category.clone(),
                    status: market.status.clone(),
                    markets: vec![market],
                    ..Event::default()
                });
            }
        }
    }

    events
}

/// Paging and fan-out limits for the planner.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Items requested per page.
    pub page_limit: u32,
    /// Page budget per paginator run.
    pub max_pages: usize,
    /// Concurrent fetch tasks.
    pub concurrency: usize,
    /// Statuses that count as tradable listings.
    pub active_statuses: Vec<String>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            page_limit: 200,
            max_pages: 5,
            concurrency: 4,
            active_statuses: vec!["open".to_string()],
        }
    }
}

impl From<&Config> for PlannerSettings {
    fn from(config: &Config) -> Self {
        Self {
            page_limit: config.page_limit,
            max_pages: config.max_pages,
            concurrency: config.fetch_concurrency,
            active_statuses: config.active_statuses.clone(),
        }
    }
}

/// A series scope; `None` is the unscoped fallback.
type Scope = Option<String>;

/// Plans and runs window fetches against a [`KalshiApi`].
#[derive(Clone)]
pub struct WindowPlanner {
    api: Arc<dyn KalshiApi>,
    settings: PlannerSettings,
}

impl std::fmt::Debug for WindowPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowPlanner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl WindowPlanner {
    /// Create a planner.
    pub fn new(api: Arc<dyn KalshiApi>, settings: PlannerSettings) -> Self {
        Self { api, settings }
    }

    /// Planner settings.
    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Mention-like series tickers, in listing order.
    #[instrument(skip(self))]
    pub async fn mention_series(&self) -> Result<Vec<String>, KalshiError> {
        let api = &self.api;
        let limit = self.settings.page_limit;
        let series = paginate(
            move |cursor| async move {
                api.list_series(&SeriesQuery {
                    limit: Some(limit),
                    cursor,
                })
                .await
            },
            self.settings.max_pages,
            None,
        )
        .await?;

        let tickers: Vec<String> = filter_mention_like(series)
            .into_iter()
            .filter_map(|s| s.ticker)
            .collect();
        debug!(count = tickers.len(), "Discovered mention series");
        Ok(tickers)
    }

    async fn scopes(&self) -> Vec<Scope> {
        match self.mention_series().await {
            Ok(tickers) if !tickers.is_empty() => tickers.into_iter().map(Some).collect(),
            Ok(_) => {
                debug!("No mention series found, using unscoped listing");
                vec![None]
            }
            Err(e) => {
                warn!(error = %e, "Series discovery failed, using unscoped listing");
                metrics::record_partial_failure("series");
                vec![None]
            }
        }
    }

    fn tasks(statuses: &[String], scopes: &[Scope]) -> Vec<(String, Scope)> {
        statuses
            .iter()
            .flat_map(|status| scopes.iter().map(move |scope| (status.clone(), scope.clone())))
            .collect()
    }

    async fn events_task(
        &self,
        status: String,
        scope: Scope,
        cutoff: Option<OffsetDateTime>,
    ) -> Vec<Event> {
        let api = &self.api;
        let limit = self.settings.page_limit;
        let (status_ref, scope_ref) = (&status, &scope);
        let result = paginate(
            move |cursor| async move {
                api.list_events(&EventsQuery {
                    limit: Some(limit),
                    cursor,
                    series_ticker: scope_ref.clone(),
                    status: Some(status_ref.clone()),
                    with_nested_markets: true,
                    min_close_ts: cutoff.map(OffsetDateTime::unix_timestamp),
                    max_close_ts: None,
                })
                .await
            },
            self.settings.max_pages,
            cutoff,
        )
        .await;

        match result {
            // Scoped batches come from mention series already.
            Ok(events) if scope.is_some() => events,
            Ok(events) => filter_mention_like(events),
            Err(e) => {
                warn!(status = %status, scope = ?scope, error = %e, "Event fetch failed, skipping");
                metrics::record_partial_failure("events");
                Vec::new()
            }
        }
    }

    async fn markets_task(&self, status: String, scope: Scope, cutoff: OffsetDateTime) -> Vec<Market> {
        let api = &self.api;
        let limit = self.settings.page_limit;
        let (status_ref, scope_ref) = (&status, &scope);
        let result = paginate(
            move |cursor| async move {
                api.list_markets(&MarketsQuery {
                    limit: Some(limit),
                    cursor,
                    series_ticker: scope_ref.clone(),
                    status: Some(status_ref.clone()),
                    min_close_ts: Some(cutoff.unix_timestamp()),
                    max_close_ts: None,
                })
                .await
            },
            self.settings.max_pages,
            Some(cutoff),
        )
        .await;

        match result {
            Ok(markets) if scope.is_some() => markets,
            Ok(markets) => filter_mention_like(markets),
            Err(e) => {
                warn!(status = %status, scope = ?scope, error = %e, "Market fetch failed, skipping");
                metrics::record_partial_failure("markets");
                Vec::new()
            }
        }
    }

    async fn collect_events(&self, statuses: &[String], cutoff: Option<OffsetDateTime>) -> Vec<Event> {
        if statuses.is_empty() {
            return Vec::new();
        }

        let scopes = self.scopes().await;
        let tasks = Self::tasks(statuses, &scopes);
        debug!(tasks = tasks.len(), "Fetching event batches");

        let batches: Vec<Vec<Event>> = stream::iter(tasks)
            .map(|(status, scope)| self.events_task(status, scope, cutoff))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        merge_by_finality(batches)
    }

    /// Mention events with markets ending inside the last `months_back` months.
    pub async fn fetch_window(&self, months_back: i64, statuses: &[String]) -> Vec<Event> {
        self.fetch_window_at(OffsetDateTime::now_utc(), months_back, statuses)
            .await
    }

    /// [`fetch_window`](Self::fetch_window) relative to `now`.
    #[instrument(skip(self, now))]
    pub async fn fetch_window_at(
        &self,
        now: OffsetDateTime,
        months_back: i64,
        statuses: &[String],
    ) -> Vec<Event> {
        let _timer = metrics::timer_window_fetch();
        let cutoff = cutoff(now, months_back);

        let events = self.collect_events(statuses, Some(cutoff)).await;
        let events = filter_events_since(events, cutoff);
        info!(events = events.len(), cutoff = %cutoff, "Window fetched");
        events
    }

    /// Mention markets ending inside the last `months_back` months, from the
    /// flat markets listing.
    pub async fn fetch_window_markets(&self, months_back: i64, statuses: &[String]) -> Vec<Market> {
        self.fetch_window_markets_at(OffsetDateTime::now_utc(), months_back, statuses)
            .await
    }

    /// [`fetch_window_markets`](Self::fetch_window_markets) relative to `now`.
    #[instrument(skip(self, now))]
    pub async fn fetch_window_markets_at(
        &self,
        now: OffsetDateTime,
        months_back: i64,
        statuses: &[String],
    ) -> Vec<Market> {
        if statuses.is_empty() {
            return Vec::new();
        }
        let _timer = metrics::timer_window_fetch();
        let cutoff = cutoff(now, months_back);

        let scopes = self.scopes().await;
        let batches: Vec<Vec<Market>> = stream::iter(Self::tasks(statuses, &scopes))
            .map(|(status, scope)| self.markets_task(status, scope, cutoff))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let markets = filter_markets_since(merge_by_finality(batches), cutoff);
        info!(markets = markets.len(), cutoff = %cutoff, "Market window fetched");
        markets
    }

    /// Tradable mention events: listed under the active statuses, nested
    /// markets limited to active or initialized ones. No time window applies.
    #[instrument(skip(self))]
    pub async fn fetch_active_events(&self) -> Vec<Event> {
        let events = self
            .collect_events(&self.settings.active_statuses, None)
            .await;

        let events: Vec<Event> = events
            .into_iter()
            .filter_map(|mut event| {
                event.markets.retain(|m| {
                    matches!(
                        m.status(),
                        Some(MarketStatus::Active | MarketStatus::Initialized)
                    )
                });
                (!event.markets.is_empty()).then_some(event)
            })
            .collect();
        info!(events = events.len(), "Active events fetched");
        events
    }

    /// Finished mention events from the last `months_back` months whose
    /// markets mention `term`.
    pub async fn search_history(&self, term: &str, months_back: i64, include_closed: bool) -> Vec<Event> {
        self.search_history_at(OffsetDateTime::now_utc(), term, months_back, include_closed)
            .await
    }

    /// [`search_history`](Self::search_history) relative to `now`.
    pub async fn search_history_at(
        &self,
        now: OffsetDateTime,
        term: &str,
        months_back: i64,
        include_closed: bool,
    ) -> Vec<Event> {
        let statuses = history_statuses(include_closed);
        self.fetch_window_at(now, months_back, &statuses)
            .await
            .into_iter()
            .filter_map(|mut event| {
                event.markets.retain(|m| m.contains_term(term));
                (!event.markets.is_empty()).then_some(event)
            })
            .collect()
    }

    /// Most recently ended mention markets with a final result, newest first.
    ///
    /// Markets from a discovered mention series count as mentions, as in
    /// every other window.
    pub async fn recent_closed(&self, limit: usize) -> Vec<Market> {
        self.recent_closed_at(OffsetDateTime::now_utc(), limit).await
    }

    /// [`recent_closed`](Self::recent_closed) relative to `now`.
    pub async fn recent_closed_at(&self, now: OffsetDateTime, limit: usize) -> Vec<Market> {
        let statuses = history_statuses(false);
        let mut markets: Vec<Market> = self
            .fetch_window_markets_at(now, RECENT_WINDOW_MONTHS, &statuses)
            .await
            .into_iter()
            .filter(|m| m.resolution().is_some())
            .collect();

        markets.sort_by(|a, b| b.end_time().cmp(&a.end_time()));
        markets.truncate(limit);
        markets
    }
}

/// Status list for a history search; closed listings lead when included.
pub fn history_statuses(include_closed: bool) -> Vec<String> {
    let closed = include_closed.then_some("closed");
    closed
        .into_iter()
        .chain(HISTORY_STATUSES)
        .map(str::to_string)
        .collect()
}
