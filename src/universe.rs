//! Cached mention universe and the read operations served from it.
//!
//! The universe is one snapshot of active and historical mention events. It is
//! loaded through a [`WindowPlanner`] and kept in an injected [`Cache`] for the
//! configured TTL. Group computations are memoized by input fingerprint.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use crate::cache::{Cache, MemoryCache};
use crate::config::Config;
use crate::metrics;
use crate::market::grouping::{fingerprint, group_and_filter, Group, View};
use crate::market::types::{Event, Market};
use crate::market::window::{events_from_markets, WindowPlanner};

const UNIVERSE_KEY: &str = "universe";

/// Group results kept at once, across views and searches.
const GROUP_MEMO_ENTRIES: usize = 64;

/// Recent lists kept at once, one per limit.
const RECENT_MEMO_ENTRIES: usize = 16;

/// Snapshot of everything mention-related.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MentionUniverse {
    /// Tradable mention events.
    pub events_active: Vec<Event>,
    /// Finished mention events inside the lookback window.
    pub events_hist: Vec<Event>,
    /// Every nested market, active first.
    pub all_markets: Vec<Market>,
    /// Build time, RFC 3339.
    pub generated_at: String,
}

impl MentionUniverse {
    /// Assemble a snapshot, flattening nested markets.
    pub fn new(events_active: Vec<Event>, events_hist: Vec<Event>, generated_at: OffsetDateTime) -> Self {
        let all_markets = events_active
            .iter()
            .chain(&events_hist)
            .flat_map(|e| e.markets.iter().cloned())
            .collect();
        Self {
            events_active,
            events_hist,
            all_markets,
            generated_at: generated_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

/// Lookback and caching knobs.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// History lookback in months.
    pub lookback_months: i64,
    /// Statuses for the history window.
    pub history_statuses: Vec<String>,
    /// Cache TTL.
    pub ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            lookback_months: 12,
            history_statuses: ["closed", "settled", "determined"]
                .map(str::to_string)
                .to_vec(),
            ttl: Duration::from_secs(900),
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            lookback_months: config.lookback_months,
            history_statuses: config.history_statuses.clone(),
            ttl: config.cache_ttl(),
        }
    }
}

/// Read operations over Kalshi mention markets.
#[derive(Clone)]
pub struct MentionService {
    planner: WindowPlanner,
    universe: Arc<dyn Cache<Arc<MentionUniverse>>>,
    groups: Arc<MemoryCache<Arc<Vec<Group>>>>,
    recent: Arc<MemoryCache<Arc<Vec<Market>>>>,
    settings: ServiceSettings,
}

impl std::fmt::Debug for MentionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MentionService")
            .field("planner", &self.planner)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MentionService {
    /// Create a service with an in-memory universe cache.
    pub fn new(planner: WindowPlanner, settings: ServiceSettings) -> Self {
        Self::with_cache(planner, Arc::new(MemoryCache::new()), settings)
    }

    /// Create a service with a caller-supplied universe cache.
    pub fn with_cache(
        planner: WindowPlanner,
        cache: Arc<dyn Cache<Arc<MentionUniverse>>>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            planner,
            universe: cache,
            groups: Arc::new(MemoryCache::bounded(GROUP_MEMO_ENTRIES)),
            recent: Arc::new(MemoryCache::bounded(RECENT_MEMO_ENTRIES)),
            settings,
        }
    }

    /// The planner behind this service.
    pub fn planner(&self) -> &WindowPlanner {
        &self.planner
    }

    /// Cached universe, loading it when absent or expired.
    pub async fn universe(&self) -> Arc<MentionUniverse> {
        if let Some(hit) = self.universe.get(UNIVERSE_KEY) {
            debug!("Universe cache hit");
            return hit;
        }
        self.refresh().await
    }

    /// Load the universe now and replace the cached copy.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Arc<MentionUniverse> {
        let universe = Arc::new(self.load().await);
        self.universe
            .set(UNIVERSE_KEY, Arc::clone(&universe), self.settings.ttl);
        universe
    }

    async fn load(&self) -> MentionUniverse {
        let (events_active, events_hist) = tokio::join!(
            self.planner.fetch_active_events(),
            self.planner
                .fetch_window(self.settings.lookback_months, &self.settings.history_statuses),
        );

        let events_hist = if events_hist.is_empty() {
            debug!("Event window empty, rebuilding history from the markets listing");
            let markets = self
                .planner
                .fetch_window_markets(self.settings.lookback_months, &self.settings.history_statuses)
                .await;
            events_from_markets(markets)
        } else {
            events_hist
        };

        let universe = MentionUniverse::new(events_active, events_hist, OffsetDateTime::now_utc());
        info!(
            active = universe.events_active.len(),
            historical = universe.events_hist.len(),
            markets = universe.all_markets.len(),
            "Mention universe loaded"
        );
        universe
    }

    fn grouped(&self, markets: Vec<Market>, view: View) -> Arc<Vec<Group>> {
        let key = format!("{}:{}", view, fingerprint(&markets));
        if let Some(hit) = self.groups.get(&key) {
            return hit;
        }
        let groups = Arc::new(group_and_filter(markets, view));
        metrics::set_groups(view.label(), groups.len());
        self.groups.set(&key, Arc::clone(&groups), self.settings.ttl);
        groups
    }

    /// Active mention events grouped soonest-ending first.
    pub async fn active_groups(&self) -> Arc<Vec<Group>> {
        let universe = self.universe().await;
        let markets = universe
            .events_active
            .iter()
            .flat_map(|e| e.markets.iter().cloned())
            .collect();
        self.grouped(markets, View::Active)
    }

    /// Historical groups whose strikes mention `term`, most recent first.
    ///
    /// An empty term over the default lookback, closed markets included, is
    /// served from the cached universe.
    pub async fn history_groups(
        &self,
        term: &str,
        months_back: Option<i64>,
        include_closed: bool,
    ) -> Arc<Vec<Group>> {
        let months = months_back.unwrap_or(self.settings.lookback_months);

        let markets: Vec<Market> = if term.trim().is_empty() && months_back.is_none() && include_closed {
            self.universe()
                .await
                .events_hist
                .iter()
                .flat_map(|e| e.markets.iter().cloned())
                .collect()
        } else {
            self.planner
                .search_history(term, months, include_closed)
                .await
                .into_iter()
                .flat_map(|e| e.markets)
                .collect()
        };
        self.grouped(markets, View::Historical)
    }

    /// Most recently ended mention markets with a final result.
    pub async fn recent(&self, limit: usize) -> Arc<Vec<Market>> {
        let key = limit.to_string();
        if let Some(hit) = self.recent.get(&key) {
            return hit;
        }
        let markets = Arc::new(self.planner.recent_closed(limit).await);
        self.recent.set(&key, Arc::clone(&markets), self.settings.ttl);
        markets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::client::KalshiApi;
    use crate::market::mock::{MockKalshiClient, MockMarketBuilder};
    use crate::market::window::PlannerSettings;
    use pretty_assertions::assert_eq;
    use time::Duration as TimeDuration;

    fn soon(days: i64) -> String {
        (OffsetDateTime::now_utc() + TimeDuration::days(days))
            .format(&Rfc3339)
            .unwrap()
    }

    fn strike(ticker: &str, event: &str, status: &str, closes: String) -> Market {
        MockMarketBuilder::new(ticker)
            .event(event)
            .title("What will Powell say")
            .status(status)
            .volume(5)
            .closes(closes)
            .build()
    }

    fn event(ticker: &str, status: &str, markets: Vec<Market>) -> Event {
        Event {
            event_ticker: Some(ticker.to_string()),
            title: Some("Powell mentions".to_string()),
            status: Some(status.to_string()),
            markets,
            ..Event::default()
        }
    }

    fn service(client: &MockKalshiClient) -> MentionService {
        let api: Arc<dyn KalshiApi> = Arc::new(client.clone());
        MentionService::new(
            WindowPlanner::new(api, PlannerSettings::default()),
            ServiceSettings::default(),
        )
    }

    fn seeded() -> MockKalshiClient {
        let client = MockKalshiClient::new();
        client.add_event(event(
            "KXMENTION-LIVE",
            "open",
            vec![
                strike("LIVE-A", "KXMENTION-LIVE", "active", soon(2)),
                strike("LIVE-B", "KXMENTION-LIVE", "active", soon(3)),
            ],
        ));
        client.add_event(event(
            "KXMENTION-DONE",
            "settled",
            vec![
                strike("DONE-A", "KXMENTION-DONE", "settled", soon(-3)),
                strike("DONE-B", "KXMENTION-DONE", "settled", soon(-2)),
            ],
        ));
        client
    }

    #[test]
    fn universe_flattens_markets_active_first() {
        let universe = MentionUniverse::new(
            vec![event("A", "open", vec![strike("A-1", "A", "active", soon(1))])],
            vec![event("H", "settled", vec![strike("H-1", "H", "settled", soon(-1))])],
            OffsetDateTime::UNIX_EPOCH,
        );
        let tickers: Vec<_> = universe
            .all_markets
            .iter()
            .filter_map(|m| m.ticker.as_deref())
            .collect();
        assert_eq!(tickers, vec!["A-1", "H-1"]);
        assert_eq!(universe.generated_at, "1970-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn universe_is_cached_between_calls() {
        let client = seeded();
        let service = service(&client);

        let first = service.universe().await;
        let calls = client.call_count();
        let second = service.universe().await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.call_count(), calls);
        assert_eq!(first.events_active.len(), 1);
        assert_eq!(first.events_hist.len(), 1);
        assert_eq!(first.all_markets.len(), 4);
    }

    #[tokio::test]
    async fn refresh_reloads() {
        let client = seeded();
        let service = service(&client);

        let first = service.universe().await;
        let second = service.refresh().await;
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn empty_event_window_falls_back_to_markets() {
        let client = MockKalshiClient::new();
        client.add_market(strike("FLAT-A", "KXMENTION-FLAT", "settled", soon(-1)));
        client.add_market(strike("FLAT-B", "KXMENTION-FLAT", "settled", soon(-1)));

        let universe = service(&client).universe().await;
        assert_eq!(universe.events_hist.len(), 1);
        assert_eq!(
            universe.events_hist[0].event_ticker.as_deref(),
            Some("KXMENTION-FLAT")
        );
        assert_eq!(universe.events_hist[0].markets.len(), 2);
    }

    #[tokio::test]
    async fn active_groups_are_memoized() {
        let client = seeded();
        let service = service(&client);

        let first = service.active_groups().await;
        let second = service.active_groups().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event_ticker, "KXMENTION-LIVE");
        assert_eq!(first[0].total_volume, 10);
    }

    #[tokio::test]
    async fn history_groups_search_by_term() {
        let client = seeded();
        let service = service(&client);

        let hits = service.history_groups("done", Some(1), false).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event_ticker, "KXMENTION-DONE");

        let misses = service.history_groups("tariff", Some(1), false).await;
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn group_memo_stays_bounded() {
        let service = service(&seeded());

        for i in 0..(GROUP_MEMO_ENTRIES * 3) {
            let markets = vec![strike(&format!("S-{}", i), "KXMENTION-S", "settled", soon(-1))];
            service.grouped(markets, View::Historical);
        }
        assert!(service.groups.len() <= GROUP_MEMO_ENTRIES);

        // Memoized results still come back after the sweep.
        let first = service.active_groups().await;
        let second = service.active_groups().await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn recent_is_cached_per_limit() {
        let client = MockKalshiClient::new();
        client.add_market(
            MockMarketBuilder::new("KXMENTION-1")
                .status("settled")
                .closes(soon(-1))
                .result("no")
                .build(),
        );
        let service = service(&client);

        let first = service.recent(5).await;
        let calls = client.call_count();
        let second = service.recent(5).await;
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.call_count(), calls);
    }
}
