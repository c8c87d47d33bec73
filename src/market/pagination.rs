//! Cursor pagination over Kalshi list endpoints.

use std::collections::HashSet;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::Display;
use time::OffsetDateTime;
use tracing::debug;

use super::types::{Event, Market, Series};
use crate::error::KalshiError;

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Cursor for the next page, absent on the last one.
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    /// A page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }

    /// A page followed by `cursor`.
    pub fn with_cursor(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            cursor: Some(cursor.into()),
        }
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Decode a list response. Items are read from `key`, falling back to
    /// `data`; entries that do not decode are skipped. An empty cursor means
    /// there is no next page.
    pub fn from_body(body: &Value, key: &str) -> Result<Self, KalshiError> {
        if !body.is_object() {
            return Err(KalshiError::MalformedResponse(format!(
                "expected an object holding `{}`",
                key
            )));
        }

        let items = body
            .get(key)
            .filter(|v| v.is_array())
            .or_else(|| body.get("data").filter(|v| v.is_array()))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.is_object())
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let cursor = body
            .get("cursor")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(Self { items, cursor })
    }
}

/// What the paginator needs from an item.
pub trait Paged {
    /// Identity used for de-duplication.
    fn ticker(&self) -> Option<&str>;

    /// End time compared against the early-termination threshold.
    fn end_time(&self) -> Option<OffsetDateTime>;
}

impl Paged for Market {
    fn ticker(&self) -> Option<&str> {
        self.ticker.as_deref()
    }

    fn end_time(&self) -> Option<OffsetDateTime> {
        Market::end_time(self)
    }
}

impl Paged for Event {
    fn ticker(&self) -> Option<&str> {
        self.event_ticker.as_deref()
    }

    /// An event is still in the window while any of its strikes is, so its
    /// latest strike end time is what counts.
    fn end_time(&self) -> Option<OffsetDateTime> {
        self.last_end_time()
    }
}

impl Paged for Series {
    fn ticker(&self) -> Option<&str> {
        self.ticker.as_deref()
    }

    fn end_time(&self) -> Option<OffsetDateTime> {
        None
    }
}

/// Why a pagination run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// A page came back empty.
    EmptyPage,
    /// A page had no cursor.
    NoCursor,
    /// The page budget was used up.
    MaxPages,
    /// The oldest item on a page predates the threshold.
    BeforeThreshold,
}

/// Result of a pagination run.
#[derive(Debug, Clone)]
pub struct PageRun<T> {
    /// Unique items, first occurrence wins.
    pub items: Vec<T>,
    /// Pages requested.
    pub pages: usize,
    /// Why the run ended.
    pub stop: StopReason,
}

/// Follow cursors until a stop condition and return unique items by ticker.
///
/// Stops on an empty page, a missing cursor, after `max_pages` requests, or
/// when `earliest_allowed_end` is set and the oldest end time on the current
/// page is already before it.
///
/// The threshold stop assumes pages arrive roughly newest-first. If upstream
/// ordering does not hold, older pages may still contain in-window items and
/// those are missed; callers filter locally and treat this as an approximation.
pub async fn paginate<T, F, Fut, E>(
    fetch_page: F,
    max_pages: usize,
    earliest_allowed_end: Option<OffsetDateTime>,
) -> Result<Vec<T>, E>
where
    T: Paged,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    paginate_run(fetch_page, max_pages, earliest_allowed_end)
        .await
        .map(|run| run.items)
}

/// [`paginate`], also reporting page count and stop reason.
pub async fn paginate_run<T, F, Fut, E>(
    mut fetch_page: F,
    max_pages: usize,
    earliest_allowed_end: Option<OffsetDateTime>,
) -> Result<PageRun<T>, E>
where
    T: Paged,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut items: Vec<T> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    let stop = loop {
        if pages >= max_pages {
            break StopReason::MaxPages;
        }

        let page = fetch_page(cursor.take()).await?;
        pages += 1;

        if page.items.is_empty() {
            break StopReason::EmptyPage;
        }

        let oldest = page.items.iter().filter_map(Paged::end_time).min();

        for item in page.items {
            if let Some(ticker) = item.ticker() {
                if seen.insert(ticker.to_string()) {
                    items.push(item);
                }
            }
        }

        if let (Some(threshold), Some(oldest)) = (earliest_allowed_end, oldest) {
            if oldest < threshold {
                debug!(pages, oldest = %oldest, threshold = %threshold, "Page predates window, stopping early");
                break StopReason::BeforeThreshold;
            }
        }

        match page.cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => break StopReason::NoCursor,
        }
    };

    debug!(pages, items = items.len(), stop = %stop, "Pagination finished");
    crate::metrics::record_pages_fetched(pages);

    Ok(PageRun { items, pages, stop })
}

/// Keep the first item per ticker; items without a ticker are dropped.
pub fn dedup_by_ticker<T: Paged>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen: HashSet<String> = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            item.ticker()
                .is_some_and(|ticker| seen.insert(ticker.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;
    use time::macros::datetime;

    fn market(ticker: &str, close: &str) -> Market {
        Market {
            ticker: Some(ticker.to_string()),
            close_time: Some(close.to_string()),
            ..Market::default()
        }
    }

    fn tickers(items: &[Market]) -> Vec<&str> {
        items.iter().filter_map(|m| m.ticker.as_deref()).collect()
    }

    #[tokio::test]
    async fn follows_cursor_until_missing() {
        let run = paginate_run(
            |cursor| async move {
                Ok::<_, KalshiError>(match cursor.as_deref() {
                    None => Page::with_cursor(vec![market("A", "2025-01-03T00:00:00Z")], "c1"),
                    Some("c1") => Page::with_cursor(vec![market("B", "2025-01-02T00:00:00Z")], "c2"),
                    _ => Page::last(vec![market("C", "2025-01-01T00:00:00Z")]),
                })
            },
            10,
            None,
        )
        .await
        .unwrap();

        assert_eq!(tickers(&run.items), vec!["A", "B", "C"]);
        assert_eq!(run.pages, 3);
        assert_eq!(run.stop, StopReason::NoCursor);
    }

    #[tokio::test]
    async fn terminates_within_max_pages_when_upstream_never_ends() {
        let calls = Cell::new(0usize);
        let run = paginate_run(
            |_cursor| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    Ok::<_, KalshiError>(Page::with_cursor(
                        vec![market(&format!("M{}", n), "2025-01-01T00:00:00Z")],
                        format!("c{}", n),
                    ))
                }
            },
            4,
            None,
        )
        .await
        .unwrap();

        assert_eq!(calls.get(), 4);
        assert_eq!(run.pages, 4);
        assert_eq!(run.stop, StopReason::MaxPages);
        assert_eq!(run.items.len(), 4);
    }

    #[tokio::test]
    async fn zero_max_pages_issues_no_requests() {
        let calls = Cell::new(0usize);
        let items: Vec<Market> = paginate(
            |_cursor| {
                calls.set(calls.get() + 1);
                async { Ok::<_, KalshiError>(Page::last(vec![])) }
            },
            0,
            None,
        )
        .await
        .unwrap();

        assert!(items.is_empty());
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn stops_on_empty_page_even_with_cursor() {
        let run = paginate_run(
            |cursor| async move {
                Ok::<_, KalshiError>(match cursor {
                    None => Page::with_cursor(vec![market("A", "2025-01-01T00:00:00Z")], "c1"),
                    Some(_) => Page::with_cursor(vec![], "c2"),
                })
            },
            10,
            None,
        )
        .await
        .unwrap();

        assert_eq!(run.stop, StopReason::EmptyPage);
        assert_eq!(run.pages, 2);
    }

    #[tokio::test]
    async fn dedups_across_pages_keeping_first() {
        let items = paginate(
            |cursor| async move {
                Ok::<_, KalshiError>(match cursor {
                    None => Page::with_cursor(
                        vec![
                            Market {
                                title: Some("first".into()),
                                ..market("A", "2025-01-01T00:00:00Z")
                            },
                            market("B", "2025-01-01T00:00:00Z"),
                        ],
                        "c1",
                    ),
                    Some(_) => Page::last(vec![
                        Market {
                            title: Some("second".into()),
                            ..market("A", "2025-01-01T00:00:00Z")
                        },
                        market("C", "2025-01-01T00:00:00Z"),
                    ]),
                })
            },
            5,
            None,
        )
        .await
        .unwrap();

        assert_eq!(tickers(&items), vec!["A", "B", "C"]);
        assert_eq!(items[0].title.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn stops_once_page_predates_threshold() {
        let threshold = datetime!(2025-01-10 0:00 UTC);
        let run = paginate_run(
            |cursor| async move {
                Ok::<_, KalshiError>(match cursor.as_deref() {
                    None => Page::with_cursor(
                        vec![
                            market("NEW1", "2025-01-20T00:00:00Z"),
                            market("NEW2", "2025-01-15T00:00:00Z"),
                        ],
                        "c1",
                    ),
                    Some("c1") => Page::with_cursor(
                        vec![
                            market("MID", "2025-01-12T00:00:00Z"),
                            market("OLD", "2025-01-05T00:00:00Z"),
                        ],
                        "c2",
                    ),
                    _ => panic!("should not request past the threshold page"),
                })
            },
            10,
            Some(threshold),
        )
        .await
        .unwrap();

        assert_eq!(run.stop, StopReason::BeforeThreshold);
        assert_eq!(run.pages, 2);
        // Items on the boundary page are still returned; callers filter locally.
        assert_eq!(tickers(&run.items), vec!["NEW1", "NEW2", "MID", "OLD"]);
    }

    #[tokio::test]
    async fn unparsable_end_times_do_not_trigger_threshold() {
        let run = paginate_run(
            |cursor| async move {
                Ok::<_, KalshiError>(match cursor {
                    None => Page::with_cursor(vec![market("A", "not a date")], "c1"),
                    Some(_) => Page::last(vec![market("B", "2030-01-01T00:00:00Z")]),
                })
            },
            10,
            Some(datetime!(2025-01-01 0:00 UTC)),
        )
        .await
        .unwrap();

        assert_eq!(run.stop, StopReason::NoCursor);
        assert_eq!(run.items.len(), 2);
    }

    #[tokio::test]
    async fn propagates_page_errors() {
        let result: Result<Vec<Market>, KalshiError> = paginate(
            |_cursor| async {
                Err(KalshiError::RequestFailed {
                    status: 500,
                    body: json!({"raw": "boom"}),
                })
            },
            3,
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(KalshiError::RequestFailed { status: 500, .. })
        ));
    }

    #[test]
    fn page_reads_resource_key_or_data() {
        let page: Page<Market> = Page::from_body(
            &json!({"markets": [{"ticker": "A"}, "junk"], "cursor": "abc"}),
            "markets",
        )
        .unwrap();
        assert_eq!(tickers(&page.items), vec!["A"]);
        assert_eq!(page.cursor.as_deref(), Some("abc"));

        let fallback: Page<Market> =
            Page::from_body(&json!({"data": [{"ticker": "B"}], "cursor": ""}), "markets").unwrap();
        assert_eq!(tickers(&fallback.items), vec!["B"]);
        assert_eq!(fallback.cursor, None);
    }

    #[test]
    fn page_from_raw_wrapper_is_empty() {
        let page: Page<Market> =
            Page::from_body(&json!({"raw": "<html>bad gateway</html>"}), "markets").unwrap();
        assert!(page.items.is_empty());
        assert!(page.cursor.is_none());
    }

    #[test]
    fn page_rejects_non_object_bodies() {
        assert!(Page::<Market>::from_body(&json!([1, 2]), "markets").is_err());
    }

    #[test]
    fn dedup_keeps_first_and_drops_tickerless() {
        let items = dedup_by_ticker(vec![
            Market {
                volume: Some(1),
                ..market("A", "")
            },
            Market::default(),
            market("B", ""),
            Market {
                volume: Some(2),
                ..market("A", "")
            },
        ]);
        assert_eq!(tickers(&items), vec!["A", "B"]);
        assert_eq!(items[0].volume, Some(1));
    }
}
