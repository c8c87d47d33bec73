//! Grouping strikes into events for display.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use super::types::{Event, Market};

/// End-time sentinel for groups with no parsable end time (2^31 - 1).
pub const FAR_FUTURE_TS: i64 = i32::MAX as i64;

/// Sort order for groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Soonest-ending first.
    Active,
    /// Most recently ended first.
    Historical,
}

impl View {
    /// Static label, for metrics.
    pub fn label(self) -> &'static str {
        match self {
            View::Active => "active",
            View::Historical => "historical",
        }
    }
}

/// Strikes of one event, with aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    /// Grouping key: event ticker, else title, else ticker, else `Unknown`.
    pub event_ticker: String,
    /// First member's title, else the key.
    pub display_title: String,
    /// Unique members in input order.
    pub markets: Vec<Market>,
    /// Sum of member volumes.
    pub total_volume: i64,
    /// Earliest member end time (unix seconds), or [`FAR_FUTURE_TS`].
    pub end_ts: i64,
    /// Latest member end time (unix seconds).
    pub last_ts: Option<i64>,
}

fn group_key(market: &Market) -> String {
    [&market.event_ticker, &market.title, &market.ticker]
        .into_iter()
        .find_map(|field| field.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or("Unknown")
        .to_string()
}

fn build_group(key: String, markets: Vec<Market>) -> Group {
    let ends: Vec<i64> = markets
        .iter()
        .filter_map(Market::end_time)
        .map(OffsetDateTime::unix_timestamp)
        .collect();

    let display_title = markets
        .first()
        .and_then(|m| m.title.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| key.clone());

    Group {
        total_volume: markets.iter().map(Market::volume_or_zero).sum(),
        end_ts: ends.iter().copied().min().unwrap_or(FAR_FUTURE_TS),
        last_ts: ends.iter().copied().max(),
        display_title,
        event_ticker: key,
        markets,
    }
}

/// Group strikes by event, keep groups with at least two unique strikes, and
/// sort for `view`.
///
/// Members are de-duplicated by ticker (first wins); markets without a ticker
/// are dropped. Ties keep first-seen group order.
pub fn group_and_filter(markets: Vec<Market>, view: View) -> Vec<Group> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, Vec<Market>, HashSet<String>)> = Vec::new();

    for market in markets {
        let Some(ticker) = market.ticker.clone() else {
            continue;
        };
        let key = group_key(&market);
        let pos = *index.entry(key.clone()).or_insert_with(|| {
            buckets.push((key, Vec::new(), HashSet::new()));
            buckets.len() - 1
        });

        let (_, members, seen) = &mut buckets[pos];
        if seen.insert(ticker) {
            members.push(market);
        }
    }

    let mut groups: Vec<Group> = buckets
        .into_iter()
        .filter(|(_, members, _)| members.len() > 1)
        .map(|(key, members, _)| build_group(key, members))
        .collect();

    match view {
        View::Active => groups.sort_by_key(|g| g.end_ts),
        // None sorts below Some, so reversing puts undated groups last.
        View::Historical => groups.sort_by(|a, b| b.last_ts.cmp(&a.last_ts)),
    }

    groups
}

/// Flatten events' nested markets, then [`group_and_filter`].
pub fn group_events(events: Vec<Event>, view: View) -> Vec<Group> {
    group_and_filter(
        events.into_iter().flat_map(|e| e.markets).collect(),
        view,
    )
}

/// Totals across groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    /// Number of groups.
    pub groups: usize,
    /// Number of strikes across groups.
    pub strikes: usize,
    /// Combined volume.
    pub total_volume: i64,
}

/// Count groups, strikes and volume.
pub fn summarize(groups: &[Group]) -> GroupSummary {
    GroupSummary {
        groups: groups.len(),
        strikes: groups.iter().map(|g| g.markets.len()).sum(),
        total_volume: groups.iter().map(|g| g.total_volume).sum(),
    }
}

/// SHA-256 hex digest of the markets' JSON encoding.
///
/// Field order is fixed by the struct and `extra` is a sorted map, so equal
/// inputs produce equal keys.
pub fn fingerprint(markets: &[Market]) -> String {
    let encoded = serde_json::to_vec(markets).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}
