//! Kalshi record types: series, events and markets (strikes).
//!
//! Upstream payloads are loosely shaped, so every field is optional, numbers may
//! arrive as strings, and unknown fields are kept in `extra` so a record can be
//! re-emitted unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Lifecycle status of a market or event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum MarketStatus {
    /// Created but not yet trading.
    #[strum(to_string = "initialized", serialize = "unopened")]
    Initialized,
    /// Trading.
    #[strum(to_string = "active", serialize = "open")]
    Active,
    /// Trading halted, result pending.
    Closed,
    /// Paid out.
    Settled,
    /// Result known, settlement pending.
    Determined,
}

impl MarketStatus {
    /// How far along the lifecycle a status is; higher is more final.
    pub fn finality(self) -> u8 {
        match self {
            MarketStatus::Initialized => 1,
            MarketStatus::Active => 2,
            MarketStatus::Closed => 3,
            MarketStatus::Settled => 4,
            MarketStatus::Determined => 5,
        }
    }

    /// Finality of an optional raw status string; unknown values rank lowest.
    pub fn finality_of(raw: Option<&str>) -> u8 {
        raw.and_then(|s| s.trim().parse::<MarketStatus>().ok())
            .map(MarketStatus::finality)
            .unwrap_or(0)
    }
}

/// A market family, e.g. "What will Powell say".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Series ticker.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    /// Human title.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Upstream category.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An event: one topic aggregating one or more strikes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event ticker.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub event_ticker: Option<String>,
    /// Parent series ticker.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub series_ticker: Option<String>,
    /// Human title.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Secondary title.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub sub_title: Option<String>,
    /// Upstream category.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Raw status string.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Nested strikes (present when requested with `with_nested_markets`).
    #[serde(default, deserialize_with = "lenient_markets", skip_serializing_if = "Vec::is_empty")]
    pub markets: Vec<Market>,
    /// Fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single binary strike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Market ticker.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    /// Parent event ticker.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub event_ticker: Option<String>,
    /// Parent series ticker.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub series_ticker: Option<String>,
    /// Market title.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Candidate word/phrase.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// YES-side label.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub yes_sub_title: Option<String>,
    /// NO-side label.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub no_sub_title: Option<String>,
    /// Raw status string.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Upstream category.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Best YES bid in cents.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub yes_bid: Option<i64>,
    /// Best YES ask in cents.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub yes_ask: Option<i64>,
    /// Best NO bid in cents.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub no_bid: Option<i64>,
    /// Best NO ask in cents.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub no_ask: Option<i64>,
    /// Contracts traded.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    /// Open contracts.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<i64>,
    /// Scheduled close.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub close_time: Option<String>,
    /// Alternate end field used by some payloads.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Expiry.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    /// Latest possible expiration.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub latest_expiration_time: Option<String>,
    /// "", "yes" or "no".
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Settlement result of a strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The word was said.
    Yes,
    /// The word was not said.
    No,
}

impl Market {
    /// Raw end-time value: first present of `close_time`, `end_date`,
    /// `expiry_time`, `latest_expiration_time`.
    ///
    /// This is the only place that fallback chain lives.
    pub fn end_time_raw(&self) -> Option<&str> {
        [
            &self.close_time,
            &self.end_date,
            &self.expiry_time,
            &self.latest_expiration_time,
        ]
        .into_iter()
        .find_map(|field| field.as_deref().filter(|s| !s.trim().is_empty()))
    }

    /// Parsed end time in UTC, if the resolved field parses.
    pub fn end_time(&self) -> Option<OffsetDateTime> {
        self.end_time_raw().and_then(parse_timestamp)
    }

    /// Parsed status.
    pub fn status(&self) -> Option<MarketStatus> {
        self.status.as_deref().and_then(|s| s.trim().parse().ok())
    }

    /// Final result, when there is one.
    pub fn resolution(&self) -> Option<Resolution> {
        self.result.as_deref().and_then(|s| s.trim().parse().ok())
    }

    /// Volume with missing values read as zero.
    pub fn volume_or_zero(&self) -> i64 {
        self.volume.unwrap_or(0)
    }

    /// Strike label: first non-empty subtitle, else the last `-` segment of the ticker.
    pub fn description(&self) -> String {
        [&self.subtitle, &self.yes_sub_title, &self.no_sub_title]
            .into_iter()
            .find_map(|field| field.as_deref().filter(|s| !s.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| match self.ticker.as_deref() {
                Some(t) if t.contains('-') => t.rsplit('-').next().unwrap_or_default().to_string(),
                _ => String::new(),
            })
    }

    /// Case-insensitive substring search across titles, subtitles and tickers.
    /// An empty term matches everything.
    pub fn contains_term(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [
            &self.title,
            &self.subtitle,
            &self.yes_sub_title,
            &self.no_sub_title,
            &self.ticker,
            &self.event_ticker,
            &self.series_ticker,
        ]
        .into_iter()
        .filter_map(|field| field.as_deref())
        .any(|value| value.to_lowercase().contains(&needle))
    }
}

impl Event {
    /// Latest parsed end time among nested markets.
    pub fn last_end_time(&self) -> Option<OffsetDateTime> {
        self.markets.iter().filter_map(Market::end_time).max()
    }

    /// Parsed status.
    pub fn status(&self) -> Option<MarketStatus> {
        self.status.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

/// Parse an upstream timestamp as UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` without offset, a bare date, or
/// epoch seconds/milliseconds. Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts.to_offset(time::UtcOffset::UTC));
    }

    if let Ok(ts) = PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(ts.assume_utc());
    }

    if let Ok(date) = Date::parse(raw, format_description!("[year]-[month]-[day]")) {
        return Some(date.midnight().assume_utc());
    }

    if let Ok(epoch) = raw.parse::<i64>() {
        // Values this large are milliseconds.
        let secs = if epoch.abs() >= 100_000_000_000 {
            epoch / 1000
        } else {
            epoch
        };
        return OffsetDateTime::from_unix_timestamp(secs).ok();
    }

    None
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

/// Non-object entries and entries that fail to decode are skipped.
fn lenient_markets<'de, D>(deserializer: D) -> Result<Vec<Market>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}
