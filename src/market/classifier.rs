//! Mention-market classification.
//!
//! Kalshi has no authoritative "mentions" taxonomy across all of its data, so
//! this is a best-effort heuristic. Rules live in one ordered table per record
//! kind, and a single engine evaluates them.

use super::types::{Event, Market, Series};

/// A record field a rule can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `category`.
    Category,
    /// `title`.
    Title,
    /// `ticker` (series or market).
    Ticker,
    /// `event_ticker`.
    EventTicker,
    /// `series_ticker`.
    SeriesTicker,
}

/// How a field value is matched. Needles are lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Case-insensitive equality after trimming.
    Equals(&'static str),
    /// Case-insensitive substring.
    Contains(&'static str),
    /// Case-insensitive standalone word, bounded by spaces or the string ends.
    Word(&'static str),
}

impl MatchRule {
    fn matches(self, value: &str) -> bool {
        let value = value.to_lowercase();
        match self {
            MatchRule::Equals(needle) => value.trim() == needle,
            MatchRule::Contains(needle) => value.contains(needle),
            MatchRule::Word(needle) => format!(" {} ", value).contains(&format!(" {} ", needle)),
        }
    }
}

/// One row of a classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Field inspected.
    pub field: Field,
    /// Match applied to it.
    pub matcher: MatchRule,
}

const fn rule(field: Field, matcher: MatchRule) -> Rule {
    Rule { field, matcher }
}

/// Rules for markets and events.
pub const MENTION_RULES: &[Rule] = &[
    rule(Field::Category, MatchRule::Equals("mentions")),
    rule(Field::Title, MatchRule::Contains("mention")),
    rule(Field::Title, MatchRule::Word("say")),
    rule(Field::Ticker, MatchRule::Contains("mention")),
    rule(Field::Ticker, MatchRule::Contains("say")),
    rule(Field::EventTicker, MatchRule::Contains("mention")),
    rule(Field::EventTicker, MatchRule::Contains("say")),
    rule(Field::SeriesTicker, MatchRule::Contains("mention")),
    rule(Field::SeriesTicker, MatchRule::Contains("say")),
];

/// Series rules: the shared table plus "speech" on title or ticker.
pub const SERIES_RULES: &[Rule] = &[
    rule(Field::Category, MatchRule::Equals("mentions")),
    rule(Field::Title, MatchRule::Contains("mention")),
    rule(Field::Title, MatchRule::Word("say")),
    rule(Field::Ticker, MatchRule::Contains("mention")),
    rule(Field::Ticker, MatchRule::Contains("say")),
    rule(Field::Title, MatchRule::Contains("speech")),
    rule(Field::Ticker, MatchRule::Contains("speech")),
];

/// A record the classifier can evaluate.
pub trait Classifiable {
    /// Value of a field, if the record has it.
    fn field(&self, field: Field) -> Option<&str>;

    /// Table applied to this record kind.
    fn rules(&self) -> &'static [Rule] {
        MENTION_RULES
    }

    /// Child markets consulted when the record itself does not match.
    fn nested(&self) -> &[Market] {
        &[]
    }
}

impl Classifiable for Market {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Category => self.category.as_deref(),
            Field::Title => self.title.as_deref(),
            Field::Ticker => self.ticker.as_deref(),
            Field::EventTicker => self.event_ticker.as_deref(),
            Field::SeriesTicker => self.series_ticker.as_deref(),
        }
    }
}

impl Classifiable for Event {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Category => self.category.as_deref(),
            Field::Title => self.title.as_deref(),
            Field::Ticker | Field::EventTicker => self.event_ticker.as_deref(),
            Field::SeriesTicker => self.series_ticker.as_deref(),
        }
    }

    fn nested(&self) -> &[Market] {
        &self.markets
    }
}

impl Classifiable for Series {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Category => self.category.as_deref(),
            Field::Title => self.title.as_deref(),
            Field::Ticker | Field::SeriesTicker => self.ticker.as_deref(),
            Field::EventTicker => None,
        }
    }

    fn rules(&self) -> &'static [Rule] {
        SERIES_RULES
    }
}

/// First rule of the record's own table that matches, ignoring nested markets.
pub fn matching_rule<R: Classifiable + ?Sized>(record: &R) -> Option<&'static Rule> {
    record.rules().iter().find(|rule| {
        record
            .field(rule.field)
            .is_some_and(|value| rule.matcher.matches(value))
    })
}

/// Whether a series, event or market looks like a mention market.
///
/// Events fall back to their nested markets: one matching strike is enough.
pub fn is_mention_like<R: Classifiable + ?Sized>(record: &R) -> bool {
    matching_rule(record).is_some() || record.nested().iter().any(|m| is_mention_like(m))
}

/// Keep only mention-like records, preserving order.
pub fn filter_mention_like<R: Classifiable>(records: Vec<R>) -> Vec<R> {
    records.into_iter().filter(|r| is_mention_like(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_titled(title: &str) -> Market {
        Market {
            title: Some(title.to_string()),
            ..Market::default()
        }
    }

    #[test]
    fn title_with_mention_matches() {
        assert!(is_mention_like(&market_titled("Will Trump mention tariffs?")));
    }

    #[test]
    fn mentions_category_matches_case_insensitively() {
        let market = Market {
            category: Some("Mentions".to_string()),
            ..Market::default()
        };
        assert!(is_mention_like(&market));

        let near_miss = Market {
            category: Some("mentions-archive".to_string()),
            ..Market::default()
        };
        assert!(!is_mention_like(&near_miss));
    }

    #[test]
    fn unrelated_title_does_not_match() {
        assert!(!is_mention_like(&market_titled("Fed rate decision")));
    }

    #[test]
    fn say_in_ticker_matches() {
        let market = Market {
            ticker: Some("SAY-24".to_string()),
            ..Market::default()
        };
        assert!(is_mention_like(&market));
    }

    #[test]
    fn say_in_title_must_be_a_standalone_word() {
        assert!(is_mention_like(&market_titled("What will Powell say during the presser")));
        assert!(is_mention_like(&market_titled("say it again")));
        assert!(!is_mention_like(&market_titled("Essay contest winner")));
        assert!(!is_mention_like(&market_titled("Sayreville election")));
    }

    #[test]
    fn empty_record_does_not_match() {
        assert!(!is_mention_like(&Market::default()));
        assert!(!is_mention_like(&Event::default()));
        assert!(!is_mention_like(&Series::default()));
    }

    #[test]
    fn event_matches_through_nested_market() {
        let event = Event {
            event_ticker: Some("KXPRESSER-25JAN".to_string()),
            title: Some("Press conference".to_string()),
            markets: vec![
                market_titled("Fed rate decision"),
                Market {
                    series_ticker: Some("KXPOWELLMENTION".to_string()),
                    ..Market::default()
                },
            ],
            ..Event::default()
        };
        assert!(matching_rule(&event).is_none());
        assert!(is_mention_like(&event));
    }

    #[test]
    fn event_without_matching_markets_is_rejected() {
        let event = Event {
            title: Some("Fed rate decision".to_string()),
            markets: vec![market_titled("Above 4.5%")],
            ..Event::default()
        };
        assert!(!is_mention_like(&event));
    }

    #[test]
    fn speech_only_counts_for_series() {
        let series = Series {
            ticker: Some("KXSOTU".to_string()),
            title: Some("State of the Union speech".to_string()),
            ..Series::default()
        };
        assert!(is_mention_like(&series));
        assert_eq!(
            matching_rule(&series).map(|r| r.matcher),
            Some(MatchRule::Contains("speech"))
        );

        assert!(!is_mention_like(&market_titled("State of the Union speech")));
    }

    #[test]
    fn filter_preserves_order() {
        let kept = filter_mention_like(vec![
            market_titled("Will X mention Y"),
            market_titled("Fed rate decision"),
            market_titled("What will Z say"),
        ]);
        let titles: Vec<_> = kept.iter().filter_map(|m| m.title.as_deref()).collect();
        assert_eq!(titles, vec!["Will X mention Y", "What will Z say"]);
    }
}
