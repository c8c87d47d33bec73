//! Kalshi mention-market data.
//!
//! This module handles:
//! - Record types for series, events and markets
//! - The signed Kalshi REST client
//! - Cursor pagination with early termination
//! - Mention classification
//! - Time-window planning and strike grouping
//! - Mock client for testing

pub mod classifier;
pub mod client;
pub mod grouping;
pub mod mock;
pub mod pagination;
pub mod types;
pub mod window;

pub use classifier::{filter_mention_like, is_mention_like, Classifiable};
pub use client::{EventsQuery, HttpSettings, KalshiApi, KalshiClient, MarketsQuery, SeriesQuery};
pub use grouping::{fingerprint, group_and_filter, group_events, summarize, Group, GroupSummary, View};
pub use mock::{MockConfig, MockKalshiClient, MockMarketBuilder};
pub use pagination::{paginate, Page, Paged};
pub use types::{Event, Market, MarketStatus, Resolution, Series};
pub use window::{PlannerSettings, WindowPlanner};
