//! Kalshi mention-market data engine.
//!
//! Authenticated, paginated retrieval of Kalshi series, events and markets,
//! narrowed to "mention" markets (will a speaker say a given word) and
//! grouped into events for display.
//!
//! ```text
//! Config ─► KalshiClient (RSA-PSS signed REST)
//!              │
//!              ▼
//!          WindowPlanner ── paginate ── classify ── time-window filter
//!              │
//!              ▼
//!          MentionService (TTL cache) ── group_and_filter ─► groups
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`signing`]: Kalshi request signing
//! - [`market`]: Record types, client, pagination, classification, windows, grouping
//! - [`cache`]: Expiring cache collaborator
//! - [`universe`]: Cached mention universe and read operations
//! - [`api`]: HTTP API for health, metrics and mention data
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod signing;
pub mod universe;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
