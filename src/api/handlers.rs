//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::market::grouping::{summarize, Group, GroupSummary};
use crate::market::types::Market;
use crate::market::window::clamp_months;
use crate::universe::MentionService;

/// Default number of markets for `/recent`.
pub const DEFAULT_RECENT_LIMIT: usize = 12;

/// Upper bound for `/recent`.
pub const MAX_RECENT_LIMIT: usize = 200;

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Mention data service.
    pub service: MentionService,
    /// Whether the universe has been loaded once.
    pub ready: Arc<AtomicBool>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new(service: MentionService) -> Self {
        Self {
            service,
            ready: Arc::new(AtomicBool::new(false)),
            metrics: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
}

/// Groups with their totals.
#[derive(Debug, Serialize)]
pub struct GroupsResponse<'a> {
    /// Totals across `groups`.
    pub summary: GroupSummary,
    /// Sorted groups.
    pub groups: &'a [Group],
}

/// Markets list.
#[derive(Debug, Serialize)]
pub struct MarketsResponse<'a> {
    /// Number of markets.
    pub count: usize,
    /// Markets, newest first.
    pub markets: &'a [Market],
}

/// Query for `/api/v1/mentions/history`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    /// Lookback in months, clamped to `1..=1200`; the configured lookback when absent.
    pub months: Option<i64>,
    /// Search term.
    pub term: Option<String>,
    /// Include closed (unsettled) markets.
    #[serde(default)]
    pub include_closed: bool,
}

/// Query for `/api/v1/mentions/recent`.
#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
    /// Number of markets.
    pub limit: Option<usize>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { ready }))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn groups_response(groups: &[Group]) -> Response {
    Json(GroupsResponse {
        summary: summarize(groups),
        groups,
    })
    .into_response()
}

/// Active mention groups.
pub async fn active(State(state): State<AppState>) -> Response {
    let groups = state.service.active_groups().await;
    groups_response(&groups)
}

/// Historical mention groups.
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let term = params.term.unwrap_or_default();
    let months = params.months.map(clamp_months);
    let groups = state
        .service
        .history_groups(&term, months, params.include_closed)
        .await;
    groups_response(&groups)
}

/// Recently resolved mention markets.
pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    let markets = state.service.recent(limit).await;
    Json(MarketsResponse {
        count: markets.len(),
        markets: &markets,
    })
    .into_response()
}
