//! Kalshi mention-market engine entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Method;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kalshi_mentions::api::{create_router, AppState};
use kalshi_mentions::config::Config;
use kalshi_mentions::market::client::API_PREFIX;
use kalshi_mentions::market::grouping::{summarize, Group, FAR_FUTURE_TS};
use kalshi_mentions::market::{KalshiApi, KalshiClient, Market, PlannerSettings, WindowPlanner};
use kalshi_mentions::metrics;
use kalshi_mentions::universe::{MentionService, ServiceSettings};
use kalshi_mentions::utils::shutdown_signal;

/// Kalshi mention-market data engine.
#[derive(Parser, Debug)]
#[command(name = "kalshi-mentions")]
#[command(about = "Fetch, classify and group Kalshi mention markets")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check configuration validity and the signing key.
    CheckConfig,

    /// List mention series tickers.
    Series,

    /// Show active mention events grouped by event.
    Active {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Search finished mention markets.
    History {
        /// Lookback in months.
        #[arg(long)]
        months: Option<i64>,

        /// Search term.
        #[arg(long, default_value = "")]
        term: String,

        /// Include closed markets awaiting settlement.
        #[arg(long)]
        include_closed: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show recently resolved mention markets.
    Recent {
        /// Number of markets.
        #[arg(long, default_value = "12")]
        limit: usize,
    },

    /// Send one signed GET and print the raw response (diagnostic).
    Raw {
        /// API path, e.g. `/markets?limit=1`.
        path: String,
    },

    /// Serve the HTTP API.
    Serve {
        /// HTTP server port; the configured port when absent.
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("kalshi_mentions=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match args.command {
        Command::CheckConfig => cmd_check_config().await,
        Command::Series => cmd_series().await,
        Command::Active { json } => cmd_active(json).await,
        Command::History {
            months,
            term,
            include_closed,
            json,
        } => cmd_history(months, &term, include_closed, json).await,
        Command::Recent { limit } => cmd_recent(limit).await,
        Command::Raw { path } => cmd_raw(&path).await,
        Command::Serve { port } => cmd_serve(port).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    Ok(config)
}

fn build_service(config: &Config) -> anyhow::Result<MentionService> {
    let client = KalshiClient::from_config(config).context("Failed to create Kalshi client")?;
    let api: Arc<dyn KalshiApi> = Arc::new(client);
    let planner = WindowPlanner::new(api, PlannerSettings::from(config));
    Ok(MentionService::new(planner, ServiceSettings::from(config)))
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("KALSHI MENTIONS - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    if let Err(e) = config.validate() {
        println!("FAILED");
        println!("  Error: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed"));
    }
    println!("OK");

    print!("Loading private key... ");
    let client = match KalshiClient::from_config(&config) {
        Ok(client) => {
            println!("OK");
            client
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Private key invalid"));
        }
    };

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  API Key ID: {}", client.signer().access_key());
    println!("  Base URL: {}", client.base_url());
    println!("  Timeout: {}s", config.http_timeout_secs);
    println!("  Retries: {}", config.http_max_retries);
    println!("  Page Limit: {} x {} pages", config.page_limit, config.max_pages);
    println!("  Lookback: {} months", config.lookback_months);
    println!("  Concurrency: {}", config.fetch_concurrency);
    println!("  Active Statuses: {}", config.active_statuses.join(","));
    println!("  History Statuses: {}", config.history_statuses.join(","));
    println!("  Cache TTL: {}s", config.cache_ttl_secs);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// List mention series.
async fn cmd_series() -> anyhow::Result<()> {
    let config = load_config()?;
    let service = build_service(&config)?;

    let series = service.planner().mention_series().await?;
    for ticker in &series {
        println!("{}", ticker);
    }
    info!(count = series.len(), "Mention series listed");
    Ok(())
}

/// Active groups.
async fn cmd_active(json: bool) -> anyhow::Result<()> {
    let config = load_config()?;
    let service = build_service(&config)?;

    let groups = service.active_groups().await;
    print_groups(&groups, json)
}

/// Historical search.
async fn cmd_history(
    months: Option<i64>,
    term: &str,
    include_closed: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config()?;
    let service = build_service(&config)?;

    let groups = service.history_groups(term, months, include_closed).await;
    print_groups(&groups, json)
}

/// Recently resolved markets.
async fn cmd_recent(limit: usize) -> anyhow::Result<()> {
    let config = load_config()?;
    let service = build_service(&config)?;

    let markets = service.recent(limit).await;
    println!("{:<36} {:<8} {:<22} {}", "TICKER", "RESULT", "ENDED", "STRIKE");
    for market in markets.iter() {
        print_market_row(market);
    }
    Ok(())
}

/// Signed GET with the raw body printed.
async fn cmd_raw(path: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let client = KalshiClient::from_config(&config)?;

    let (path, query) = split_path(path);
    let query: Vec<(&str, String)> = query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

    let response = client.request_debug(Method::GET, &path, &query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Serve the HTTP API.
async fn cmd_serve(port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config()?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    let service = build_service(&config)?;
    let handle = metrics::install_prometheus().context("Failed to install metrics recorder")?;
    let app_state = AppState::new(service.clone()).with_metrics(handle);

    // Warm the universe in the background; /ready flips once it lands.
    let warm_state = app_state.clone();
    tokio::spawn(async move {
        let universe = warm_state.service.refresh().await;
        info!(generated_at = %universe.generated_at, "Universe warmed");
        warm_state.set_ready(true);
    });

    let port = port_override.unwrap_or(config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state);
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        warn!("HTTP server stopped with error: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Split `path?query` and prefix the API root when missing.
fn split_path(raw: &str) -> (String, Vec<(String, String)>) {
    let (path, query) = raw.split_once('?').unwrap_or((raw, ""));
    let path = if path.starts_with(API_PREFIX) {
        path.to_string()
    } else {
        format!("{}/{}", API_PREFIX, path.trim_start_matches('/'))
    };
    let pairs = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    (path, pairs)
}

fn format_ts(ts: Option<i64>) -> String {
    ts.filter(|ts| *ts != FAR_FUTURE_TS)
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

fn print_groups(groups: &[Group], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(groups)?);
        return Ok(());
    }

    let summary = summarize(groups);
    println!(
        "{} events | {} strikes | volume {}",
        summary.groups, summary.strikes, summary.total_volume
    );
    println!("----------------------------------------------------------------------");
    for group in groups {
        println!(
            "{}  [{}]  vol {}  ends {}  last {}",
            group.display_title,
            group.event_ticker,
            group.total_volume,
            format_ts(Some(group.end_ts)),
            format_ts(group.last_ts),
        );
        for market in &group.markets {
            println!(
                "    {:<36} {:<10} vol {}",
                market.ticker.as_deref().unwrap_or("-"),
                market.status.as_deref().unwrap_or("-"),
                market.volume_or_zero(),
            );
        }
    }
    Ok(())
}

fn print_market_row(market: &Market) {
    println!(
        "{:<36} {:<8} {:<22} {}",
        market.ticker.as_deref().unwrap_or("-"),
        market
            .resolution()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string()),
        format_ts(market.end_time().map(OffsetDateTime::unix_timestamp)),
        market.description(),
    );
}
