use headline_trader::config::{Config, TelemetryConfig};
use headline_trader::execution::dispatcher::OrderDispatcher;
use headline_trader::execution::exchange_client::{ExchangeApi, ExchangeClient};
use headline_trader::execution::paper::PaperExchange;
use headline_trader::feeds::feed_client::{FeedApi, FeedClient};
use headline_trader::feeds::resolver::SubscriptionResolver;
use headline_trader::feeds::stream::{ConnectionState, StreamConnection};
use headline_trader::pipeline::coordinator::Coordinator;
use headline_trader::pipeline::market_cache::MarketCache;
use headline_trader::signals::extractor::SignalExtractor;
use headline_trader::signals::policy::DecisionPolicy;
use headline_trader::telemetry::alerts::AlertManager;
use headline_trader::telemetry::latency::LatencyTracker;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

const EVENT_BUFFER: usize = 256;

fn init_tracing(telemetry: &TelemetryConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&telemetry.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if telemetry.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load()?;
    init_tracing(&config.telemetry);

    info!("================================================");
    info!("  HEADLINE TRADER v{}", env!("CARGO_PKG_VERSION"));
    info!("  Filtered post stream → signed exchange orders");
    info!("================================================");

    config.validate().context("config validation failed")?;

    if config.is_dry_run() {
        if config.exchange.api_key.is_empty() {
            warn!("No EXCHANGE_API_KEY set");
        }
        warn!("DRY RUN MODE: orders go to the paper exchange");
    }
    info!(
        "Trading {} ({}), following {}",
        config.trade.market,
        match config.trade.usd_value {
            Some(usd) => format!("${usd} notional"),
            None => format!("size {}", config.trade.size),
        },
        config.feed.follow_accounts.join(", ")
    );

    // === Capabilities ===
    let public = ExchangeClient::new(config.exchange.clone())?;
    let exchange: Arc<dyn ExchangeApi> = if config.is_dry_run() {
        Arc::new(PaperExchange::new(Some(public)))
    } else {
        Arc::new(public)
    };
    let feed: Arc<dyn FeedApi> =
        Arc::new(FeedClient::new(config.feed.clone(), config.stream.stall_timeout())?);

    // Unknown accounts and bad credentials stop us here.
    let resolver = SubscriptionResolver::new(
        feed.clone(),
        Duration::from_millis(config.feed.resolve_delay_ms),
    );
    let subscriptions = resolver
        .resolve_all(&config.feed.follow_accounts)
        .await
        .context("resolving followed accounts")?;

    // === Telemetry ===
    let latency = Arc::new(LatencyTracker::new(1000));
    let alerts = Arc::new(AlertManager::new(config.telemetry.clone())?);
    if alerts.is_configured() {
        info!("Alerts enabled");
    }

    // === Pipeline ===
    let dispatcher = Arc::new(
        OrderDispatcher::new(exchange.clone(), &config.dispatch).with_latency(latency.clone()),
    );
    let markets = Arc::new(MarketCache::new(
        exchange.clone(),
        Duration::from_secs(config.trade.market_refresh_secs),
    ));
    let coordinator = Coordinator::new(
        SignalExtractor::new(&config.strategy.templates)?,
        DecisionPolicy::new(config.strategy.rules.clone(), config.trade.market.clone()),
        dispatcher,
        markets.clone(),
        &subscriptions,
        &config.trade,
        &config.dispatch,
    )
    .with_alerts(alerts.clone())
    .with_latency(latency.clone());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(markets.run(shutdown_tx.subscribe()));
    let coordinator_task = tokio::spawn(coordinator.run(event_rx, shutdown_tx.subscribe()));

    let connection = StreamConnection::new(feed, subscriptions, config.stream.clone());
    let mut state_rx = connection.state();
    let mut stream_task = tokio::spawn(connection.run(event_tx, shutdown_tx.subscribe()));

    // === Connection state log ===
    {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *state_rx.borrow_and_update();
                        if state == ConnectionState::Streaming {
                            info!("Stream live");
                        } else if state == ConnectionState::Backoff {
                            warn!("Stream in backoff");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // === Latency summary (every 5 minutes) ===
    {
        let latency = latency.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => latency.log_summary(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    info!("=== HEADLINE TRADER running ===");
    info!("Press Ctrl+C to shutdown.");

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received. Draining...");
            None
        }
        done = &mut stream_task => Some(done),
    };
    let _ = shutdown_tx.send(());

    let stream_result = match finished {
        Some(done) => done,
        None => stream_task.await,
    }?;

    let stats = coordinator_task.await?;
    info!(
        "Session: {} posts, {} orders accepted, {} failed, {} duplicates suppressed",
        stats.received, stats.accepted, stats.failed, stats.duplicates
    );
    latency.log_summary();

    if let Err(e) = stream_result {
        alerts.on_error(&format!("stream stopped: {e}")).await;
        return Err(e.into());
    }

    info!("HEADLINE TRADER shutdown complete.");
    Ok(())
}
