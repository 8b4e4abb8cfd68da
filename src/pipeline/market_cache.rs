use crate::error::ExchangeError;
use crate::execution::exchange_client::ExchangeApi;
use crate::models::order::MarketQuote;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const PERP_SUFFIX: &str = "-PERP";

/// Last prices of perpetual markets, refreshed on an interval.
///
/// Used for notional sizing and trailing-stop distances. A failed refresh keeps
/// the previous table.
pub struct MarketCache {
    exchange: Arc<dyn ExchangeApi>,
    prices: DashMap<String, Decimal>,
    refresh_interval: Duration,
}

impl MarketCache {
    pub fn new(exchange: Arc<dyn ExchangeApi>, refresh_interval: Duration) -> Self {
        Self {
            exchange,
            prices: DashMap::new(),
            refresh_interval,
        }
    }

    pub fn price(&self, market: &str) -> Option<Decimal> {
        self.prices.get(market).map(|p| *p)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Replace the table with the perpetuals in `quotes`.
    pub fn update(&self, quotes: Vec<MarketQuote>) -> usize {
        let perps: Vec<MarketQuote> = quotes
            .into_iter()
            .filter(|q| q.name.ends_with(PERP_SUFFIX) && q.price > Decimal::ZERO)
            .collect();

        self.prices
            .retain(|name, _| perps.iter().any(|q| &q.name == name));
        for q in &perps {
            self.prices.insert(q.name.clone(), q.price);
        }
        perps.len()
    }

    pub async fn refresh(&self) -> Result<usize, ExchangeError> {
        let quotes = self.exchange.fetch_markets().await?;
        let n = self.update(quotes);
        debug!("Market cache refreshed: {n} perpetuals");
        Ok(n)
    }

    /// Refresh immediately, then every `refresh_interval` until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        let mut first = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.refresh().await {
                        Ok(n) if first => {
                            info!("Market cache loaded: {n} perpetuals");
                            first = false;
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Market refresh failed, keeping {} cached prices: {e}", self.len()),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
