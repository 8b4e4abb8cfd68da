use crate::error::ExchangeError;
use crate::execution::exchange_client::{ExchangeApi, ExchangeClient};
use crate::models::order::{MarketQuote, OrderRequest, TrailingStopRequest};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Dry-run exchange: accepts every order locally, never touches the private API.
///
/// Market prices still come from the public endpoint so notional sizing and
/// trailing-stop distances can be checked end to end.
pub struct PaperExchange {
    public: Option<ExchangeClient>,
    next_id: AtomicU64,
}

impl PaperExchange {
    pub fn new(public: Option<ExchangeClient>) -> Self {
        Self {
            public,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        let id = self.next_order_id();
        info!(
            "[PAPER] {} {} {} key={} → {id}",
            request.direction.entry_side(),
            request.size,
            request.instrument,
            request.idempotency_key
        );
        Ok(id)
    }

    async fn submit_trailing_stop(
        &self,
        request: &TrailingStopRequest,
    ) -> Result<String, ExchangeError> {
        let id = self.next_order_id();
        info!(
            "[PAPER] trailing stop {} {} {} trail={} → {id}",
            request.direction.exit_side(),
            request.size,
            request.market,
            request.trail_value
        );
        Ok(id)
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketQuote>, ExchangeError> {
        match &self.public {
            Some(client) => client.fetch_markets().await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::{Direction, TradeDecision};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_ids_are_unique() {
        let paper = PaperExchange::new(None);
        let decision = TradeDecision {
            instrument: "BTC-PERP".into(),
            direction: Direction::Short,
            quantity: dec!(1),
            rule: "r".into(),
        };
        let req = OrderRequest::from_decision(&decision, "event:1");
        let a = paper.submit_order(&req).await.unwrap();
        let b = paper.submit_order(&req).await.unwrap();
        assert_ne!(a, b);
        assert!(paper.fetch_markets().await.unwrap().is_empty());
    }
}
