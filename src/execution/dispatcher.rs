use crate::backoff::Backoff;
use crate::config::DispatchConfig;
use crate::error::ExchangeError;
use crate::execution::exchange_client::ExchangeApi;
use crate::execution::idempotency::IdempotencyGuard;
use crate::models::order::{DispatchOutcome, OrderRequest, OrderResult, TrailingStopRequest};
use crate::models::signal::TradeDecision;
use crate::telemetry::latency::{LatencyTracker, ORDER_SUBMIT};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(c: &DispatchConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            base_delay: Duration::from_millis(c.retry_base_ms),
            max_delay: Duration::from_millis(c.retry_max_ms),
        }
    }
}

/// The single execution point for trade decisions.
///
/// Guarantees at most one exchange submission per idempotency key inside the
/// retention window. Transient failures are retried with backoff; rejections are
/// reported once and never retried.
pub struct OrderDispatcher {
    exchange: Arc<dyn ExchangeApi>,
    guard: IdempotencyGuard,
    retry: RetryPolicy,
    latency: Option<Arc<LatencyTracker>>,
}

impl OrderDispatcher {
    pub fn new(exchange: Arc<dyn ExchangeApi>, config: &DispatchConfig) -> Self {
        Self {
            exchange,
            guard: IdempotencyGuard::new(Duration::from_secs(config.idempotency_ttl_secs)),
            retry: RetryPolicy::from(config),
            latency: None,
        }
    }

    pub fn with_latency(mut self, tracker: Arc<LatencyTracker>) -> Self {
        self.latency = Some(tracker);
        self
    }

    /// Turn a decision into exactly one market order (or none, for a duplicate key).
    pub async fn dispatch(&self, decision: &TradeDecision, key: &str) -> DispatchOutcome {
        if !self.guard.try_claim(key) {
            info!("Duplicate trigger suppressed: {key}");
            return DispatchOutcome::Duplicate;
        }

        let request = OrderRequest::from_decision(decision, key);
        info!(
            "Executing trade {} {} {} (rule={}, key={key})",
            request.direction.entry_side(),
            request.size,
            request.instrument,
            decision.rule
        );

        let result = self
            .with_retry(key, "order", || self.exchange.submit_order(&request))
            .await;
        DispatchOutcome::Submitted(result)
    }

    /// Place a protective trailing stop under its own key.
    pub async fn dispatch_trailing_stop(&self, request: &TrailingStopRequest) -> DispatchOutcome {
        let key = request.idempotency_key.as_str();
        if !self.guard.try_claim(key) {
            info!("Duplicate trailing stop suppressed: {key}");
            return DispatchOutcome::Duplicate;
        }

        info!(
            "Setting trailing stop {} {} {} trail={}",
            request.direction.exit_side(),
            request.size,
            request.market,
            request.trail_value
        );

        let result = self
            .with_retry(key, "trailing stop", || self.exchange.submit_trailing_stop(request))
            .await;
        DispatchOutcome::Submitted(result)
    }

    async fn with_retry<F, Fut>(&self, key: &str, what: &str, mut call: F) -> OrderResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, ExchangeError>>,
    {
        let mut backoff = Backoff::new(self.retry.base_delay, self.retry.max_delay);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = {
                let _timer = self.latency.as_ref().map(|l| l.start_timer(ORDER_SUBMIT));
                call().await
            };

            match outcome {
                Ok(order_id) => {
                    info!("{what} accepted: id={order_id} key={key} attempts={attempt}");
                    return OrderResult::accepted(key, order_id, attempt);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        "{what} attempt {attempt}/{} failed ({e}); retrying in {delay:?}",
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!("{what} failed after {attempt} attempts: {e} (key={key})");
                    } else {
                        error!("{what} rejected: {e} (key={key})");
                    }
                    return OrderResult::failed(key, e.to_string(), attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::MarketQuote;
    use crate::models::signal::Direction;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted responses; succeeds once the script runs out.
    struct ScriptedExchange {
        script: Mutex<VecDeque<Result<String, ExchangeError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedExchange {
        fn new(script: Vec<Result<String, ExchangeError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn next(&self) -> Result<String, ExchangeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("order-{n}")))
        }
    }

    #[async_trait]
    impl ExchangeApi for ScriptedExchange {
        async fn submit_order(&self, _request: &OrderRequest) -> Result<String, ExchangeError> {
            self.next()
        }

        async fn submit_trailing_stop(
            &self,
            _request: &TrailingStopRequest,
        ) -> Result<String, ExchangeError> {
            self.next()
        }

        async fn fetch_markets(&self) -> Result<Vec<MarketQuote>, ExchangeError> {
            Ok(Vec::new())
        }
    }

    fn decision() -> TradeDecision {
        TradeDecision {
            instrument: "BTC-PERP".into(),
            direction: Direction::Long,
            quantity: dec!(0.01),
            rule: "cool-print".into(),
        }
    }

    fn server_error() -> Result<String, ExchangeError> {
        Err(ExchangeError::from_status(503, "unavailable".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_through_server_errors() {
        let exchange = ScriptedExchange::new(vec![server_error(), server_error(), server_error()]);
        let dispatcher = OrderDispatcher::new(exchange.clone(), &DispatchConfig::default());

        let outcome = dispatcher.dispatch(&decision(), "event:1").await;
        match outcome {
            DispatchOutcome::Submitted(r) => {
                assert!(r.accepted);
                assert_eq!(r.attempts, 4);
                assert_eq!(r.order_id.as_deref(), Some("order-4"));
            }
            DispatchOutcome::Duplicate => panic!("not a duplicate"),
        }
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let exchange = ScriptedExchange::new(vec![server_error(); 10]);
        let dispatcher = OrderDispatcher::new(exchange.clone(), &DispatchConfig::default());

        let outcome = dispatcher.dispatch(&decision(), "event:1").await;
        let DispatchOutcome::Submitted(r) = outcome else { panic!("expected submission") };
        assert!(!r.accepted);
        assert_eq!(r.attempts, 4);
        assert!(r.failure_reason.unwrap().contains("503"));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let exchange = ScriptedExchange::new(vec![Err(ExchangeError::Rejected {
            status: 400,
            reason: "Not enough balances".into(),
        })]);
        let dispatcher = OrderDispatcher::new(exchange.clone(), &DispatchConfig::default());

        let outcome = dispatcher.dispatch(&decision(), "event:1").await;
        let DispatchOutcome::Submitted(r) = outcome else { panic!("expected submission") };
        assert!(!r.accepted);
        assert_eq!(r.attempts, 1);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_makes_no_call() {
        let exchange = ScriptedExchange::new(vec![]);
        let dispatcher = OrderDispatcher::new(exchange.clone(), &DispatchConfig::default());

        assert!(dispatcher.dispatch(&decision(), "event:7").await.is_accepted());
        assert_eq!(
            dispatcher.dispatch(&decision(), "event:7").await,
            DispatchOutcome::Duplicate
        );
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_stays_claimed() {
        let exchange = ScriptedExchange::new(vec![Err(ExchangeError::Rejected {
            status: 400,
            reason: "Size too small".into(),
        })]);
        let dispatcher = OrderDispatcher::new(exchange.clone(), &DispatchConfig::default());

        assert!(!dispatcher.dispatch(&decision(), "event:9").await.is_accepted());
        assert_eq!(
            dispatcher.dispatch(&decision(), "event:9").await,
            DispatchOutcome::Duplicate
        );
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trailing_stop_uses_own_key() {
        let exchange = ScriptedExchange::new(vec![]);
        let dispatcher = OrderDispatcher::new(exchange.clone(), &DispatchConfig::default());
        assert!(dispatcher.dispatch(&decision(), "event:3").await.is_accepted());

        let stop = TrailingStopRequest {
            market: "BTC-PERP".into(),
            direction: Direction::Long,
            size: dec!(0.01),
            trail_value: dec!(-300),
            idempotency_key: "event:3:stop".into(),
        };
        assert!(dispatcher.dispatch_trailing_stop(&stop).await.is_accepted());
        assert_eq!(
            dispatcher.dispatch_trailing_stop(&stop).await,
            DispatchOutcome::Duplicate
        );
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }
}
