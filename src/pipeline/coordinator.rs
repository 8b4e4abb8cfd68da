use crate::config::{DispatchConfig, TradeConfig};
use crate::execution::dispatcher::OrderDispatcher;
use crate::models::event::StreamEvent;
use crate::models::order::{DispatchOutcome, TrailingStopRequest};
use crate::models::rule::Subscription;
use crate::models::signal::{Direction, ExtractedSignal, TradeDecision};
use crate::pipeline::market_cache::MarketCache;
use crate::signals::extractor::SignalExtractor;
use crate::signals::policy::DecisionPolicy;
use crate::telemetry::alerts::AlertManager;
use crate::telemetry::latency::{LatencyTracker, DECISION};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How the coordinator sizes an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// Fixed base-asset quantity.
    Fixed(Decimal),
    /// Quote-currency notional, converted at the cached price.
    Notional(Decimal),
}

impl From<&TradeConfig> for Sizing {
    fn from(trade: &TradeConfig) -> Self {
        match trade.usd_value {
            Some(usd) => Sizing::Notional(usd),
            None => Sizing::Fixed(trade.size),
        }
    }
}

/// A decision ready to hand to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTrade {
    pub key: String,
    pub decision: TradeDecision,
    pub signals: ExtractedSignal,
    pub stop: Option<TrailingStopRequest>,
}

/// Why an event produced no trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    NotFollowed,
    NoDecision,
    NoPrice,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub received: u64,
    pub not_followed: u64,
    pub no_decision: u64,
    pub no_price: u64,
    pub dispatched: u64,
    pub accepted: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub aborted: u64,
}

/// Event → signals → decision → dispatch.
///
/// The receive loop never awaits the exchange: each decision is dispatched on
/// its own task and finished tasks are reaped between events.
pub struct Coordinator {
    extractor: SignalExtractor,
    policy: DecisionPolicy,
    dispatcher: Arc<OrderDispatcher>,
    markets: Arc<MarketCache>,
    followed: HashSet<String>,
    sizing: Sizing,
    trailing_stop_pct: Option<Decimal>,
    drain_timeout: Duration,
    alerts: Option<Arc<AlertManager>>,
    latency: Option<Arc<LatencyTracker>>,
    stats: CoordinatorStats,
}

impl Coordinator {
    pub fn new(
        extractor: SignalExtractor,
        policy: DecisionPolicy,
        dispatcher: Arc<OrderDispatcher>,
        markets: Arc<MarketCache>,
        subscriptions: &[Subscription],
        trade: &TradeConfig,
        dispatch: &DispatchConfig,
    ) -> Self {
        Self {
            extractor,
            policy,
            dispatcher,
            markets,
            followed: subscriptions.iter().map(|s| s.entity_id.clone()).collect(),
            sizing: Sizing::from(trade),
            trailing_stop_pct: trade.trailing_stop_pct,
            drain_timeout: Duration::from_secs(dispatch.drain_timeout_secs),
            alerts: None,
            latency: None,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_latency(mut self, latency: Arc<LatencyTracker>) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Everything between receipt and dispatch. No I/O.
    pub fn plan(&self, event: &StreamEvent) -> Result<PlannedTrade, Skip> {
        if !self.followed.contains(&event.author_id) {
            debug!("Ignoring post by unfollowed author {}", event.author_id);
            return Err(Skip::NotFollowed);
        }

        let signals = self.extractor.extract(&event.text);
        info!("Post {}: signals {signals}", event.event_id.as_deref().unwrap_or("-"));

        let Some(rule) = self.policy.matching_rule(&signals) else {
            info!("No decision for post {}", event.event_id.as_deref().unwrap_or("-"));
            return Err(Skip::NoDecision);
        };

        let instrument = self.policy.instrument();
        let price = self.markets.price(instrument);
        let quantity = match self.sizing {
            Sizing::Fixed(size) => size,
            Sizing::Notional(usd) => match price.and_then(|p| notional_quantity(usd, p)) {
                Some(q) => q,
                None => {
                    warn!("No price cached for {instrument}; skipping {} trade", rule.name);
                    return Err(Skip::NoPrice);
                }
            },
        };

        let decision = self.policy.decision_for(rule, quantity);
        let key = event.idempotency_key();

        let stop = match (self.trailing_stop_pct, price) {
            (Some(pct), Some(price)) => Some(TrailingStopRequest {
                market: decision.instrument.clone(),
                direction: decision.direction,
                size: decision.quantity,
                trail_value: trail_value(decision.direction, pct, price),
                idempotency_key: format!("{key}:stop"),
            }),
            (Some(_), None) => {
                warn!("No price cached for {instrument}; trailing stop will not be placed");
                None
            }
            _ => None,
        };

        Ok(PlannedTrade {
            key,
            decision,
            signals,
            stop,
        })
    }

    /// Consume events until the channel closes or shutdown; then drain.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<StreamEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CoordinatorStats {
        let mut tasks: JoinSet<DispatchOutcome> = JoinSet::new();

        loop {
            let event = tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
                _ = shutdown.recv() => break,
            };

            self.stats.received += 1;
            if let (Some(latency), Some(lag)) = (&self.latency, event.delivery_lag()) {
                latency.record_lag(lag);
            }

            let planned = {
                let _timer = self.latency.as_ref().map(|l| l.start_timer(DECISION));
                self.plan(&event)
            };

            match planned {
                Ok(trade) => {
                    self.stats.dispatched += 1;
                    tasks.spawn(execute(self.dispatcher.clone(), self.alerts.clone(), trade));
                }
                Err(Skip::NotFollowed) => self.stats.not_followed += 1,
                Err(Skip::NoDecision) => self.stats.no_decision += 1,
                Err(Skip::NoPrice) => self.stats.no_price += 1,
            }

            while let Some(done) = tasks.try_join_next() {
                self.record(done);
            }
        }

        self.drain(tasks).await;
        info!("Coordinator stopped: {:?}", self.stats);
        self.stats
    }

    async fn drain(&mut self, mut tasks: JoinSet<DispatchOutcome>) {
        if tasks.is_empty() {
            return;
        }
        info!("Waiting up to {:?} for {} in-flight order(s)", self.drain_timeout, tasks.len());

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(done)) => self.record(done),
                Ok(None) => break,
                Err(_) => {
                    let left = tasks.len() as u64;
                    warn!("Drain timed out; aborting {left} order task(s)");
                    tasks.abort_all();
                    self.stats.aborted += left;
                    break;
                }
            }
        }
    }

    fn record(&mut self, done: Result<DispatchOutcome, tokio::task::JoinError>) {
        match done {
            Ok(DispatchOutcome::Duplicate) => self.stats.duplicates += 1,
            Ok(outcome) if outcome.is_accepted() => self.stats.accepted += 1,
            Ok(_) => self.stats.failed += 1,
            Err(e) => {
                warn!("Order task ended abnormally: {e}");
                self.stats.failed += 1;
            }
        }
    }
}

/// Entry order, then the protective stop once the entry is accepted.
///
/// Alerts go out on a detached task after both orders, so the order task
/// never waits on a webhook.
async fn execute(
    dispatcher: Arc<OrderDispatcher>,
    alerts: Option<Arc<AlertManager>>,
    trade: PlannedTrade,
) -> DispatchOutcome {
    let outcome = dispatcher.dispatch(&trade.decision, &trade.key).await;
    let DispatchOutcome::Submitted(result) = &outcome else {
        return outcome;
    };

    let mut stop_failure = None;
    if result.accepted {
        if let Some(stop) = &trade.stop {
            if let DispatchOutcome::Submitted(r) = dispatcher.dispatch_trailing_stop(stop).await {
                if !r.accepted {
                    stop_failure = Some(r.failure_reason.unwrap_or_else(|| "unknown".into()));
                }
            }
        }
    }

    if let Some(alerts) = alerts {
        let result = result.clone();
        tokio::spawn(async move {
            alerts.on_trade(&trade.decision, &trade.signals, &result).await;
            if let Some(reason) = stop_failure {
                alerts
                    .on_error(&format!("trailing stop for {} not placed: {reason}", trade.key))
                    .await;
            }
        });
    }

    outcome
}

/// `usd / price` rounded to 8 places; `None` when that rounds to zero.
pub fn notional_quantity(usd: Decimal, price: Decimal) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    let q = usd.checked_div(price)?.round_dp(8);
    (q > Decimal::ZERO).then_some(q)
}

/// Signed trail distance: below the price for a long, above for a short.
pub fn trail_value(direction: Direction, pct: Decimal, price: Decimal) -> Decimal {
    let distance = (pct / Decimal::ONE_HUNDRED * price).round_dp(8);
    match direction {
        Direction::Long => -distance,
        Direction::Short => distance,
    }
}
