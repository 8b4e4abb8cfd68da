#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use headline_trader::error::{ExchangeError, FeedError, RuleFailure};
use headline_trader::feeds::feed_client::{DeleteSummary, FeedApi, StreamHandle};
use headline_trader::models::event::{FeedMessage, StreamEvent, StreamFields};
use headline_trader::models::order::{MarketQuote, OrderRequest, TrailingStopRequest};
use headline_trader::execution::exchange_client::ExchangeApi;
use headline_trader::models::rule::{FilterRule, RuleSpec};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// In-memory exchange: records every attempt, replays scripted failures first.
#[derive(Default)]
pub struct RecordingExchange {
    script: Mutex<VecDeque<ExchangeError>>,
    pub orders: Mutex<Vec<OrderRequest>>,
    pub stops: Mutex<Vec<TrailingStopRequest>>,
    pub quotes: Mutex<Vec<MarketQuote>>,
    /// Time an order with this key spends at the exchange.
    pub delays: Mutex<HashMap<String, Duration>>,
    next_id: AtomicU64,
}

impl RecordingExchange {
    pub fn failing_first(errors: Vec<ExchangeError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            ..Default::default()
        }
    }

    pub fn order_attempts(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn respond(&self) -> Result<String, ExchangeError> {
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("ord-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

#[async_trait]
impl ExchangeApi for RecordingExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        self.orders.lock().unwrap().push(request.clone());
        let delay = self.delays.lock().unwrap().get(&request.idempotency_key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.respond()
    }

    async fn submit_trailing_stop(
        &self,
        request: &TrailingStopRequest,
    ) -> Result<String, ExchangeError> {
        self.stops.lock().unwrap().push(request.clone());
        self.respond()
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketQuote>, ExchangeError> {
        Ok(self.quotes.lock().unwrap().clone())
    }
}

/// In-memory feed provider: a rule store plus stream handles whose
/// lifetimes are tracked.
#[derive(Default)]
pub struct FakeFeed {
    pub rules: Mutex<Vec<FilterRule>>,
    next_rule: AtomicU64,
    pub opens: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
    /// Queued on the next handle before it is returned.
    pub prebuffer: Mutex<Vec<FeedMessage>>,
    /// Errors returned by the next `open_stream` calls.
    pub open_failures: Mutex<VecDeque<FeedError>>,
    current: Mutex<Option<mpsc::Sender<FeedMessage>>>,
}

impl FakeFeed {
    /// Deliver a frame on the current handle.
    pub async fn push(&self, msg: FeedMessage) {
        let tx = self.current.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(msg).await;
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn rule_expressions(&self) -> Vec<String> {
        let mut v: Vec<String> = self.rules.lock().unwrap().iter().map(|r| r.expression.clone()).collect();
        v.sort();
        v
    }
}

#[async_trait]
impl FeedApi for FakeFeed {
    async fn resolve_entity(&self, name: &str) -> Result<String, FeedError> {
        Ok(format!("id-{name}"))
    }

    async fn list_rules(&self) -> Result<Vec<FilterRule>, FeedError> {
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<DeleteSummary, FeedError> {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| !ids.contains(&r.id));
        Ok(DeleteSummary {
            deleted: before - rules.len(),
            not_deleted: 0,
        })
    }

    async fn add_rules(
        &self,
        specs: &[RuleSpec],
    ) -> Result<Vec<Result<FilterRule, RuleFailure>>, FeedError> {
        let mut rules = self.rules.lock().unwrap();
        Ok(specs
            .iter()
            .map(|spec| {
                let rule = FilterRule {
                    id: (self.next_rule.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
                    expression: spec.expression.clone(),
                    tag: Some(spec.tag.clone()),
                };
                rules.push(rule.clone());
                Ok(rule)
            })
            .collect())
    }

    async fn open_stream(&self, _fields: &StreamFields) -> Result<StreamHandle, FeedError> {
        if let Some(err) = self.open_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        for msg in self.prebuffer.lock().unwrap().drain(..) {
            let _ = tx.try_send(msg);
        }
        *self.current.lock().unwrap() = Some(tx);

        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);

        let (close_tx, close_rx) = oneshot::channel::<()>();
        let live = self.live.clone();
        let task = tokio::spawn(async move {
            let _ = close_rx.await;
            live.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(StreamHandle::new(rx, close_tx, task))
    }
}

pub fn post(id: &str, author: &str, text: &str) -> StreamEvent {
    StreamEvent {
        event_id: Some(id.to_string()),
        text: text.to_string(),
        author_id: author.to_string(),
        occurred_at: None,
        received_at: Utc::now(),
    }
}

pub const COOL_PRINT: &str = "US CPI (YoY) PRIMARY RATE: +6.2% CORE RATE: +5.1% (exp 6.5%)";
pub const HOT_PRINT: &str = "US CPI (YoY) PRIMARY RATE: +9.1% CORE RATE: +7.0%";
pub const INLINE_PRINT: &str = "US CPI (YoY) PRIMARY RATE: +8.1% CORE RATE: +6.4%";
