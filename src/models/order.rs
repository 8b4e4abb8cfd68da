use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{Direction, TradeDecision};

/// An order ready to be signed and submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub direction: Direction,
    pub size: Decimal,
    pub requested_at: DateTime<Utc>,
    pub idempotency_key: String,
}

impl OrderRequest {
    pub fn from_decision(decision: &TradeDecision, idempotency_key: impl Into<String>) -> Self {
        Self {
            instrument: decision.instrument.clone(),
            direction: decision.direction,
            size: decision.quantity,
            requested_at: Utc::now(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// JSON body for `POST /api/orders`.
    pub fn body(&self) -> MarketOrderBody {
        MarketOrderBody {
            market: self.instrument.clone(),
            side: self.direction.entry_side(),
            size: self.size,
            order_type: "market",
            price: 0,
        }
    }
}

/// Wire body of a market order. Field order is the signed order.
#[derive(Debug, Clone, Serialize)]
pub struct MarketOrderBody {
    pub market: String,
    pub side: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub price: u8,
}

/// Reduce-only trailing stop placed after an accepted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingStopRequest {
    pub market: String,
    pub direction: Direction,
    pub size: Decimal,
    /// Signed trail distance in quote currency (negative trails below a long).
    pub trail_value: Decimal,
    pub idempotency_key: String,
}

impl TrailingStopRequest {
    /// JSON body for `POST /api/conditional_orders`.
    pub fn body(&self) -> TrailingStopBody {
        TrailingStopBody {
            market: self.market.clone(),
            side: self.direction.exit_side(),
            trail_value: self.trail_value,
            size: self.size,
            order_type: "trailingStop",
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrailingStopBody {
    pub market: String,
    pub side: &'static str,
    #[serde(rename = "trailValue", with = "rust_decimal::serde::float")]
    pub trail_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    #[serde(rename = "reduceOnly")]
    pub reduce_only: bool,
}

/// Outcome of one order after retries have settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub idempotency_key: String,
    pub accepted: bool,
    pub order_id: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: u32,
}

impl OrderResult {
    pub fn accepted(key: &str, order_id: String, attempts: u32) -> Self {
        Self {
            idempotency_key: key.to_string(),
            accepted: true,
            order_id: Some(order_id),
            failure_reason: None,
            attempts,
        }
    }

    pub fn failed(key: &str, reason: String, attempts: u32) -> Self {
        Self {
            idempotency_key: key.to_string(),
            accepted: false,
            order_id: None,
            failure_reason: Some(reason),
            attempts,
        }
    }
}

/// What the dispatcher did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted(OrderResult),
    /// Key already claimed inside the retention window; nothing was sent.
    Duplicate,
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Submitted(r) if r.accepted)
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Submitted(r) => r.order_id.as_deref(),
            DispatchOutcome::Duplicate => None,
        }
    }
}

/// Last traded price of a listed market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub name: String,
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_order_body_json() {
        let decision = TradeDecision {
            instrument: "BTC-PERP".into(),
            direction: Direction::Long,
            quantity: dec!(0.01),
            rule: "cool-print".into(),
        };
        let req = OrderRequest::from_decision(&decision, "event:1");
        let json = serde_json::to_string(&req.body()).unwrap();
        assert_eq!(
            json,
            r#"{"market":"BTC-PERP","side":"buy","size":0.01,"type":"market","price":0}"#
        );
    }

    #[test]
    fn test_trailing_stop_body_json() {
        let req = TrailingStopRequest {
            market: "BTC-PERP".into(),
            direction: Direction::Long,
            size: dec!(0.5),
            trail_value: dec!(-400),
            idempotency_key: "event:1:stop".into(),
        };
        let json = serde_json::to_string(&req.body()).unwrap();
        assert_eq!(
            json,
            r#"{"market":"BTC-PERP","side":"sell","trailValue":-400.0,"size":0.5,"type":"trailingStop","reduceOnly":true}"#
        );
    }
}
