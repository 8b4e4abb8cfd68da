use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::execution::exchange_auth::ExchangeAuth;
use crate::models::order::{MarketQuote, OrderRequest, TrailingStopRequest};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, error, info};

/// The exchange as seen by the dispatcher: accept a request, say yes or no.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Submit a market order; returns the exchange order ID.
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, ExchangeError>;

    /// Submit a reduce-only trailing stop; returns the exchange order ID.
    async fn submit_trailing_stop(
        &self,
        request: &TrailingStopRequest,
    ) -> Result<String, ExchangeError>;

    /// Listed markets with last price.
    async fn fetch_markets(&self) -> Result<Vec<MarketQuote>, ExchangeError>;
}

/// REST client for the exchange API.
///
/// One signed call per request; retries belong to the dispatcher.
pub struct ExchangeClient {
    config: ExchangeConfig,
    http: reqwest::Client,
    auth: ExchangeAuth,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketInfo {
    name: String,
    price: Option<Decimal>,
}

const ORDERS_PATH: &str = "/api/orders";
const CONDITIONAL_ORDERS_PATH: &str = "/api/conditional_orders";
const MARKETS_PATH: &str = "/api/markets";

impl ExchangeClient {
    pub fn new(config: ExchangeConfig) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExchangeError::Payload(format!("building HTTP client: {e}")))?;

        let auth = ExchangeAuth::new(&config.api_key, &config.api_secret, config.subaccount.clone());

        Ok(Self { config, http, auth })
    }

    /// POST a JSON body, signed over the exact bytes sent.
    async fn post_signed(&self, path: &str, body_json: String) -> Result<serde_json::Value, ExchangeError> {
        let url = format!("{}{}", self.config.api_base, path);
        let headers = self.auth.headers("POST", path, &body_json);

        let resp = headers
            .apply(self.http.post(&url))
            .header("Content-Type", "application/json")
            .body(body_json)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        Self::parse_response(status.as_u16(), &text)
    }

    fn parse_response(status: u16, text: &str) -> Result<serde_json::Value, ExchangeError> {
        let body: Option<ApiResponse> = serde_json::from_str(text).ok();

        if !(200..300).contains(&status) {
            let reason = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| text.chars().take(200).collect());
            error!("Exchange HTTP {status}: {reason}");
            return Err(ExchangeError::from_status(status, reason));
        }

        let body = body.ok_or_else(|| ExchangeError::Payload(text.chars().take(200).collect()))?;
        if !body.success {
            let reason = body.error.unwrap_or_else(|| "success=false".to_string());
            return Err(ExchangeError::Rejected { status, reason });
        }
        body.result
            .ok_or_else(|| ExchangeError::Payload("missing result".to_string()))
    }

    fn order_id(result: &serde_json::Value) -> Result<String, ExchangeError> {
        match result.get("id") {
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            _ => Err(ExchangeError::Payload(format!("no order id in {result}"))),
        }
    }
}

#[async_trait]
impl ExchangeApi for ExchangeClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        let body_json = serde_json::to_string(&request.body())
            .map_err(|e| ExchangeError::Payload(e.to_string()))?;
        debug!("POST {ORDERS_PATH} {body_json}");

        let result = self.post_signed(ORDERS_PATH, body_json).await?;
        let id = Self::order_id(&result)?;
        info!("Order confirmed: {id}");
        Ok(id)
    }

    async fn submit_trailing_stop(
        &self,
        request: &TrailingStopRequest,
    ) -> Result<String, ExchangeError> {
        let body_json = serde_json::to_string(&request.body())
            .map_err(|e| ExchangeError::Payload(e.to_string()))?;
        debug!("POST {CONDITIONAL_ORDERS_PATH} {body_json}");

        let result = self.post_signed(CONDITIONAL_ORDERS_PATH, body_json).await?;
        let id = Self::order_id(&result)?;
        info!("Trailing stop set: {id}");
        Ok(id)
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketQuote>, ExchangeError> {
        let url = format!("{}{}", self.config.api_base, MARKETS_PATH);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        let result = Self::parse_response(status.as_u16(), &text)?;
        let infos: Vec<MarketInfo> =
            serde_json::from_value(result).map_err(|e| ExchangeError::Payload(e.to_string()))?;

        Ok(infos
            .into_iter()
            .filter_map(|m| m.price.map(|price| MarketQuote { name: m.name, price }))
            .collect())
    }
}
