use crate::config::TelemetryConfig;
use crate::models::order::OrderResult;
use crate::models::signal::{ExtractedSignal, TradeDecision};
use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pushes trade and failure notices to Telegram and/or a Discord webhook.
///
/// Delivery is best effort: a failed alert is logged and never propagates
/// into the trading path.
pub struct AlertManager {
    config: TelemetryConfig,
    http: reqwest::Client,
}

impl AlertManager {
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(ALERT_TIMEOUT).build()?;
        Ok(Self { config, http })
    }

    pub fn is_configured(&self) -> bool {
        let telegram = self.config.telegram_bot_token.is_some() && self.config.telegram_chat_id.is_some();
        telegram || self.config.discord_webhook_url.is_some()
    }

    pub async fn send(&self, message: &str) {
        info!("ALERT: {message}");

        if let Err(e) = self.send_telegram(message).await {
            error!("Telegram alert failed: {e}");
        }

        if let Err(e) = self.send_discord(message).await {
            error!("Discord alert failed: {e}");
        }
    }

    async fn send_telegram(&self, message: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (&self.config.telegram_bot_token, &self.config.telegram_chat_id) else {
            return Ok(());
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": format!("📰 HEADLINE TRADER: {message}"),
        });

        self.http.post(&url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }

    async fn send_discord(&self, message: &str) -> Result<()> {
        let Some(webhook_url) = &self.config.discord_webhook_url else {
            return Ok(());
        };

        let body = serde_json::json!({
            "content": format!("📰 **HEADLINE TRADER**: {message}")
        });

        self.http.post(webhook_url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn on_trade(&self, decision: &TradeDecision, signals: &ExtractedSignal, result: &OrderResult) {
        if self.config.alert_on_trade {
            self.send(&trade_message(decision, signals, result)).await;
        }
    }

    pub async fn on_error(&self, error: &str) {
        if self.config.alert_on_error {
            self.send(&format!("⚠️ Error: {error}")).await;
        }
    }
}

pub fn trade_message(decision: &TradeDecision, signals: &ExtractedSignal, result: &OrderResult) -> String {
    let side = decision.direction.entry_side().to_uppercase();
    match (&result.order_id, &result.failure_reason) {
        (Some(id), _) => format!(
            "{side} {} {} via {} {signals}, order {id}",
            decision.quantity, decision.instrument, decision.rule
        ),
        (None, reason) => format!(
            "{side} {} {} via {} FAILED after {} attempt(s): {}",
            decision.quantity,
            decision.instrument,
            decision.rule,
            result.attempts,
            reason.as_deref().unwrap_or("unknown")
        ),
    }
}
