use crate::models::signal::Direction;
use crate::signals::extractor::{IndicatorTemplate, SignalExtractor};
use crate::signals::policy::{DecisionPolicy, PolicyRule, RangeCondition};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    pub exchange: ExchangeConfig,
    pub trade: TradeConfig,
    pub strategy: StrategyConfig,
    pub stream: StreamConfig,
    pub dispatch: DispatchConfig,
    pub telemetry: TelemetryConfig,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub api_base: String,
    pub bearer_token: String,
    pub follow_accounts: Vec<String>, // screen names, without '@'
    pub resolve_delay_ms: u64,        // pause between sequential lookups
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_base: String,
    pub api_key: String,
    pub api_secret: String,
    pub subaccount: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    pub market: String,                       // e.g. "BTC-PERP"
    pub size: Decimal,                        // fixed order size
    pub usd_value: Option<Decimal>,           // notional sizing; overrides `size`
    pub trailing_stop_pct: Option<Decimal>,   // e.g. 1.5 → trail 1.5% of price
    pub market_refresh_secs: u64,             // price table refresh (e.g. 300)
}

/// Extraction templates and the threshold table. Data, not code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub templates: Vec<IndicatorTemplate>,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub reconnect_interval_secs: u64, // forced reconnect (e.g. 3600)
    pub stall_timeout_secs: u64,      // no bytes incl. heartbeats (e.g. 90)
    pub teardown_grace_ms: u64,       // wait after closing a handle (e.g. 2000)
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub provider_delay_margin_ms: u64, // added to provider-suggested delays
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub idempotency_ttl_secs: u64,
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_json: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub alert_on_trade: bool,
    pub alert_on_error: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            templates: vec![
                IndicatorTemplate::new("primaryRate", "PRIMARY RATE: ", "%"),
                IndicatorTemplate::new("coreRate", "CORE RATE: ", "%"),
            ],
            rules: vec![
                PolicyRule {
                    name: "cool-print".into(),
                    conditions: vec![
                        RangeCondition::inclusive("primaryRate", dec!(5), dec!(7.9)),
                        RangeCondition::inclusive("coreRate", dec!(4), dec!(6.3)),
                    ],
                    direction: Direction::Long,
                },
                PolicyRule {
                    name: "hot-print".into(),
                    conditions: vec![
                        RangeCondition::inclusive("primaryRate", dec!(8.3), dec!(15)),
                        RangeCondition::inclusive("coreRate", dec!(6.6), dec!(13)),
                    ],
                    direction: Direction::Short,
                },
            ],
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: 3600,
            stall_timeout_secs: 90,
            teardown_grace_ms: 2000,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            provider_delay_margin_ms: 100,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_base_ms: 250,
            retry_max_ms: 5000,
            idempotency_ttl_secs: 600,
            drain_timeout_secs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig {
                api_base: "https://api.twitter.com".into(),
                bearer_token: String::new(),
                follow_accounts: Vec::new(),
                resolve_delay_ms: 500,
            },
            exchange: ExchangeConfig {
                api_base: "https://ftx.com".into(),
                api_key: String::new(),
                api_secret: String::new(),
                subaccount: None,
                request_timeout_secs: 10,
            },
            trade: TradeConfig {
                market: "BTC-PERP".into(),
                size: dec!(0.001),
                usd_value: None,
                trailing_stop_pct: None,
                market_refresh_secs: 300,
            },
            strategy: StrategyConfig::default(),
            stream: StreamConfig::default(),
            dispatch: DispatchConfig::default(),
            telemetry: TelemetryConfig {
                log_level: "info".into(),
                log_json: false,
                telegram_bot_token: None,
                telegram_chat_id: None,
                discord_webhook_url: None,
                alert_on_trade: true,
                alert_on_error: true,
            },
            dry_run: false,
        }
    }
}

impl StrategyConfig {
    /// Load templates and rules from a JSON file.
    pub fn from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading strategy file {path}"))?;
        serde_json::from_str(&text).with_context(|| format!("parsing strategy file {path}"))
    }
}

impl StreamConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn provider_delay_margin(&self) -> Duration {
        Duration::from_millis(self.provider_delay_margin_ms)
    }
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// Required env vars:
    ///   FEED_BEARER_TOKEN: feed API bearer token
    ///   FOLLOW_ACCOUNTS: comma-separated account names to follow
    ///   EXCHANGE_API_KEY, EXCHANGE_API_SECRET: unless DRY_RUN
    ///
    /// Optional env vars:
    ///   FEED_API_BASE, EXCHANGE_API_BASE, EXCHANGE_SUBACCOUNT
    ///   TRADE_MARKET (default BTC-PERP), TRADE_SIZE, TRADE_USD_VALUE, TRAILING_STOP_PCT
    ///   STRATEGY_FILE: JSON with `templates` and `rules`
    ///   STREAM_RECONNECT_INTERVAL_SECS, STREAM_STALL_TIMEOUT_SECS
    ///   TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID, DISCORD_WEBHOOK_URL
    ///   RUST_LOG (default info), LOG_FORMAT=json
    ///   DRY_RUN: "true" routes orders to the paper exchange
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Feed
        if let Some(base) = var("FEED_API_BASE") {
            config.feed.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(token) = var("FEED_BEARER_TOKEN") {
            config.feed.bearer_token = token;
        }
        if let Some(list) = var("FOLLOW_ACCOUNTS") {
            config.feed.follow_accounts = list
                .split(',')
                .map(|s| s.trim().trim_start_matches('@').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Exchange
        if let Some(base) = var("EXCHANGE_API_BASE") {
            config.exchange.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(key) = var("EXCHANGE_API_KEY") {
            config.exchange.api_key = key;
        }
        if let Some(secret) = var("EXCHANGE_API_SECRET") {
            config.exchange.api_secret = secret;
        }
        config.exchange.subaccount = var("EXCHANGE_SUBACCOUNT");

        // Trade
        if let Some(market) = var("TRADE_MARKET") {
            config.trade.market = market;
        }
        if let Some(size) = parse_var::<Decimal>(&var, "TRADE_SIZE")? {
            config.trade.size = size;
        }
        config.trade.usd_value = parse_var(&var, "TRADE_USD_VALUE")?;
        config.trade.trailing_stop_pct = parse_var(&var, "TRAILING_STOP_PCT")?;

        // Strategy
        if let Some(path) = var("STRATEGY_FILE") {
            config.strategy = StrategyConfig::from_file(&path)?;
        }

        // Stream
        if let Some(secs) = parse_var(&var, "STREAM_RECONNECT_INTERVAL_SECS")? {
            config.stream.reconnect_interval_secs = secs;
        }
        if let Some(secs) = parse_var(&var, "STREAM_STALL_TIMEOUT_SECS")? {
            config.stream.stall_timeout_secs = secs;
        }

        // Alerts
        config.telemetry.telegram_bot_token = var("TELEGRAM_BOT_TOKEN");
        config.telemetry.telegram_chat_id = var("TELEGRAM_CHAT_ID");
        config.telemetry.discord_webhook_url = var("DISCORD_WEBHOOK_URL");

        // Logging
        if let Some(level) = var("RUST_LOG") {
            config.telemetry.log_level = level;
        }
        config.telemetry.log_json = var("LOG_FORMAT").is_some_and(|f| f == "json");

        // Dry run: paper exchange when asked to, or when no key is configured
        let dry_run_flag = var("DRY_RUN").is_some_and(|v| v == "true" || v == "1");
        config.dry_run = dry_run_flag || config.exchange.api_key.is_empty();

        Ok(config)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.feed.bearer_token.is_empty(), "FEED_BEARER_TOKEN must be set");
        anyhow::ensure!(
            !self.feed.follow_accounts.is_empty(),
            "FOLLOW_ACCOUNTS must name at least one account"
        );
        url::Url::parse(&self.feed.api_base)
            .with_context(|| format!("invalid FEED_API_BASE {}", self.feed.api_base))?;
        url::Url::parse(&self.exchange.api_base)
            .with_context(|| format!("invalid EXCHANGE_API_BASE {}", self.exchange.api_base))?;

        if self.is_dry_run() {
            tracing::info!("Dry-run mode: skipping exchange credential validation");
        } else {
            anyhow::ensure!(
                !self.exchange.api_key.is_empty() && !self.exchange.api_secret.is_empty(),
                "EXCHANGE_API_KEY and EXCHANGE_API_SECRET must be set (or set DRY_RUN=true)"
            );
        }

        anyhow::ensure!(!self.trade.market.is_empty(), "TRADE_MARKET must be set");
        anyhow::ensure!(self.trade.size > Decimal::ZERO, "TRADE_SIZE must be positive");
        if let Some(usd) = self.trade.usd_value {
            anyhow::ensure!(usd > Decimal::ZERO, "TRADE_USD_VALUE must be positive");
        }
        if let Some(pct) = self.trade.trailing_stop_pct {
            anyhow::ensure!(
                pct > Decimal::ZERO && pct < Decimal::ONE_HUNDRED,
                "TRAILING_STOP_PCT must be between 0 and 100, got {pct}"
            );
        }

        SignalExtractor::new(&self.strategy.templates)?;
        DecisionPolicy::validate_rules(&self.strategy.rules)?;
        let known: HashSet<&str> = self.strategy.templates.iter().map(|t| t.name.as_str()).collect();
        for rule in &self.strategy.rules {
            for c in &rule.conditions {
                anyhow::ensure!(
                    known.contains(c.indicator.as_str()),
                    "policy rule {} uses unknown indicator {}",
                    rule.name,
                    c.indicator
                );
            }
        }

        anyhow::ensure!(self.dispatch.max_attempts >= 1, "max_attempts must be at least 1");
        anyhow::ensure!(
            self.stream.reconnect_interval_secs > 0,
            "STREAM_RECONNECT_INTERVAL_SECS must be positive"
        );
        Ok(())
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw} is invalid: {e}")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("FEED_BEARER_TOKEN", "token"),
            ("FOLLOW_ACCOUNTS", "@firstsquawk, DeItaone ,,"),
            ("EXCHANGE_API_KEY", "k"),
            ("EXCHANGE_API_SECRET", "s"),
            ("TRADE_SIZE", "0.25"),
            ("TRADE_USD_VALUE", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.feed.follow_accounts, vec!["firstsquawk", "DeItaone"]);
        assert_eq!(config.trade.size, dec!(0.25));
        assert_eq!(config.trade.usd_value, Some(dec!(1000)));
        assert!(!config.is_dry_run());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_key_means_dry_run() {
        let config = Config::from_lookup(lookup(&[
            ("FEED_BEARER_TOKEN", "token"),
            ("FOLLOW_ACCOUNTS", "firstsquawk"),
        ]))
        .unwrap();
        assert!(config.is_dry_run());
        config.validate().unwrap();
    }

    #[test]
    fn test_logging_settings() {
        let config = Config::from_lookup(lookup(&[
            ("RUST_LOG", "headline_trader=debug"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.telemetry.log_level, "headline_trader=debug");
        assert!(config.telemetry.log_json);

        let defaults = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(defaults.telemetry.log_level, "info");
        assert!(!defaults.telemetry.log_json);
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let result = Config::from_lookup(lookup(&[("TRADE_SIZE", "lots")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_indicator() {
        let mut config = Config::from_lookup(lookup(&[
            ("FEED_BEARER_TOKEN", "token"),
            ("FOLLOW_ACCOUNTS", "a"),
        ]))
        .unwrap();
        config.strategy.rules[0].conditions[0].indicator = "gdp".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_accounts() {
        let config = Config::from_lookup(lookup(&[("FEED_BEARER_TOKEN", "token")])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_round_trips_through_json() {
        let json = serde_json::to_string(&StrategyConfig::default()).unwrap();
        let back: StrategyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StrategyConfig::default());
    }
}
