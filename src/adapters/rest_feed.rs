//! REST market-data adapter
//!
//! Thin price feed over an exchange ticker endpoint. Exchange protocol
//! details stay out of the engine: the engine only sees the
//! `MarketData` trait, and any fetch failure becomes
//! `MarketDataUnavailable` so the affected pair is skipped for a cycle.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{GridError, Result};
use crate::market::{MarketData, PrecisionRules};

/// Ticker response shape shared by the usual spot REST endpoints
#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: Decimal,
}

/// REST price feed for a single exchange
pub struct RestPriceFeed {
    client: reqwest::Client,
    exchange: String,
    /// Endpoint template; `{pair}` is substituted with the pair symbol
    price_url: String,
    default_rules: PrecisionRules,
    /// Per-pair overrides on top of the defaults
    pair_rules: HashMap<String, PrecisionRules>,
}

impl RestPriceFeed {
    pub fn new(exchange: &str, price_url: &str, default_rules: PrecisionRules) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            exchange: exchange.to_string(),
            price_url: price_url.to_string(),
            default_rules,
            pair_rules: HashMap::new(),
        })
    }

    /// Override precision rules for a specific pair
    pub fn with_pair_rules(mut self, pair: &str, rules: PrecisionRules) -> Self {
        self.pair_rules.insert(pair.to_string(), rules);
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn url_for(&self, pair: &str) -> String {
        self.price_url.replace("{pair}", pair)
    }
}

#[async_trait]
impl MarketData for RestPriceFeed {
    async fn get_current_price(&self, pair: &str) -> Result<Decimal> {
        let url = self.url_for(pair);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GridError::MarketDataUnavailable(format!("{}: {}", pair, e)))?;

        if !response.status().is_success() {
            return Err(GridError::MarketDataUnavailable(format!(
                "{}: HTTP {} from {}",
                pair,
                response.status(),
                self.exchange
            )));
        }

        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| GridError::MarketDataUnavailable(format!("{}: bad ticker: {}", pair, e)))?;

        debug!("{} {} price: {}", self.exchange, pair, ticker.price);
        Ok(ticker.price)
    }

    async fn get_precision_rules(&self, pair: &str) -> Result<PrecisionRules> {
        Ok(self
            .pair_rules
            .get(pair)
            .copied()
            .unwrap_or(self.default_rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> RestPriceFeed {
        RestPriceFeed::new(
            "binance",
            "https://api.binance.com/api/v3/ticker/price?symbol={pair}",
            PrecisionRules {
                price_precision: 2,
                amount_precision: 4,
            },
        )
        .unwrap()
    }

    #[test]
    fn substitutes_pair_in_url() {
        assert_eq!(
            feed().url_for("BTCUSDT"),
            "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT"
        );
    }

    #[tokio::test]
    async fn pair_rules_override_defaults() {
        let feed = feed().with_pair_rules(
            "DOGEUSDT",
            PrecisionRules {
                price_precision: 6,
                amount_precision: 0,
            },
        );

        let doge = feed.get_precision_rules("DOGEUSDT").await.unwrap();
        assert_eq!(doge.price_precision, 6);

        let btc = feed.get_precision_rules("BTCUSDT").await.unwrap();
        assert_eq!(btc.price_precision, 2);
    }
}
