use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// Precision rules for a trading pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionRules {
    /// Decimal places accepted for prices
    pub price_precision: u32,
    /// Decimal places accepted for amounts
    pub amount_precision: u32,
}

/// Market-data seam consumed by the engine. Implementations fetch
/// from an exchange; failures map to `MarketDataUnavailable` and the
/// affected pair is skipped for the cycle.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Current market price for a pair
    async fn get_current_price(&self, pair: &str) -> Result<Decimal>;

    /// Price/amount precision rules for a pair
    async fn get_precision_rules(&self, pair: &str) -> Result<PrecisionRules>;
}
