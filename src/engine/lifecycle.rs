//! Position lifecycle engine
//!
//! Reacts to externally reported leg state changes and keeps the
//! derived financial state of a group — weighted average entry and
//! unrealized PnL — correct and idempotent. Fill detection itself is
//! the order manager's job; this engine only consumes its reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::PostgresStore;
use crate::error::{GridError, Result};
use crate::market::MarketData;

/// Weighted average entry over Filled legs:
/// sum(fill_price * weight) / sum(weight). None when nothing is
/// Filled. Recomputing on an unchanged leg set yields the identical
/// value.
pub fn weighted_average_entry(filled: &[(Decimal, Decimal)]) -> Option<Decimal> {
    if filled.is_empty() {
        return None;
    }

    let total_weight: Decimal = filled.iter().map(|(_, w)| *w).sum();
    if total_weight <= Decimal::ZERO {
        return None;
    }

    let weighted_sum: Decimal = filled.iter().map(|(price, w)| *price * *w).sum();
    Some(weighted_sum / total_weight)
}

/// Unrealized PnL as a percentage, long-only:
/// (current - avg) / avg * 100. None when the average is missing or
/// zero.
pub fn unrealized_pnl_percent(current_price: Decimal, avg_entry: Option<Decimal>) -> Option<Decimal> {
    let avg = avg_entry?;
    if avg == Decimal::ZERO {
        return None;
    }
    Some((current_price - avg) / avg * Decimal::from(100))
}

/// PnL in USD requires an explicit notional; it is never inferred
pub fn unrealized_pnl_usd(
    notional_usd: Option<Decimal>,
    pnl_percent: Option<Decimal>,
) -> Option<Decimal> {
    Some(notional_usd? * pnl_percent? / Decimal::from(100))
}

/// Store-coupled lifecycle engine
pub struct LifecycleEngine {
    store: Arc<PostgresStore>,
    market: Arc<dyn MarketData>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<PostgresStore>, market: Arc<dyn MarketData>) -> Self {
        Self { store, market }
    }

    /// React to a fill reported by the external order manager: flip
    /// the leg to Filled and recompute the owning group. Returns the
    /// group id.
    pub async fn on_fill_reported(
        &self,
        leg_id: i64,
        fill_price: Decimal,
        filled_at: DateTime<Utc>,
        order_id: Option<&str>,
    ) -> Result<i64> {
        let group_id = self
            .store
            .mark_leg_filled(leg_id, fill_price, filled_at, order_id)
            .await?;

        debug!("Leg {} filled at {}; recomputing group {}", leg_id, fill_price, group_id);
        self.recompute_group(group_id).await?;
        Ok(group_id)
    }

    /// Administrative cancellation of a leg. The closure policy picks
    /// up any resulting closure on the next monitor cycle.
    pub async fn on_leg_cancelled(&self, leg_id: i64) -> Result<i64> {
        let group_id = self.store.mark_leg_cancelled(leg_id).await?;
        self.recompute_group(group_id).await?;
        Ok(group_id)
    }

    /// Recompute a group's average entry and PnL from its current
    /// Filled-leg set and persist the result. Idempotent: an unchanged
    /// leg set writes the same values.
    pub async fn recompute_group(&self, group_id: i64) -> Result<()> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| GridError::NotFound(format!("group {}", group_id)))?;

        let filled = self.store.filled_leg_weights(group_id).await?;
        let avg_entry = weighted_average_entry(&filled);

        let pnl_percent = if avg_entry.is_some() {
            match self.market.get_current_price(&group.pair).await {
                Ok(price) => unrealized_pnl_percent(price, avg_entry),
                Err(GridError::MarketDataUnavailable(reason)) => {
                    // PnL stays unset this round; the next cycle retries
                    warn!("No price for {}: {}", group.pair, reason);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let pnl_usd = unrealized_pnl_usd(group.notional_usd, pnl_percent);

        self.store
            .update_group_valuation(group_id, avg_entry, pnl_percent, pnl_usd)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn weighted_average_of_two_fills() {
        // (100*0.2 + 95*0.2) / 0.4 = 97.5
        let filled = vec![(dec!(100), dec!(0.2)), (dec!(95), dec!(0.2))];
        assert_eq!(weighted_average_entry(&filled), Some(dec!(97.5)));
    }

    #[test]
    fn average_is_none_without_fills() {
        assert_eq!(weighted_average_entry(&[]), None);
    }

    #[test]
    fn average_ignores_weightless_sets() {
        let filled = vec![(dec!(100), dec!(0))];
        assert_eq!(weighted_average_entry(&filled), None);
    }

    #[test]
    fn average_recompute_is_idempotent() {
        let filled = vec![
            (dec!(100), dec!(0.2)),
            (dec!(95), dec!(0.2)),
            (dec!(90.5), dec!(0.4)),
        ];
        let first = weighted_average_entry(&filled);
        let second = weighted_average_entry(&filled);
        assert_eq!(first, second);
    }

    #[test]
    fn weights_need_not_sum_to_one() {
        let filled = vec![(dec!(10), dec!(3)), (dec!(20), dec!(1))];
        // (30 + 20) / 4 = 12.5
        assert_eq!(weighted_average_entry(&filled), Some(dec!(12.5)));
    }

    #[test]
    fn pnl_percent_long_bias() {
        assert_eq!(
            unrealized_pnl_percent(dec!(110), Some(dec!(100))),
            Some(dec!(10))
        );
        assert_eq!(
            unrealized_pnl_percent(dec!(90), Some(dec!(100))),
            Some(dec!(-10))
        );
    }

    #[test]
    fn pnl_percent_requires_average() {
        assert_eq!(unrealized_pnl_percent(dec!(110), None), None);
        assert_eq!(unrealized_pnl_percent(dec!(110), Some(dec!(0))), None);
    }

    #[test]
    fn pnl_usd_requires_explicit_notional() {
        assert_eq!(unrealized_pnl_usd(None, Some(dec!(10))), None);
        assert_eq!(unrealized_pnl_usd(Some(dec!(1000)), None), None);
        assert_eq!(
            unrealized_pnl_usd(Some(dec!(1000)), Some(dec!(-5))),
            Some(dec!(-50))
        );
    }
}
