//! Take-profit monitoring background service
//!
//! This service periodically:
//! - Recomputes average entry and PnL for every Live group
//! - Flips Filled legs to HitTP once their exit target is reached
//! - Applies the closure policy and triggers queue replay on close

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::adapters::{FilledLegRow, PostgresStore};
use crate::domain::TakeProfitMode;
use crate::engine::{ClosurePolicy, LifecycleEngine, QueueManager};
use crate::error::Result;
use crate::market::MarketData;

/// Configuration for the take-profit monitor
#[derive(Debug, Clone)]
pub struct TakeProfitConfig {
    /// Interval between monitoring cycles (seconds)
    pub check_interval_secs: u64,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
        }
    }
}

/// Take-profit monitoring statistics
#[derive(Debug, Clone, Default)]
pub struct TakeProfitStats {
    pub cycles: u64,
    pub groups_recomputed: u64,
    pub legs_checked: u64,
    pub legs_hit_tp: u64,
    pub groups_closed: u64,
    pub replays_triggered: u64,
    pub price_failures: u64,
    pub entity_errors: u64,
    pub last_cycle: Option<chrono::DateTime<chrono::Utc>>,
}

/// Has a Filled leg reached its exit? The basis is the leg's own fill
/// price in PerLeg mode, or the group's average entry in AverageEntry
/// mode.
pub fn tp_breached(current_price: Decimal, basis: Decimal, tp_target: Decimal) -> bool {
    current_price >= basis * (Decimal::ONE + tp_target)
}

/// Exit basis for a leg under the group's take-profit mode. Falls back
/// to the fill price while the group average is still unset.
pub fn exit_basis(mode: TakeProfitMode, fill_price: Decimal, group_avg: Option<Decimal>) -> Decimal {
    match mode {
        TakeProfitMode::PerLeg => fill_price,
        TakeProfitMode::AverageEntry => group_avg.unwrap_or(fill_price),
    }
}

/// Take-profit monitoring service
pub struct TakeProfitMonitor {
    store: Arc<PostgresStore>,
    market: Arc<dyn MarketData>,
    lifecycle: Arc<LifecycleEngine>,
    queue: Arc<QueueManager>,
    policy: Arc<dyn ClosurePolicy>,
    config: TakeProfitConfig,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Statistics
    stats: Arc<RwLock<TakeProfitStats>>,
}

impl TakeProfitMonitor {
    pub fn new(
        store: Arc<PostgresStore>,
        market: Arc<dyn MarketData>,
        lifecycle: Arc<LifecycleEngine>,
        queue: Arc<QueueManager>,
        policy: Arc<dyn ClosurePolicy>,
        config: TakeProfitConfig,
    ) -> Self {
        Self {
            store,
            market,
            lifecycle,
            queue,
            policy,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(TakeProfitStats::default())),
        }
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> TakeProfitStats {
        self.stats.read().await.clone()
    }

    /// Start the monitoring loop
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Take-profit monitor already running");
            return;
        }

        info!(
            "Starting take-profit monitor (interval: {}s)",
            self.config.check_interval_secs
        );

        let store = self.store.clone();
        let market = self.market.clone();
        let lifecycle = self.lifecycle.clone();
        let queue = self.queue.clone();
        let policy = self.policy.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(config.check_interval_secs));

            while running.load(Ordering::SeqCst) {
                interval.tick().await;

                if let Err(e) = Self::run_check_cycle(
                    &store,
                    market.as_ref(),
                    &lifecycle,
                    &queue,
                    policy.as_ref(),
                    &stats,
                )
                .await
                {
                    error!("Take-profit cycle failed: {}", e);
                }
            }

            info!("Take-profit monitor stopped");
        });
    }

    /// Stop the monitoring loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Take-profit monitor stop requested");
    }

    /// Run a single monitoring cycle (the scheduled entry point)
    pub async fn run_cycle(&self) -> Result<()> {
        Self::run_check_cycle(
            &self.store,
            self.market.as_ref(),
            &self.lifecycle,
            &self.queue,
            self.policy.as_ref(),
            &self.stats,
        )
        .await
    }

    /// One full pass: recompute, detect breaches, close and replay.
    /// Per-entity failures are logged and counted; the cycle never
    /// aborts wholesale.
    async fn run_check_cycle(
        store: &PostgresStore,
        market: &dyn MarketData,
        lifecycle: &LifecycleEngine,
        queue: &QueueManager,
        policy: &dyn ClosurePolicy,
        stats: &RwLock<TakeProfitStats>,
    ) -> Result<()> {
        let now = chrono::Utc::now();

        let mut recomputed = 0u64;
        let mut checked = 0u64;
        let mut hit = 0u64;
        let mut closed = 0u64;
        let mut replays = 0u64;
        let mut price_failures = 0u64;
        let mut entity_errors = 0u64;

        // 1. Refresh derived state for every Live group
        let live_groups = store.list_live_groups().await?;
        for group in &live_groups {
            let Some(group_id) = group.id else { continue };
            match lifecycle.recompute_group(group_id).await {
                Ok(()) => recomputed += 1,
                Err(e) => {
                    warn!("Recompute failed for group {}: {}", group_id, e);
                    entity_errors += 1;
                }
            }
        }

        // 2. Scan Filled legs per pair; one price fetch per pair, and a
        // failed pair skips only its own legs this cycle
        let legs = store.list_filled_legs().await?;
        let mut by_pair: BTreeMap<String, Vec<FilledLegRow>> = BTreeMap::new();
        for leg in legs {
            by_pair.entry(leg.pair.clone()).or_default().push(leg);
        }

        let mut flipped_groups: BTreeSet<i64> = BTreeSet::new();

        for (pair, legs) in by_pair {
            let current_price = match market.get_current_price(&pair).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("Price fetch failed for {}; skipping its legs: {}", pair, e);
                    price_failures += 1;
                    continue;
                }
            };

            for leg in legs {
                checked += 1;
                let basis = exit_basis(leg.take_profit_mode, leg.fill_price, leg.group_avg_entry);
                if !tp_breached(current_price, basis, leg.tp_target) {
                    continue;
                }

                match store.mark_leg_hit_tp(leg.leg_id).await {
                    // false: another writer flipped it first; no-op
                    Ok(true) => {
                        info!(
                            "Take-profit hit for leg {} ({} at {})",
                            leg.leg_id, pair, current_price
                        );
                        hit += 1;
                        flipped_groups.insert(leg.group_id);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("Failed to flip leg {}: {}", leg.leg_id, e);
                        entity_errors += 1;
                    }
                }
            }
        }

        // A flipped leg no longer counts toward the average entry;
        // refresh its group now rather than leaving the stale value
        // visible until the next cycle
        for group_id in flipped_groups {
            match lifecycle.recompute_group(group_id).await {
                Ok(()) => recomputed += 1,
                Err(e) => {
                    warn!("Post-flip recompute failed for group {}: {}", group_id, e);
                    entity_errors += 1;
                }
            }
        }

        // 3. Closure policy over every Live group; each close triggers
        // exactly one queue replay for its owner
        for group in &live_groups {
            let Some(group_id) = group.id else { continue };

            let statuses = match store.leg_statuses_for_group(group_id).await {
                Ok(statuses) => statuses,
                Err(e) => {
                    warn!("Leg-status fetch failed for group {}: {}", group_id, e);
                    entity_errors += 1;
                    continue;
                }
            };

            if !policy.should_close(&statuses) {
                continue;
            }

            match queue.on_group_closed(group_id).await {
                Ok(outcome) => {
                    closed += 1;
                    if outcome.is_some() {
                        replays += 1;
                    }
                }
                Err(e) => {
                    error!("Close/replay failed for group {}: {}", group_id, e);
                    entity_errors += 1;
                }
            }
        }

        // Update stats
        {
            let mut s = stats.write().await;
            s.cycles += 1;
            s.groups_recomputed += recomputed;
            s.legs_checked += checked;
            s.legs_hit_tp += hit;
            s.groups_closed += closed;
            s.replays_triggered += replays;
            s.price_failures += price_failures;
            s.entity_errors += entity_errors;
            s.last_cycle = Some(now);
        }

        debug!(
            "TP cycle complete: recomputed={}, checked={}, hit={}, closed={}, replays={}, price_failures={}, errors={}",
            recomputed, checked, hit, closed, replays, price_failures, entity_errors
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = TakeProfitConfig::default();
        assert_eq!(config.check_interval_secs, 10);
    }

    #[test]
    fn breach_at_exact_target() {
        // fill 100, tp 1%: triggers once current >= 101
        assert!(!tp_breached(dec!(100.99), dec!(100), dec!(0.01)));
        assert!(tp_breached(dec!(101), dec!(100), dec!(0.01)));
        assert!(tp_breached(dec!(150), dec!(100), dec!(0.01)));
    }

    #[test]
    fn flipped_leg_leaves_the_average() {
        use crate::engine::weighted_average_entry;

        // Once a leg hits take-profit it stops contributing to the
        // group's average entry, so the post-flip recompute must see a
        // different value than the pre-flip one.
        let before = vec![(dec!(100), dec!(0.2)), (dec!(95), dec!(0.2))];
        let after = vec![(dec!(95), dec!(0.2))];

        assert_eq!(weighted_average_entry(&before), Some(dec!(97.5)));
        assert_eq!(weighted_average_entry(&after), Some(dec!(95)));
    }

    #[test]
    fn per_leg_basis_is_fill_price() {
        let basis = exit_basis(TakeProfitMode::PerLeg, dec!(95), Some(dec!(97.5)));
        assert_eq!(basis, dec!(95));
    }

    #[test]
    fn average_entry_basis_uses_group_avg() {
        let basis = exit_basis(TakeProfitMode::AverageEntry, dec!(95), Some(dec!(97.5)));
        assert_eq!(basis, dec!(97.5));

        // Falls back to the fill price while the average is unset
        let fallback = exit_basis(TakeProfitMode::AverageEntry, dec!(95), None);
        assert_eq!(fallback, dec!(95));
    }
}
