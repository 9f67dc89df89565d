//! Risk offset background service
//!
//! Independent of the take-profit monitor and deliberately slower:
//! fast exit detection and slow portfolio rebalancing do not share a
//! schedule. Each cycle deterministically selects the worst-performing
//! Live group below the loss threshold and records the selection; the
//! offsetting trade itself is delegated to the external execution
//! collaborator.

use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::adapters::{GroupPnl, PostgresStore};
use crate::error::Result;

/// Configuration for the risk offset engine
#[derive(Debug, Clone)]
pub struct RiskOffsetConfig {
    /// Interval between risk cycles (seconds)
    pub check_interval_secs: u64,
    /// Only groups below this PnL percentage are candidates
    pub loss_threshold_percent: Decimal,
}

impl Default for RiskOffsetConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            loss_threshold_percent: Decimal::from(-5),
        }
    }
}

/// Risk offset statistics
#[derive(Debug, Clone, Default)]
pub struct RiskOffsetStats {
    pub cycles: u64,
    pub selections: u64,
    pub last_selected_group: Option<i64>,
    pub last_cycle: Option<chrono::DateTime<chrono::Utc>>,
}

/// Deterministic worst-loser selection over a PnL snapshot: lowest
/// pnl_percent below the threshold, ties broken by lowest group id so
/// repeated evaluations of one snapshot always agree.
pub fn select_worst_loser(
    snapshot: &[GroupPnl],
    loss_threshold_percent: Decimal,
) -> Option<&GroupPnl> {
    snapshot
        .iter()
        .filter(|g| g.pnl_percent < loss_threshold_percent)
        .min_by(|a, b| {
            a.pnl_percent
                .cmp(&b.pnl_percent)
                .then(a.group_id.cmp(&b.group_id))
        })
}

/// Risk offset background service
pub struct RiskOffsetEngine {
    store: Arc<PostgresStore>,
    config: RiskOffsetConfig,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Statistics
    stats: Arc<RwLock<RiskOffsetStats>>,
}

impl RiskOffsetEngine {
    pub fn new(store: Arc<PostgresStore>, config: RiskOffsetConfig) -> Self {
        Self {
            store,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(RiskOffsetStats::default())),
        }
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> RiskOffsetStats {
        self.stats.read().await.clone()
    }

    /// Start the risk loop
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Risk offset engine already running");
            return;
        }

        info!(
            "Starting risk offset engine (interval: {}s, threshold: {}%)",
            self.config.check_interval_secs, self.config.loss_threshold_percent
        );

        let store = self.store.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(config.check_interval_secs));

            while running.load(Ordering::SeqCst) {
                interval.tick().await;

                if let Err(e) = Self::run_risk_cycle(&store, &config, &stats).await {
                    error!("Risk cycle failed: {}", e);
                }
            }

            info!("Risk offset engine stopped");
        });
    }

    /// Stop the risk loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Risk offset engine stop requested");
    }

    /// Run a single risk cycle (the scheduled entry point)
    pub async fn run_cycle(&self) -> Result<()> {
        Self::run_risk_cycle(&self.store, &self.config, &self.stats).await
    }

    async fn run_risk_cycle(
        store: &PostgresStore,
        config: &RiskOffsetConfig,
        stats: &RwLock<RiskOffsetStats>,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let snapshot = store.list_live_group_pnls().await?;

        let selected = select_worst_loser(&snapshot, config.loss_threshold_percent);

        match selected {
            Some(worst) => {
                let event_id = store
                    .record_risk_selection(
                        worst.group_id,
                        worst.pnl_percent,
                        config.loss_threshold_percent,
                    )
                    .await?;

                info!(
                    "Risk offset selected group {} ({} at {}%); event {}",
                    worst.group_id, worst.pair, worst.pnl_percent, event_id
                );

                let mut s = stats.write().await;
                s.cycles += 1;
                s.selections += 1;
                s.last_selected_group = Some(worst.group_id);
                s.last_cycle = Some(now);
            }
            None => {
                debug!(
                    "No group below {}% among {} candidates",
                    config.loss_threshold_percent,
                    snapshot.len()
                );

                let mut s = stats.write().await;
                s.cycles += 1;
                s.last_cycle = Some(now);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn group(id: i64, pnl: Decimal) -> GroupPnl {
        GroupPnl {
            group_id: id,
            owner: "alice".to_string(),
            pair: "BTCUSDT".to_string(),
            pnl_percent: pnl,
        }
    }

    #[test]
    fn test_default_config() {
        let config = RiskOffsetConfig::default();
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.loss_threshold_percent, dec!(-5));
    }

    #[test]
    fn picks_most_negative_pnl() {
        let snapshot = vec![group(1, dec!(-3)), group(2, dec!(-10)), group(3, dec!(2))];

        let worst = select_worst_loser(&snapshot, dec!(-1)).unwrap();
        assert_eq!(worst.group_id, 2);
    }

    #[test]
    fn selection_is_deterministic_across_evaluations() {
        let snapshot = vec![group(1, dec!(-10)), group(2, dec!(-3))];

        for _ in 0..50 {
            let worst = select_worst_loser(&snapshot, dec!(-1)).unwrap();
            assert_eq!(worst.group_id, 1);
        }
    }

    #[test]
    fn ties_break_by_lowest_id() {
        let snapshot = vec![group(9, dec!(-10)), group(4, dec!(-10)), group(7, dec!(-10))];

        let worst = select_worst_loser(&snapshot, dec!(-5)).unwrap();
        assert_eq!(worst.group_id, 4);
    }

    #[test]
    fn no_candidate_below_threshold_is_noop() {
        let snapshot = vec![group(1, dec!(-3)), group(2, dec!(-4.9))];
        assert!(select_worst_loser(&snapshot, dec!(-5)).is_none());

        // Exactly at the threshold does not qualify
        let at_threshold = vec![group(1, dec!(-5))];
        assert!(select_worst_loser(&at_threshold, dec!(-5)).is_none());
    }

    #[test]
    fn empty_snapshot_is_noop() {
        assert!(select_worst_loser(&[], dec!(-5)).is_none());
    }
}
