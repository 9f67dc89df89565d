//! Execution-pool admission control
//!
//! Every well-formed signal is accepted in one of three ways: attached
//! to the owner's open group for its key, expanded into a new Live
//! group when the owner has capacity, or captured as a queued signal.
//! Queuing is the only backpressure; admission never rejects outright.

use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::PostgresStore;
use crate::domain::{LegSpec, TradeSignal};
use crate::engine::queue::PriorityStrategy;
use crate::error::{GridError, Result};
use crate::market::MarketData;
use crate::validation;

/// What admission decided for a signal, before any rows are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// An open group exists for the key: add a pyramid to it
    Attach,
    /// No open group and the owner has a free slot: create one
    Create,
    /// Pool full: capture the signal for later replay
    Defer,
}

/// Result of admitting a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// New pyramid under an existing group
    Attached { group_id: i64, pyramid_id: i64 },
    /// New Live group with its first pyramid
    Created { group_id: i64, pyramid_id: i64 },
    /// Deferred; one slot freeing up will replay it
    Queued { signal_id: i64 },
}

impl AdmissionOutcome {
    /// Deferral is a success-with-deferred outcome, not a failure
    pub fn is_deferred(&self) -> bool {
        matches!(self, AdmissionOutcome::Queued { .. })
    }
}

/// The capacity branch of admission. Kept pure so the check-then-act
/// sequence has a single definition shared by the transactional path.
pub fn decide(open_group_exists: bool, live_count: i64, max_open_groups: u32) -> AdmissionDecision {
    if open_group_exists {
        AdmissionDecision::Attach
    } else if live_count < i64::from(max_open_groups) {
        AdmissionDecision::Create
    } else {
        AdmissionDecision::Defer
    }
}

/// Check the signal's entry price against the pair's exchange
/// precision rules. When the rules lookup fails the check is skipped
/// for this signal and the next arrival retries it.
async fn precision_gate(market: &dyn MarketData, signal: &TradeSignal) -> Result<()> {
    match market.get_precision_rules(&signal.pair).await {
        Ok(rules) => validation::validate_signal_precision(signal, &rules),
        Err(GridError::MarketDataUnavailable(reason)) => {
            debug!("Skipping precision check for {}: {}", signal.pair, reason);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Admission controller: validates, ranks, and hands the signal to the
/// store's atomic admission transaction
pub struct AdmissionController {
    store: Arc<PostgresStore>,
    market: Arc<dyn MarketData>,
    ladder: Vec<LegSpec>,
    max_open_groups: u32,
    strategy: Arc<dyn PriorityStrategy>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<PostgresStore>,
        market: Arc<dyn MarketData>,
        ladder: Vec<LegSpec>,
        max_open_groups: u32,
        strategy: Arc<dyn PriorityStrategy>,
    ) -> Self {
        Self {
            store,
            market,
            ladder,
            max_open_groups,
            strategy,
        }
    }

    /// Admit a normalized signal. Malformed signals are rejected here
    /// with no state mutated; everything else lands as Attached,
    /// Created, or Queued.
    pub async fn admit(&self, signal: &TradeSignal) -> Result<AdmissionOutcome> {
        validation::validate_signal(signal)?;
        precision_gate(self.market.as_ref(), signal).await?;

        let rank = self.strategy.rank(signal);

        let outcome = self
            .store
            .admit_signal(signal, &self.ladder, self.max_open_groups, rank)
            .await?;

        match outcome {
            AdmissionOutcome::Attached {
                group_id,
                pyramid_id,
            } => info!(
                "Signal {}/{} attached to group {} as pyramid {}",
                signal.pair, signal.timeframe, group_id, pyramid_id
            ),
            AdmissionOutcome::Created {
                group_id,
                pyramid_id,
            } => info!(
                "Signal {}/{} created group {} (pyramid {}) for {}",
                signal.pair, signal.timeframe, group_id, pyramid_id, signal.owner
            ),
            AdmissionOutcome::Queued { signal_id } => info!(
                "Pool full for {}; signal {}/{} queued as {}",
                signal.owner, signal.pair, signal.timeframe, signal_id
            ),
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MockMarketData, PrecisionRules};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn precision_gate_rejects_too_fine_prices() {
        let mut market = MockMarketData::new();
        market.expect_get_precision_rules().returning(|_| {
            Ok(PrecisionRules {
                price_precision: 2,
                amount_precision: 4,
            })
        });

        let ok = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000.12));
        assert!(precision_gate(&market, &ok).await.is_ok());

        let too_fine = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000.123));
        assert!(matches!(
            precision_gate(&market, &too_fine).await,
            Err(GridError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn precision_gate_skips_when_rules_unavailable() {
        let mut market = MockMarketData::new();
        market.expect_get_precision_rules().returning(|pair| {
            Err(GridError::MarketDataUnavailable(pair.to_string()))
        });

        let signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000.123456));
        assert!(precision_gate(&market, &signal).await.is_ok());
    }

    #[test]
    fn attach_wins_over_capacity() {
        // An open group for the key always attaches, even at the bound
        assert_eq!(decide(true, 10, 10), AdmissionDecision::Attach);
        assert_eq!(decide(true, 0, 1), AdmissionDecision::Attach);
    }

    #[test]
    fn creates_below_bound_defers_at_bound() {
        assert_eq!(decide(false, 0, 1), AdmissionDecision::Create);
        assert_eq!(decide(false, 9, 10), AdmissionDecision::Create);
        assert_eq!(decide(false, 1, 1), AdmissionDecision::Defer);
        assert_eq!(decide(false, 10, 10), AdmissionDecision::Defer);
    }

    #[test]
    fn live_count_never_exceeds_bound() {
        // For any count at or beyond the bound the decision is Defer,
        // so admission can never push the Live count past the bound.
        for max in 1u32..=5 {
            for count in i64::from(max)..=i64::from(max) + 3 {
                assert_eq!(decide(false, count, max), AdmissionDecision::Defer);
            }
            assert_eq!(decide(false, i64::from(max) - 1, max), AdmissionDecision::Create);
        }
    }

    #[test]
    fn queued_outcome_is_deferred() {
        assert!(AdmissionOutcome::Queued { signal_id: 1 }.is_deferred());
        assert!(!AdmissionOutcome::Created {
            group_id: 1,
            pyramid_id: 1
        }
        .is_deferred());
    }
}
