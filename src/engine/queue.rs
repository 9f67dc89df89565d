//! Deferred-signal queue management
//!
//! Signals deferred by admission wait in a durable, priority-ordered
//! queue. One group closing frees one slot and replays exactly one
//! queued signal for that owner.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::adapters::PostgresStore;
use crate::domain::{QueuedSignal, TradeSignal};
use crate::engine::admission::{AdmissionController, AdmissionOutcome};
use crate::error::Result;

/// Strategy for ranking queued signals. The scoring formula is
/// deliberately pluggable; rank None sorts last, so a strategy that
/// always returns None degrades to pure FIFO.
pub trait PriorityStrategy: Send + Sync {
    fn rank(&self, signal: &TradeSignal) -> Option<i32>;
}

/// Default strategy: no ranking, replay in arrival order
pub struct FifoPriority;

impl PriorityStrategy for FifoPriority {
    fn rank(&self, _signal: &TradeSignal) -> Option<i32> {
        None
    }
}

/// Total order over an owner's queued entries: priority_rank ascending
/// with None last, ties broken by earliest enqueued_at. Mirrors the
/// ORDER BY the store uses for dequeue.
pub fn replay_ordering(a: &QueuedSignal, b: &QueuedSignal) -> Ordering {
    match (a.priority_rank, b.priority_rank) {
        (Some(ra), Some(rb)) => ra.cmp(&rb).then(a.enqueued_at.cmp(&b.enqueued_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.enqueued_at.cmp(&b.enqueued_at),
    }
}

/// Replays deferred signals when admission slots free up
pub struct QueueManager {
    store: Arc<PostgresStore>,
    admission: Arc<AdmissionController>,
}

impl QueueManager {
    pub fn new(store: Arc<PostgresStore>, admission: Arc<AdmissionController>) -> Self {
        Self { store, admission }
    }

    /// Handle a group's Closed transition: dequeue the owner's next
    /// queued signal (transactionally coupled to the close) and replay
    /// it through admission exactly once.
    ///
    /// Returns the replay's admission outcome, or None when the group
    /// was already closed or the queue was empty.
    pub async fn on_group_closed(&self, group_id: i64) -> Result<Option<AdmissionOutcome>> {
        let Some(queued) = self.store.close_group_and_dequeue(group_id).await? else {
            return Ok(None);
        };

        let signal_id = queued.id.unwrap_or(-1);
        let signal = queued.to_signal();

        info!(
            "Replaying queued signal {} for {} ({} replacement(s))",
            signal_id, signal.owner, signal.replacement_count
        );

        let outcome = self.admission.admit(&signal).await?;
        Ok(Some(outcome))
    }

    /// An owner's pending queue in replay order
    pub async fn pending(&self, owner: &str) -> Result<Vec<QueuedSignal>> {
        self.store.list_queued_signals(owner).await
    }

    /// Withdraw a queued signal before it is replayed
    pub async fn cancel(&self, signal_id: i64) -> Result<bool> {
        self.store.cancel_queued_signal(signal_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn queued(rank: Option<i32>, age_secs: i64) -> QueuedSignal {
        let signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000));
        let mut q = QueuedSignal::capture(&signal, rank);
        q.enqueued_at = Utc::now() - Duration::seconds(age_secs);
        q
    }

    #[test]
    fn fifo_strategy_never_ranks() {
        let signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000));
        assert_eq!(FifoPriority.rank(&signal), None);
    }

    #[test]
    fn ranked_entries_sort_before_unranked() {
        let ranked = queued(Some(5), 0);
        let unranked = queued(None, 100);
        assert_eq!(replay_ordering(&ranked, &unranked), Ordering::Less);
        assert_eq!(replay_ordering(&unranked, &ranked), Ordering::Greater);
    }

    #[test]
    fn lower_rank_replays_first() {
        let urgent = queued(Some(1), 0);
        let later = queued(Some(9), 500);
        assert_eq!(replay_ordering(&urgent, &later), Ordering::Less);
    }

    #[test]
    fn ties_break_by_arrival() {
        let older = queued(Some(3), 60);
        let newer = queued(Some(3), 5);
        assert_eq!(replay_ordering(&older, &newer), Ordering::Less);

        let older_fifo = queued(None, 60);
        let newer_fifo = queued(None, 5);
        assert_eq!(replay_ordering(&older_fifo, &newer_fifo), Ordering::Less);
    }

    #[test]
    fn ordering_is_total_for_a_queue() {
        let mut entries = vec![
            queued(None, 30),
            queued(Some(2), 10),
            queued(None, 90),
            queued(Some(2), 40),
            queued(Some(1), 0),
        ];
        entries.sort_by(replay_ordering);

        let ranks: Vec<Option<i32>> = entries.iter().map(|e| e.priority_rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(2), Some(2), None, None]);
        // Equal ranks keep arrival order
        assert!(entries[1].enqueued_at < entries[2].enqueued_at);
        assert!(entries[3].enqueued_at < entries[4].enqueued_at);
    }
}
