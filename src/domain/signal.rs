use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized inbound trading signal. Transport, authentication and
/// signature checks happen upstream; this is what admission sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub owner: String,
    pub pair: String,
    pub timeframe: String,
    pub entry_price: Decimal,
    /// Raw payload as received; captured verbatim when the signal is
    /// deferred so replay sees exactly what arrived
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Reported loss on the signal's setup, if the sender provides one
    #[serde(default)]
    pub loss_percentage: Option<Decimal>,
    /// Sender's profit estimate, if provided
    #[serde(default)]
    pub expected_profit: Option<Decimal>,
    /// How many times this signal has been deferred and re-queued
    #[serde(default)]
    pub replacement_count: i32,
}

impl TradeSignal {
    pub fn new(owner: &str, pair: &str, timeframe: &str, entry_price: Decimal) -> Self {
        Self {
            owner: owner.to_string(),
            pair: pair.to_string(),
            timeframe: timeframe.to_string(),
            entry_price,
            payload: serde_json::Value::Null,
            loss_percentage: None,
            expected_profit: None,
            replacement_count: 0,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Queued signal lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Waiting for a freed admission slot
    Queued,
    /// Replayed through admission exactly once
    Processed,
    /// Administratively withdrawn
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "QUEUED",
            QueueStatus::Processed => "PROCESSED",
            QueueStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for QueueStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(QueueStatus::Queued),
            "PROCESSED" => Ok(QueueStatus::Processed),
            "CANCELLED" => Ok(QueueStatus::Cancelled),
            _ => Err(format!("Unknown queue status: {}", s)),
        }
    }
}

/// A deferred signal awaiting a freed admission slot.
///
/// Queued entries for an owner are totally ordered by priority_rank
/// ascending (nulls last), ties broken by earliest enqueued_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSignal {
    pub id: Option<i64>,
    pub owner: String,
    pub pair: String,
    pub timeframe: String,
    /// Normalized entry price, persisted independently of the raw
    /// payload so a captured signal is always replayable
    pub entry_price: Decimal,
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub loss_percentage: Option<Decimal>,
    pub expected_profit: Option<Decimal>,
    pub replacement_count: i32,
    /// None under the default FIFO strategy
    pub priority_rank: Option<i32>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedSignal {
    /// Capture a signal for deferred replay
    pub fn capture(signal: &TradeSignal, priority_rank: Option<i32>) -> Self {
        Self {
            id: None,
            owner: signal.owner.clone(),
            pair: signal.pair.clone(),
            timeframe: signal.timeframe.clone(),
            entry_price: signal.entry_price,
            payload: signal.payload.clone(),
            status: QueueStatus::Queued,
            loss_percentage: signal.loss_percentage,
            expected_profit: signal.expected_profit,
            replacement_count: signal.replacement_count,
            priority_rank,
            enqueued_at: Utc::now(),
        }
    }

    /// Rebuild the normalized signal for replay through admission.
    /// Replays count one more replacement.
    pub fn to_signal(&self) -> TradeSignal {
        TradeSignal {
            owner: self.owner.clone(),
            pair: self.pair.clone(),
            timeframe: self.timeframe.clone(),
            entry_price: self.entry_price,
            payload: self.payload.clone(),
            loss_percentage: self.loss_percentage,
            expected_profit: self.expected_profit,
            replacement_count: self.replacement_count + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn capture_preserves_payload() {
        let signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000))
            .with_payload(json!({"entry_price": "50000", "source": "tv"}));

        let queued = QueuedSignal::capture(&signal, None);
        assert_eq!(queued.status, QueueStatus::Queued);
        assert_eq!(queued.payload["source"], "tv");
        assert!(queued.priority_rank.is_none());
        assert_eq!(queued.replacement_count, 0);
    }

    #[test]
    fn replay_increments_replacement_count() {
        let signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000))
            .with_payload(json!({"entry_price": "50000"}));

        let queued = QueuedSignal::capture(&signal, Some(3));
        let replayed = queued.to_signal();

        assert_eq!(replayed.entry_price, dec!(50000));
        assert_eq!(replayed.replacement_count, 1);
        assert_eq!(replayed.pair, "BTCUSDT");
    }

    #[test]
    fn replay_works_without_payload() {
        // A bare signal carries payload Null; the normalized entry
        // price must still survive capture and replay.
        let signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000));

        let replayed = QueuedSignal::capture(&signal, None).to_signal();
        assert_eq!(replayed.entry_price, dec!(50000));
        assert_eq!(replayed.owner, "alice");
        assert_eq!(replayed.replacement_count, 1);
    }

    #[test]
    fn replay_ignores_payload_entry_price() {
        // The payload is captured verbatim but the replayed entry
        // price is the normalized one, not whatever the sender wrote.
        let signal = TradeSignal::new("bob", "ETHUSDT", "4h", dec!(3000))
            .with_payload(json!({"entry_price": "garbage"}));

        let replayed = QueuedSignal::capture(&signal, None).to_signal();
        assert_eq!(replayed.entry_price, dec!(3000));
        assert_eq!(replayed.payload["entry_price"], "garbage");
    }
}
