use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position group lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupStatus {
    /// Created but not yet trading (administrative hold)
    Waiting,
    /// Occupying an admission slot; monitors operate on it
    Live,
    /// All capital released; frees one admission slot
    Closed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Waiting => "WAITING",
            GroupStatus::Live => "LIVE",
            GroupStatus::Closed => "CLOSED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: GroupStatus) -> bool {
        use GroupStatus::*;

        match (self, target) {
            (Waiting, Live) => true,
            (Waiting, Closed) => true,
            (Live, Closed) => true,
            // Closed is terminal; a closed group never reopens
            _ => false,
        }
    }

    /// Does this group still occupy an admission slot?
    pub fn is_open(&self) -> bool {
        !matches!(self, GroupStatus::Closed)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for GroupStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "WAITING" => Ok(GroupStatus::Waiting),
            "LIVE" => Ok(GroupStatus::Live),
            "CLOSED" => Ok(GroupStatus::Closed),
            _ => Err(format!("Unknown group status: {}", s)),
        }
    }
}

/// How the take-profit monitor derives leg exit targets for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakeProfitMode {
    /// Each leg targets its own fill price (default)
    PerLeg,
    /// Legs target the group's weighted average entry, so all rungs of
    /// a pyramid exit together once the blended position recovers
    AverageEntry,
}

impl Default for TakeProfitMode {
    fn default() -> Self {
        TakeProfitMode::PerLeg
    }
}

impl TakeProfitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakeProfitMode::PerLeg => "PER_LEG",
            TakeProfitMode::AverageEntry => "AVERAGE_ENTRY",
        }
    }
}

impl TryFrom<&str> for TakeProfitMode {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PER_LEG" => Ok(TakeProfitMode::PerLeg),
            "AVERAGE_ENTRY" => Ok(TakeProfitMode::AverageEntry),
            _ => Err(format!("Unknown take-profit mode: {}", s)),
        }
    }
}

/// A position group: the unit of admission. Owns pyramids, which own
/// DCA legs. At most one non-Closed group exists per
/// (pair, timeframe, owner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionGroup {
    pub id: Option<i64>,
    pub pair: String,
    pub timeframe: String,
    pub owner: String,
    pub status: GroupStatus,
    pub take_profit_mode: TakeProfitMode,
    /// Weighted average over Filled legs; None until something fills
    pub avg_entry_price: Option<Decimal>,
    pub unrealized_pnl_percent: Option<Decimal>,
    /// Only computed when notional_usd is set
    pub unrealized_pnl_usd: Option<Decimal>,
    /// Explicit position size; PnL in USD is never inferred without it
    pub notional_usd: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PositionGroup {
    pub fn new(pair: &str, timeframe: &str, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            pair: pair.to_string(),
            timeframe: timeframe.to_string(),
            owner: owner.to_string(),
            status: GroupStatus::Live,
            take_profit_mode: TakeProfitMode::default(),
            avg_entry_price: None,
            unrealized_pnl_percent: None,
            unrealized_pnl_usd: None,
            notional_usd: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The admission key this group occupies
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.pair, &self.timeframe, &self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        use GroupStatus::*;

        assert!(Waiting.can_transition_to(Live));
        assert!(Live.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Live));
        assert!(!Closed.can_transition_to(Waiting));
        assert!(!Live.can_transition_to(Waiting));
    }

    #[test]
    fn open_groups_hold_a_slot() {
        assert!(GroupStatus::Waiting.is_open());
        assert!(GroupStatus::Live.is_open());
        assert!(!GroupStatus::Closed.is_open());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [GroupStatus::Waiting, GroupStatus::Live, GroupStatus::Closed] {
            assert_eq!(GroupStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(GroupStatus::try_from("PAUSED").is_err());
    }

    #[test]
    fn tp_mode_round_trips_through_str() {
        for mode in [TakeProfitMode::PerLeg, TakeProfitMode::AverageEntry] {
            assert_eq!(TakeProfitMode::try_from(mode.as_str()).unwrap(), mode);
        }
    }
}
