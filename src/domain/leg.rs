use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// DCA leg lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegStatus {
    /// Created, resting at its target price
    Pending,
    /// Fill reported by the external order manager
    Filled,
    /// Take-profit monitor detected the exit target was reached
    HitTp,
    /// Administratively cancelled
    Cancelled,
}

impl LegStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Pending => "PENDING",
            LegStatus::Filled => "FILLED",
            LegStatus::HitTp => "HIT_TP",
            LegStatus::Cancelled => "CANCELLED",
        }
    }

    /// Has this leg left the market (no longer counted toward closure)?
    pub fn is_exited(&self) -> bool {
        matches!(self, LegStatus::HitTp | LegStatus::Cancelled)
    }

    /// Does this leg contribute to the group's average entry?
    pub fn is_filled(&self) -> bool {
        matches!(self, LegStatus::Filled)
    }

    pub fn can_transition_to(&self, target: LegStatus) -> bool {
        use LegStatus::*;

        match (self, target) {
            (Pending, Filled) => true,
            (Pending, Cancelled) => true,
            (Filled, HitTp) => true,
            (Filled, Cancelled) => true,
            // HitTp and Cancelled are terminal
            _ => false,
        }
    }
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for LegStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(LegStatus::Pending),
            "FILLED" => Ok(LegStatus::Filled),
            "HIT_TP" => Ok(LegStatus::HitTp),
            "CANCELLED" => Ok(LegStatus::Cancelled),
            _ => Err(format!("Unknown leg status: {}", s)),
        }
    }
}

/// One rung of a DCA ladder: offset, sizing weight, and exit target.
/// Weights are relative and need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegSpec {
    /// Signed fractional offset from the pyramid entry price
    /// (0 = market entry, negative = buy-the-dip)
    pub price_gap: Decimal,
    /// Relative capital sizing for this rung
    pub capital_weight: Decimal,
    /// Fractional gain that triggers the take-profit exit
    pub tp_target: Decimal,
}

impl LegSpec {
    pub fn new(price_gap: Decimal, capital_weight: Decimal, tp_target: Decimal) -> Self {
        Self {
            price_gap,
            capital_weight,
            tp_target,
        }
    }

    /// Grid price this rung rests at, relative to the pyramid entry
    pub fn target_price(&self, entry_price: Decimal) -> Decimal {
        entry_price * (Decimal::ONE + self.price_gap)
    }
}

/// A batch of DCA legs opened against one group in response to one
/// admitted signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pyramid {
    pub id: Option<i64>,
    pub group_id: i64,
    pub entry_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Pyramid {
    pub fn new(group_id: i64, entry_price: Decimal) -> Self {
        Self {
            id: None,
            group_id,
            entry_price,
            created_at: Utc::now(),
        }
    }
}

/// One grid order within a pyramid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaLeg {
    pub id: Option<i64>,
    pub pyramid_id: i64,
    pub price_gap: Decimal,
    pub capital_weight: Decimal,
    pub tp_target: Decimal,
    /// Materialized at creation: entry_price * (1 + price_gap)
    pub target_price: Decimal,
    pub fill_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
    pub status: LegStatus,
    /// Assigned by the external order manager once placed
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DcaLeg {
    /// Materialize a ladder rung against a pyramid's entry price
    pub fn from_spec(pyramid_id: i64, entry_price: Decimal, spec: &LegSpec) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            pyramid_id,
            price_gap: spec.price_gap,
            capital_weight: spec.capital_weight,
            tp_target: spec.tp_target,
            target_price: spec.target_price(entry_price),
            fill_price: None,
            filled_at: None,
            status: LegStatus::Pending,
            order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exit price for the take-profit check, from the given basis
    /// (the leg's own fill price, or the group average entry depending
    /// on the group's take-profit mode)
    pub fn exit_target(&self, basis: Decimal) -> Decimal {
        basis * (Decimal::ONE + self.tp_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn leg_spec_target_price() {
        let spec = LegSpec::new(dec!(-0.01), dec!(0.2), dec!(0.02));
        assert_eq!(spec.target_price(dec!(100)), dec!(99.000));

        let market_entry = LegSpec::new(dec!(0), dec!(0.2), dec!(0.01));
        assert_eq!(market_entry.target_price(dec!(100)), dec!(100));
    }

    #[test]
    fn leg_transitions() {
        use LegStatus::*;

        assert!(Pending.can_transition_to(Filled));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Filled.can_transition_to(HitTp));
        assert!(Filled.can_transition_to(Cancelled));

        assert!(!HitTp.can_transition_to(Filled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(HitTp));
    }

    #[test]
    fn exited_legs() {
        assert!(LegStatus::HitTp.is_exited());
        assert!(LegStatus::Cancelled.is_exited());
        assert!(!LegStatus::Pending.is_exited());
        assert!(!LegStatus::Filled.is_exited());
    }

    #[test]
    fn from_spec_materializes_target() {
        let spec = LegSpec::new(dec!(-0.005), dec!(0.2), dec!(0.005));
        let leg = DcaLeg::from_spec(7, dec!(200), &spec);

        assert_eq!(leg.pyramid_id, 7);
        assert_eq!(leg.target_price, dec!(199.000));
        assert_eq!(leg.status, LegStatus::Pending);
        assert!(leg.fill_price.is_none());
        assert!(leg.order_id.is_none());
    }

    #[test]
    fn exit_target_from_basis() {
        let spec = LegSpec::new(dec!(0), dec!(0.2), dec!(0.01));
        let leg = DcaLeg::from_spec(1, dec!(100), &spec);
        assert_eq!(leg.exit_target(dec!(100)), dec!(101.00));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            LegStatus::Pending,
            LegStatus::Filled,
            LegStatus::HitTp,
            LegStatus::Cancelled,
        ] {
            assert_eq!(LegStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(LegStatus::try_from("OPEN").is_err());
    }
}
