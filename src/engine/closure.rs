//! Group closure policy
//!
//! When a group counts as done is pluggable; the default closes once
//! every leg has left the market.

use crate::domain::LegStatus;

/// Decides when a group's legs satisfy closure
pub trait ClosurePolicy: Send + Sync {
    fn should_close(&self, legs: &[LegStatus]) -> bool;
}

/// Default policy: close once all legs are in {HitTP, Cancelled}.
/// A group with no legs never closes.
pub struct AllLegsExited;

impl ClosurePolicy for AllLegsExited {
    fn should_close(&self, legs: &[LegStatus]) -> bool {
        !legs.is_empty() && legs.iter().all(|s| s.is_exited())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LegStatus::*;

    #[test]
    fn closes_when_all_legs_exited() {
        assert!(AllLegsExited.should_close(&[HitTp, HitTp, Cancelled]));
        assert!(AllLegsExited.should_close(&[Cancelled]));
    }

    #[test]
    fn stays_open_with_working_legs() {
        assert!(!AllLegsExited.should_close(&[HitTp, Filled]));
        assert!(!AllLegsExited.should_close(&[Pending, Pending]));
        assert!(!AllLegsExited.should_close(&[HitTp, HitTp, Pending]));
    }

    #[test]
    fn empty_group_never_closes() {
        assert!(!AllLegsExited.should_close(&[]));
    }
}
