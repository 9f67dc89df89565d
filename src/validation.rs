//! Input validation for inbound trading signals
//!
//! Signals arrive from external senders and are validated before
//! admission; a signal that fails here is rejected outright and no
//! state is mutated.

use crate::domain::TradeSignal;
use crate::error::{GridError, Result};
use crate::market::PrecisionRules;
use rust_decimal::Decimal;

/// Validate a normalized signal before admission
pub fn validate_signal(signal: &TradeSignal) -> Result<()> {
    if signal.owner.trim().is_empty() {
        return Err(GridError::Validation("owner must not be empty".to_string()));
    }

    if signal.pair.trim().is_empty() {
        return Err(GridError::Validation("pair must not be empty".to_string()));
    }

    if signal.timeframe.trim().is_empty() {
        return Err(GridError::Validation(
            "timeframe must not be empty".to_string(),
        ));
    }

    if signal.entry_price <= Decimal::ZERO {
        return Err(GridError::Validation(format!(
            "entry_price must be positive: {}",
            signal.entry_price
        )));
    }

    Ok(())
}

/// Check that a value carries no more decimal places than allowed.
/// Trailing zeros are not significant: 1.230 passes a 2-decimal rule.
pub fn validate_precision(value: Decimal, max_decimal_places: u32) -> bool {
    value.normalize().scale() <= max_decimal_places
}

/// Validate a signal's entry price against the pair's precision rules
pub fn validate_signal_precision(signal: &TradeSignal, rules: &PrecisionRules) -> Result<()> {
    if !validate_precision(signal.entry_price, rules.price_precision) {
        return Err(GridError::Validation(format!(
            "entry_price {} exceeds {} decimal places allowed for {}",
            signal.entry_price, rules.price_precision, signal.pair
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn precision_rule_of_two_decimals() {
        // 1.234 against a 2-decimal-place rule is rejected; 1.23 is accepted
        assert!(!validate_precision(dec!(1.234), 2));
        assert!(validate_precision(dec!(1.23), 2));
        assert!(validate_precision(dec!(1.2), 2));
        assert!(validate_precision(dec!(1), 2));
    }

    #[test]
    fn trailing_zeros_are_not_significant() {
        assert!(validate_precision(dec!(1.230), 2));
        assert!(validate_precision(dec!(100.00), 0));
    }

    #[test]
    fn rejects_malformed_signal() {
        let mut signal = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000));
        assert!(validate_signal(&signal).is_ok());

        signal.pair = " ".to_string();
        assert!(validate_signal(&signal).is_err());

        let zero_price = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(0));
        assert!(validate_signal(&zero_price).is_err());
    }

    #[test]
    fn signal_precision_check() {
        let rules = PrecisionRules {
            price_precision: 2,
            amount_precision: 4,
        };

        let ok = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000.12));
        assert!(validate_signal_precision(&ok, &rules).is_ok());

        let too_fine = TradeSignal::new("alice", "BTCUSDT", "1h", dec!(50000.123));
        assert!(matches!(
            validate_signal_precision(&too_fine, &rules),
            Err(GridError::Validation(_))
        ));
    }
}
