//! Training weights and polarity for every `SignalType`.
//!
//! Tier 1 (Explicit):        1.0 — direct user intent
//! Tier 2 (Strong Implicit): 0.7 — strong behavioral cues
//! Tier 3 (Weak Implicit):   0.3 — ambient interaction signals
//! Tier 4 (Passive):         0.1 — system-observed events

use crate::models::SignalType;

const DEFAULT_WEIGHT: f64 = 0.1;

/// Training weight for a signal type. Types outside the fixed taxonomy
/// (including `SignalType::Unknown`) fall back to the tier-4 default.
pub fn training_weight(signal_type: SignalType) -> f64 {
    use SignalType::*;
    match signal_type {
        SlotConfirmed | SlotRejected | PreTripSlotSwap | PreTripSlotRemoved => 1.0,
        SlotLocked | PreTripSlotAdded | PreTripReorder | DiscoverShortlist => 0.7,
        CardViewed | CardDismissed | SlotMoved | DiscoverSwipeRight | DiscoverSwipeLeft => 0.3,
        CardImpression | PivotAccepted | PivotRejected => 0.1,
        DwellTime | Unknown => DEFAULT_WEIGHT,
    }
}

/// True when the signal indicates user preference / approval.
pub fn is_positive_signal(signal_type: SignalType) -> bool {
    use SignalType::*;
    matches!(
        signal_type,
        SlotConfirmed | SlotLocked | PreTripSlotAdded | DiscoverShortlist | DiscoverSwipeRight | PivotAccepted
    )
}

/// True when the signal indicates user rejection / disinterest.
pub fn is_negative_signal(signal_type: SignalType) -> bool {
    use SignalType::*;
    matches!(
        signal_type,
        SlotRejected | PreTripSlotRemoved | DiscoverSwipeLeft | PivotRejected | CardDismissed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_1_signals_weight_one() {
        assert_eq!(training_weight(SignalType::SlotConfirmed), 1.0);
        assert_eq!(training_weight(SignalType::PreTripSlotRemoved), 1.0);
    }

    #[test]
    fn unknown_defaults_to_tier_4() {
        assert_eq!(training_weight(SignalType::Unknown), 0.1);
        assert_eq!(training_weight(SignalType::DwellTime), 0.1);
    }

    #[test]
    fn polarity_is_mutually_exclusive() {
        for signal in [
            SignalType::SlotConfirmed,
            SignalType::SlotRejected,
            SignalType::CardImpression,
        ] {
            assert!(!(is_positive_signal(signal) && is_negative_signal(signal)));
        }
    }

    #[test]
    fn swipe_right_is_positive_swipe_left_is_negative() {
        assert!(is_positive_signal(SignalType::DiscoverSwipeRight));
        assert!(is_negative_signal(SignalType::DiscoverSwipeLeft));
    }
}
