use crate::config::StopConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StopReason {
    MaxEntries(u32),
    ProfitTarget(f64),
    LossLimit(f64),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxEntries(n) => write!(f, "maximum number of entries reached ({n})"),
            StopReason::ProfitTarget(p) => write!(f, "stop win reached (profit {p:.2})"),
            StopReason::LossLimit(p) => write!(f, "stop loss reached (result {p:.2})"),
        }
    }
}

/// Evaluated after every resolved entry, never in the middle of a martingale sequence.
/// Pure: unchanged inputs always give the same answer.
pub fn evaluate(stop: &StopConfig, max_entries: u32, entries: u32, profit: f64) -> Option<StopReason> {
    if !stop.by_profit {
        return (entries >= max_entries).then_some(StopReason::MaxEntries(entries));
    }
    if stop.profit_target > 0.0 && profit >= stop.profit_target {
        return Some(StopReason::ProfitTarget(profit));
    }
    if stop.loss_target > 0.0 && profit < 0.0 && profit.abs() >= stop.loss_target {
        return Some(StopReason::LossLimit(profit));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn by_profit(profit_target: f64, loss_target: f64) -> StopConfig {
        StopConfig { by_profit: true, profit_target, loss_target }
    }

    #[test]
    fn entry_count_mode() {
        let cfg = StopConfig::default();
        assert_eq!(evaluate(&cfg, 3, 2, 500.0), None);
        assert_eq!(evaluate(&cfg, 3, 3, -500.0), Some(StopReason::MaxEntries(3)));
    }

    #[test]
    fn profit_mode_ignores_entry_count() {
        let cfg = by_profit(50.0, 30.0);
        assert_eq!(evaluate(&cfg, 1, 99, 10.0), None);
        assert_eq!(evaluate(&cfg, 1, 99, 50.0), Some(StopReason::ProfitTarget(50.0)));
        assert_eq!(evaluate(&cfg, 1, 99, -30.0), Some(StopReason::LossLimit(-30.0)));
        assert_eq!(evaluate(&cfg, 1, 99, -29.9), None);
    }

    #[test]
    fn zero_targets_are_disabled() {
        let cfg = by_profit(0.0, 0.0);
        assert_eq!(evaluate(&cfg, 1, 99, 1_000.0), None);
        assert_eq!(evaluate(&cfg, 1, 99, -1_000.0), None);
    }

    #[test]
    fn loss_target_needs_negative_result() {
        // |+40| ≥ 30 must not trip the loss limit
        let cfg = by_profit(0.0, 30.0);
        assert_eq!(evaluate(&cfg, 1, 99, 40.0), None);
    }

    proptest! {
        #[test]
        fn evaluation_does_not_flap(
            by_profit in any::<bool>(),
            profit_target in 0.0f64..100.0,
            loss_target in 0.0f64..100.0,
            max_entries in 0u32..20,
            entries in 0u32..40,
            profit in -200.0f64..200.0,
        ) {
            let cfg = StopConfig { by_profit, profit_target, loss_target };
            let first = evaluate(&cfg, max_entries, entries, profit);
            for _ in 0..3 {
                prop_assert_eq!(evaluate(&cfg, max_entries, entries, profit), first);
            }
        }
    }
}
