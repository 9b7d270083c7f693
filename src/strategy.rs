use crate::candles::Classifier;
use crate::config::{DirectionMode, RunConfig, StrategyKind};
use crate::types::{Candle, Direction, SignalDecision, TradeDirection};

/// Pattern strategy evaluated once per cycle over a window of closed candles.
///
/// Implementations are pure: the same window always yields the same decision, and
/// any ambiguity (doji in the window, tied colour count) yields `None`.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Closed candles the strategy needs, most recent last.
    fn window_len(&self) -> usize;

    /// Candles of the new cycle that must close before evaluation. The entry is
    /// placed on the candle right after them.
    fn entry_offset_candles(&self) -> u32 {
        0
    }

    fn evaluate(&self, window: &[Candle]) -> Option<SignalDecision>;
}

/// Bets on the minority colour of the last three candles of a five-candle quadrant.
pub struct MhiMinority {
    classifier: Classifier,
}

impl MhiMinority {
    pub const WINDOW: usize = 5;
    pub const VOTERS: usize = 3;

    pub fn new(classifier: Classifier) -> Self {
        MhiMinority { classifier }
    }
}

impl Strategy for MhiMinority {
    fn name(&self) -> &'static str {
        "MHI minority"
    }

    fn window_len(&self) -> usize {
        Self::WINDOW
    }

    fn evaluate(&self, window: &[Candle]) -> Option<SignalDecision> {
        if window.len() < Self::VOTERS {
            return None;
        }
        let voters = &window[window.len() - Self::VOTERS..];
        let mut bullish = 0;
        let mut bearish = 0;
        for candle in voters {
            match self.classifier.classify(candle) {
                Direction::Bullish => bullish += 1,
                Direction::Bearish => bearish += 1,
                Direction::Neutral => return None,
            }
        }
        match bullish.cmp(&bearish) {
            std::cmp::Ordering::Greater => Some(SignalDecision::new(TradeDirection::Put)),
            std::cmp::Ordering::Less => Some(SignalDecision::new(TradeDirection::Call)),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Reads the first candle of the quadrant and enters on the second one, either with
/// or against the first candle's colour.
pub struct PowerBoss {
    classifier: Classifier,
    mode: DirectionMode,
}

impl PowerBoss {
    pub fn new(classifier: Classifier, mode: DirectionMode) -> Self {
        PowerBoss { classifier, mode }
    }
}

impl Strategy for PowerBoss {
    fn name(&self) -> &'static str {
        match self.mode {
            DirectionMode::Favor => "Power Boss (favor)",
            DirectionMode::Contra => "Power Boss (contra)",
        }
    }

    fn window_len(&self) -> usize {
        1
    }

    fn entry_offset_candles(&self) -> u32 {
        1
    }

    fn evaluate(&self, window: &[Candle]) -> Option<SignalDecision> {
        let first = window.first()?;
        let direction = TradeDirection::following(self.classifier.classify(first))?;
        Some(SignalDecision::new(match self.mode {
            DirectionMode::Favor => direction,
            DirectionMode::Contra => direction.opposite(),
        }))
    }
}

/// Veto for abnormally long trend runs.
pub struct StreakVeto {
    classifier: Classifier,
    threshold: usize,
}

impl StreakVeto {
    pub fn new(classifier: Classifier, threshold: usize) -> Self {
        StreakVeto { classifier, threshold }
    }

    /// `Some(streak)` when the trailing run reaches the threshold.
    pub fn blocks(&self, candles: &[Candle]) -> Option<usize> {
        let streak = self.classifier.trailing_streak(candles);
        (streak >= self.threshold).then_some(streak)
    }
}

pub fn build_strategy(cfg: &RunConfig) -> Box<dyn Strategy> {
    let classifier = Classifier::from_sensitivity(cfg.doji_sensitivity());
    match cfg.strategy {
        StrategyKind::MhiMinority => Box::new(MhiMinority::new(classifier)),
        StrategyKind::PowerBoss => Box::new(PowerBoss::new(classifier, cfg.direction_mode)),
    }
}
