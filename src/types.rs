use serde::{Deserialize, Serialize};

/// One price bar. `timestamp` is the bar's open time in Unix seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Colour of a single candle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

/// Side of a binary option. `Call` bets on a bullish close, `Put` on a bearish one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Call,
    Put,
}

impl TradeDirection {
    /// `None` for a neutral candle.
    pub fn following(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Bullish => Some(TradeDirection::Call),
            Direction::Bearish => Some(TradeDirection::Put),
            Direction::Neutral => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            TradeDirection::Call => TradeDirection::Put,
            TradeDirection::Put => TradeDirection::Call,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeDirection::Call => "call",
            TradeDirection::Put => "put",
        }
    }

    /// Whether a candle of the given colour settles this side in the money.
    pub fn wins_on(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (TradeDirection::Call, Direction::Bullish) | (TradeDirection::Put, Direction::Bearish)
        )
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TradeDirection::Call => "CALL",
            TradeDirection::Put => "PUT",
        })
    }
}

/// Result of a pattern evaluation. Strategies return `None` when the window is inconclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignalDecision {
    pub direction: TradeDirection,
    /// Skip the ADX and streak vetoes (set for externally sourced signals).
    pub confidence_bypass: bool,
}

impl SignalDecision {
    pub fn new(direction: TradeDirection) -> Self {
        SignalDecision { direction, confidence_bypass: false }
    }

    pub fn bypassing_filters(direction: TradeDirection) -> Self {
        SignalDecision { direction, confidence_bypass: true }
    }
}

/// Broker-side state of a placed order, normalised at the gateway boundary.
/// Profit is signed: positive on a win, negative (the lost stake) on a loss.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OrderStatus {
    Pending,
    Win(f64),
    Loss(f64),
    Tie,
}

/// Counters for one run. Reset at run start, never persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunStats {
    pub ops: u32,
    pub wins: u32,
    pub losses: u32,
}

impl RunStats {
    pub fn win_rate(&self) -> f64 {
        if self.ops > 0 {
            self.wins as f64 / self.ops as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ops: self.ops,
            wins: self.wins,
            losses: self.losses,
            win_rate_percent: self.win_rate() * 100.0,
        }
    }
}

/// Copy of the counters handed to observers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub ops: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate_percent: f64,
}

/// Severity of a user-facing log line. Carries the colour palette the desktop robots used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Info,
    Signal,
    Win,
    Notice,
    Warning,
    Loss,
    Error,
}

impl Tone {
    pub fn color(self) -> &'static str {
        match self {
            Tone::Info => "#FFD700",
            Tone::Signal => "#00FFFF",
            Tone::Win => "#2DC937",
            Tone::Notice => "#00BFFF",
            Tone::Warning => "#FFA500",
            Tone::Loss => "#FF8000",
            Tone::Error => "#FF4040",
        }
    }

    pub fn log_level(self) -> log::Level {
        match self {
            Tone::Info | Tone::Signal | Tone::Win | Tone::Notice => log::Level::Info,
            Tone::Warning | Tone::Loss => log::Level::Warn,
            Tone::Error => log::Level::Error,
        }
    }
}
