use std::path::Path;

use crate::types::{Candle, Direction};

/// Classifies candles by colour, optionally treating small-bodied candles as doji.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Classifier {
    /// Minimum body/range ratio, in percent, for a candle to count as directional.
    doji_sensitivity: Option<f64>,
}

impl Classifier {
    /// Plain colour classification: only `close == open` is neutral.
    pub fn plain() -> Self {
        Classifier { doji_sensitivity: None }
    }

    pub fn with_doji_filter(sensitivity_percent: f64) -> Self {
        Classifier { doji_sensitivity: Some(sensitivity_percent) }
    }

    pub fn from_sensitivity(sensitivity: Option<f64>) -> Self {
        Classifier { doji_sensitivity: sensitivity }
    }

    pub fn classify(&self, candle: &Candle) -> Direction {
        if let Some(sensitivity) = self.doji_sensitivity {
            let range = candle.range();
            if range == 0.0 || candle.body() / range * 100.0 < sensitivity {
                return Direction::Neutral;
            }
        }
        if candle.close > candle.open {
            Direction::Bullish
        } else if candle.close < candle.open {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }

    /// Length of the run of same-coloured candles ending at the most recent one.
    /// Neutral candles inside the run are skipped rather than breaking it.
    pub fn trailing_streak(&self, candles: &[Candle]) -> usize {
        let mut run: Option<Direction> = None;
        let mut count = 0;
        for candle in candles.iter().rev() {
            let direction = self.classify(candle);
            if direction == Direction::Neutral {
                continue;
            }
            match run {
                None => {
                    run = Some(direction);
                    count = 1;
                }
                Some(d) if d == direction => count += 1,
                Some(_) => break,
            }
        }
        count
    }

    /// Longest same-colour run anywhere in the series.
    pub fn longest_streak(&self, candles: &[Candle]) -> usize {
        let mut best = 0;
        let mut count = 0;
        let mut last: Option<Direction> = None;
        for candle in candles {
            let direction = self.classify(candle);
            if direction == Direction::Neutral {
                continue;
            }
            if last == Some(direction) {
                count += 1;
            } else {
                last = Some(direction);
                count = 1;
            }
            best = best.max(count);
        }
        best
    }
}

/// Sorts by timestamp and drops duplicates, keeping the latest copy of each bar.
/// Gateways are not trusted to return candles in order.
pub fn normalize(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => *last = candle,
            _ => out.push(candle),
        }
    }
    out
}

/// Drops bars still forming at `now_ts`.
pub fn closed_only(candles: Vec<Candle>, now_ts: i64, candle_seconds: u32) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| c.timestamp + candle_seconds as i64 <= now_ts)
        .collect()
}

/// Last `n` elements (or all of them when fewer are available).
pub fn tail(candles: &[Candle], n: usize) -> &[Candle] {
    &candles[candles.len().saturating_sub(n)..]
}

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("cannot open {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("bad CSV row in {path}: {source}")]
    Csv { path: String, source: csv::Error },
    #[error("{path} contains no candles")]
    Empty { path: String },
    #[error("{path}: candle at {timestamp} has high/low outside open/close")]
    Malformed { path: String, timestamp: i64 },
}

/// Loads `timestamp,open,high,low,close[,volume]` rows (header required).
pub fn load_csv(path: &Path) -> Result<Vec<Candle>, DataError> {
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|source| DataError::Io { path: display.clone(), source })?;
    let mut reader = csv::Reader::from_reader(file);
    let mut out = Vec::new();
    for row in reader.deserialize::<Candle>() {
        let candle = row.map_err(|source| DataError::Csv { path: display.clone(), source })?;
        if candle.high < candle.open.max(candle.close) || candle.low > candle.open.min(candle.close) {
            return Err(DataError::Malformed { path: display, timestamp: candle.timestamp });
        }
        out.push(candle);
    }
    if out.is_empty() {
        return Err(DataError::Empty { path: display });
    }
    Ok(normalize(out))
}
