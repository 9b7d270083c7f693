use serde::Serialize;

use crate::candles::Classifier;
use crate::config::{AdxSample, QUADRANT_MINUTES};
use crate::indicators;
use crate::strategy::Strategy;
use crate::types::{Candle, Direction};

/// Historical hit rate of a strategy over quadrant-aligned cycles.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CatalogReport {
    /// `wins_per_level[k]` counts cycles won on martingale level `k`.
    pub wins_per_level: Vec<u32>,
    pub losses: u32,
    pub total: u32,
    pub assertiveness: f64,
    /// Longest same-colour run in the history.
    pub max_streak: usize,
    /// ADX of the most recent bar, when the history is long enough.
    pub adx: Option<f64>,
}

impl CatalogReport {
    pub fn wins(&self) -> u32 {
        self.wins_per_level.iter().sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RepetitionIndex {
    pub repeats: u32,
    pub total: u32,
    pub percent: f64,
}

fn contiguous(candles: &[Candle], candle_seconds: u32) -> bool {
    candles.windows(2).all(|w| w[1].timestamp - w[0].timestamp == candle_seconds as i64)
}

/// Replays `strategy` on every quadrant in `candles` (bars of `candle_seconds`, ascending).
///
/// The window ends `entry_offset_candles` into the quadrant; the entry is the next
/// candle and each martingale level moves one candle further. A doji entry candle
/// ends the cycle as a loss. `None` when no cycle produced a signal.
pub fn catalog(
    candles: &[Candle],
    strategy: &dyn Strategy,
    martingale_levels: u32,
    classifier: &Classifier,
    adx_period: usize,
    candle_seconds: u32,
) -> Option<CatalogReport> {
    let quadrant = QUADRANT_MINUTES as i64 * 60;
    let offset = strategy.entry_offset_candles() as usize;
    let window_len = strategy.window_len();
    let levels = martingale_levels as usize;
    let settle = Classifier::plain();

    let mut wins_per_level = vec![0u32; levels + 1];
    let mut losses = 0u32;
    let mut total = 0u32;

    for (q, start) in candles.iter().enumerate() {
        if start.timestamp.rem_euclid(quadrant) != 0 {
            continue;
        }
        let window_end = q + offset;
        let last_entry = window_end + levels;
        if window_end < window_len || last_entry >= candles.len() {
            continue;
        }
        if !contiguous(&candles[window_end - window_len..=last_entry], candle_seconds) {
            continue;
        }
        let Some(decision) = strategy.evaluate(&candles[window_end - window_len..window_end]) else {
            continue;
        };

        total += 1;
        let mut won_at = None;
        for mg in 0..=levels {
            let colour = settle.classify(&candles[window_end + mg]);
            if colour == Direction::Neutral {
                break;
            }
            if decision.direction.wins_on(colour) {
                won_at = Some(mg);
                break;
            }
        }
        match won_at {
            Some(mg) => wins_per_level[mg] += 1,
            None => losses += 1,
        }
    }

    if total == 0 {
        return None;
    }
    let wins: u32 = wins_per_level.iter().sum();
    Some(CatalogReport {
        wins_per_level,
        losses,
        total,
        assertiveness: wins as f64 / total as f64 * 100.0,
        max_streak: classifier.longest_streak(candles),
        adx: indicators::adx(candles, adx_period, AdxSample::Latest).map(|r| r.adx),
    })
}

/// Share of five-candle windows whose majority colour repeats on the sixth candle.
/// Windows containing a doji are skipped.
pub fn repetition_index(candles: &[Candle], classifier: &Classifier) -> Option<RepetitionIndex> {
    let mut repeats = 0u32;
    let mut total = 0u32;
    for w in candles.windows(6) {
        let colours: Vec<Direction> = w[..5].iter().map(|c| classifier.classify(c)).collect();
        if colours.contains(&Direction::Neutral) {
            continue;
        }
        let bullish = colours.iter().filter(|d| **d == Direction::Bullish).count();
        let majority = if bullish >= 3 { Direction::Bullish } else { Direction::Bearish };
        if classifier.classify(&w[5]) == majority {
            repeats += 1;
        }
        total += 1;
    }
    (total > 0).then(|| RepetitionIndex { repeats, total, percent: repeats as f64 / total as f64 * 100.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::tests::{bear, bull, candle};
    use crate::config::DirectionMode;
    use crate::strategy::{MhiMinority, PowerBoss};

    /// Builds one-minute candles from a colour string: `u` bull, `d` bear, `-` doji.
    fn series(pattern: &str) -> Vec<Candle> {
        series_every(pattern, 60)
    }

    fn series_every(pattern: &str, step: i64) -> Vec<Candle> {
        pattern
            .chars()
            .enumerate()
            .map(|(i, ch)| {
                let ts = i as i64 * step;
                match ch {
                    'u' => bull(ts),
                    'd' => bear(ts),
                    _ => candle(ts, 1.0, 1.0),
                }
            })
            .collect()
    }

    fn mhi() -> MhiMinority {
        MhiMinority::new(Classifier::plain())
    }

    #[test]
    fn mhi_wins_on_first_entry() {
        // window uudud → call; candle 5 is bull
        let candles = series("uududuuuuu");
        let r = catalog(&candles, &mhi(), 1, &Classifier::plain(), 14, 60).unwrap();
        assert_eq!(r.total, 1);
        assert_eq!(r.wins_per_level, vec![1, 0]);
        assert_eq!(r.assertiveness, 100.0);
        assert_eq!(r.adx, None);
    }

    #[test]
    fn mhi_gale_win_and_loss() {
        let candles = series(&["uudud", "duuuu", "ddudd", "dd-uu", "u"].concat());
        let r = catalog(&candles, &mhi(), 1, &Classifier::plain(), 14, 60).unwrap();
        // q=5 window uudud call: d then u → level 1
        // q=10 window duuuu → three bulls → put: d → level 0
        // q=15 window ddudd call: d, d → loss
        // q=20 window dd-uu → voters -uu abstain
        assert_eq!(r.total, 3);
        assert_eq!(r.wins_per_level, vec![1, 1]);
        assert_eq!(r.losses, 1);
        assert_eq!(r.wins(), 2);
    }

    #[test]
    fn power_boss_enters_on_second_candle() {
        let favor = PowerBoss::new(Classifier::plain(), DirectionMode::Favor);
        let contra = PowerBoss::new(Classifier::plain(), DirectionMode::Contra);
        // quadrant starts at candle 0: first u, entry u
        let candles = series("uuddd");
        let r = catalog(&candles, &favor, 1, &Classifier::plain(), 14, 60).unwrap();
        assert_eq!(r.wins_per_level, vec![1, 0]);
        let r = catalog(&candles, &contra, 1, &Classifier::plain(), 14, 60).unwrap();
        // contra → put: u loses, gale d wins
        assert_eq!(r.wins_per_level, vec![0, 1]);
    }

    #[test]
    fn doji_entry_counts_as_loss() {
        let candles = series(&["uudud", "-uuuu"].concat());
        let r = catalog(&candles, &mhi(), 1, &Classifier::plain(), 14, 60).unwrap();
        assert_eq!(r.losses, 1);
        assert_eq!(r.assertiveness, 0.0);
    }

    #[test]
    fn gaps_and_short_history_yield_nothing() {
        let mut candles = series("uududuuuuu");
        candles[6].timestamp += 30;
        assert!(catalog(&candles, &mhi(), 1, &Classifier::plain(), 14, 60).is_none());
        assert!(catalog(&series("uud"), &mhi(), 0, &Classifier::plain(), 14, 60).is_none());
    }

    #[test]
    fn two_minute_candles_are_contiguous() {
        // quadrants start at 0, 600 and 1200 seconds: only the one at 600 has a full window
        let candles = series_every("uududuuuuu", 120);
        let r = catalog(&candles, &mhi(), 1, &Classifier::plain(), 14, 120).unwrap();
        assert_eq!(r.total, 1);
        assert_eq!(r.wins_per_level, vec![1, 0]);
        assert!(catalog(&candles, &mhi(), 1, &Classifier::plain(), 14, 60).is_none());
    }

    #[test]
    fn repetition_counts_majority_repeats() {
        // window uuddu has a bullish majority; the sixth candle is bearish
        let r = repetition_index(&series("uuddud"), &Classifier::plain()).unwrap();
        assert_eq!((r.repeats, r.total), (0, 1));
        let r = repetition_index(&series("uuuddu"), &Classifier::plain()).unwrap();
        assert_eq!((r.repeats, r.total), (1, 1));
        assert!(repetition_index(&series("uu-ddu"), &Classifier::plain()).is_none());
    }

    #[test]
    fn report_carries_longest_streak() {
        let candles = series(&["uudud", "uuuuu", "u"].concat());
        let r = catalog(&candles, &mhi(), 0, &Classifier::plain(), 14, 60).unwrap();
        assert_eq!(r.max_streak, 6);
    }
}
