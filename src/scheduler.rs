use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, Timelike};

use crate::config::{CycleGranularity, QUADRANT_MINUTES};

/// Identity of one evaluation cycle: its granularity and its start in Unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CycleKey {
    pub granularity: CycleGranularity,
    pub start: i64,
}

impl CycleGranularity {
    pub fn period_secs(self) -> i64 {
        match self {
            CycleGranularity::Quadrant => QUADRANT_MINUTES as i64 * 60,
            CycleGranularity::Minute => 60,
        }
    }

    /// Start of the cycle containing `now`, aligned on the wall clock of `now`'s offset.
    pub fn cycle_start(self, now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let into_cycle = match self {
            CycleGranularity::Quadrant => (now.minute() % QUADRANT_MINUTES) as i64 * 60,
            CycleGranularity::Minute => 0,
        } + now.second() as i64;
        let floored = now.with_nanosecond(0).unwrap_or(*now);
        floored - Duration::seconds(into_cycle)
    }

    pub fn key_at(self, now: &DateTime<FixedOffset>) -> CycleKey {
        CycleKey { granularity: self, start: self.cycle_start(now).timestamp() }
    }
}

/// Decides when a cycle fires and guarantees at most one evaluation per asset per cycle.
pub struct CycleScheduler {
    granularity: CycleGranularity,
    window_secs: u32,
    last_fired: Option<CycleKey>,
    evaluated: HashMap<String, CycleKey>,
}

impl CycleScheduler {
    pub fn new(granularity: CycleGranularity, window_secs: u32) -> Self {
        CycleScheduler { granularity, window_secs, last_fired: None, evaluated: HashMap::new() }
    }

    /// Whether `now` lies inside the entry window right after a cycle boundary.
    pub fn in_entry_window(&self, now: &DateTime<FixedOffset>) -> bool {
        let on_boundary = match self.granularity {
            CycleGranularity::Quadrant => now.minute() % QUADRANT_MINUTES == 0,
            CycleGranularity::Minute => true,
        };
        on_boundary && now.second() < self.window_secs
    }

    /// Returns the cycle key the first time `now` falls into a new entry window, and
    /// `None` for every later poll of the same window.
    pub fn poll(&mut self, now: &DateTime<FixedOffset>) -> Option<CycleKey> {
        if !self.in_entry_window(now) {
            return None;
        }
        let key = self.granularity.key_at(now);
        if self.last_fired == Some(key) {
            return None;
        }
        self.last_fired = Some(key);
        Some(key)
    }

    /// Marks `asset` as evaluated for `key`. `false` if it already was.
    pub fn claim(&mut self, asset: &str, key: CycleKey) -> bool {
        if self.evaluated.get(asset) == Some(&key) {
            return false;
        }
        self.evaluated.insert(asset.to_string(), key);
        true
    }

    /// Next boundary strictly after `now`.
    pub fn next_boundary(&self, now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        self.granularity.cycle_start(now) + Duration::seconds(self.granularity.period_secs())
    }
}
