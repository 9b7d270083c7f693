use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ─── Indicator / filter defaults ──────────────────────────────────────────────
pub const ADX_PERIOD: usize = 14;
pub const ADX_THRESHOLD: f64 = 21.0; // veto at or above
pub const ADX_EPSILON: f64 = 1e-10;
pub const DOJI_SENSITIVITY_PCT: f64 = 5.0;
pub const STREAK_THRESHOLD: usize = 5;
pub const STREAK_LOOKBACK: usize = 10;

// ─── Timing ───────────────────────────────────────────────────────────────────
pub const CANDLE_SECONDS: u32 = 60;
pub const QUADRANT_MINUTES: u32 = 5;
pub const SETTLE_TIMEOUT_SECS: u64 = 120;
pub const SETTLE_POLL_MS: u64 = 200;
pub const LOOP_POLL_MS: u64 = 500;
pub const ENTRY_WINDOW_SECS: u32 = 2;

// TELEGRAM_TOKEN and TELEGRAM_CHAT_ID are read from the environment (see telegram.rs)

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Minority colour of the last three candles of the previous quadrant.
    #[default]
    MhiMinority,
    /// First candle of the quadrant decides the entry on the second one.
    PowerBoss,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMode {
    /// Trade in the colour of the reference candle ("a favor").
    #[default]
    Favor,
    /// Trade against it ("contra").
    Contra,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleGranularity {
    /// Fires on minutes 0, 5, 10, …
    #[default]
    Quadrant,
    /// Fires every minute.
    Minute,
}

/// Which element of the ADX recursion is compared against the threshold.
///
/// The engine computes ADX over the fetched history including the bar still forming.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdxSample {
    /// Last computed value, the forming bar included.
    Latest,
    /// Value of the last closed bar: skips the forming bar, and only that one.
    #[default]
    PreviousBar,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SorosBasis {
    /// next = opening stake + profit × p/100
    #[default]
    Profit,
    /// next = opening stake × (1 + p/100)
    Stake,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdxFilter {
    pub enabled: bool,
    pub period: usize,
    pub threshold: f64,
    pub sample: AdxSample,
}

impl Default for AdxFilter {
    fn default() -> Self {
        AdxFilter { enabled: true, period: ADX_PERIOD, threshold: ADX_THRESHOLD, sample: AdxSample::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DojiFilter {
    pub enabled: bool,
    pub sensitivity_percent: f64,
}

impl Default for DojiFilter {
    fn default() -> Self {
        DojiFilter { enabled: false, sensitivity_percent: DOJI_SENSITIVITY_PCT }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreakFilter {
    pub enabled: bool,
    pub threshold: usize,
    pub lookback: usize,
}

impl Default for StreakFilter {
    fn default() -> Self {
        StreakFilter { enabled: false, threshold: STREAK_THRESHOLD, lookback: STREAK_LOOKBACK }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Stop on profit/loss targets instead of the entry count.
    pub by_profit: bool,
    pub profit_target: f64,
    pub loss_target: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub stake: f64,
    pub martingale_enabled: bool,
    pub martingale_levels: u32,
    pub soros_percent: f64,
    pub soros_basis: SorosBasis,
    pub soros_on_martingale_win: bool,
    /// Own evaluations an asset sits out after the broker rejects an order.
    pub suspension_cycles: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig {
            stake: 2.0,
            martingale_enabled: true,
            martingale_levels: 1,
            soros_percent: 0.0,
            soros_basis: SorosBasis::default(),
            soros_on_martingale_win: false,
            suspension_cycles: 1,
        }
    }
}

impl SizingConfig {
    /// Martingale cap actually applied (0 when martingale is off).
    pub fn max_level(&self) -> u32 {
        if self.martingale_enabled { self.martingale_levels } else { 0 }
    }

    pub fn soros_enabled(&self) -> bool {
        self.soros_percent > 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub granularity: CycleGranularity,
    pub candle_seconds: u32,
    pub entry_window_secs: u32,
    pub poll_interval_ms: u64,
    pub settle_poll_ms: u64,
    pub settle_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            granularity: CycleGranularity::default(),
            candle_seconds: CANDLE_SECONDS,
            entry_window_secs: ENTRY_WINDOW_SECS,
            poll_interval_ms: LOOP_POLL_MS,
            settle_poll_ms: SETTLE_POLL_MS,
            settle_timeout_secs: SETTLE_TIMEOUT_SECS,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_poll(&self) -> Duration {
        Duration::from_millis(self.settle_poll_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }
}

/// Snapshot of everything a run needs. Captured once at start and never mutated.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub assets: Vec<String>,
    pub strategy: StrategyKind,
    pub direction_mode: DirectionMode,
    pub expiry_minutes: u32,
    pub max_entries: u32,
    pub sizing: SizingConfig,
    pub adx: AdxFilter,
    pub doji: DojiFilter,
    pub streak: StreakFilter,
    pub stop: StopConfig,
    pub timing: TimingConfig,
    /// Log a historical catalog of every asset before the first cycle.
    pub catalog_on_start: bool,
    pub catalog_minutes: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            assets: Vec::new(),
            strategy: StrategyKind::default(),
            direction_mode: DirectionMode::default(),
            expiry_minutes: 1,
            max_entries: 10,
            sizing: SizingConfig::default(),
            adx: AdxFilter::default(),
            doji: DojiFilter::default(),
            streak: StreakFilter::default(),
            stop: StopConfig::default(),
            timing: TimingConfig::default(),
            catalog_on_start: false,
            catalog_minutes: 60,
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: RunConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.sizing.stake.is_nan() || self.sizing.stake <= 0.0 {
            return invalid("stake must be positive");
        }
        if self.expiry_minutes == 0 {
            return invalid("expiry_minutes must be at least 1");
        }
        if self.sizing.soros_percent < 0.0 {
            return invalid("soros_percent cannot be negative");
        }
        if self.adx.period < 2 {
            return invalid("adx.period must be at least 2");
        }
        if !(0.0..=100.0).contains(&self.doji.sensitivity_percent) {
            return invalid("doji.sensitivity_percent must be within 0..=100");
        }
        if self.streak.enabled && (self.streak.threshold == 0 || self.streak.lookback < self.streak.threshold) {
            return invalid("streak.lookback must cover streak.threshold (> 0)");
        }
        if self.stop.profit_target < 0.0 || self.stop.loss_target < 0.0 {
            return invalid("stop targets cannot be negative");
        }
        if self.timing.candle_seconds == 0 || self.timing.poll_interval_ms == 0 {
            return invalid("candle_seconds and poll_interval_ms must be positive");
        }
        if self.timing.entry_window_secs == 0 || self.timing.entry_window_secs >= 60 {
            return invalid("entry_window_secs must be within 1..60");
        }
        Ok(())
    }

    /// Threshold applied by the doji-aware classifier, if enabled.
    pub fn doji_sensitivity(&self) -> Option<f64> {
        self.doji.enabled.then_some(self.doji.sensitivity_percent)
    }
}
