use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::stop_conditions::StopReason;
use crate::types::{StatsSnapshot, Tone};

/// Why the run loop ended.
#[derive(Clone, Debug, PartialEq)]
pub enum FinishReason {
    Stopped(StopReason),
    Cancelled,
    Disconnected(String),
    NoAssets,
    /// The external signal channel was closed by its sender.
    FeedClosed,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stopped(reason) => write!(f, "{reason}"),
            FinishReason::Cancelled => f.write_str("stopped by user"),
            FinishReason::Disconnected(msg) => write!(f, "connection lost ({msg})"),
            FinishReason::NoAssets => f.write_str("no assets configured"),
            FinishReason::FeedClosed => f.write_str("signal feed closed"),
        }
    }
}

/// Host-side callbacks. Every call receives copies; nothing hands out live engine state.
/// Implementations must not block.
pub trait RunObserver: Send + Sync {
    fn on_log(&self, at: DateTime<FixedOffset>, message: &str, tone: Tone);

    fn on_stats(&self, _stats: &StatsSnapshot) {}

    fn on_profit(&self, _profit: f64) {}

    fn on_finished(&self, _reason: &FinishReason) {}
}

/// Routes run messages to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_log(&self, at: DateTime<FixedOffset>, message: &str, tone: Tone) {
        log::log!(tone.log_level(), "[{}] {}", at.format("%H:%M:%S"), message);
    }

    fn on_stats(&self, stats: &StatsSnapshot) {
        log::debug!(
            "ops={} wins={} losses={} win rate={:.1}%",
            stats.ops,
            stats.wins,
            stats.losses,
            stats.win_rate_percent
        );
    }

    fn on_profit(&self, profit: f64) {
        log::info!("Accumulated profit: {:+.2}", profit);
    }

    fn on_finished(&self, reason: &FinishReason) {
        log::info!("Run finished: {}", reason);
    }
}

/// Broadcasts to several observers in order.
#[derive(Clone, Default)]
pub struct Fanout {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl Fanout {
    pub fn new() -> Self {
        Fanout::default()
    }

    pub fn with(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl RunObserver for Fanout {
    fn on_log(&self, at: DateTime<FixedOffset>, message: &str, tone: Tone) {
        for o in &self.observers {
            o.on_log(at, message, tone);
        }
    }

    fn on_stats(&self, stats: &StatsSnapshot) {
        for o in &self.observers {
            o.on_stats(stats);
        }
    }

    fn on_profit(&self, profit: f64) {
        for o in &self.observers {
            o.on_profit(profit);
        }
    }

    fn on_finished(&self, reason: &FinishReason) {
        for o in &self.observers {
            o.on_finished(reason);
        }
    }
}
