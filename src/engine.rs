use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::candles::{self, Classifier};
use crate::catalog;
use crate::clock::Clock;
use crate::config::{CycleGranularity, RunConfig};
use crate::gateway::{with_retry, GatewayError, MarketGateway};
use crate::indicators;
use crate::observer::{FinishReason, RunObserver};
use crate::position_manager::{AttemptOutcome, PositionState, Transition};
use crate::scheduler::{CycleKey, CycleScheduler};
use crate::signal_feed::ExternalSignal;
use crate::stop_conditions;
use crate::strategy::{build_strategy, Strategy, StreakVeto};
use crate::types::{Candle, OrderStatus, RunStats, SignalDecision, StatsSnapshot, Tone};

const FETCH_RETRIES: u32 = 2;

/// What a finished run reports back to its host.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    pub profit: f64,
    pub entries: u32,
    pub reason: FinishReason,
}

enum Settlement {
    Settled(OrderStatus),
    TimedOut,
    Cancelled,
    Lost(GatewayError),
}

/// Loop control: `Err` ends the run with the given reason.
type Step = Result<(), FinishReason>;

/// The decision engine: waits for cycle boundaries, evaluates one asset per cycle,
/// runs the martingale sequence through the gateway and stops on the configured limits.
///
/// All run state (positions, counters, profit) is owned here and only leaves the
/// engine as copies pushed to the observer.
pub struct Engine<G: MarketGateway, C: Clock> {
    cfg: RunConfig,
    gateway: G,
    clock: C,
    strategy: Box<dyn Strategy>,
    streak_veto: Option<StreakVeto>,
    classifier: Classifier,
    scheduler: CycleScheduler,
    positions: HashMap<String, PositionState>,
    entries_per_asset: HashMap<String, u32>,
    stats: RunStats,
    profit: f64,
    entries: u32,
    cursor: usize,
    observer: Arc<dyn RunObserver>,
    token: CancellationToken,
}

impl<G: MarketGateway, C: Clock> Engine<G, C> {
    pub fn new(cfg: RunConfig, gateway: G, clock: C, observer: Arc<dyn RunObserver>, token: CancellationToken) -> Self {
        let classifier = Classifier::from_sensitivity(cfg.doji_sensitivity());
        let streak_veto = cfg.streak.enabled.then(|| StreakVeto::new(classifier, cfg.streak.threshold));
        Engine {
            strategy: build_strategy(&cfg),
            streak_veto,
            classifier,
            scheduler: CycleScheduler::new(cfg.timing.granularity, cfg.timing.entry_window_secs),
            positions: HashMap::new(),
            entries_per_asset: HashMap::new(),
            stats: RunStats::default(),
            profit: 0.0,
            entries: 0,
            cursor: 0,
            cfg,
            gateway,
            clock,
            observer,
            token,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn profit(&self) -> f64 {
        self.profit
    }

    // ── Main loop ────────────────────────────────────────────────────────────

    /// Runs until a stop condition, cancellation or a lost connection.
    pub async fn run(&mut self) -> RunSummary {
        let reason = match self.run_cycles().await {
            Ok(()) => FinishReason::Cancelled,
            Err(reason) => reason,
        };
        self.finish(reason)
    }

    async fn run_cycles(&mut self) -> Step {
        if self.cfg.assets.is_empty() {
            return Err(FinishReason::NoAssets);
        }
        self.announce().await;
        self.check_stop()?;
        if self.cfg.catalog_on_start {
            self.log_catalogs().await?;
        }

        loop {
            if self.token.is_cancelled() {
                return Err(FinishReason::Cancelled);
            }
            let now = self.clock.now();
            if let Some(key) = self.scheduler.poll(&now) {
                self.on_cycle(key).await?;
            }
            self.pause(self.cfg.timing.poll_interval()).await?;
        }
    }

    async fn announce(&mut self) {
        let balance = match self.gateway.balance().await {
            Ok(b) => format!("{b:.2}"),
            Err(e) => {
                log::warn!("Balance unavailable: {}", e);
                "n/a".to_string()
            }
        };
        self.log(
            format!(
                "Started {} on {} | stake {:.2} | expiry {}m | balance {}",
                self.strategy.name(),
                self.cfg.assets.join(", "),
                self.cfg.sizing.stake,
                self.cfg.expiry_minutes,
                balance
            ),
            Tone::Info,
        );
        let next = self.scheduler.next_boundary(&self.now());
        self.log(format!("Next cycle at {}", next.format("%H:%M:%S")), Tone::Info);
    }

    async fn on_cycle(&mut self, key: CycleKey) -> Step {
        let asset = self.cfg.assets[self.cursor % self.cfg.assets.len()].clone();
        self.cursor = (self.cursor + 1) % self.cfg.assets.len();

        // claimed before anything can fail, so a cycle is never evaluated twice
        if !self.scheduler.claim(&asset, key) {
            return Ok(());
        }
        if !self.position(&asset).take_turn() {
            self.log(format!("{asset} suspended, skipping this cycle"), Tone::Notice);
            return Ok(());
        }

        let candle_ms = self.cfg.timing.candle_seconds as i64 * 1000;
        let anchor_ms = key.start * 1000 + self.strategy.entry_offset_candles() as i64 * candle_ms;
        let wait_ms = anchor_ms - self.clock.now().timestamp_millis();
        if wait_ms > 0 {
            self.log(format!("{asset}: waiting for the first candle of the quadrant"), Tone::Info);
            self.pause(Duration::from_millis(wait_ms as u64)).await?;
        }

        let Some(decision) = self.evaluate(&asset, anchor_ms / 1000).await? else {
            return Ok(());
        };
        self.resolve_entry(&asset, decision, self.cfg.expiry_minutes).await?;
        self.check_stop()
    }

    // ── Evaluation ───────────────────────────────────────────────────────────

    /// Closed candles needed for the window and every enabled filter.
    fn history_len(&self) -> usize {
        let mut need = self.strategy.window_len();
        if self.cfg.adx.enabled {
            need = need.max(self.cfg.adx.period * 3);
        }
        if self.cfg.streak.enabled {
            need = need.max(self.cfg.streak.lookback);
        }
        // plus the bar still forming
        need + 1
    }

    /// Sorted, deduplicated candles as the gateway returns them, forming bar included.
    async fn fetch_history(&self, asset: &str, count: usize, now: DateTime<FixedOffset>) -> Result<Vec<Candle>, GatewayError> {
        let granularity = self.cfg.timing.candle_seconds;
        let gateway = &self.gateway;
        let raw = with_retry(&self.clock, move || gateway.candles(asset, granularity, count, now), FETCH_RETRIES).await?;
        log::debug!("[{}] fetched {} candles", asset, raw.len());
        Ok(candles::normalize(raw))
    }

    async fn fetch_closed(&self, asset: &str, count: usize) -> Result<Vec<Candle>, GatewayError> {
        let now = self.clock.now();
        let raw = self.fetch_history(asset, count, now).await?;
        Ok(self.closed(raw, &now))
    }

    fn closed(&self, raw: Vec<Candle>, as_of: &DateTime<FixedOffset>) -> Vec<Candle> {
        candles::closed_only(raw, as_of.timestamp(), self.cfg.timing.candle_seconds)
    }

    /// Runs strategy and filters for `asset`. The window must end right before `anchor`.
    async fn evaluate(&self, asset: &str, anchor: i64) -> Result<Option<SignalDecision>, FinishReason> {
        let as_of = self.clock.now();
        let raw = match self.fetch_history(asset, self.history_len(), as_of).await {
            Ok(c) => c,
            Err(e) if e.is_fatal() => return Err(FinishReason::Disconnected(e.to_string())),
            Err(e) => {
                self.log(format!("{asset}: candles unavailable ({e}), skipping cycle"), Tone::Warning);
                return Ok(None);
            }
        };

        let history = self.closed(raw.clone(), &as_of);
        let forming = raw.len() > history.len();
        let window = candles::tail(&history, self.strategy.window_len());
        let expected_last = anchor - self.cfg.timing.candle_seconds as i64;
        if window.len() < self.strategy.window_len() || window.last().map(|c| c.timestamp) != Some(expected_last) {
            self.log(format!("{asset}: not enough recent candles, skipping cycle"), Tone::Warning);
            return Ok(None);
        }

        let Some(decision) = self.strategy.evaluate(window) else {
            self.log(format!("{asset}: doji or tie in the window, no entry"), Tone::Notice);
            return Ok(None);
        };

        if !decision.confidence_bypass {
            if self.cfg.adx.enabled {
                match indicators::adx_live(&raw, forming, self.cfg.adx.period, self.cfg.adx.sample) {
                    Some(r) if r.adx >= self.cfg.adx.threshold => {
                        self.log(
                            format!("{asset}: ADX {:.1} >= {:.1}, strong trend, no entry", r.adx, self.cfg.adx.threshold),
                            Tone::Warning,
                        );
                        return Ok(None);
                    }
                    Some(r) => log::debug!("[{}] ADX {:.1} (+DI {:.1} / -DI {:.1})", asset, r.adx, r.plus_di, r.minus_di),
                    None => log::debug!("[{}] ADX unavailable, not filtering", asset),
                }
            }
            if let Some(veto) = &self.streak_veto {
                if let Some(streak) = veto.blocks(candles::tail(&history, self.cfg.streak.lookback)) {
                    self.log(format!("{asset}: {streak} candles of the same colour, no entry"), Tone::Warning);
                    return Ok(None);
                }
            }
        }

        self.log(format!("{asset}: {} signal ({})", decision.direction, self.strategy.name()), Tone::Signal);
        Ok(Some(decision))
    }

    // ── Execution ────────────────────────────────────────────────────────────

    fn position(&mut self, asset: &str) -> &mut PositionState {
        let sizing = &self.cfg.sizing;
        self.positions.entry(asset.to_string()).or_insert_with(|| PositionState::new(sizing))
    }

    /// Places the entry and every martingale retry it needs, until the sequence resolves.
    async fn resolve_entry(&mut self, asset: &str, decision: SignalDecision, expiry_minutes: u32) -> Step {
        let direction = decision.direction;
        loop {
            if self.token.is_cancelled() {
                return Err(FinishReason::Cancelled);
            }
            let stake = self.position(asset).stake();
            let level = self.position(asset).martingale_level;

            let ticket = match self.gateway.place_order(stake, asset, direction, expiry_minutes).await {
                Ok(t) => t,
                Err(e) if e.is_fatal() => return Err(FinishReason::Disconnected(e.to_string())),
                Err(GatewayError::Rejected(msg)) => {
                    self.position(asset).apply(AttemptOutcome::Rejected);
                    self.log(format!("{asset}: order rejected ({msg}), asset suspended"), Tone::Error);
                    return Ok(());
                }
                Err(e) => {
                    self.position(asset).apply(AttemptOutcome::Void);
                    self.log(format!("{asset}: order failed ({e})"), Tone::Error);
                    return Ok(());
                }
            };

            self.stats.ops += 1;
            self.observer.on_stats(&self.stats.snapshot());
            let gale = if level > 0 { format!(" (gale {level})") } else { String::new() };
            self.log(format!("{asset}: {direction} {stake:.2} for {expiry_minutes}m{gale}"), Tone::Info);

            let (outcome, halt) = match self.settle(&ticket.order_id).await {
                Settlement::Settled(OrderStatus::Win(profit)) => (AttemptOutcome::Win { profit }, None),
                Settlement::Settled(OrderStatus::Loss(amount)) => {
                    self.record_profit(-amount.abs());
                    (AttemptOutcome::Loss, None)
                }
                Settlement::Settled(OrderStatus::Tie | OrderStatus::Pending) => (AttemptOutcome::Void, None),
                Settlement::TimedOut => {
                    self.log(format!("{asset}: no result after {}s, treated as void", self.cfg.timing.settle_timeout_secs), Tone::Warning);
                    (AttemptOutcome::Void, None)
                }
                Settlement::Cancelled => (AttemptOutcome::Void, Some(FinishReason::Cancelled)),
                Settlement::Lost(e) => (AttemptOutcome::Void, Some(FinishReason::Disconnected(e.to_string()))),
            };
            if let AttemptOutcome::Win { profit } = outcome {
                self.record_profit(profit);
            }

            match self.position(asset).apply(outcome) {
                Transition::Retry { level, stake } => {
                    self.log(format!("{asset}: loss, martingale {level} with {stake:.2}"), Tone::Loss);
                    continue;
                }
                Transition::Won => {
                    self.stats.wins += 1;
                    self.count_entry(asset);
                    let next = self.position(asset).stake();
                    self.log(format!("{asset}: WIN | result {:+.2} | next stake {next:.2}", self.profit), Tone::Win);
                }
                Transition::Lost => {
                    self.stats.losses += 1;
                    self.count_entry(asset);
                    self.log(format!("{asset}: LOSS | result {:+.2}", self.profit), Tone::Loss);
                }
                Transition::Voided => {
                    let next = self.position(asset).stake();
                    self.log(format!("{asset}: no result, next stake {next:.2}"), Tone::Notice);
                }
            }
            self.observer.on_stats(&self.stats.snapshot());
            return match halt {
                Some(reason) => Err(reason),
                None => Ok(()),
            };
        }
    }

    /// Polls until the order settles, the timeout passes or the run is cancelled.
    async fn settle(&self, order_id: &str) -> Settlement {
        let deadline = self.clock.now().timestamp_millis() + self.cfg.timing.settle_timeout().as_millis() as i64;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.gateway.poll_order(order_id).await {
                Ok(OrderStatus::Pending) => {}
                Ok(done) => return Settlement::Settled(done),
                Err(e) if e.is_fatal() => return Settlement::Lost(e),
                Err(e) => log::debug!("poll {} attempt {} failed: {}", order_id, attempts, e),
            }
            if self.clock.now().timestamp_millis() >= deadline {
                return Settlement::TimedOut;
            }
            if self.pause(self.cfg.timing.settle_poll()).await.is_err() {
                return Settlement::Cancelled;
            }
        }
    }

    fn record_profit(&mut self, delta: f64) {
        self.profit += delta;
        self.observer.on_profit(self.profit);
    }

    fn count_entry(&mut self, asset: &str) {
        self.entries += 1;
        *self.entries_per_asset.entry(asset.to_string()).or_insert(0) += 1;
    }

    fn check_stop(&mut self) -> Step {
        match stop_conditions::evaluate(&self.cfg.stop, self.cfg.max_entries, self.entries, self.profit) {
            Some(reason) => {
                self.log(format!("Stopping: {reason}"), Tone::Notice);
                Err(FinishReason::Stopped(reason))
            }
            None => Ok(()),
        }
    }

    // ── External signals ─────────────────────────────────────────────────────

    /// Trades signals from an external feed instead of the built-in strategy.
    /// Filters are bypassed; staking, settlement and stops work as in [`Engine::run`].
    pub async fn run_signal_feed(&mut self, mut rx: mpsc::Receiver<ExternalSignal>) -> RunSummary {
        let reason = loop {
            let signal = tokio::select! {
                biased;
                _ = self.token.cancelled() => break FinishReason::Cancelled,
                next = rx.recv() => match next {
                    Some(s) => s,
                    None => break FinishReason::FeedClosed,
                },
            };
            if let Err(reason) = self.on_signal(signal).await {
                break reason;
            }
        };
        self.finish(reason)
    }

    async fn on_signal(&mut self, signal: ExternalSignal) -> Step {
        let ExternalSignal { asset, direction, expiry_minutes, entry_at } = signal;
        let now = self.clock.now();
        let Some(entry) = now.offset().from_local_datetime(&now.date_naive().and_time(entry_at)).single() else {
            self.log(format!("{asset}: entry time {entry_at} does not exist today, ignored"), Tone::Warning);
            return Ok(());
        };
        let window = chrono::Duration::seconds(self.cfg.timing.entry_window_secs as i64);
        if now >= entry + window {
            self.log(format!("{asset}: signal for {} already passed, ignored", entry_at.format("%H:%M")), Tone::Notice);
            return Ok(());
        }
        if !self.cfg.stop.by_profit && self.entries_per_asset.get(&asset).copied().unwrap_or(0) >= self.cfg.max_entries {
            self.log(format!("{asset}: entry limit reached, signal ignored"), Tone::Notice);
            return Ok(());
        }

        self.log(format!("{asset}: {direction} signal for {}", entry_at.format("%H:%M")), Tone::Signal);
        let wait = (entry - now).to_std().unwrap_or(Duration::ZERO);
        self.pause(wait).await?;

        if !self.scheduler.claim(&asset, CycleGranularity::Minute.key_at(&entry)) {
            self.log(format!("{asset}: already traded at {}, duplicate ignored", entry_at.format("%H:%M")), Tone::Notice);
            return Ok(());
        }
        if !self.position(&asset).take_turn() {
            self.log(format!("{asset} suspended, signal skipped"), Tone::Notice);
            return Ok(());
        }
        let expiry = expiry_minutes.unwrap_or(self.cfg.expiry_minutes);
        self.resolve_entry(&asset, SignalDecision::bypassing_filters(direction), expiry).await?;
        if self.cfg.stop.by_profit {
            self.check_stop()?;
        }
        Ok(())
    }

    // ── Catalog ──────────────────────────────────────────────────────────────

    async fn log_catalogs(&mut self) -> Step {
        let levels = self.cfg.sizing.max_level();
        let count = self.cfg.catalog_minutes
            + self.strategy.window_len()
            + self.strategy.entry_offset_candles() as usize
            + levels as usize
            + 1;
        for asset in self.cfg.assets.clone() {
            let history = match self.fetch_closed(&asset, count).await {
                Ok(h) => h,
                Err(e) if e.is_fatal() => return Err(FinishReason::Disconnected(e.to_string())),
                Err(e) => {
                    self.log(format!("{asset}: catalog unavailable ({e})"), Tone::Warning);
                    continue;
                }
            };
            let report = catalog::catalog(
                &history,
                self.strategy.as_ref(),
                levels,
                &self.classifier,
                self.cfg.adx.period,
                self.cfg.timing.candle_seconds,
            );
            let repetition = catalog::repetition_index(&history, &self.classifier);
            let message = match report {
                Some(r) => format!(
                    "{asset} catalog {}m: {}/{} wins ({:.1}%) by level {:?}, longest run {}, ADX {}, repetition {}",
                    self.cfg.catalog_minutes,
                    r.wins(),
                    r.total,
                    r.assertiveness,
                    r.wins_per_level,
                    r.max_streak,
                    r.adx.map_or("n/a".to_string(), |a| format!("{a:.1}")),
                    repetition.map_or("n/a".to_string(), |x| format!("{:.1}%", x.percent)),
                ),
                None => format!("{asset} catalog: no complete cycle in the last {}m", self.cfg.catalog_minutes),
            };
            self.log(message, Tone::Info);
        }
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Cancellable wait on the engine clock.
    async fn pause(&self, duration: Duration) -> Step {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(FinishReason::Cancelled),
            _ = self.clock.sleep(duration) => Ok(()),
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    fn log(&self, message: String, tone: Tone) {
        self.observer.on_log(self.now(), &message, tone);
    }

    fn finish(&mut self, reason: FinishReason) -> RunSummary {
        let stats = self.stats.snapshot();
        self.log(
            format!(
                "Finished: {reason} | ops {} wins {} losses {} ({:.1}%) | result {:+.2}",
                stats.ops, stats.wins, stats.losses, stats.win_rate_percent, self.profit
            ),
            Tone::Notice,
        );
        self.observer.on_stats(&stats);
        self.observer.on_profit(self.profit);
        self.observer.on_finished(&reason);
        RunSummary { stats, profit: self.profit, entries: self.entries, reason }
    }
}
