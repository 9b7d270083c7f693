use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use binary_bot::clock::{Clock, ReplayClock};
use binary_bot::config::{AdxSample, CycleGranularity, RunConfig, StrategyKind};
use binary_bot::engine::Engine;
use binary_bot::gateway::{AssetStatus, GatewayError, MarketGateway, OrderTicket};
use binary_bot::indicators;
use binary_bot::observer::{FinishReason, RunObserver};
use binary_bot::signal_feed::ExternalSignal;
use binary_bot::stop_conditions::StopReason;
use binary_bot::types::{Candle, OrderStatus, StatsSnapshot, Tone, TradeDirection};
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Scripted market ───────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Market {
    /// Colours repeat `u u d u d` on minutes 0..4 of every quadrant.
    Pattern,
    /// Every bar rises by one point.
    Trend,
    /// `Pattern` with flat highs and lows, except one bar whose high spikes.
    Surge { at: i64 },
}

impl Market {
    fn bar(self, ts: i64) -> Candle {
        let (open, close) = match self {
            Market::Pattern | Market::Surge { .. } => match (ts / 60).rem_euclid(5) {
                0 | 1 | 3 => (1.0, 1.1),
                _ => (1.1, 1.0),
            },
            Market::Trend => {
                let base = (ts / 60) as f64 % 10_000.0;
                (base, base + 1.0)
            }
        };
        let spike = match self {
            Market::Surge { at } if at == ts => 2.0,
            _ => 0.0,
        };
        Candle { timestamp: ts, open, high: open.max(close) + 0.05 + spike, low: open.min(close) - 0.05, close }
    }
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Settle(OrderStatus),
    Never,
    Reject,
}

#[derive(Clone, Debug, PartialEq)]
struct Placed {
    asset: String,
    at: DateTime<FixedOffset>,
    stake: f64,
    direction: TradeDirection,
    expiry_minutes: u32,
}

struct ScriptedGateway {
    clock: Arc<ReplayClock>,
    market: Market,
    ends_at: i64,
    outcomes: Mutex<VecDeque<Outcome>>,
    statuses: Mutex<HashMap<String, OrderStatus>>,
    placed: Arc<Mutex<Vec<Placed>>>,
}

impl ScriptedGateway {
    fn new(clock: Arc<ReplayClock>, market: Market, outcomes: Vec<Outcome>) -> Self {
        ScriptedGateway {
            clock,
            market,
            ends_at: i64::MAX,
            outcomes: Mutex::new(outcomes.into()),
            statuses: Mutex::new(HashMap::new()),
            placed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn ending_at(mut self, at: DateTime<FixedOffset>) -> Self {
        self.ends_at = at.timestamp();
        self
    }

    fn check_live(&self, now: i64) -> Result<(), GatewayError> {
        if now >= self.ends_at {
            return Err(GatewayError::Disconnected("session closed".into()));
        }
        Ok(())
    }
}

impl MarketGateway for ScriptedGateway {
    async fn balance(&self) -> Result<f64, GatewayError> {
        Ok(1000.0)
    }

    async fn candles(
        &self,
        _asset: &str,
        granularity_secs: u32,
        count: usize,
        as_of: DateTime<FixedOffset>,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.check_live(as_of.timestamp())?;
        let step = granularity_secs as i64;
        let last = as_of.timestamp().div_euclid(step) * step;
        // newest first, as some brokers return them
        Ok((0..count as i64).map(|i| self.market.bar(last - i * step)).collect())
    }

    async fn place_order(
        &self,
        stake: f64,
        asset: &str,
        direction: TradeDirection,
        expiry_minutes: u32,
    ) -> Result<OrderTicket, GatewayError> {
        let now = self.clock.now();
        self.check_live(now.timestamp())?;
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Outcome::Never);
        let status = match outcome {
            Outcome::Reject => return Err(GatewayError::Rejected("asset suspended".into())),
            Outcome::Settle(status) => status,
            Outcome::Never => OrderStatus::Pending,
        };
        let mut placed = self.placed.lock().unwrap();
        placed.push(Placed { asset: asset.to_string(), at: now, stake, direction, expiry_minutes });
        let order_id = format!("order-{}", placed.len());
        self.statuses.lock().unwrap().insert(order_id.clone(), status);
        Ok(OrderTicket { order_id })
    }

    async fn poll_order(&self, order_id: &str) -> Result<OrderStatus, GatewayError> {
        self.statuses
            .lock()
            .unwrap()
            .get(order_id)
            .copied()
            .ok_or_else(|| GatewayError::Transient(format!("unknown order {order_id}")))
    }

    async fn open_assets(&self) -> Result<HashMap<String, AssetStatus>, GatewayError> {
        Ok(HashMap::from([("EURUSD".to_string(), AssetStatus { open: true })]))
    }
}

// ── Observer ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    logs: Mutex<Vec<(String, Tone)>>,
    stats: Mutex<Vec<StatsSnapshot>>,
    finished: Mutex<Vec<FinishReason>>,
}

impl Recorder {
    fn logged(&self, needle: &str) -> bool {
        self.logs.lock().unwrap().iter().any(|(m, _)| m.contains(needle))
    }
}

impl RunObserver for Recorder {
    fn on_log(&self, _at: DateTime<FixedOffset>, message: &str, tone: Tone) {
        self.logs.lock().unwrap().push((message.to_string(), tone));
    }

    fn on_stats(&self, stats: &StatsSnapshot) {
        self.stats.lock().unwrap().push(stats.clone());
    }

    fn on_finished(&self, reason: &FinishReason) {
        self.finished.lock().unwrap().push(reason.clone());
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 5, 6, h, m, s).unwrap()
}

fn base_config() -> RunConfig {
    let mut cfg = RunConfig::default();
    cfg.assets = vec!["EURUSD".to_string()];
    cfg.sizing.stake = 25.0;
    cfg.adx.enabled = false;
    cfg
}

struct Harness {
    engine: Engine<ScriptedGateway, Arc<ReplayClock>>,
    placed: Arc<Mutex<Vec<Placed>>>,
    recorder: Arc<Recorder>,
    token: CancellationToken,
}

fn harness(cfg: RunConfig, gateway: impl FnOnce(Arc<ReplayClock>) -> ScriptedGateway) -> Harness {
    let clock = Arc::new(ReplayClock::new(at(10, 4, 58)));
    let gateway = gateway(clock.clone());
    let placed = gateway.placed.clone();
    let recorder = Arc::new(Recorder::default());
    let token = CancellationToken::new();
    let engine = Engine::new(cfg, gateway, clock, recorder.clone(), token.clone());
    Harness { engine, placed, recorder, token }
}

fn placed_at(h: &Harness) -> Vec<DateTime<FixedOffset>> {
    h.placed.lock().unwrap().iter().map(|p| p.at).collect()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_entry_per_quadrant_until_max_entries() {
    let mut cfg = base_config();
    cfg.max_entries = 2;
    let wins = vec![Outcome::Settle(OrderStatus::Win(21.75)); 2];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, wins));

    let summary = h.engine.run().await;

    assert_eq!(summary.reason, FinishReason::Stopped(StopReason::MaxEntries(2)));
    assert_eq!(placed_at(&h), vec![at(10, 5, 0), at(10, 10, 0)]);
    // window u u d u d → last three d u d → minority is bullish
    assert!(h.placed.lock().unwrap().iter().all(|p| p.direction == TradeDirection::Call && p.asset == "EURUSD"));
    assert_eq!(summary.stats.wins, 2);
    assert_eq!(summary.stats.ops, 2);
    assert!((summary.profit - 43.5).abs() < 1e-9);
    assert_eq!(*h.recorder.finished.lock().unwrap(), vec![summary.reason.clone()]);
}

#[tokio::test]
async fn martingale_sequence_counts_as_one_entry() {
    let mut cfg = base_config();
    cfg.max_entries = 1;
    let losses = vec![Outcome::Settle(OrderStatus::Loss(-25.0)), Outcome::Settle(OrderStatus::Loss(-50.0))];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, losses));

    let summary = h.engine.run().await;

    let stakes: Vec<f64> = h.placed.lock().unwrap().iter().map(|p| p.stake).collect();
    assert_eq!(stakes, vec![25.0, 50.0]);
    assert_eq!(placed_at(&h), vec![at(10, 5, 0), at(10, 5, 0)]);
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.stats.ops, 2);
    assert_eq!(summary.stats.losses, 1);
    assert_eq!(summary.stats.wins, 0);
    assert!((summary.profit + 75.0).abs() < 1e-9);
    assert_eq!(summary.reason, FinishReason::Stopped(StopReason::MaxEntries(1)));
}

#[tokio::test]
async fn settlement_timeout_is_void() {
    let mut cfg = base_config();
    cfg.max_entries = 1;
    cfg.timing.settle_timeout_secs = 1;
    let outcomes = vec![Outcome::Never, Outcome::Settle(OrderStatus::Win(20.0))];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, outcomes));

    let summary = h.engine.run().await;

    assert_eq!(placed_at(&h), vec![at(10, 5, 0), at(10, 10, 0)]);
    // the void attempt keeps the opening stake
    assert!(h.placed.lock().unwrap().iter().all(|p| p.stake == 25.0));
    assert_eq!(summary.stats.ops, 2);
    assert_eq!(summary.stats.wins, 1);
    assert_eq!(summary.stats.losses, 0);
    assert_eq!(summary.entries, 1);
    assert!(h.recorder.logged("treated as void"));
}

#[tokio::test]
async fn profit_target_stops_the_run() {
    let mut cfg = base_config();
    cfg.stop.by_profit = true;
    cfg.stop.profit_target = 30.0;
    let wins = vec![Outcome::Settle(OrderStatus::Win(20.0)); 5];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, wins));

    let summary = h.engine.run().await;

    assert!(matches!(summary.reason, FinishReason::Stopped(StopReason::ProfitTarget(p)) if (p - 40.0).abs() < 1e-9));
    assert_eq!(h.placed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn rejection_suspends_the_asset_for_one_cycle() {
    let mut cfg = base_config();
    cfg.max_entries = 1;
    let outcomes = vec![Outcome::Reject, Outcome::Settle(OrderStatus::Win(10.0))];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, outcomes));

    let summary = h.engine.run().await;

    // 10:05 rejected, 10:10 sat out, 10:15 traded
    assert_eq!(placed_at(&h), vec![at(10, 15, 0)]);
    assert_eq!(summary.stats.ops, 1);
    assert!(h.recorder.logged("rejected"));
    assert!(h.recorder.logged("suspended"));
}

#[tokio::test]
async fn power_boss_enters_on_the_second_candle() {
    let mut cfg = base_config();
    cfg.max_entries = 1;
    cfg.strategy = StrategyKind::PowerBoss;
    let wins = vec![Outcome::Settle(OrderStatus::Win(10.0))];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, wins));

    let summary = h.engine.run().await;

    assert_eq!(summary.reason, FinishReason::Stopped(StopReason::MaxEntries(1)));
    let placed = h.placed.lock().unwrap();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].at, at(10, 6, 0));
    // first candle of the quadrant is bullish, favor mode follows it
    assert_eq!(placed[0].direction, TradeDirection::Call);
}

#[tokio::test]
async fn adx_vetoes_strong_trends() {
    let mut cfg = base_config();
    cfg.adx.enabled = true;
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Trend, Vec::new()).ending_at(at(10, 12, 0)));

    let summary = h.engine.run().await;

    assert!(h.placed.lock().unwrap().is_empty());
    assert!(h.recorder.logged("ADX"));
    assert!(matches!(summary.reason, FinishReason::Disconnected(_)));
    assert_eq!(summary.stats.ops, 0);
}

#[tokio::test]
async fn adx_reads_the_last_closed_candle() {
    let surge = Market::Surge { at: at(10, 4, 0).timestamp() };
    // the 42 closed bars the engine sees at 10:05 (ADX history is period × 3)
    let closed: Vec<Candle> = (1..=42).rev().map(|i| surge.bar(at(10, 5, 0).timestamp() - i * 60)).collect();
    let fresh = indicators::adx(&closed, 14, AdxSample::Latest).unwrap().adx;
    let stale = indicators::adx(&closed, 14, AdxSample::PreviousBar).unwrap().adx;
    assert!(fresh > stale, "fresh {fresh} stale {stale}");

    let mut cfg = base_config();
    cfg.adx.enabled = true;
    cfg.adx.sample = AdxSample::PreviousBar;
    // only the spike on the 10:04 bar lifts ADX over this level
    cfg.adx.threshold = (fresh + stale) / 2.0;
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, surge, Vec::new()).ending_at(at(10, 6, 0)));

    let summary = h.engine.run().await;

    assert!(h.placed.lock().unwrap().is_empty());
    assert!(h.recorder.logged("strong trend"));
    assert!(matches!(summary.reason, FinishReason::Disconnected(_)));
}

#[tokio::test]
async fn minute_granularity_fires_every_minute() {
    let mut cfg = base_config();
    cfg.max_entries = 3;
    cfg.timing.granularity = CycleGranularity::Minute;
    let wins = vec![Outcome::Settle(OrderStatus::Win(5.0)); 3];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, wins));

    let summary = h.engine.run().await;

    assert_eq!(placed_at(&h), vec![at(10, 5, 0), at(10, 6, 0), at(10, 7, 0)]);
    assert_eq!(summary.entries, 3);
}

#[tokio::test]
async fn signal_feed_trades_each_signal_once() {
    let mut cfg = base_config();
    cfg.adx.enabled = true;
    let wins = vec![Outcome::Settle(OrderStatus::Win(20.0)); 3];
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Trend, wins));

    let signal = |hh, mm| ExternalSignal {
        asset: "EURUSD".to_string(),
        direction: TradeDirection::Put,
        expiry_minutes: Some(5),
        entry_at: NaiveTime::from_hms_opt(hh, mm, 0).unwrap(),
    };
    let (tx, rx) = mpsc::channel(4);
    tx.send(signal(10, 7)).await.unwrap();
    tx.send(signal(10, 7)).await.unwrap();
    tx.send(signal(10, 0)).await.unwrap();
    drop(tx);

    let summary = h.engine.run_signal_feed(rx).await;

    assert_eq!(summary.reason, FinishReason::FeedClosed);
    let placed = h.placed.lock().unwrap();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].at, at(10, 7, 0));
    assert_eq!(placed[0].direction, TradeDirection::Put);
    assert_eq!(placed[0].expiry_minutes, 5);
    assert!(h.recorder.logged("duplicate ignored"));
    assert!(h.recorder.logged("already passed"));
    assert_eq!(summary.stats.wins, 1);
}

#[tokio::test]
async fn cancelled_token_ends_the_run() {
    let h = harness(base_config(), |c| ScriptedGateway::new(c, Market::Pattern, Vec::new()));
    let Harness { mut engine, placed, recorder, token } = h;
    token.cancel();

    let summary = engine.run().await;

    assert_eq!(summary.reason, FinishReason::Cancelled);
    assert!(placed.lock().unwrap().is_empty());
    assert_eq!(*recorder.finished.lock().unwrap(), vec![FinishReason::Cancelled]);
    assert!(recorder.stats.lock().unwrap().last().is_some_and(|s| s.ops == 0));
}

#[tokio::test]
async fn no_assets_finishes_immediately() {
    let mut cfg = base_config();
    cfg.assets.clear();
    let mut h = harness(cfg, |c| ScriptedGateway::new(c, Market::Pattern, Vec::new()));

    let summary = h.engine.run().await;

    assert_eq!(summary.reason, FinishReason::NoAssets);
    assert!(h.placed.lock().unwrap().is_empty());
}
