use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, FixedOffset};

use crate::candles::{self, DataError};
use crate::clock::Clock;
use crate::gateway::{AssetStatus, GatewayError, MarketGateway, OrderTicket};
use crate::types::{Candle, OrderStatus, TradeDirection};

pub const DEFAULT_PAYOUT: f64 = 0.87;

struct PaperOrder {
    asset: String,
    direction: TradeDirection,
    stake: f64,
    strike: f64,
    opened_at: i64,
    settle_at: i64,
    result: Option<OrderStatus>,
}

struct Book {
    balance: f64,
    next_id: u64,
    orders: HashMap<String, PaperOrder>,
}

/// Simulated broker over recorded candles.
///
/// Orders strike at the open of the candle containing "now" and settle against the
/// close of the last candle inside the expiry window.
pub struct PaperGateway<C: Clock> {
    clock: C,
    payout: f64,
    candle_seconds: u32,
    history: HashMap<String, Vec<Candle>>,
    book: Mutex<Book>,
}

impl<C: Clock> PaperGateway<C> {
    pub fn new(clock: C, balance: f64, payout: f64, candle_seconds: u32) -> Self {
        PaperGateway {
            clock,
            payout,
            candle_seconds,
            history: HashMap::new(),
            book: Mutex::new(Book { balance, next_id: 1, orders: HashMap::new() }),
        }
    }

    pub fn with_asset(mut self, asset: &str, candles: Vec<Candle>) -> Self {
        self.history.insert(asset.to_string(), candles::normalize(candles));
        self
    }

    /// Loads every `<ASSET>.csv` in `dir`.
    pub fn load_dir(mut self, dir: &Path) -> Result<Self, DataError> {
        let entries = std::fs::read_dir(dir).map_err(|source| DataError::Io { path: dir.display().to_string(), source })?;
        for entry in entries {
            let path = entry.map_err(|source| DataError::Io { path: dir.display().to_string(), source })?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(asset) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let series = candles::load_csv(&path)?;
            log::info!("[{}] loaded {} candles for replay", asset, series.len());
            self.history.insert(asset.to_string(), series);
        }
        Ok(self)
    }

    pub fn assets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.history.keys().cloned().collect();
        names.sort();
        names
    }

    /// Earliest and latest bar across all loaded assets.
    pub fn coverage(&self) -> Option<(i64, i64)> {
        let first = self.history.values().filter_map(|s| s.first()).map(|c| c.timestamp).min()?;
        let last = self.history.values().filter_map(|s| s.last()).map(|c| c.timestamp).max()?;
        Some((first, last))
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn series(&self, asset: &str) -> Result<&[Candle], GatewayError> {
        self.history
            .get(asset)
            .map(Vec::as_slice)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown asset {asset}")))
    }

    fn bar_at(&self, series: &[Candle], ts: i64) -> Option<Candle> {
        let cs = self.candle_seconds as i64;
        let idx = series.partition_point(|c| c.timestamp <= ts);
        let candle = series.get(idx.checked_sub(1)?)?;
        (ts < candle.timestamp + cs).then(|| candle.clone())
    }

    fn ensure_live(&self, now_ts: i64) -> Result<(), GatewayError> {
        match self.coverage() {
            Some((_, last)) if now_ts < last + self.candle_seconds as i64 => Ok(()),
            _ => Err(GatewayError::Disconnected("replay data exhausted".into())),
        }
    }

    fn settle(&self, order: &PaperOrder) -> Option<OrderStatus> {
        let series = self.history.get(&order.asset)?;
        let last_bar = order.settle_at - self.candle_seconds as i64;
        let exit = series
            .iter()
            .rev()
            .find(|c| c.timestamp <= last_bar && c.timestamp >= order.opened_at)?;
        let up = exit.close > order.strike;
        let down = exit.close < order.strike;
        Some(match order.direction {
            _ if !up && !down => OrderStatus::Tie,
            TradeDirection::Call if up => OrderStatus::Win(order.stake * self.payout),
            TradeDirection::Put if down => OrderStatus::Win(order.stake * self.payout),
            _ => OrderStatus::Loss(-order.stake),
        })
    }
}

impl<C: Clock> MarketGateway for PaperGateway<C> {
    async fn balance(&self) -> Result<f64, GatewayError> {
        Ok(self.book().balance)
    }

    async fn candles(
        &self,
        asset: &str,
        granularity_secs: u32,
        count: usize,
        as_of: DateTime<FixedOffset>,
    ) -> Result<Vec<Candle>, GatewayError> {
        if granularity_secs != self.candle_seconds {
            return Err(GatewayError::Transient(format!(
                "replay data is {}s, {}s requested",
                self.candle_seconds, granularity_secs
            )));
        }
        self.ensure_live(as_of.timestamp())?;
        let series = self.series(asset)?;
        let end = series.partition_point(|c| c.timestamp <= as_of.timestamp());
        Ok(candles::tail(&series[..end], count).to_vec())
    }

    async fn place_order(
        &self,
        stake: f64,
        asset: &str,
        direction: TradeDirection,
        expiry_minutes: u32,
    ) -> Result<OrderTicket, GatewayError> {
        let now = self.clock.now().timestamp();
        self.ensure_live(now)?;
        let series = self.series(asset)?;
        let bar = self.bar_at(series, now).ok_or_else(|| GatewayError::Rejected(format!("{asset} is closed")))?;

        let mut book = self.book();
        if stake <= 0.0 || stake > book.balance {
            return Err(GatewayError::Rejected(format!("stake {stake:.2} exceeds balance {:.2}", book.balance)));
        }
        book.balance -= stake;
        let order_id = format!("paper-{}", book.next_id);
        book.next_id += 1;
        book.orders.insert(
            order_id.clone(),
            PaperOrder {
                asset: asset.to_string(),
                direction,
                stake,
                strike: bar.open,
                opened_at: bar.timestamp,
                settle_at: bar.timestamp + expiry_minutes as i64 * 60,
                result: None,
            },
        );
        log::debug!("[{}] paper {} {:.2} @ {:.5} ({})", asset, direction, stake, bar.open, order_id);
        Ok(OrderTicket { order_id })
    }

    async fn poll_order(&self, order_id: &str) -> Result<OrderStatus, GatewayError> {
        let now = self.clock.now().timestamp();
        let mut book = self.book();
        let order = book
            .orders
            .get(order_id)
            .ok_or_else(|| GatewayError::Transient(format!("unknown order {order_id}")))?;
        if let Some(done) = order.result {
            return Ok(done);
        }
        if now < order.settle_at {
            return Ok(OrderStatus::Pending);
        }
        // missing exit bar: refund
        let status = self.settle(order).unwrap_or(OrderStatus::Tie);
        let refund = match status {
            OrderStatus::Win(profit) => order.stake + profit,
            OrderStatus::Tie => order.stake,
            _ => 0.0,
        };
        book.balance += refund;
        if let Some(order) = book.orders.get_mut(order_id) {
            order.result = Some(status);
        }
        Ok(status)
    }

    async fn open_assets(&self) -> Result<HashMap<String, AssetStatus>, GatewayError> {
        let now = self.clock.now().timestamp();
        Ok(self
            .history
            .iter()
            .map(|(asset, series)| (asset.clone(), AssetStatus { open: self.bar_at(series, now).is_some() }))
            .collect())
    }
}
