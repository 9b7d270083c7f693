use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use crate::clock::Clock;
use crate::types::{Candle, OrderStatus, TradeDirection};

// ── Error types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Broker refused the order (asset closed or suspended, stake out of range).
    #[error("order rejected: {0}")]
    Rejected(String),
    /// Network hiccup, timeout, bad payload. Safe to retry later.
    #[error("transient error: {0}")]
    Transient(String),
    /// Session lost. Ends the run.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

impl GatewayError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Disconnected(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderTicket {
    pub order_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetStatus {
    pub open: bool,
}

/// Market data and order execution, as seen by the engine.
///
/// Candle lists may come back unsorted or with duplicated bars; callers normalise.
pub trait MarketGateway: Send + Sync {
    fn balance(&self) -> impl Future<Output = Result<f64, GatewayError>> + Send;

    fn candles(
        &self,
        asset: &str,
        granularity_secs: u32,
        count: usize,
        as_of: DateTime<FixedOffset>,
    ) -> impl Future<Output = Result<Vec<Candle>, GatewayError>> + Send;

    fn place_order(
        &self,
        stake: f64,
        asset: &str,
        direction: TradeDirection,
        expiry_minutes: u32,
    ) -> impl Future<Output = Result<OrderTicket, GatewayError>> + Send;

    fn poll_order(&self, order_id: &str) -> impl Future<Output = Result<OrderStatus, GatewayError>> + Send;

    /// Asset discovery. Not consulted by the decision loop itself.
    fn open_assets(&self) -> impl Future<Output = Result<HashMap<String, AssetStatus>, GatewayError>> + Send;
}

/// Retries transient failures with exponential backoff on the given clock.
/// Rejections and disconnects are returned immediately.
pub async fn with_retry<C, F, Fut, T>(clock: &C, operation: F, max_retries: u32) -> Result<T, GatewayError>
where
    C: Clock,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(GatewayError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(GatewayError::Transient(msg));
                }
                log::warn!("Transient error: {} (retry in {}s, {}/{})", msg, delay, retries + 1, max_retries);
                clock.sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(8);
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
