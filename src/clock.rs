use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, TimeZone};

/// Source of wall-clock time for the run loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Local wall clock backed by tokio timers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time instantly. Used for replays and tests.
#[derive(Debug)]
pub struct ReplayClock {
    now_ms: AtomicI64,
    offset: FixedOffset,
}

impl ReplayClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        ReplayClock { now_ms: AtomicI64::new(start.timestamp_millis()), offset: *start.offset() }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<FixedOffset>) {
        self.now_ms.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let ms = self.now_ms.load(Ordering::SeqCst);
        self.offset
            .timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(|| self.offset.timestamp_nanos(0))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // let other tasks observe the new time
        tokio::task::yield_now().await;
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> DateTime<FixedOffset> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        (**self).sleep(duration)
    }
}
