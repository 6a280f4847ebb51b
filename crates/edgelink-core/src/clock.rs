/*!
 * Clock abstraction for EdgeLink.
 *
 * Every wait the framework performs (retry delays, poll intervals) and every
 * timestamp it stamps goes through a [`Clock`], so that embedders and tests
 * can substitute their own notion of time.
 */
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Source of wall-clock timestamps and non-blocking delays
pub trait Clock: Send + Sync + Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// A future that completes once `duration` has elapsed
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// A shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by chrono for timestamps and tokio timers for delays.
///
/// Because delays are tokio timers, a paused tokio runtime
/// (`tokio::time::pause`) drives this clock virtually.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Create a shared system clock
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Clock whose timestamps only move when told to. Delays still use tokio timers.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Move the reported time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Run a future under an optional deadline measured by `clock`, mapping expiry
/// with `on_expiry`. A `None` limit runs the future unbounded.
pub async fn deadline<F, T, E>(
    clock: &dyn Clock,
    limit: Option<Duration>,
    future: F,
    on_expiry: impl FnOnce() -> E,
) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    let Some(limit) = limit else {
        return future.await;
    };
    tokio::select! {
        result = future => result,
        () = clock.sleep(limit) => Err(on_expiry()),
    }
}
