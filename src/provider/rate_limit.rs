//! Global throttle in front of a provider: at most one call per interval
//! reaches the wrapped provider, no matter how many tasks share the limiter.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchError, GameProvider};
use crate::games::Game;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    inner: Option<Arc<dyn GameProvider>>,
    interval: Duration,
    /// Shared by every caller; the mutex queues waiters in FIFO order.
    ticker: Mutex<Interval>,
    closed: CancellationToken,
}

impl RateLimiter {
    /// Wrap `inner` so calls are spaced at least `interval` apart.
    /// A zero interval falls back to one minute. Must be called inside a Tokio runtime.
    pub fn new(inner: Option<Arc<dyn GameProvider>>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        // First tick fires one interval after construction, like a plain ticker.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        RateLimiter {
            inner,
            interval,
            ticker: Mutex::new(ticker),
            closed: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the ticker. Pending and later calls fail with `Unavailable`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    async fn wait_tick(&self) {
        self.ticker.lock().await.tick().await;
    }
}

#[async_trait]
impl GameProvider for RateLimiter {
    async fn fetch_games(
        &self,
        cancel: &CancellationToken,
        date: Option<NaiveDate>,
        tz: Option<&str>,
    ) -> Result<Vec<Game>, FetchError> {
        let Some(inner) = &self.inner else {
            debug!(provider = self.name(), "provider unavailable");
            return Err(FetchError::Unavailable);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(provider = inner.name(), "fetch canceled");
                return Err(FetchError::Canceled);
            }
            _ = self.closed.cancelled() => {
                debug!(provider = inner.name(), "rate limiter closed");
                return Err(FetchError::Unavailable);
            }
            _ = self.wait_tick() => {}
        }

        debug!(provider = inner.name(), date = ?date, "rate-limited fetch");
        inner.fetch_games(cancel, date, tz).await
    }

    fn name(&self) -> &str {
        self.inner.as_ref().map(|p| p.name()).unwrap_or("provider")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_concurrent_calls_are_spaced_by_interval() {
        let inner = Arc::new(ScriptedProvider::ok(&["1"]));
        let limiter = Arc::new(RateLimiter::new(
            Some(inner.clone() as Arc<dyn GameProvider>),
            Duration::from_millis(30),
        ));
        let cancel = CancellationToken::new();

        let start = std::time::Instant::now();
        let calls = (0..4).map(|_| {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            async move { limiter.fetch_games(&cancel, None, None).await }
        });
        let results = futures_util::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(inner.calls(), 4);
        assert!(
            start.elapsed() >= Duration::from_millis(90),
            "4 calls finished in {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_missing_provider_is_unavailable_immediately() {
        let limiter = RateLimiter::new(None, Duration::from_secs(3600));
        let start = std::time::Instant::now();
        let err = limiter
            .fetch_games(&CancellationToken::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unavailable));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_tick() {
        let inner = Arc::new(ScriptedProvider::ok(&["1"]));
        let limiter = RateLimiter::new(
            Some(inner.clone() as Arc<dyn GameProvider>),
            Duration::from_secs(3600),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = limiter.fetch_games(&cancel, None, None).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_waiting_calls() {
        let inner = Arc::new(ScriptedProvider::ok(&["1"]));
        let limiter = RateLimiter::new(
            Some(inner.clone() as Arc<dyn GameProvider>),
            Duration::from_secs(3600),
        );
        limiter.close();
        let err = limiter
            .fetch_games(&CancellationToken::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unavailable));
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_defaults_to_one_minute() {
        let limiter = RateLimiter::new(None, Duration::ZERO);
        assert_eq!(limiter.interval(), Duration::from_secs(60));
        assert_eq!(limiter.name(), "provider");
    }
}
