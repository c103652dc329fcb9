//! Keeps the live [`GameStore`] warm by polling today's schedule.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::games::GameStore;
use crate::metrics::Metrics;
use crate::provider::GameProvider;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive failures at which the poller reports not-ready.
const MAX_FAILURES_WHEN_READY: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl PollerStatus {
    pub fn is_ready(&self) -> bool {
        self.last_success.is_some() && self.consecutive_failures < MAX_FAILURES_WHEN_READY
    }
}

/// Background poller handle. Cheap to clone; all clones share one task.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    provider: Arc<dyn GameProvider>,
    store: GameStore,
    interval: Duration,
    metrics: Option<Arc<dyn Metrics>>,
    status: RwLock<PollerStatus>,
    started: AtomicBool,
    done: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// A zero `interval` falls back to 30 seconds.
    pub fn new(
        provider: Arc<dyn GameProvider>,
        store: GameStore,
        interval: Duration,
        metrics: Option<Arc<dyn Metrics>>,
    ) -> Self {
        Poller {
            inner: Arc::new(PollerInner {
                provider,
                store,
                interval: if interval.is_zero() {
                    DEFAULT_INTERVAL
                } else {
                    interval
                },
                metrics,
                status: RwLock::new(PollerStatus::default()),
                started: AtomicBool::new(false),
                done: CancellationToken::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    #[cfg(test)]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Spawn the polling task: one cycle right away, then one per interval.
    /// Calling `start` again is a no-op.
    pub fn start(&self, cancel: CancellationToken) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("Poller already started");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            info!(provider = inner.provider.name(), interval = ?inner.interval, "Poller started");
            inner.poll_once(&cancel).await;

            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + inner.interval,
                inner.interval,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = inner.done.cancelled() => break,
                    _ = ticker.tick() => inner.poll_once(&cancel).await,
                }
            }
            info!("Poller stopped");
        });

        *self.inner.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Signal the task to exit and wait for it. Safe to call repeatedly.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.inner.done.cancel();
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| anyhow::anyhow!("poller task failed: {}", e))?;
        }
        Ok(())
    }

    pub async fn status(&self) -> PollerStatus {
        self.inner.status.read().await.clone()
    }

    /// Run a single fetch-and-store cycle outside the schedule.
    pub async fn poll_once(&self, cancel: &CancellationToken) {
        self.inner.poll_once(cancel).await;
    }
}

impl PollerInner {
    async fn poll_once(&self, cancel: &CancellationToken) {
        let started = Instant::now();
        self.status.write().await.last_attempt = Some(Utc::now());

        let result = self.provider.fetch_games(cancel, None, None).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_poller_cycle(started.elapsed(), result.as_ref().err());
        }

        match result {
            Ok(games) => {
                let count = games.len();
                self.store.replace(games).await;
                let mut status = self.status.write().await;
                status.consecutive_failures = 0;
                status.last_success = Some(Utc::now());
                debug!(games = count, elapsed = ?started.elapsed(), "Poll cycle complete");
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.consecutive_failures += 1;
                status.last_error = Some(e.to_string());
                warn!(
                    provider = self.provider.name(),
                    consecutive_failures = status.consecutive_failures,
                    error = %e,
                    "Poll cycle failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::games::fixtures::game;
    use crate::games::Game;
    use crate::metrics::{sample, PrometheusMetrics};
    use crate::provider::testing::ScriptedProvider;
    use crate::provider::FetchError;

    /// Provider whose outcome can be flipped between cycles.
    #[derive(Default)]
    struct Switch {
        failing: AtomicBool,
    }

    #[async_trait]
    impl GameProvider for Switch {
        async fn fetch_games(
            &self,
            _cancel: &CancellationToken,
            _date: Option<NaiveDate>,
            _tz: Option<&str>,
        ) -> Result<Vec<Game>, FetchError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(FetchError::Upstream(anyhow::anyhow!("upstream down")))
            } else {
                Ok(vec![game("1"), game("2")])
            }
        }

        fn name(&self) -> &str {
            "switch"
        }
    }

    #[tokio::test]
    async fn test_readiness_follows_cycles() {
        let provider = Arc::new(Switch::default());
        let store = GameStore::new();
        let poller = Poller::new(
            Arc::clone(&provider) as Arc<dyn GameProvider>,
            store.clone(),
            Duration::from_secs(60),
            None,
        );
        let cancel = CancellationToken::new();

        assert!(!poller.status().await.is_ready());

        poller.poll_once(&cancel).await;
        let status = poller.status().await;
        assert!(status.is_ready());
        assert!(status.last_attempt.is_some());
        assert_eq!(store.len().await, 2);

        provider.failing.store(true, Ordering::SeqCst);
        poller.poll_once(&cancel).await;
        poller.poll_once(&cancel).await;
        assert!(poller.status().await.is_ready(), "two failures keep readiness");
        poller.poll_once(&cancel).await;

        let status = poller.status().await;
        assert!(!status.is_ready());
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.last_error.as_deref(), Some("upstream down"));
        // Failed cycles leave the last good data in place.
        assert_eq!(store.len().await, 2);

        provider.failing.store(false, Ordering::SeqCst);
        poller.poll_once(&cancel).await;
        assert_eq!(poller.status().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_start_warms_store_immediately() {
        let provider = Arc::new(ScriptedProvider::ok(&["a", "b", "c"]));
        let store = GameStore::new();
        let poller = Poller::new(
            Arc::clone(&provider) as Arc<dyn GameProvider>,
            store.clone(),
            Duration::from_secs(3600),
            None,
        );

        poller.start(CancellationToken::new());
        poller.start(CancellationToken::new());

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.len().await == 0 {
            assert!(Instant::now() < deadline, "cold-start cycle did not run");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        poller.stop().await.unwrap();
        assert_eq!(provider.calls(), 1, "second start must not spawn another task");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let poller = Poller::new(
            Arc::new(ScriptedProvider::ok(&[])) as Arc<dyn GameProvider>,
            GameStore::new(),
            Duration::from_millis(10),
            None,
        );
        poller.stop().await.unwrap();
        poller.start(CancellationToken::new());
        poller.stop().await.unwrap();
        poller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_external_cancel_ends_loop() {
        let poller = Poller::new(
            Arc::new(ScriptedProvider::ok(&["1"])) as Arc<dyn GameProvider>,
            GameStore::new(),
            Duration::from_millis(10),
            None,
        );
        let cancel = CancellationToken::new();
        poller.start(cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), poller.stop())
            .await
            .expect("loop should exit on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_reads_during_active_polling() {
        let metrics = Arc::new(PrometheusMetrics::new());
        let poller = Poller::new(
            Arc::new(ScriptedProvider::ok(&["1"])) as Arc<dyn GameProvider>,
            GameStore::new(),
            Duration::from_millis(2),
            Some(metrics.clone() as Arc<dyn Metrics>),
        );
        poller.start(CancellationToken::new());

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let poller = poller.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let _ = poller.status().await.is_ready();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for r in readers {
            r.await.unwrap();
        }
        poller.stop().await.unwrap();
        let cycles = sample(&metrics.render(), "poller_cycles_total", "outcome=\"ok\"");
        assert!(cycles.is_some_and(|n| n >= 1.0));
    }

    #[test]
    fn test_zero_interval_defaults() {
        let poller = Poller::new(
            Arc::new(ScriptedProvider::ok(&[])) as Arc<dyn GameProvider>,
            GameStore::new(),
            Duration::ZERO,
            None,
        );
        assert_eq!(poller.interval(), Duration::from_secs(30));
    }
}
