//! Bounded retry around a provider with half-jitter backoff.
//!
//! Rate-limit responses that carry a `Retry-After` are honoured exactly;
//! everything else waits `backoff(attempt)` perturbed into `[base/2, base]`.
//! Every sleep races the caller's cancellation token.

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{rate_limit_error, FetchError, GameProvider};
use crate::games::Game;
use crate::metrics::Metrics;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(200);

/// Maps a 1-based attempt number to the un-jittered delay before the next attempt.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Linear backoff: `attempt × step`.
pub fn linear_backoff(step: Duration) -> BackoffFn {
    Arc::new(move |attempt| step.saturating_mul(attempt))
}

pub struct Retrier {
    inner: Arc<dyn GameProvider>,
    max_attempts: u32,
    backoff: BackoffFn,
    rng: Mutex<StdRng>,
    metrics: Option<Arc<dyn Metrics>>,
    name: String,
}

impl Retrier {
    /// `max_attempts == 0` falls back to 3. Backoff defaults to `attempt × 200ms`.
    pub fn new(inner: Arc<dyn GameProvider>, max_attempts: u32) -> Self {
        let name = match inner.name() {
            "" => "provider".to_string(),
            n => n.to_string(),
        };
        Retrier {
            inner,
            max_attempts: if max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                max_attempts
            },
            backoff: linear_backoff(DEFAULT_BACKOFF_STEP),
            rng: Mutex::new(StdRng::from_entropy()),
            metrics: None,
            name,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffFn) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deterministic jitter, for tests and reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<dyn Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Override the provider name used in logs and metrics. Empty keeps the derived one.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = name;
        }
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed `attempt` before trying again.
    pub fn compute_delay(&self, attempt: u32, err: &FetchError) -> Duration {
        if let Some(rl) = rate_limit_error(err) {
            if !rl.retry_after.is_zero() {
                return rl.retry_after;
            }
        }
        self.half_jitter((self.backoff)(attempt))
    }

    /// `base/2 + uniform(0, base/2]`, to the nearest nanosecond.
    fn half_jitter(&self, base: Duration) -> Duration {
        if base.is_zero() {
            return Duration::ZERO;
        }
        let half = base / 2;
        let half_nanos = u64::try_from(half.as_nanos()).unwrap_or(u64::MAX);
        if half_nanos == 0 {
            return base;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        // Upper bound is `2 * half`, one nanosecond short of `base` when base is odd.
        half + Duration::from_nanos(rng.gen_range(1..=half_nanos))
    }
}

#[async_trait]
impl GameProvider for Retrier {
    async fn fetch_games(
        &self,
        cancel: &CancellationToken,
        date: Option<NaiveDate>,
        tz: Option<&str>,
    ) -> Result<Vec<Game>, FetchError> {
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = self.inner.fetch_games(cancel, date, tz).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_provider_attempt(&self.name, started.elapsed(), result.as_ref().err());
            }

            let err = match result {
                Ok(games) => {
                    if attempt > 1 {
                        info!(
                            provider = %self.name,
                            attempt,
                            games = games.len(),
                            "provider recovered after retry"
                        );
                    }
                    return Ok(games);
                }
                Err(e) => e,
            };

            if cancel.is_cancelled() {
                return Err(FetchError::Canceled);
            }
            if err.is_canceled() || matches!(err, FetchError::Unavailable) {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                warn!(
                    provider = %self.name,
                    attempts = attempt,
                    error = %err,
                    "provider retries exhausted"
                );
                return Err(err);
            }

            let delay = self.compute_delay(attempt, &err);
            match rate_limit_error(&err) {
                Some(rl) => {
                    if !rl.retry_after.is_zero() {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_rate_limit(&self.name, rl.retry_after);
                        }
                    }
                    warn!(
                        provider = %self.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        status_code = rl.status_code,
                        retry_after = ?rl.retry_after,
                        remaining = %rl.remaining,
                        "provider rate limited, retrying"
                    );
                }
                None => {
                    warn!(
                        provider = %self.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        error = %err,
                        "provider fetch failed, retrying"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
