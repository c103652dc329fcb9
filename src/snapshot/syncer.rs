//! Keeps the snapshot directory filled: a backfill pass at startup, then one
//! more pass every day at a configured UTC hour.
//!
//! Date policy per pass:
//! - today and yesterday are always refetched (results still moving)
//! - older days inside the window are fetched only when their file is missing
//! - future days are prefetched only when their file is missing

use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::writer::{SnapshotWriter, WriteOutcome};
use crate::games::TodaySnapshot;
use crate::provider::GameProvider;

const DEFAULT_DAYS: i32 = 7;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_DAILY_HOUR_UTC: i32 = 2;
const DAILY_CHECK_EVERY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Length of the past window, today included
    pub days: i32,
    pub future_days: i32,
    /// Pause between consecutive upstream fetches within a pass
    pub interval: Duration,
    pub daily_hour_utc: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            enabled: true,
            days: DEFAULT_DAYS,
            future_days: 0,
            interval: DEFAULT_INTERVAL,
            daily_hour_utc: DEFAULT_DAILY_HOUR_UTC,
        }
    }
}

impl SyncConfig {
    /// Replace out-of-range values with defaults.
    pub fn normalized(mut self) -> Self {
        if self.days <= 0 {
            self.days = DEFAULT_DAYS;
        }
        self.future_days = self.future_days.max(0);
        if self.interval.is_zero() {
            self.interval = DEFAULT_INTERVAL;
        }
        if !(0..=23).contains(&self.daily_hour_utc) {
            self.daily_hour_utc = DEFAULT_DAILY_HOUR_UTC;
        }
        self
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct SnapshotSyncer {
    config: SyncConfig,
    writer: Option<Arc<SnapshotWriter>>,
    provider: Option<Arc<dyn GameProvider>>,
    clock: Clock,
    /// How often the daily task wakes to compare the hour
    check_every: Duration,
}

impl SnapshotSyncer {
    pub fn new(
        config: SyncConfig,
        writer: Option<Arc<SnapshotWriter>>,
        provider: Option<Arc<dyn GameProvider>>,
    ) -> Self {
        SnapshotSyncer {
            config: config.normalized(),
            writer,
            provider,
            clock: Arc::new(Utc::now),
            check_every: DAILY_CHECK_EVERY,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[cfg(test)]
    fn with_check_every(mut self, every: Duration) -> Self {
        self.check_every = every;
        self
    }

    /// Run the startup backfill, then the daily schedule, until `cancel` fires.
    ///
    /// Returns immediately when sync is disabled or has nothing to write with.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("Snapshot sync disabled");
            return;
        }
        if self.writer.is_none() || self.provider.is_none() {
            warn!("Snapshot sync not configured (missing writer or provider)");
            return;
        }

        info!(
            days = self.config.days,
            future_days = self.config.future_days,
            interval = ?self.config.interval,
            daily_hour_utc = self.config.daily_hour_utc,
            "Snapshot sync started"
        );

        let dates = self.build_dates((self.clock)());
        self.backfill(&cancel, &dates).await;

        let daily = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.daily(cancel).await })
        };

        cancel.cancelled().await;
        if let Err(e) = daily.await {
            error!("Daily snapshot task failed: {}", e);
        }
        info!("Snapshot sync stopped");
    }

    /// Dates to fetch in one pass, in fetch order.
    pub fn build_dates(&self, now: DateTime<Utc>) -> Vec<NaiveDate> {
        let today = now.date_naive();
        let mut dates = vec![today];
        if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
            dates.push(yesterday);
        }

        for i in 2..self.config.days {
            if let Some(day) = today.checked_sub_days(Days::new(i as u64)) {
                if !self.has_snapshot(day) {
                    dates.push(day);
                }
            }
        }

        for i in 1..=self.config.future_days {
            if let Some(day) = today.checked_add_days(Days::new(i as u64)) {
                if !self.has_snapshot(day) {
                    dates.push(day);
                }
            }
        }

        dates
    }

    fn has_snapshot(&self, date: NaiveDate) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|w| w.snapshot_exists(&date_key(date)))
    }

    /// Fetch and persist each date, pausing `interval` between fetches.
    async fn backfill(&self, cancel: &CancellationToken, dates: &[NaiveDate]) {
        let started = Instant::now();
        for (i, date) in dates.iter().enumerate() {
            if cancel.is_cancelled() {
                return;
            }
            if i > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(remaining = dates.len() - i, "Backfill canceled");
                        return;
                    }
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
            self.fetch_and_write(cancel, *date).await;
        }
        info!(
            dates = dates.len(),
            elapsed = ?started.elapsed(),
            "Snapshot backfill pass complete"
        );
    }

    /// Whether the daily pass should run at `now`.
    fn due(&self, now: DateTime<Utc>) -> bool {
        now.hour() as i32 == self.config.daily_hour_utc
    }

    /// Hourly check; runs a full pass when the UTC hour matches.
    async fn daily(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.check_every,
            self.check_every,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = (self.clock)();
                    if !self.due(now) {
                        continue;
                    }
                    info!(hour = now.hour(), "Starting daily snapshot sync");
                    let dates = self.build_dates(now);
                    self.backfill(&cancel, &dates).await;
                }
            }
        }
    }

    async fn fetch_and_write(&self, cancel: &CancellationToken, date: NaiveDate) {
        let key = date_key(date);
        let (Some(provider), Some(writer)) = (&self.provider, &self.writer) else {
            warn!(date = %key, "Snapshot sync has no provider or writer, skipping");
            return;
        };

        let started = Instant::now();
        let games = match provider.fetch_games(cancel, Some(date), None).await {
            Ok(games) => games,
            Err(e) => {
                warn!(date = %key, provider = provider.name(), error = %e, "Snapshot fetch failed");
                return;
            }
        };
        if games.is_empty() {
            warn!(date = %key, provider = provider.name(), "No games returned, snapshot not written");
            return;
        }

        let count = games.len();
        match writer.write_games_snapshot(&key, TodaySnapshot::new(key.clone(), games)) {
            Ok(outcome) => info!(
                date = %key,
                games = count,
                unchanged = outcome == WriteOutcome::Unchanged,
                elapsed = ?started.elapsed(),
                "Snapshot written"
            ),
            Err(e) => error!(date = %key, error = %e, "Snapshot write failed"),
        }
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
