use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::snapshot::SyncConfig;

/// Sports schedule cache: resilient upstream polling plus dated on-disk snapshots
#[derive(Parser, Debug, Clone)]
#[command(name = "schedule-cache", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Root directory for snapshots and the manifest
    #[arg(long, env = "SNAPSHOT_DIR", default_value = "data")]
    pub snapshot_dir: String,

    /// Days of snapshots to keep before pruning
    #[arg(long, env = "RETENTION_DAYS", default_value = "14")]
    pub retention_days: i64,

    /// TheSportsDB API base URL
    #[arg(
        long,
        env = "SPORTSDB_API_URL",
        default_value = "https://www.thesportsdb.com/api/v1/json"
    )]
    pub sportsdb_api_url: String,

    /// TheSportsDB API key (free tier key used when unset)
    #[arg(long, env = "SPORTSDB_API_KEY")]
    pub sportsdb_api_key: Option<String>,

    /// Sport filter passed to the schedule API
    #[arg(long, env = "SPORT", default_value = "Soccer")]
    pub sport: String,

    /// Minimum spacing between upstream calls, in milliseconds
    #[arg(long, env = "RATE_LIMIT_MS", default_value = "2000")]
    pub rate_limit_ms: u64,

    /// Attempts per upstream fetch, including the first
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    pub retry_attempts: u32,

    /// Backoff step in milliseconds; attempt N waits about N × step
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "200")]
    pub retry_backoff_ms: u64,

    /// Fixed seed for retry jitter; random when unset
    #[arg(long, env = "RETRY_SEED")]
    pub retry_seed: Option<u64>,

    /// Live poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "30")]
    pub poll_interval_secs: u64,

    /// Enable the snapshot backfill and daily refresh
    #[arg(long, env = "SYNC_ENABLED", default_value = "true", action = clap::ArgAction::Set)]
    pub sync_enabled: bool,

    /// Past days covered by the snapshot window (today included)
    #[arg(long, env = "SYNC_DAYS", default_value = "7")]
    pub sync_days: i32,

    /// Future days to prefetch
    #[arg(long, env = "SYNC_FUTURE_DAYS", default_value = "2")]
    pub sync_future_days: i32,

    /// Pause between snapshot fetches, in seconds
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "60")]
    pub sync_interval_secs: u64,

    /// UTC hour (0-23) at which the daily snapshot pass runs
    #[arg(long, env = "SYNC_DAILY_HOUR_UTC", default_value = "2")]
    pub sync_daily_hour_utc: i32,

    /// Upper bound on graceful shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid listen_addr {:?}: {}", self.listen_addr, e))?;
        if self.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be at least 1");
        }
        if !(0..=23).contains(&self.sync_daily_hour_utc) {
            anyhow::bail!("sync_daily_hour_utc must be between 0 and 23");
        }
        if self.snapshot_dir.trim().is_empty() {
            anyhow::bail!("snapshot_dir must not be empty");
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            enabled: self.sync_enabled,
            days: self.sync_days,
            future_days: self.sync_future_days,
            interval: Duration::from_secs(self.sync_interval_secs),
            daily_hour_utc: self.sync_daily_hour_utc,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
