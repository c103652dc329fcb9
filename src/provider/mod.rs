pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod sportsdb;

pub use error::{rate_limit_error, FetchError, RateLimitError};
pub use rate_limit::RateLimiter;
pub use retry::Retrier;
pub use sportsdb::SportsDbClient;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::games::Game;

/// Capability every schedule source (and every decorator around one) implements.
///
/// Implementations must be safe to call concurrently: the poller, the
/// snapshot syncer and the admin API share one provider chain.
#[async_trait]
pub trait GameProvider: Send + Sync {
    /// Fetch games for `date`, or for "today" in the provider's default
    /// timezone when `date` is `None`. `tz` is an optional IANA zone name.
    async fn fetch_games(
        &self,
        cancel: &CancellationToken,
        date: Option<NaiveDate>,
        tz: Option<&str>,
    ) -> Result<Vec<Game>, FetchError>;

    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str;
}
