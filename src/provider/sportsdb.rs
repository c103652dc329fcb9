use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{FetchError, GameProvider, RateLimitError};
use crate::games::{Game, GameStatus, Meta, Score, Team};

const PROVIDER_NAME: &str = "TheSportsDB";

/// Schedule provider backed by TheSportsDB v1 `eventsday` endpoint.
/// Docs: <https://www.thesportsdb.com/api.php>
pub struct SportsDbClient {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
    sport: String,
}

impl SportsDbClient {
    pub fn new(api_key: Option<&str>, base_url: Option<&str>, sport: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(SportsDbClient {
            http,
            // "3" is TheSportsDB's public free-tier key; replace with a paid key for higher limits
            api_key: api_key.unwrap_or("3").to_string(),
            base_url: base_url
                .unwrap_or("https://www.thesportsdb.com/api/v1/json")
                .trim_end_matches('/')
                .to_string(),
            sport: sport.to_string(),
        })
    }

    fn events_url(&self, date: NaiveDate, tz: Option<&str>) -> anyhow::Result<Url> {
        let base = format!("{}/{}/eventsday.php", self.base_url, self.api_key);
        let day = date.format("%Y-%m-%d").to_string();
        let mut params = vec![("d", day.as_str()), ("s", self.sport.as_str())];
        if let Some(tz) = tz.filter(|t| !t.is_empty()) {
            params.push(("tz", tz));
        }
        Url::parse_with_params(&base, &params).context("Invalid TheSportsDB URL")
    }

    fn status_from_str(s: &str, postponed: bool) -> GameStatus {
        if postponed {
            return GameStatus::Postponed;
        }
        match s.to_lowercase().as_str() {
            "" | "not started" | "ns" | "tbd" => GameStatus::Scheduled,
            "half time" | "ht" | "halftime" => GameStatus::HalfTime,
            "match finished" | "ft" | "finished" | "aet" | "pen" | "aot" => GameStatus::Finished,
            "postponed" | "pst" => GameStatus::Postponed,
            "cancelled" | "canc" | "abandoned" => GameStatus::Cancelled,
            _ => GameStatus::InProgress,
        }
    }
}

#[async_trait]
impl GameProvider for SportsDbClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_games(
        &self,
        cancel: &CancellationToken,
        date: Option<NaiveDate>,
        tz: Option<&str>,
    ) -> Result<Vec<Game>, FetchError> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let url = self.events_url(date, tz)?;
        debug!(provider = PROVIDER_NAME, url = %url, "Fetching schedule");

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Canceled),
            resp = self.http.get(url).send() => resp.context("TheSportsDB request failed")?,
        };

        let status = resp.status();
        if let Some(rl) = rate_limit_from_response(status, resp.headers()) {
            return Err(rl.into());
        }
        if !status.is_success() {
            return Err(anyhow::anyhow!("TheSportsDB error: {}", status).into());
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .context("Failed to parse TheSportsDB response")?;

        Ok(parse_events_response(&raw, Utc::now()))
    }
}

/// Builds a [`RateLimitError`] for 429 responses.
fn rate_limit_from_response(status: StatusCode, headers: &HeaderMap) -> Option<RateLimitError> {
    if status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or("")
            .to_string()
    };
    let retry_after = header("retry-after")
        .parse::<u64>()
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO);
    Some(RateLimitError {
        provider: PROVIDER_NAME.to_string(),
        status_code: status.as_u16(),
        retry_after,
        remaining: header("x-ratelimit-remaining"),
        message: status
            .canonical_reason()
            .unwrap_or("rate limited")
            .to_string(),
    })
}

fn int_field(ev: &serde_json::Value, key: &str) -> Option<i32> {
    ev[key]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| ev[key].as_i64().map(|v| v as i32))
}

fn str_field(ev: &serde_json::Value, key: &str) -> Option<String> {
    ev[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_start_time(ev: &serde_json::Value) -> Option<DateTime<Utc>> {
    let ts = ev["strTimestamp"].as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    // TheSportsDB usually omits the offset; timestamps are UTC.
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_events_response(raw: &serde_json::Value, fetched_at: DateTime<Utc>) -> Vec<Game> {
    // "events" is null on days without fixtures
    let events = match raw["events"].as_array() {
        Some(a) => a,
        None => return vec![],
    };

    events
        .iter()
        .filter_map(|ev| {
            let id = str_field(ev, "idEvent")?;
            let home_name = str_field(ev, "strHomeTeam")?;
            let away_name = str_field(ev, "strAwayTeam")?;

            let score = match (int_field(ev, "intHomeScore"), int_field(ev, "intAwayScore")) {
                (Some(home), Some(away)) => Some(Score { home, away }),
                _ => None,
            };
            let postponed = ev["strPostponed"]
                .as_str()
                .is_some_and(|s| s.eq_ignore_ascii_case("yes"));
            let status =
                SportsDbClient::status_from_str(ev["strStatus"].as_str().unwrap_or(""), postponed);

            Some(Game {
                id,
                sport: ev["strSport"]
                    .as_str()
                    .unwrap_or("soccer")
                    .to_lowercase(),
                league: str_field(ev, "strLeague").unwrap_or_else(|| "unknown".to_string()),
                season: str_field(ev, "strSeason"),
                home: Team {
                    id: str_field(ev, "idHomeTeam"),
                    name: home_name,
                },
                away: Team {
                    id: str_field(ev, "idAwayTeam"),
                    name: away_name,
                },
                score,
                status,
                start_time: parse_start_time(ev),
                venue: str_field(ev, "strVenue"),
                meta: Meta {
                    provider: PROVIDER_NAME.to_string(),
                    fetched_at,
                },
            })
        })
        .collect()
}
