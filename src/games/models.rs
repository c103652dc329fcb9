use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled or played game as fetched from the upstream schedule API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// Upstream-assigned event ID
    pub id: String,
    pub sport: String,
    pub league: String,
    pub season: Option<String>,
    pub home: Team,
    pub away: Team,
    /// Present once the game has started
    pub score: Option<Score>,
    pub status: GameStatus,
    /// Kick-off / tip-off time, when the upstream provides one
    pub start_time: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: i32,
    pub away: i32,
}

/// Provenance of a game record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Provider name, e.g. "TheSportsDB"
    pub provider: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    HalfTime,
    Finished,
    Postponed,
    Cancelled,
}

/// All games known for one calendar date, as persisted under `games/{date}.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodaySnapshot {
    /// `YYYY-MM-DD`
    pub date: String,
    pub games: Vec<Game>,
}

impl TodaySnapshot {
    pub fn new(date: impl Into<String>, games: Vec<Game>) -> Self {
        TodaySnapshot {
            date: date.into(),
            games,
        }
    }
}
