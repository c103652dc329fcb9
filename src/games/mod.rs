pub mod models;
pub mod store;

pub use models::{Game, GameStatus, Meta, Score, Team, TodaySnapshot};
pub use store::GameStore;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;

    use super::models::*;

    /// Minimal game used across module tests.
    pub fn game(id: &str) -> Game {
        Game {
            id: id.to_string(),
            sport: "soccer".into(),
            league: "Premier League".into(),
            season: Some("2023-2024".into()),
            home: Team {
                id: None,
                name: "Arsenal".into(),
            },
            away: Team {
                id: None,
                name: "Chelsea".into(),
            },
            score: None,
            status: GameStatus::Scheduled,
            start_time: None,
            venue: None,
            meta: Meta {
                provider: "test".into(),
                fetched_at: Utc::now(),
            },
        }
    }
}
