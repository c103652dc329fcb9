//! In-memory view of today's games for the read API.
//!
//! The poller replaces the whole view on every successful cycle; HTTP handlers
//! read from it without touching the upstream API or the disk.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::models::Game;

/// Thread-safe live game store.
#[derive(Clone, Default)]
pub struct GameStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    /// game id → Game
    games: HashMap<String, Game>,
    updated_at: Option<DateTime<Utc>>,
}

impl GameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored games wholesale. Games missing from `games` are dropped.
    pub async fn replace(&self, games: Vec<Game>) {
        let mut inner = self.inner.write().await;
        inner.games.clear();
        for game in games {
            inner.games.insert(game.id.clone(), game);
        }
        inner.updated_at = Some(Utc::now());
        debug!(games = inner.games.len(), "GameStore replaced");
    }

    /// All games sorted by ID.
    pub async fn list(&self) -> Vec<Game> {
        let inner = self.inner.read().await;
        let mut games: Vec<Game> = inner.games.values().cloned().collect();
        games.sort_by(|a, b| a.id.cmp(&b.id));
        games
    }

    pub async fn get(&self, id: &str) -> Option<Game> {
        self.inner.read().await.games.get(id).cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.games.len()
    }

    /// When the store was last replaced, `None` before the first successful poll.
    pub async fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.updated_at
    }
}
