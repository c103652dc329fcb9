use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::games::{Game, GameStore, TodaySnapshot};
use crate::metrics::PrometheusMetrics;
use crate::poller::Poller;
use crate::provider::{FetchError, GameProvider};
use crate::snapshot::SnapshotWriter;

#[derive(Clone)]
pub struct AppState {
    pub store: GameStore,
    pub poller: Poller,
    pub writer: Arc<SnapshotWriter>,
    pub provider: Arc<dyn GameProvider>,
    pub metrics: Arc<PrometheusMetrics>,
    /// Cancelled on shutdown so in-flight admin refreshes stop waiting
    pub shutdown: CancellationToken,
}

type ApiError = (StatusCode, String);

/// Build the Axum router for the read API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/games", get(games_handler))
        .route("/api/games/:id", get(game_handler))
        .route("/api/snapshots", get(manifest_handler))
        .route("/api/snapshots/:date", get(snapshot_handler))
        .route("/api/admin/refresh/:date", post(refresh_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn health_handler() -> &'static str {
    "ok"
}

/// GET /ready: 200 once the poller has data and is not failing repeatedly
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.poller.status().await;
    let code = if status.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// GET /metrics: Prometheus text format
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Serialize)]
struct GamesResponse {
    /// When the poller last replaced the live view; null before the first success
    updated_at: Option<DateTime<Utc>>,
    games: Vec<Game>,
}

/// GET /api/games
async fn games_handler(State(state): State<Arc<AppState>>) -> Json<GamesResponse> {
    Json(GamesResponse {
        updated_at: state.store.updated_at().await,
        games: state.store.list().await,
    })
}

/// GET /api/games/:id
async fn game_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get(&id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("game {} not found", id)))
}

/// GET /api/snapshots
async fn manifest_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    match state.writer.read_manifest() {
        (manifest, None) => Ok(Json(manifest)),
        (_, Some(e)) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// GET /api/snapshots/:date
async fn snapshot_handler(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let date = parse_date(&date)?.format("%Y-%m-%d").to_string();
    match state.writer.read_snapshot(&date) {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("no snapshot for {}", date))),
        Err(e) => {
            warn!(date = %date, error = %e, "Snapshot unreadable");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Serialize)]
struct RefreshResponse {
    date: String,
    games: usize,
    /// False when upstream returned no games; an empty snapshot is never persisted
    written: bool,
}

/// POST /api/admin/refresh/:date: refetch one date and persist it now
async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let day = parse_date(&date)?;
    let key = day.format("%Y-%m-%d").to_string();

    let games = state
        .provider
        .fetch_games(&state.shutdown, Some(day), None)
        .await
        .map_err(|e| {
            let code = match e {
                FetchError::Canceled | FetchError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            (code, e.to_string())
        })?;

    let count = games.len();
    if count > 0 {
        state
            .writer
            .write_games_snapshot(&key, TodaySnapshot::new(key.clone(), games))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }

    info!(date = %key, games = count, "Snapshot refreshed via admin API");
    Ok(Json(RefreshResponse {
        date: key,
        games: count,
        written: count > 0,
    }))
}

/// Parse a `YYYY-MM-DD` path segment, rejecting anything else with 400.
fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid date {:?}, expected YYYY-MM-DD", raw),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::provider::testing::ScriptedProvider;

    fn state(dir: &std::path::Path, provider: Arc<ScriptedProvider>) -> Arc<AppState> {
        let store = GameStore::new();
        let provider = provider as Arc<dyn GameProvider>;
        Arc::new(AppState {
            poller: Poller::new(Arc::clone(&provider), store.clone(), Duration::from_secs(60), None),
            store,
            writer: Arc::new(SnapshotWriter::new(dir, 14)),
            provider,
            metrics: Arc::new(PrometheusMetrics::new()),
            shutdown: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn test_ready_reflects_poller_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), Arc::new(ScriptedProvider::ok(&["1"])));

        let resp = ready_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.poller.poll_once(&CancellationToken::new()).await;
        let resp = ready_handler(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_then_read_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), Arc::new(ScriptedProvider::ok(&["2", "1"])));
        let today = chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string();

        let missing = snapshot_handler(State(Arc::clone(&state)), Path(today.clone())).await;
        assert_eq!(missing.err().map(|e| e.0), Some(StatusCode::NOT_FOUND));

        let resp = refresh_handler(State(Arc::clone(&state)), Path(today.clone()))
            .await
            .map(IntoResponse::into_response)
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let snap = state.writer.read_snapshot(&today).unwrap().unwrap();
        assert_eq!(snap.games.len(), 2);
        assert_eq!(snap.games[0].id, "1");
    }

    #[tokio::test]
    async fn test_games_carry_last_update_time() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), Arc::new(ScriptedProvider::ok(&["2", "1"])));

        let Json(empty) = games_handler(State(Arc::clone(&state))).await;
        assert!(empty.updated_at.is_none());
        assert!(empty.games.is_empty());

        state.poller.poll_once(&CancellationToken::new()).await;
        let Json(body) = games_handler(State(state)).await;
        assert!(body.updated_at.is_some());
        let ids: Vec<_> = body.games.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
    }

    #[tokio::test]
    async fn test_metrics_rendered_as_prometheus_text() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), Arc::new(ScriptedProvider::ok(&[])));
        crate::metrics::Metrics::record_poller_cycle(
            state.metrics.as_ref(),
            Duration::from_millis(5),
            None,
        );

        let resp = metrics_handler(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }

    #[tokio::test]
    async fn test_refresh_upstream_failure_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), Arc::new(ScriptedProvider::always_failing()));
        let err = refresh_handler(State(state), Path("2024-01-02".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-01-02").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert_eq!(parse_date("../etc").unwrap_err().0, StatusCode::BAD_REQUEST);
        assert_eq!(parse_date("2024-02-30").unwrap_err().0, StatusCode::BAD_REQUEST);
    }
}
