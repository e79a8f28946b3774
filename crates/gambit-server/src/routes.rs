//! HTTP surface: game creation, join, token claim, lobby, archive listing,
//! PGN export, and the health probe. The session engine does the real work;
//! these handlers marshal requests, cookies, and status codes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use gambit_gateway::Gateway;
use gambit_session::{keys, CreateGameParams};
use gambit_types::{
    frames::parse_canonical_uuid, CreatorColor, GameError, GameStatus, PlayerRole,
};

use crate::config::Config;
use crate::pgn;

/// Seven-day cookie, scoped to the whole site so the rematch landing page
/// can read it back.
const COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

const ARCHIVE_PAGE_SIZE: u32 = 20;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub config: Arc<Config>,
}

fn seat_cookie(game_id: Uuid, token: Uuid) -> String {
    format!(
        "chess_token_{game_id}={token}; Path=/; Max-Age={COOKIE_MAX_AGE_SECS}; HttpOnly; SameSite=Lax"
    )
}

fn cookie_header(headers: &HeaderMap) -> &str {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn game_id_from_path(raw: &str) -> Result<Uuid, StatusCode> {
    parse_canonical_uuid(raw).ok_or(StatusCode::BAD_REQUEST)
}

// ── create ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateGameRequest {
    pub is_public: bool,
    pub time_initial_ms: u64,
    pub time_increment_ms: u64,
    pub creator_color: Option<CreatorColor>,
}

#[derive(Debug, Serialize)]
pub struct CreateGameResponse {
    pub id: Uuid,
    pub token: Uuid,
}

pub async fn create_game(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<CreateGameRequest>,
) -> impl IntoResponse {
    let now_ms = gambit_types::now_ms();
    let ip = addr.ip().to_string();

    let decision = state.gateway.lifecycle.store().hot().rate_limit(
        &keys::rate_limit_key("create", &ip.replace(':', "_")),
        state.config.rate_limit_game_create_max,
        state.config.rate_limit_game_create_window_secs * 1_000,
        now_ms,
    );
    if !decision.allowed {
        return rate_limited(decision.retry_after_ms);
    }

    let params = CreateGameParams {
        is_public: req.is_public,
        creator_ip: Some(ip),
        time_initial_ms: req.time_initial_ms,
        time_increment_ms: req.time_increment_ms,
        creator_color: req.creator_color.unwrap_or(CreatorColor::Random),
    };
    match state.gateway.lifecycle.create_game(&params, now_ms) {
        Ok((id, token)) => (
            StatusCode::CREATED,
            [(header::SET_COOKIE, seat_cookie(id, token))],
            Json(serde_json::json!({ "id": id, "token": token })),
        )
            .into_response(),
        Err(GameError::QuotaExceeded) => rate_limited(0),
        Err(e) => internal(e),
    }
}

// ── join / claim ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub role: String,
}

pub async fn join_game(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let id = game_id_from_path(&raw_id)?;
    let now_ms = gambit_types::now_ms();
    let store = state.gateway.lifecycle.store();

    let seats = store
        .get_seats(id, now_ms)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    // A returning seat holder gets its existing role, no new cookie.
    let existing = gambit_gateway::token_from_cookies(cookie_header(&headers), id);
    if seats.role_of(existing) != PlayerRole::Spectator {
        return Ok(Json(JoinResponse { role: "existing".into() }).into_response());
    }

    match state.gateway.lifecycle.join_game(id, now_ms) {
        Ok(outcome) => {
            // Tell attached peers the seats are final now.
            gambit_gateway::notify_seats_changed(&state.gateway, id, &outcome.seats, now_ms)
                .await;
            Ok((
                [(header::SET_COOKIE, seat_cookie(id, outcome.token))],
                Json(JoinResponse { role: outcome.color.to_string() }),
            )
                .into_response())
        }
        // Full room: the caller watches instead.
        Err(GameError::NotWaiting) | Err(GameError::AlreadyFull) => {
            Ok(Json(JoinResponse { role: "spectator".into() }).into_response())
        }
        Err(GameError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(game = %id, "join failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub token: Uuid,
}

/// Rematch landing: bind a token handed out over the WS to a fresh cookie.
pub async fn claim_seat(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let id = game_id_from_path(&raw_id)?;
    let now_ms = gambit_types::now_ms();

    let seats = state
        .gateway
        .lifecycle
        .store()
        .get_seats(id, now_ms)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let role = seats.role_of(Some(req.token));
    match role {
        PlayerRole::White | PlayerRole::Black => Ok((
            [(header::SET_COOKIE, seat_cookie(id, req.token))],
            Json(JoinResponse { role: role.color().map(|c| c.to_string()).unwrap_or_default() }),
        )),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

// ── lobby and archive listings ──────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyEntry {
    pub id: Uuid,
    pub status: GameStatus,
    pub players: u8,
    pub spectators: u64,
    pub time_initial: u64,
    pub time_increment: u64,
    pub created_at: u64,
}

pub async fn list_public(State(state): State<AppState>) -> impl IntoResponse {
    let now_ms = gambit_types::now_ms();
    let store = state.gateway.lifecycle.store();
    let games: Vec<LobbyEntry> = store
        .list_public(now_ms)
        .into_iter()
        .map(|record| {
            let players = match record.status {
                GameStatus::Waiting => 1,
                _ => 2,
            };
            LobbyEntry {
                id: record.id,
                status: record.status,
                players,
                spectators: store.spectator_count(record.id, now_ms),
                time_initial: record.time_initial_ms,
                time_increment: record.time_increment_ms,
                created_at: record.created_at,
            }
        })
        .collect();
    Json(serde_json::json!({ "games": games }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ArchiveQuery {
    pub page: Option<u32>,
}

pub async fn list_archive(
    State(state): State<AppState>,
    Query(query): Query<ArchiveQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * ARCHIVE_PAGE_SIZE;

    let listing = state
        .gateway
        .lifecycle
        .store()
        .archive()
        .list_terminal(ARCHIVE_PAGE_SIZE, offset, None)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let total_pages = listing.total.div_ceil(ARCHIVE_PAGE_SIZE as u64).max(1);
    let games: Vec<serde_json::Value> = listing
        .games
        .iter()
        .map(|g| {
            serde_json::json!({
                "id": g.id,
                "status": g.status,
                "result": g.result,
                "timeInitialMs": g.time_initial_ms,
                "timeIncrementMs": g.time_increment_ms,
                "createdAt": g.created_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "games": games,
        "total": listing.total,
        "page": page,
        "totalPages": total_pages,
    })))
}

// ── PGN export ──────────────────────────────────────────────────────────

pub async fn export_pgn(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let id = game_id_from_path(&raw_id)?;
    let now_ms = gambit_types::now_ms();
    let store = state.gateway.lifecycle.store();

    // Prefer the live room; fall back to the archive.
    let text = match store.get_game(id, now_ms) {
        Ok(Some(record)) => {
            let (moves, _) = store.load_move_log(id, now_ms);
            pgn::render(&raw_id, record.result, record.created_at, &moves)
        }
        _ => {
            let archived = store
                .archive()
                .find_game(&raw_id)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .ok_or(StatusCode::NOT_FOUND)?;
            let moves = store
                .archive()
                .find_moves(&raw_id)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            pgn::render(&raw_id, Some(archived.result), archived.created_at, &moves)
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-chess-pgn".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{raw_id}.pgn\""),
            ),
        ],
        text,
    ))
}

// ── health ──────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now_ms = gambit_types::now_ms();
    let store = state.gateway.lifecycle.store();

    let hot_start = Instant::now();
    let hot_keys = store.hot().len(now_ms);
    let hot_latency = hot_start.elapsed().as_millis() as u64;

    let archive_start = Instant::now();
    let archive_up = store.archive().ping().is_ok();
    let archive_latency = archive_start.elapsed().as_millis() as u64;

    let healthy = archive_up;
    let body = Json(serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "dependencies": {
            "hotStore": { "up": true, "latencyMs": hot_latency, "keys": hot_keys },
            "archive": { "up": archive_up, "latencyMs": archive_latency },
        },
    }));
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, body)
}

// ── error helpers ───────────────────────────────────────────────────────

fn rate_limited(retry_after_ms: u64) -> axum::response::Response {
    let secs = retry_after_ms.div_ceil(1_000).max(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, secs.to_string())],
        Json(serde_json::json!({ "error": "rate limited" })),
    )
        .into_response()
}

fn internal(e: GameError) -> axum::response::Response {
    warn!("request failed: {e}");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
