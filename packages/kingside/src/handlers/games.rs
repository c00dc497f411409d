use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::models::{
    Ack, ApiError, ForgetRequest, GameCreated, MoveAccepted, MoveRejected, MoveRequest,
    NewGameQuery, NewGameRequest, ReactionPayload, ReactionRequest, ReleaseRequest, StatsResponse,
};
use crate::session::MoveOutcome;
use crate::store::{GameStateUpdate, Store};
use crate::AppState;

/// Reactions a viewer may send. Everything else is refused.
const ALLOWED_EMOJI: &[&str] = &["👍", "👎", "😄", "😮", "😢", "🔥", "👏", "🤔"];

fn api_error(status: StatusCode, message: &str) -> Response {
    (status, Json(ApiError::new(message))).into_response()
}

/// POST /new: create a game owned by the posted user id.
pub async fn create_game(
    State(state): State<AppState>,
    body: Result<Json<NewGameRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return api_error(StatusCode::BAD_REQUEST, "bad json");
    };
    if req.user_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "missing user id");
    }
    match state.hub.create_session(&req.user_id).await {
        Ok((id, side)) => Json(GameCreated {
            ok: true,
            id,
            color: side.as_str().to_string(),
        })
        .into_response(),
        Err(err) => {
            error!("game creation failed: {err:#}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "could not create game")
        }
    }
}

/// GET /new: browser-friendly creation, redirects to the new game's page.
/// The caller must supply its identity; minting one server-side would seat
/// an owner the browser has no way to act as.
pub async fn create_game_redirect(
    State(state): State<AppState>,
    Query(query): Query<NewGameQuery>,
) -> Response {
    let Some(user_id) = query.user_id.filter(|id| !id.trim().is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "missing user id");
    };
    match state.hub.create_session(&user_id).await {
        Ok((id, _)) => Redirect::to(&format!("/{id}")).into_response(),
        Err(err) => {
            error!("game creation failed: {err:#}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "could not create game")
        }
    }
}

/// POST /move/{id}: validate and apply a move, then broadcast and persist.
pub async fn play_move(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MoveRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return api_error(StatusCode::BAD_REQUEST, "bad json");
    };
    if req.client_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "missing client id");
    }
    let (session, _) = match state.hub.get(&id, "").await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to load game {id}: {err:#}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "game unavailable");
        }
    };

    match session.play_move(&req.client_id, &req.uci) {
        Ok(outcome) => {
            session.broadcast_state();
            if outcome.finished {
                info!("game {id} finished: {}", outcome.state.status);
            }
            let store = state.hub.store().clone();
            let client_id = req.client_id.clone();
            let state_snapshot = outcome.state.clone();
            tokio::spawn(async move {
                persist_move(&store, &id, &client_id, &outcome).await;
            });
            Json(MoveAccepted {
                ok: true,
                state: state_snapshot,
            })
            .into_response()
        }
        Err((rejection, snapshot)) => (
            StatusCode::BAD_REQUEST,
            Json(MoveRejected {
                ok: false,
                error: rejection.to_string(),
                state: snapshot,
            }),
        )
            .into_response(),
    }
}

/// Mirror an accepted move to the store. Runs off the request path; failures
/// are logged, never surfaced to the mover.
async fn persist_move(store: &Store, game_id: &str, client_id: &str, outcome: &MoveOutcome) {
    let update = GameStateUpdate {
        fen: Some(outcome.state.fen.clone()),
        pgn: Some(outcome.state.pgn.clone()),
        status: Some(outcome.state.status.clone()),
        result: outcome.finished.then(|| {
            outcome
                .result
                .map(str::to_string)
                .unwrap_or_default()
        }),
        active: Some(!outcome.finished),
        last_seen: Some(outcome.last_seen),
        completed_at: outcome.finished.then(Utc::now),
    };
    if let Err(err) = store.save_game_state(game_id, update).await {
        warn!("failed to persist state of {game_id}: {err:#}");
    }
    if let Err(err) = store
        .record_move(game_id, client_id, outcome.number, &outcome.uci, outcome.side)
        .await
    {
        warn!("failed to record move {} of {game_id}: {err:#}", outcome.uci);
    }
    let role = if outcome.by_owner { "owner" } else { "player" };
    if let Err(err) = store
        .ensure_user_session(game_id, client_id, Some(outcome.side), role)
        .await
    {
        warn!("failed to refresh participant {client_id} of {game_id}: {err:#}");
    }
}

/// POST /react/{id}: fan an emoji out to every watcher, rate limited per
/// sender within the session.
pub async fn send_reaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ReactionRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return api_error(StatusCode::BAD_REQUEST, "bad json");
    };
    if req.sender.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "missing user id");
    }
    if !ALLOWED_EMOJI.contains(&req.emoji.as_str()) {
        return api_error(StatusCode::BAD_REQUEST, "bad emoji");
    }
    let (session, _) = match state.hub.get(&id, "").await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to load game {id}: {err:#}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "game unavailable");
        }
    };
    if let Err(wait) = session.can_react(&req.sender) {
        return api_error(StatusCode::BAD_REQUEST, &format!("cooldown {wait}s"));
    }
    session.broadcast_reaction(&ReactionPayload {
        kind: "emoji".to_string(),
        emoji: req.emoji,
        at: Utc::now().timestamp_millis(),
        sender: req.sender,
    });
    Json(Ack::ok()).into_response()
}

/// POST /release/{id}: free a participant's seat. Owner only, even when the
/// target is the caller itself.
pub async fn release_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return api_error(StatusCode::BAD_REQUEST, "bad json");
    };
    if req.client_id.trim().is_empty() || req.target_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "missing client id");
    }
    let (session, _) = match state.hub.get(&id, "").await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to load game {id}: {err:#}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "game unavailable");
        }
    };
    if !session.is_owner(&req.client_id) {
        return api_error(StatusCode::BAD_REQUEST, "not owner");
    }

    session.remove_client(&req.target_id);
    session.broadcast_state();
    let store = state.hub.store().clone();
    let target = req.target_id.clone();
    tokio::spawn(async move {
        if let Err(err) = store.deactivate_user_session(&id, &target).await {
            warn!("failed to deactivate {target} in {id}: {err:#}");
        }
    });
    Json(Ack::ok()).into_response()
}

/// POST /forget/{id}: owner-only teardown. The session is abandoned in the
/// store, cleared of participants, and dropped from memory.
pub async fn forget_game(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ForgetRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return api_error(StatusCode::BAD_REQUEST, "bad json");
    };
    if req.user_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "missing user id");
    }
    let (session, _) = match state.hub.get(&id, "").await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to load game {id}: {err:#}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "game unavailable");
        }
    };
    if !session.is_owner(&req.user_id) {
        return api_error(StatusCode::BAD_REQUEST, "not owner");
    }

    session.clear_participants();
    session.broadcast_state();
    state.hub.remove(&id).await;
    info!("game {id} forgotten by its owner");

    let store = state.hub.store().clone();
    tokio::spawn(async move {
        if let Err(err) = store.forget_game(&id).await {
            warn!("failed to mark {id} abandoned: {err:#}");
        }
        if let Err(err) = store.deactivate_all_sessions(&id).await {
            warn!("failed to deactivate participants of {id}: {err:#}");
        }
    });
    Json(Ack::ok()).into_response()
}

/// GET /api/stats: aggregate counters from the store.
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.hub.store().fetch_stats().await {
        Ok(stats) => Json(StatsResponse { ok: true, stats }).into_response(),
        Err(err) => {
            error!("failed to load stats: {err:#}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "could not load stats")
        }
    }
}
