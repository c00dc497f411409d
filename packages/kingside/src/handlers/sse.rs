use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use futures::StreamExt;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{ApiError, ClientState, StreamQuery};
use crate::AppState;

/// Idle connections get an empty JSON frame this often so proxies and
/// clients can tell a quiet game from a dead connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// GET /sse/{id}: subscribe to a game's broadcast feed. The first frame is
/// a full snapshot annotated with the caller's seat; every later frame is
/// either a broadcast payload or a heartbeat.
pub async fn game_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let client_id = resolve_client_id(&query, &headers);

    let (session, side) = match state.hub.get(&id, &client_id).await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to load game {id}: {err:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("game unavailable")),
            )
                .into_response();
        }
    };

    let (guard, rx) = Arc::clone(&session).register_watcher();
    let role = if side.is_some() { "player" } else { "spectator" };
    debug!("client {client_id} watching game {id} as {role}");

    let last_seen = session.touch();
    {
        let store = state.hub.store().clone();
        let game_id = id.clone();
        tokio::spawn(async move {
            if let Err(err) = store.update_last_seen(&game_id, last_seen).await {
                warn!("failed to update last seen of {game_id}: {err:#}");
            }
        });
    }

    let hello = ClientState {
        state: session.state(),
        color: side.map(|s| s.as_str().to_string()),
        role: role.to_string(),
        client_id,
    };
    let hello = serde_json::to_string(&hello).unwrap_or_else(|_| "{}".to_string());

    let heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    let stream = stream::once(async move { Ok::<_, Infallible>(Event::default().data(hello)) })
        .chain(stream::unfold(
            (rx, heartbeat, guard),
            |(mut rx, mut heartbeat, guard)| async move {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(payload) => {
                            Some((Ok(Event::default().data(payload)), (rx, heartbeat, guard)))
                        }
                        // session dropped out of memory, end the stream
                        None => None,
                    },
                    _ = heartbeat.tick() => {
                        Some((Ok(Event::default().data("{}")), (rx, heartbeat, guard)))
                    }
                }
            },
        ));

    Sse::new(stream).into_response()
}

/// Watcher identity: explicit query parameter, then the X-User-ID header,
/// then a throwaway id for anonymous spectators.
fn resolve_client_id(query: &StreamQuery, headers: &HeaderMap) -> String {
    if let Some(id) = &query.client_id {
        if !id.trim().is_empty() {
            return id.clone();
        }
    }
    if let Some(id) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        if !id.trim().is_empty() {
            return id.to_string();
        }
    }
    Uuid::new_v4().to_string()
}
