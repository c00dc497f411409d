use serde::{Deserialize, Serialize};

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct NewGameRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NewGameQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub uci: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
    pub sender: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgetRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

// =============================================================================
// Broadcast payloads (wire contract shared with the viewer page)
// =============================================================================

/// Full self-contained snapshot of a session, pushed to every watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub kind: String,
    pub fen: String,
    pub turn: String,
    pub status: String,
    pub pgn: String,
    pub uci: Vec<String>,
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
    pub watchers: usize,
}

/// Initial SSE frame: the snapshot plus the connecting client's role.
#[derive(Debug, Serialize)]
pub struct ClientState {
    #[serde(flatten)]
    pub state: GameState,
    pub color: Option<String>,
    pub role: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionPayload {
    pub kind: String,
    pub emoji: String,
    pub at: i64,
    pub sender: String,
}

// =============================================================================
// Response bodies: explicit success/error variants per endpoint
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub ok: bool,
    pub error: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GameCreated {
    pub ok: bool,
    pub id: String,
    pub color: String,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Serialize)]
pub struct MoveAccepted {
    pub ok: bool,
    pub state: GameState,
}

#[derive(Debug, Serialize)]
pub struct MoveRejected {
    pub ok: bool,
    pub error: String,
    pub state: GameState,
}

/// Aggregate game counts from the durable store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub started: i64,
    pub active: i64,
    pub completed: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub ok: bool,
    pub stats: Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_state_wire_shape() {
        let state = GameState {
            kind: "state".into(),
            fen: "fen".into(),
            turn: "white".into(),
            status: String::new(),
            pgn: "*".into(),
            uci: vec!["e2e4".into()],
            last_seen: 42,
            watchers: 1,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["kind"], "state");
        assert_eq!(json["lastSeen"], 42);
        assert_eq!(json["uci"][0], "e2e4");
    }

    #[test]
    fn client_state_flattens_snapshot() {
        let state = GameState {
            kind: "state".into(),
            fen: "fen".into(),
            turn: "white".into(),
            status: String::new(),
            pgn: "*".into(),
            uci: vec![],
            last_seen: 0,
            watchers: 0,
        };
        let cs = ClientState {
            state,
            color: Some("black".into()),
            role: "player".into(),
            client_id: "c1".into(),
        };
        let json = serde_json::to_value(&cs).unwrap();
        assert_eq!(json["fen"], "fen");
        assert_eq!(json["color"], "black");
        assert_eq!(json["role"], "player");
        assert_eq!(json["clientId"], "c1");
    }

    #[test]
    fn spectators_serialize_a_null_color() {
        let state = GameState {
            kind: "state".into(),
            fen: String::new(),
            turn: "white".into(),
            status: String::new(),
            pgn: "*".into(),
            uci: vec![],
            last_seen: 0,
            watchers: 0,
        };
        let cs = ClientState {
            state,
            color: None,
            role: "spectator".into(),
            client_id: "c2".into(),
        };
        let json = serde_json::to_value(&cs).unwrap();
        assert!(json["color"].is_null());
    }
}
