use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use crate::models::{GameState, ReactionPayload};
use crate::rules::{Board, Side};
use crate::store::PersistedGame;

/// Bounded per-watcher queue. A saturated queue drops messages instead of
/// stalling the broadcaster; each payload is a full snapshot, so a viewer
/// catches up on its next successful delivery.
pub const WATCHER_QUEUE_CAPACITY: usize = 16;

/// Per-sender reaction cooldown within one session.
pub const REACTION_COOLDOWN: Duration = Duration::from_secs(5);

/// Why a move was refused. The wire error strings come from `Display`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoveRejection {
    #[error("unknown client")]
    UnknownClient,
    #[error("wrong color")]
    WrongColor,
    #[error("not your turn")]
    NotYourTurn,
    #[error("{0}")]
    Illegal(String),
}

/// What an accepted move produced, for broadcasting and persistence.
#[derive(Debug)]
pub struct MoveOutcome {
    pub state: GameState,
    /// The move as actually applied (after promotion defaulting).
    pub uci: String,
    /// Half-move sequence number, 1-based.
    pub number: usize,
    pub side: Side,
    pub by_owner: bool,
    pub finished: bool,
    pub result: Option<&'static str>,
    pub last_seen: DateTime<Utc>,
}

/// One shareable game: authoritative position, participants, watchers.
/// All mutable state lives behind a single lock; critical sections are
/// short and never held across an await point.
pub struct Session {
    pub id: String,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    board: Board,
    watchers: HashMap<u64, mpsc::Sender<String>>,
    next_watcher_id: u64,
    last_react: HashMap<String, Instant>,
    last_seen: DateTime<Utc>,
    owner_id: String,
    owner_color: Option<Side>,
    clients: HashMap<String, Side>,
}

impl Session {
    /// Fresh session with a randomly chosen owner color and no participants.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            inner: Mutex::new(SessionInner {
                board: Board::new(),
                watchers: HashMap::new(),
                next_watcher_id: 0,
                last_react: HashMap::new(),
                last_seen: Utc::now(),
                owner_id: String::new(),
                owner_color: Some(Side::random()),
                clients: HashMap::new(),
            }),
        }
    }

    fn state_locked(inner: &SessionInner) -> GameState {
        GameState {
            kind: "state".to_string(),
            fen: inner.board.fen(),
            turn: inner.board.turn().as_str().to_string(),
            status: inner.board.status(),
            pgn: inner.board.pgn(),
            uci: inner.board.uci_history(),
            last_seen: inner.last_seen.timestamp_millis(),
            watchers: inner.watchers.len(),
        }
    }

    /// Immutable snapshot of the current state.
    pub fn state(&self) -> GameState {
        Self::state_locked(&self.inner.lock())
    }

    /// Update last-seen to now and return the new timestamp so callers can
    /// mirror it downstream.
    pub fn touch(&self) -> DateTime<Utc> {
        let mut inner = self.inner.lock();
        inner.last_seen = Utc::now();
        inner.last_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.inner.lock().last_seen
    }

    pub fn is_owner(&self, client_id: &str) -> bool {
        let inner = self.inner.lock();
        !inner.owner_id.is_empty() && inner.owner_id == client_id
    }

    /// Assign a side to a client. Idempotent: a known client keeps its side
    /// (and inherits ownership if the seat is vacant). The first unknown
    /// client becomes owner with the creation-time color, the second gets
    /// the opposite side, everyone after that is a spectator (None).
    pub fn assign_side(&self, client_id: &str) -> Option<Side> {
        if client_id.is_empty() {
            return None;
        }
        let mut inner = self.inner.lock();

        if let Some(side) = inner.clients.get(client_id).copied() {
            if inner.owner_id.is_empty() {
                inner.owner_id = client_id.to_string();
                inner.owner_color = Some(side);
            }
            return Some(side);
        }

        if inner.owner_id.is_empty() {
            let side = inner.owner_color.unwrap_or(Side::White);
            inner.owner_color = Some(side);
            inner.owner_id = client_id.to_string();
            inner.clients.insert(client_id.to_string(), side);
            return Some(side);
        }

        if inner.clients.len() < 2 {
            let side = inner.owner_color.map(Side::opposite).unwrap_or(Side::Black);
            inner.clients.insert(client_id.to_string(), side);
            return Some(side);
        }

        None
    }

    /// Remove a participant. If the owner leaves, ownership transfers to any
    /// remaining participant, who keeps their previously assigned side.
    pub fn remove_client(&self, client_id: &str) {
        let mut inner = self.inner.lock();
        inner.clients.remove(client_id);
        if inner.owner_id == client_id {
            let heir = inner
                .clients
                .iter()
                .next()
                .map(|(id, side)| (id.clone(), *side));
            match heir {
                Some((id, side)) => {
                    inner.owner_id = id;
                    inner.owner_color = Some(side);
                }
                None => inner.owner_id.clear(),
            }
        }
    }

    /// Clear every participant and the owner seat (used by /forget).
    pub fn clear_participants(&self) {
        let mut inner = self.inner.lock();
        inner.clients.clear();
        inner.owner_id.clear();
        inner.owner_color = None;
    }

    /// Validate and apply a move for a client. Client lookup, promotion
    /// defaulting against the live position, the piece and turn checks and
    /// the rules delegation all run under one lock acquisition, so
    /// concurrent movers observe a serialized order. Rejections carry the
    /// pre-move state so the caller can resync.
    pub fn play_move(
        &self,
        client_id: &str,
        raw: &str,
    ) -> Result<MoveOutcome, (MoveRejection, GameState)> {
        let mut inner = self.inner.lock();
        let pre = Self::state_locked(&inner);

        let Some(side) = inner.clients.get(client_id).copied() else {
            return Err((MoveRejection::UnknownClient, pre));
        };

        let uci = raw.trim().to_ascii_lowercase();
        if uci.len() < 4 || !uci.is_ascii() {
            let reason = format!("invalid move notation: {raw}");
            return Err((MoveRejection::Illegal(reason), pre));
        }
        let uci = inner.board.default_promotion(&uci);

        match inner.board.piece_on(&uci[..2]) {
            Some((piece_side, _)) if piece_side == side => {}
            _ => return Err((MoveRejection::WrongColor, pre)),
        }
        if inner.board.turn() != side {
            return Err((MoveRejection::NotYourTurn, pre));
        }
        if let Err(err) = inner.board.play_uci(&uci) {
            return Err((MoveRejection::Illegal(err.to_string()), pre));
        }

        inner.last_seen = Utc::now();
        let state = Self::state_locked(&inner);
        Ok(MoveOutcome {
            number: state.uci.len(),
            uci,
            side,
            by_owner: inner.owner_id == client_id,
            finished: inner.board.is_over(),
            result: inner.board.result(),
            last_seen: inner.last_seen,
            state,
        })
    }

    /// Test-and-set cooldown check: returns the remaining whole seconds on
    /// rejection, records the new timestamp on success. Atomic under the
    /// session lock, so concurrent senders cannot both pass.
    pub fn can_react(&self, sender: &str) -> Result<(), u64> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if let Some(prev) = inner.last_react.get(sender) {
            let elapsed = now.duration_since(*prev);
            if elapsed < REACTION_COOLDOWN {
                let remaining = REACTION_COOLDOWN - elapsed;
                return Err(remaining.as_secs_f64().ceil() as u64);
            }
        }
        inner.last_react.insert(sender.to_string(), now);
        Ok(())
    }

    /// Register a broadcast destination. The returned guard unregisters the
    /// watcher exactly once when dropped (connection teardown).
    pub fn register_watcher(self: Arc<Self>) -> (WatcherGuard, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(WATCHER_QUEUE_CAPACITY);
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            inner.watchers.insert(id, tx);
            id
        };
        (WatcherGuard { session: self, id }, rx)
    }

    fn unregister_watcher(&self, id: u64) {
        self.inner.lock().watchers.remove(&id);
    }

    fn fan_out(inner: &SessionInner, session_id: &str, payload: String) {
        for tx in inner.watchers.values() {
            // don't block on a slow viewer: a full queue drops the message
            if tx.try_send(payload.clone()).is_err() {
                trace!("dropped broadcast for a slow watcher of {session_id}");
            }
        }
    }

    /// Push the current snapshot to every watcher, non-blocking.
    pub fn broadcast_state(&self) {
        let inner = self.inner.lock();
        let state = Self::state_locked(&inner);
        if let Ok(payload) = serde_json::to_string(&state) {
            Self::fan_out(&inner, &self.id, payload);
        }
    }

    /// Push a reaction event to every watcher, non-blocking.
    pub fn broadcast_reaction(&self, payload: &ReactionPayload) {
        let inner = self.inner.lock();
        if let Ok(payload) = serde_json::to_string(payload) {
            Self::fan_out(&inner, &self.id, payload);
        }
    }

    /// Apply a persisted record to a freshly created session. Called by the
    /// hub before the session is published into the registry. Move history
    /// is rebuilt by replaying the stored movetext; a record with a FEN but
    /// no replayable movetext resumes from the bare position.
    pub fn hydrate(&self, rec: &PersistedGame) {
        let mut inner = self.inner.lock();
        if let Some(board) = Self::restore_board(rec) {
            inner.board = board;
        }
        if let Some(ts) = DateTime::from_timestamp_millis(rec.last_seen) {
            if rec.last_seen > 0 {
                inner.last_seen = ts;
            }
        }
        if !rec.owner_id.is_empty() {
            inner.owner_id = rec.owner_id.clone();
        }
        if let Some(side) = Side::parse(&rec.owner_color) {
            inner.owner_color = Some(side);
        }
        for player in &rec.players {
            if !player.active {
                continue;
            }
            if let Some(side) = Side::parse(&player.color) {
                inner.clients.insert(player.user_id.clone(), side);
            }
        }
    }

    fn restore_board(rec: &PersistedGame) -> Option<Board> {
        if !rec.pgn.is_empty() {
            if let Ok(ucis) = crate::rules::ucis_from_pgn(&rec.pgn) {
                let mut board = Board::new();
                if ucis.iter().try_for_each(|m| board.play_uci(m)).is_ok() {
                    return Some(board);
                }
            }
        }
        if !rec.fen.is_empty() {
            return Board::from_fen(&rec.fen).ok();
        }
        None
    }
}

/// Handle retained by a streaming connection; dropping it deregisters the
/// watcher from its session.
pub struct WatcherGuard {
    session: Arc<Session>,
    id: u64,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.session.unregister_watcher(self.id);
    }
}

#[cfg(test)]
impl Session {
    pub(crate) fn set_last_seen(&self, ts: DateTime<Utc>) {
        self.inner.lock().last_seen = ts;
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.inner.lock().watchers.len()
    }

    pub(crate) fn owner_id(&self) -> String {
        self.inner.lock().owner_id.clone()
    }

    pub(crate) fn owner_color(&self) -> Option<Side> {
        self.inner.lock().owner_color
    }

    pub(crate) fn client_side(&self, client_id: &str) -> Option<Side> {
        self.inner.lock().clients.get(client_id).copied()
    }

    pub(crate) fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_clients_get_opposite_sides_third_spectates() {
        let s = Session::new("g");
        let first = s.assign_side("c1").expect("first client gets a side");
        let second = s.assign_side("c2").expect("second client gets a side");
        assert_eq!(second, first.opposite());
        assert_eq!(s.assign_side("c3"), None);
        assert_eq!(s.client_count(), 2);
    }

    #[test]
    fn assign_side_is_idempotent() {
        let s = Session::new("g");
        let first = s.assign_side("c1").unwrap();
        assert_eq!(s.assign_side("c1"), Some(first));
        assert_eq!(s.client_count(), 1);
    }

    #[test]
    fn first_client_becomes_owner_with_creation_color() {
        let s = Session::new("g");
        let creation_color = s.owner_color().unwrap();
        let assigned = s.assign_side("owner").unwrap();
        assert_eq!(assigned, creation_color);
        assert_eq!(s.owner_id(), "owner");
    }

    #[test]
    fn ownership_transfer_preserves_the_promoted_players_side() {
        let s = Session::new("g");
        s.assign_side("owner").unwrap();
        let player_side = s.assign_side("player").unwrap();

        s.remove_client("owner");
        assert_eq!(s.owner_id(), "player");
        assert_eq!(s.owner_color(), Some(player_side));
        // rejoining returns the original side
        assert_eq!(s.assign_side("player"), Some(player_side));
        // a newcomer takes the freed opposite side
        assert_eq!(s.assign_side("newbie"), Some(player_side.opposite()));
    }

    #[test]
    fn removing_the_last_client_clears_ownership() {
        let s = Session::new("g");
        s.assign_side("owner").unwrap();
        s.remove_client("owner");
        assert_eq!(s.owner_id(), "");
        assert_eq!(s.client_count(), 0);
    }

    #[test]
    fn removing_a_non_owner_keeps_the_owner() {
        let s = Session::new("g");
        s.assign_side("owner").unwrap();
        s.assign_side("other").unwrap();
        s.remove_client("other");
        assert_eq!(s.owner_id(), "owner");
        assert_eq!(s.client_side("other"), None);
    }

    #[test]
    fn legal_move_mutates_and_illegal_move_does_not() {
        let s = Session::new("g");
        s.assign_side("c1").unwrap();
        s.assign_side("c2").unwrap();
        let white = if s.client_side("c1") == Some(Side::White) {
            "c1"
        } else {
            "c2"
        };
        let outcome = s.play_move(white, "e2e4").expect("e2e4 is legal");
        assert_eq!(outcome.uci, "e2e4");
        assert_eq!(outcome.number, 1);
        assert!(!outcome.finished);

        let before = s.state();
        let (rej, state) = s.play_move(white, "d2d4").unwrap_err();
        assert!(matches!(rej, MoveRejection::NotYourTurn));
        assert_eq!(state.fen, before.fen);
    }

    #[test]
    fn illegal_first_move_is_rejected_with_reason() {
        let s = Session::new("g");
        s.assign_side("w").unwrap();
        s.assign_side("b").unwrap();
        let white = if s.client_side("w") == Some(Side::White) {
            "w"
        } else {
            "b"
        };
        let before = s.state();
        let (rej, state) = s.play_move(white, "e2e5").unwrap_err();
        assert!(matches!(rej, MoveRejection::Illegal(_)));
        assert!(!rej.to_string().is_empty());
        assert_eq!(state.fen, before.fen);
        assert!(s.state().uci.is_empty());
    }

    #[test]
    fn unknown_client_and_wrong_color_are_rejected() {
        let s = Session::new("g");
        s.assign_side("w").unwrap();
        s.assign_side("b").unwrap();
        let (white, black) = if s.client_side("w") == Some(Side::White) {
            ("w", "b")
        } else {
            ("b", "w")
        };

        let (rej, _) = s.play_move("stranger", "e2e4").unwrap_err();
        assert_eq!(rej, MoveRejection::UnknownClient);

        // black trying to push a white pawn
        let (rej, _) = s.play_move(black, "e2e4").unwrap_err();
        assert_eq!(rej, MoveRejection::WrongColor);

        s.play_move(white, "e2e4").unwrap();
        // white moving again out of turn, with a white piece
        let (rej, _) = s.play_move(white, "d2d4").unwrap_err();
        assert_eq!(rej, MoveRejection::NotYourTurn);
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_cooldown_rejects_then_recovers() {
        let s = Session::new("g");
        assert!(s.can_react("alice").is_ok());

        let wait = s.can_react("alice").unwrap_err();
        assert!(wait > 0, "remaining seconds must be positive, got {wait}");

        // an independent sender is not throttled
        assert!(s.can_react("bob").is_ok());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(s.can_react("alice").is_ok());
    }

    #[tokio::test]
    async fn watcher_guard_unregisters_on_drop() {
        let s = Arc::new(Session::new("g"));
        let (guard, _rx) = Arc::clone(&s).register_watcher();
        assert_eq!(s.watcher_count(), 1);
        drop(guard);
        assert_eq!(s.watcher_count(), 0);
    }

    #[tokio::test]
    async fn full_watcher_queue_drops_without_blocking_others() {
        let s = Arc::new(Session::new("g"));
        let (_stalled_guard, _stalled_rx) = Arc::clone(&s).register_watcher();
        let (_live_guard, mut live_rx) = Arc::clone(&s).register_watcher();

        // saturate both queues well past capacity; must not block or panic
        for _ in 0..WATCHER_QUEUE_CAPACITY * 2 {
            s.broadcast_state();
        }

        let mut received = 0;
        while live_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, WATCHER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn reactions_reach_watchers() {
        let s = Arc::new(Session::new("g"));
        let (_guard, mut rx) = Arc::clone(&s).register_watcher();
        s.broadcast_reaction(&ReactionPayload {
            kind: "emoji".into(),
            emoji: "🔥".into(),
            at: 1,
            sender: "alice".into(),
        });
        let payload = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["kind"], "emoji");
        assert_eq!(value["sender"], "alice");
    }

    #[test]
    fn touch_advances_last_seen() {
        let s = Session::new("g");
        s.set_last_seen(Utc::now() - chrono::Duration::hours(1));
        let before = s.last_seen();
        let after = s.touch();
        assert!(after > before);
        assert_eq!(s.state().last_seen, after.timestamp_millis());
    }

    #[test]
    fn clear_participants_resets_the_session_seats() {
        let s = Session::new("g");
        s.assign_side("owner").unwrap();
        s.assign_side("other").unwrap();
        s.clear_participants();
        assert_eq!(s.client_count(), 0);
        assert_eq!(s.owner_id(), "");
        // next joiner becomes the new owner, defaulting to white
        assert_eq!(s.assign_side("fresh"), Some(Side::White));
    }
}
