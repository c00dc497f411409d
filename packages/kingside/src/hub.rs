use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rules::Side;
use crate::session::Session;
use crate::store::Store;

/// How often the registry is scanned for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Sessions untouched for this many hours are evicted from memory. Their
/// durable rows survive, so a later request hydrates them back.
const IDLE_HOURS: i64 = 24;

/// Registry of live sessions, keyed by game id. The single source of truth
/// for which games are resident in memory.
pub struct Hub {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    store: Store,
}

impl Hub {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            store,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Periodically evict sessions idle past the threshold.
    pub fn start_sweeper(self: Arc<Self>) {
        let hub = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                hub.sweep().await;
            }
        });
    }

    pub async fn sweep(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(IDLE_HOURS);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.last_seen() > cutoff;
            if !keep {
                debug!("evicting idle session {id}");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("swept {evicted} idle sessions, {} remain", sessions.len());
        }
    }

    /// Fetch or revive the session for `id`, then assign `client_id` a seat.
    /// A session absent from the registry is hydrated from the store before
    /// it becomes visible, so no caller can observe the pre-hydration state.
    /// An empty `client_id` skips seat assignment (spectator access).
    pub async fn get(&self, id: &str, client_id: &str) -> Result<(Arc<Session>, Option<Side>)> {
        let mut sessions = self.sessions.lock().await;
        let session = match sessions.get(id) {
            Some(session) => Arc::clone(session),
            None => {
                let session = Arc::new(Session::new(id));
                if let Some(rec) = self.store.load_game(id).await? {
                    debug!("hydrating session {id} from store");
                    session.hydrate(&rec);
                }
                sessions.insert(id.to_string(), Arc::clone(&session));
                session
            }
        };
        drop(sessions);

        let side = session.assign_side(client_id);
        // only seated players become participant rows; a spectator upsert
        // would blank the stored color of a player whose seat was reclaimed
        if let Some(assigned) = side {
            let role = if session.is_owner(client_id) {
                "owner"
            } else {
                "player"
            };
            let store = self.store.clone();
            let game_id = id.to_string();
            let user_id = client_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = store
                    .ensure_user_session(&game_id, &user_id, Some(assigned), role)
                    .await
                {
                    warn!("failed to persist participant {user_id} of {game_id}: {err:#}");
                }
            });
        }
        Ok((session, side))
    }

    /// Create a brand-new session owned by `owner_id`. Creation is
    /// all-or-nothing: if the durable rows cannot be written, the session is
    /// withdrawn from the registry and the error propagates.
    pub async fn create_session(&self, owner_id: &str) -> Result<(String, Side)> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(anyhow!("missing owner id"));
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(&id));
        let side = session
            .assign_side(owner_id)
            .ok_or_else(|| anyhow!("could not seat the owner"))?;

        let mut sessions = self.sessions.lock().await;
        sessions.insert(id.clone(), Arc::clone(&session));
        if let Err(err) = self.persist_new_session(&session, owner_id, side).await {
            sessions.remove(&id);
            return Err(err);
        }
        drop(sessions);

        info!("created game {id} for {owner_id} as {}", side.as_str());
        Ok((id, side))
    }

    async fn persist_new_session(
        &self,
        session: &Session,
        owner_id: &str,
        side: Side,
    ) -> Result<()> {
        self.store.create_game(&session.id, owner_id, side).await?;
        self.store
            .ensure_user_session(&session.id, owner_id, Some(side), "owner")
            .await?;
        let state = session.state();
        self.store
            .save_game_state(
                &session.id,
                crate::store::GameStateUpdate {
                    fen: Some(state.fen),
                    pgn: Some(state.pgn),
                    last_seen: Some(session.last_seen()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Drop a session from the registry without touching its durable rows.
    pub async fn remove(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    #[cfg(test)]
    pub(crate) async fn resident(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }
}
