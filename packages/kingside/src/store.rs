use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::models::Stats;
use crate::rules::Side;

/// Durable mirror of the in-memory sessions. Constructed without a pool the
/// store is a guaranteed-success no-op, so the live game path never depends
/// on the database being configured.
#[derive(Clone)]
pub struct Store {
    pool: Option<SqlitePool>,
}

/// Sparse update for a game row: only `Some` fields are written.
#[derive(Debug, Default)]
pub struct GameStateUpdate {
    pub fen: Option<String>,
    pub pgn: Option<String>,
    pub status: Option<String>,
    pub result: Option<String>,
    pub active: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GameStateUpdate {
    fn is_empty(&self) -> bool {
        self.fen.is_none()
            && self.pgn.is_none()
            && self.status.is_none()
            && self.result.is_none()
            && self.active.is_none()
            && self.last_seen.is_none()
            && self.completed_at.is_none()
    }
}

/// A game row plus its participants, as loaded for hydration.
#[derive(Debug)]
pub struct PersistedGame {
    pub fen: String,
    pub pgn: String,
    pub status: String,
    pub owner_id: String,
    pub owner_color: String,
    /// Epoch milliseconds, 0 when never recorded.
    pub last_seen: i64,
    pub players: Vec<PersistedPlayer>,
}

#[derive(Debug)]
pub struct PersistedPlayer {
    pub user_id: String,
    pub color: String,
    pub active: bool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Some(pool) }
    }

    /// Store with no backing database; every operation succeeds as a no-op.
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    pub fn enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Insert the initial row for a new game. Replaying a creation for an id
    /// that already exists is a no-op rather than an error.
    pub async fn create_game(&self, id: &str, owner_id: &str, owner_color: Side) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO games (id, fen, pgn, status, result, owner_id, owner_color, active, last_seen)
            VALUES (?, '', '', '', '', ?, ?, 1, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(owner_color.as_str())
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to insert game")?;
        Ok(())
    }

    /// Apply a sparse update to a game row.
    pub async fn save_game_state(&self, id: &str, update: GameStateUpdate) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        if update.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE games SET ");
        let mut fields = qb.separated(", ");
        if let Some(fen) = &update.fen {
            fields.push("fen = ").push_bind_unseparated(fen);
        }
        if let Some(pgn) = &update.pgn {
            fields.push("pgn = ").push_bind_unseparated(pgn);
        }
        if let Some(status) = &update.status {
            fields.push("status = ").push_bind_unseparated(status);
        }
        if let Some(result) = &update.result {
            fields.push("result = ").push_bind_unseparated(result);
        }
        if let Some(active) = update.active {
            fields.push("active = ").push_bind_unseparated(active);
        }
        if let Some(last_seen) = update.last_seen {
            fields
                .push("last_seen = ")
                .push_bind_unseparated(last_seen.timestamp_millis());
        }
        if let Some(completed_at) = update.completed_at {
            fields
                .push("completed_at = ")
                .push_bind_unseparated(completed_at.timestamp_millis());
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build()
            .execute(pool)
            .await
            .context("Failed to update game")?;
        Ok(())
    }

    /// Append one half-move to the game's move log.
    pub async fn record_move(
        &self,
        game_id: &str,
        user_id: &str,
        number: usize,
        uci: &str,
        side: Side,
    ) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        sqlx::query(
            "INSERT INTO game_moves (game_id, user_id, number, uci, color) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(game_id)
        .bind(user_id)
        .bind(number as i64)
        .bind(uci)
        .bind(side.as_str())
        .execute(pool)
        .await
        .context("Failed to record move")?;
        Ok(())
    }

    /// Upsert a participant row, refreshing color, role and last-seen and
    /// reactivating the row if it had been deactivated.
    pub async fn ensure_user_session(
        &self,
        game_id: &str,
        user_id: &str,
        color: Option<Side>,
        role: &str,
    ) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        let color = color.map(Side::as_str).unwrap_or("");
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO participants (game_id, user_id, color, role, active, last_seen)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(game_id, user_id) DO UPDATE SET
                color = excluded.color,
                role = excluded.role,
                active = 1,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(game_id)
        .bind(user_id)
        .bind(color)
        .bind(role)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert participant")?;
        Ok(())
    }

    /// Mark a single participant inactive (released from the game).
    pub async fn deactivate_user_session(&self, game_id: &str, user_id: &str) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        sqlx::query("UPDATE participants SET active = 0 WHERE game_id = ? AND user_id = ?")
            .bind(game_id)
            .bind(user_id)
            .execute(pool)
            .await
            .context("Failed to deactivate participant")?;
        Ok(())
    }

    /// Mark every participant of a game inactive.
    pub async fn deactivate_all_sessions(&self, game_id: &str) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        sqlx::query("UPDATE participants SET active = 0 WHERE game_id = ?")
            .bind(game_id)
            .execute(pool)
            .await
            .context("Failed to deactivate participants")?;
        Ok(())
    }

    /// Bump a game's last-seen timestamp.
    pub async fn update_last_seen(&self, game_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.save_game_state(
            game_id,
            GameStateUpdate {
                last_seen: Some(at),
                ..Default::default()
            },
        )
        .await
    }

    /// Mark a game abandoned: terminal status, inactive, completed now.
    pub async fn forget_game(&self, game_id: &str) -> Result<()> {
        self.save_game_state(
            game_id,
            GameStateUpdate {
                status: Some("abandoned".to_string()),
                active: Some(false),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// Load a game row and its participants. `Ok(None)` means either the row
    /// does not exist or the store is disabled.
    pub async fn load_game(&self, id: &str) -> Result<Option<PersistedGame>> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT fen, pgn, status, owner_id, owner_color, last_seen FROM games WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to load game")?;
        let Some(row) = row else {
            return Ok(None);
        };

        let players = sqlx::query(
            "SELECT user_id, color, active FROM participants WHERE game_id = ? ORDER BY created_at",
        )
        .bind(id)
        .fetch_all(pool)
        .await
        .context("Failed to load participants")?
        .into_iter()
        .map(|r| PersistedPlayer {
            user_id: r.get("user_id"),
            color: r.get("color"),
            active: r.get("active"),
        })
        .collect();

        Ok(Some(PersistedGame {
            fen: row.get("fen"),
            pgn: row.get("pgn"),
            status: row.get("status"),
            owner_id: row.get("owner_id"),
            owner_color: row.get("owner_color"),
            last_seen: row.get("last_seen"),
            players,
        }))
    }

    /// Aggregate counters for the landing page and /api/stats.
    pub async fn fetch_stats(&self) -> Result<Stats> {
        let Some(pool) = &self.pool else {
            return Ok(Stats::default());
        };
        let started: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .fetch_one(pool)
            .await
            .context("Failed to count games")?;
        let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games WHERE active = 1")
            .fetch_one(pool)
            .await
            .context("Failed to count active games")?;
        let completed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM games WHERE completed_at IS NOT NULL")
                .fetch_one(pool)
                .await
                .context("Failed to count completed games")?;
        Ok(Stats {
            started,
            active,
            completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_store() -> Store {
        let db = Database::connect_memory().await.expect("in-memory database");
        Store::new(db.pool)
    }

    #[tokio::test]
    async fn disabled_store_is_a_noop() {
        let store = Store::disabled();
        assert!(!store.enabled());
        store.create_game("g", "owner", Side::White).await.unwrap();
        store
            .save_game_state(
                "g",
                GameStateUpdate {
                    fen: Some("x".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.load_game("g").await.unwrap().is_none());
        let stats = store.fetch_stats().await.unwrap();
        assert_eq!(stats.started, 0);
    }

    #[tokio::test]
    async fn create_load_round_trip() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::Black).await.unwrap();
        store
            .ensure_user_session("g1", "owner", Some(Side::Black), "owner")
            .await
            .unwrap();

        let game = store.load_game("g1").await.unwrap().expect("game exists");
        assert_eq!(game.owner_id, "owner");
        assert_eq!(game.owner_color, "black");
        assert!(game.last_seen > 0);
        assert_eq!(game.players.len(), 1);
        assert_eq!(game.players[0].user_id, "owner");
        assert!(game.players[0].active);
    }

    #[tokio::test]
    async fn create_game_is_idempotent() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::White).await.unwrap();
        store.create_game("g1", "other", Side::Black).await.unwrap();
        let game = store.load_game("g1").await.unwrap().unwrap();
        assert_eq!(game.owner_id, "owner");
    }

    #[tokio::test]
    async fn sparse_update_only_touches_named_fields() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::White).await.unwrap();
        store
            .save_game_state(
                "g1",
                GameStateUpdate {
                    fen: Some("FEN".into()),
                    pgn: Some("1. e4 *".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .save_game_state(
                "g1",
                GameStateUpdate {
                    status: Some("white won by checkmate".into()),
                    active: Some(false),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let game = store.load_game("g1").await.unwrap().unwrap();
        assert_eq!(game.fen, "FEN");
        assert_eq!(game.pgn, "1. e4 *");
        assert_eq!(game.status, "white won by checkmate");
    }

    #[tokio::test]
    async fn empty_update_is_accepted() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::White).await.unwrap();
        store
            .save_game_state("g1", GameStateUpdate::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn participant_upsert_reactivates_and_updates() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::White).await.unwrap();
        store
            .ensure_user_session("g1", "u1", Some(Side::White), "owner")
            .await
            .unwrap();
        store.deactivate_user_session("g1", "u1").await.unwrap();

        let game = store.load_game("g1").await.unwrap().unwrap();
        assert!(!game.players[0].active);

        store
            .ensure_user_session("g1", "u1", Some(Side::Black), "player")
            .await
            .unwrap();
        let game = store.load_game("g1").await.unwrap().unwrap();
        assert_eq!(game.players.len(), 1);
        assert!(game.players[0].active);
        assert_eq!(game.players[0].color, "black");
    }

    #[tokio::test]
    async fn forget_marks_abandoned_and_counts_as_completed() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::White).await.unwrap();
        store.create_game("g2", "owner", Side::White).await.unwrap();
        store.forget_game("g1").await.unwrap();
        store.deactivate_all_sessions("g1").await.unwrap();

        let game = store.load_game("g1").await.unwrap().unwrap();
        assert_eq!(game.status, "abandoned");

        let stats = store.fetch_stats().await.unwrap();
        assert_eq!(stats.started, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn moves_append_in_order() {
        let store = test_store().await;
        store.create_game("g1", "owner", Side::White).await.unwrap();
        store
            .record_move("g1", "owner", 1, "e2e4", Side::White)
            .await
            .unwrap();
        store
            .record_move("g1", "guest", 2, "e7e5", Side::Black)
            .await
            .unwrap();

        let pool = store.pool.as_ref().unwrap();
        let rows = sqlx::query("SELECT number, uci FROM game_moves WHERE game_id = ? ORDER BY id")
            .bind("g1")
            .fetch_all(pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let first: i64 = rows[0].get("number");
        let uci: String = rows[1].get("uci");
        assert_eq!(first, 1);
        assert_eq!(uci, "e7e5");
    }
}
