use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

/// Bump when adding a migration step below.
const SCHEMA_VERSION: i32 = 1;

/// Connection handle plus schema management for the game database.
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the database at `url` and bring its
    /// schema up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database at {url}"))?;

        // WAL keeps readers from blocking the write path
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .context("Failed to enable WAL mode")?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .context("Failed to enable foreign keys")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create schema_version table")?;

        let current: Option<i32> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&self.pool)
                .await
                .context("Failed to read schema version")?;
        let current = current.unwrap_or(0);

        if current >= SCHEMA_VERSION {
            debug!("database schema up to date (version {current})");
            return Ok(());
        }

        if current < 1 {
            self.migrate_v1().await?;
        }

        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await
            .context("Failed to record schema version")?;
        info!("database migrated to schema version {SCHEMA_VERSION}");
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                fen TEXT NOT NULL DEFAULT '',
                pgn TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                result TEXT NOT NULL DEFAULT '',
                owner_id TEXT NOT NULL DEFAULT '',
                owner_color TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                last_seen INTEGER NOT NULL DEFAULT 0,
                completed_at INTEGER,
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create games table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                game_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                last_seen INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                PRIMARY KEY (game_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create participants table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS game_moves (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id TEXT NOT NULL,
                user_id TEXT NOT NULL DEFAULT '',
                number INTEGER NOT NULL,
                uci TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create game_moves table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_games_active ON games(active)")
            .execute(&self.pool)
            .await
            .context("Failed to create games index")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_game_moves_game ON game_moves(game_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create game_moves index")?;

        Ok(())
    }
}

#[cfg(test)]
impl Database {
    /// In-memory database on a single-connection pool. SQLite gives every
    /// connection its own `:memory:` database, so the pool must not grow.
    pub(crate) async fn connect_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_schema() {
        let db = Database::connect_memory().await.unwrap();
        let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));

        // all tables queryable
        for table in ["games", "participants", "game_moves"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&db.pool)
                .await
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn file_database_is_created_and_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/kingside.db", dir.path().display());

        let db = Database::connect(&url).await.unwrap();
        sqlx::query("INSERT INTO games (id) VALUES ('g1')")
            .execute(&db.pool)
            .await
            .unwrap();
        db.pool.close().await;

        let db = Database::connect(&url).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Database::connect_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db.run_migrations().await.unwrap();
    }
}
