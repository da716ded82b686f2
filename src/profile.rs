use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;

/// What the bot remembers about a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub name: Option<String>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Key-value store of user profiles. Saves are last-writer-wins.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Insert or replace the profile, returning its id
    async fn save(&self, profile: &Profile) -> Result<String>;
}

/// SQLite-backed profile store
#[derive(Clone)]
pub struct SqliteProfileStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProfileStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;
        info!("Profile store initialized at: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("Failed to run profile migrations")?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name FROM profiles WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("Failed to load profile {}", user_id))
    }

    async fn save(&self, profile: &Profile) -> Result<String> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO profiles (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                updated_at = datetime('now')",
            rusqlite::params![profile.id, profile.name],
        )
        .with_context(|| format!("Failed to save profile {}", profile.id))?;
        Ok(profile.id.clone())
    }
}
