// Session persistence in a SQLite key-value table

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::types::Session;

const SESSION_KEY: &str = "console:session";

/// Backend that lets a session survive process restarts
///
/// Not required for correctness: the store logs and ignores failures.
pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn erase(&self) -> Result<()>;
}

/// Session persisted as JSON in an `auth_kv` table
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create session directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, gone when dropped
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Session database lock poisoned"))?;
        f(&conn)
    }
}

impl SessionPersistence for SqlitePersistence {
    fn load(&self) -> Result<Option<Session>> {
        let json: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [SESSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load session from SQLite")
        })?;

        json.map(|s| serde_json::from_str(&s).context("Failed to parse session from SQLite"))
            .transpose()
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [SESSION_KEY, json.as_str()],
            )
            .context("Failed to save session to SQLite")?;
            Ok(())
        })
    }

    fn erase(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_kv WHERE key = ?", [SESSION_KEY])
                .context("Failed to erase session from SQLite")?;
            Ok(())
        })
    }
}
