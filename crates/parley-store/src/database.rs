//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Directory holding the per-user chat databases.
    ///
    /// - Linux:   `~/.local/share/parley/`
    /// - macOS:   `~/Library/Application Support/com.parley.parley/`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\`
    pub fn default_dir() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "parley", "parley").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().to_path_buf())
    }

    /// File name of the database for one local user.
    ///
    /// Conversation state is per user, so each user gets their own file.
    pub fn file_name_for(user_id: &str) -> String {
        let safe: String = user_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("chat-{safe}.db")
    }

    /// Open (or create) the database for `user_id` under `dir`.
    pub fn open_for_user(dir: &Path, user_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name_for(user_id));

        tracing::info!(path = %path.display(), "opening chat database");

        Self::open_at(&path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Throw-away database, used when persistence is disabled and in tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().filter(|p| !p.is_empty()).map(PathBuf::from)
    }
}
