//! Schema migrations, tracked through SQLite's `user_version` pragma.

pub mod v001_initial;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

type Migration = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

/// Ordered migrations; the schema version after applying entry `i` is `i + 1`.
const MIGRATIONS: &[(&str, Migration)] = &[("v001_initial", v001_initial::up)];

pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    debug!(current, target = CURRENT_VERSION, "Checking chat schema");

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than this client (v{CURRENT_VERSION})"
        )));
    }

    for (index, (name, up)) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        info!(migration = name, version, "Applying migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
