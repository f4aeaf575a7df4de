use rusqlite::{params, OptionalExtension};

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;

const KEY_SELECTED_PEER: &str = "selected_peer";

impl Database {
    pub fn set_selected_peer(&self, peer: Option<&UserId>) -> Result<()> {
        match peer {
            Some(peer) => {
                self.conn().execute(
                    "INSERT INTO session_state (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![KEY_SELECTED_PEER, peer.as_str()],
                )?;
            }
            None => {
                self.conn().execute(
                    "DELETE FROM session_state WHERE key = ?1",
                    params![KEY_SELECTED_PEER],
                )?;
            }
        }
        Ok(())
    }

    pub fn selected_peer(&self) -> Result<Option<UserId>> {
        let value: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM session_state WHERE key = ?1",
                params![KEY_SELECTED_PEER],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(UserId))
    }
}
