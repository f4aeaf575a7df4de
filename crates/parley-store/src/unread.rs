use std::collections::HashMap;

use rusqlite::params;

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Store the unread counter for `peer`; zero removes the row.
    pub fn set_unread(&self, peer: &UserId, count: u32) -> Result<()> {
        if count == 0 {
            self.conn().execute(
                "DELETE FROM unread_counts WHERE peer_id = ?1",
                params![peer.as_str()],
            )?;
        } else {
            self.conn().execute(
                "INSERT INTO unread_counts (peer_id, count) VALUES (?1, ?2)
                 ON CONFLICT(peer_id) DO UPDATE SET count = excluded.count",
                params![peer.as_str(), count],
            )?;
        }
        Ok(())
    }

    pub fn unread_counts(&self) -> Result<HashMap<UserId, u32>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT peer_id, count FROM unread_counts WHERE count > 0")?;
        let rows = stmt.query_map([], |row| {
            Ok((UserId(row.get::<_, String>(0)?), row.get::<_, u32>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (peer, count) = row?;
            counts.insert(peer, count);
        }
        Ok(counts)
    }
}
