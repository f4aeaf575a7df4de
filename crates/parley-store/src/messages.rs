use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use parley_shared::types::{ChatMessage, DeliveryStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Overwrite the stored conversation with `peer`.
    pub fn replace_conversation(&mut self, peer: &UserId, messages: &[ChatMessage]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM messages WHERE peer_id = ?1", params![peer.as_str()])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages
                    (peer_id, position, id, correlation_id, sender_id, recipient_id, body, sent_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (position, m) in messages.iter().enumerate() {
                stmt.execute(params![
                    peer.as_str(),
                    position as i64,
                    m.id,
                    m.correlation_id.map(|c| c.to_string()),
                    m.sender_id.as_str(),
                    m.recipient_id.as_str(),
                    m.body,
                    m.sent_at.to_rfc3339(),
                    m.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Append one message at the end of the conversation with `peer`.
    pub fn append_message(&self, peer: &UserId, message: &ChatMessage) -> Result<()> {
        let next: Option<i64> = self
            .conn()
            .query_row(
                "SELECT MAX(position) FROM messages WHERE peer_id = ?1",
                params![peer.as_str()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();

        self.conn().execute(
            "INSERT INTO messages
                (peer_id, position, id, correlation_id, sender_id, recipient_id, body, sent_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                peer.as_str(),
                next.map_or(0, |p| p + 1),
                message.id,
                message.correlation_id.map(|c| c.to_string()),
                message.sender_id.as_str(),
                message.recipient_id.as_str(),
                message.body,
                message.sent_at.to_rfc3339(),
                message.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Messages exchanged with `peer`, in arrival order.
    pub fn conversation(&self, peer: &UserId) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, correlation_id, sender_id, recipient_id, body, sent_at, status
             FROM messages
             WHERE peer_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![peer.as_str()], read_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(decode(row?)?);
        }
        Ok(messages)
    }

    /// Every stored conversation, keyed by peer.
    pub fn all_conversations(&self) -> Result<BTreeMap<UserId, Vec<ChatMessage>>> {
        let mut stmt = self.conn().prepare("SELECT DISTINCT peer_id FROM messages")?;
        let peers = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = BTreeMap::new();
        for peer in peers.into_iter().map(UserId) {
            let messages = self.conversation(&peer)?;
            out.insert(peer, messages);
        }
        Ok(out)
    }
}

struct RawRow {
    id: String,
    correlation_id: Option<String>,
    sender_id: String,
    recipient_id: String,
    body: String,
    sent_at: String,
    status: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        correlation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        body: row.get(4)?,
        sent_at: row.get(5)?,
        status: row.get(6)?,
    })
}

fn decode(raw: RawRow) -> Result<ChatMessage> {
    let correlation_id = raw
        .correlation_id
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("correlation id: {e}")))?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&raw.sent_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("sent_at: {e}")))?;

    let status = DeliveryStatus::parse(&raw.status)
        .ok_or_else(|| StoreError::Corrupt(format!("status: {}", raw.status)))?;

    Ok(ChatMessage {
        id: raw.id,
        correlation_id,
        sender_id: UserId(raw.sender_id),
        recipient_id: UserId(raw.recipient_id),
        body: raw.body,
        sent_at,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, to: &str, body: &str) -> ChatMessage {
        ChatMessage::optimistic(from.into(), to.into(), body.into())
    }

    #[test]
    fn replace_then_read_keeps_order() {
        let mut db = Database::open_in_memory().unwrap();
        let peer = UserId::from("s1");
        let messages = vec![msg("u1", "s1", "first"), msg("s1", "u1", "second")];

        db.replace_conversation(&peer, &messages).unwrap();
        assert_eq!(db.conversation(&peer).unwrap(), messages);

        let shorter = vec![msg("s1", "u1", "only")];
        db.replace_conversation(&peer, &shorter).unwrap();
        assert_eq!(db.conversation(&peer).unwrap(), shorter);
    }

    #[test]
    fn append_goes_to_the_end() {
        let mut db = Database::open_in_memory().unwrap();
        let peer = UserId::from("s1");
        db.replace_conversation(&peer, &[msg("u1", "s1", "a")]).unwrap();
        db.append_message(&peer, &msg("s1", "u1", "b")).unwrap();
        db.append_message(&"s2".into(), &msg("s2", "u1", "c")).unwrap();

        let bodies: Vec<_> = db
            .conversation(&peer)
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, ["a", "b"]);

        let all = db.all_conversations().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&UserId::from("s2")][0].body, "c");
    }

    #[test]
    fn corrupt_status_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO messages VALUES ('s1', 0, 'm1', NULL, 's1', 'u1', 'x', '2024-01-01T10:00:00Z', 'weird')",
                [],
            )
            .unwrap();
        assert!(matches!(
            db.conversation(&"s1".into()),
            Err(StoreError::Corrupt(_))
        ));
    }
}
