//! v001 -- Initial schema creation.
//!
//! Creates `messages`, `unread_counts` and `session_state`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages, grouped by the conversation peer
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    peer_id        TEXT NOT NULL,
    position       INTEGER NOT NULL,          -- arrival order within the peer
    id             TEXT NOT NULL,             -- server id or tmp-<uuid>
    correlation_id TEXT,                      -- UUID of the optimistic send
    sender_id      TEXT NOT NULL,
    recipient_id   TEXT NOT NULL,
    body           TEXT NOT NULL,
    sent_at        TEXT NOT NULL,             -- RFC-3339
    status         TEXT NOT NULL,             -- pending | sent | failed | confirmed

    PRIMARY KEY (peer_id, position)
);

CREATE INDEX IF NOT EXISTS idx_messages_correlation ON messages(correlation_id);

-- ----------------------------------------------------------------
-- Unread counters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS unread_counts (
    peer_id TEXT PRIMARY KEY NOT NULL,
    count   INTEGER NOT NULL DEFAULT 0
);

-- ----------------------------------------------------------------
-- Key/value session state (selected peer)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS session_state (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
