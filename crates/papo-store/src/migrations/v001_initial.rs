//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `online_users` (the presence directory),
//! `conversations` and `conversation_messages` (best-effort history).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Presence directory. One row per reachable identity; rows older
-- than the TTL are ignored by online queries even before deletion.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS online_users (
    identity     TEXT PRIMARY KEY NOT NULL,   -- opaque participant key
    display_name TEXT NOT NULL,
    avatar_url   TEXT,
    gender       TEXT,                        -- male | female | other
    country      TEXT NOT NULL DEFAULT 'BR',
    bio          TEXT NOT NULL DEFAULT '',
    is_anonymous INTEGER NOT NULL DEFAULT 1,
    status       TEXT NOT NULL DEFAULT 'online',  -- online | busy | in_chat
    last_seen    TEXT NOT NULL                -- RFC-3339, fixed width
);

CREATE INDEX IF NOT EXISTS idx_online_users_last_seen
    ON online_users(last_seen DESC);

-- ----------------------------------------------------------------
-- Conversations. One per established session and local participant.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    session_id    TEXT NOT NULL,              -- matched session UUID
    owner         TEXT NOT NULL,              -- local participant identity
    partner_label TEXT NOT NULL,
    started_at    TEXT NOT NULL,              -- RFC-3339
    ended_at      TEXT,                       -- NULL while active
    last_message  TEXT,                       -- truncated preview
    message_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_conversations_owner
    ON conversations(owner, started_at DESC);

-- ----------------------------------------------------------------
-- Conversation messages.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversation_messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_type     TEXT NOT NULL,              -- me | peer
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,              -- RFC-3339

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_conversation_messages_conv_ts
    ON conversation_messages(conversation_id, created_at);
"#;

/// Apply the v001 schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
