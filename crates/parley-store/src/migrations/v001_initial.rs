//! v001 -- Initial schema creation.
//!
//! Creates `users`, `conversations` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profile fields only; credentials live with the account service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID
    name        TEXT NOT NULL,
    email       TEXT NOT NULL UNIQUE,
    profile_pic TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Conversations: one row per unordered pair of users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,  -- UUID
    participant_low  TEXT NOT NULL,              -- smaller user id of the pair
    participant_high TEXT NOT NULL,              -- larger user id of the pair
    last_seq         INTEGER NOT NULL DEFAULT 0, -- seq of the newest message
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,

    FOREIGN KEY (participant_low) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (participant_high) REFERENCES users(id) ON DELETE CASCADE,
    UNIQUE (participant_low, participant_high)
);

CREATE INDEX IF NOT EXISTS idx_conversations_high ON conversations(participant_high);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,  -- append order
    id              TEXT NOT NULL UNIQUE,               -- UUID
    conversation_id TEXT NOT NULL,                      -- FK -> conversations(id)
    author_id       TEXT NOT NULL,                      -- FK -> users(id)
    text            TEXT NOT NULL DEFAULT '',
    image_url       TEXT NOT NULL DEFAULT '',
    video_url       TEXT NOT NULL DEFAULT '',
    seen            INTEGER NOT NULL DEFAULT 0,         -- boolean 0/1
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
