use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    participant_key TEXT NOT NULL,               -- BLAKE3 hex of sorted member ids
    is_group        INTEGER NOT NULL,            -- boolean 0/1
    group_name      TEXT,
    created_by      TEXT NOT NULL,
    last_message_id TEXT,                        -- FK -> messages(id)
    last_activity   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,

    CHECK ((is_group = 1) = (group_name IS NOT NULL)),
    FOREIGN KEY (last_message_id) REFERENCES messages(id) ON DELETE SET NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_participant_key
    ON conversations(participant_key);
CREATE INDEX IF NOT EXISTS idx_conversations_updated
    ON conversations(updated_at DESC);

-- No FK to users: a deleted user stays listed as a participant.
CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,               -- FK -> conversations(id)
    user_id         TEXT NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_conversation_participants_user
    ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,        -- UUID v4
    conversation_id TEXT NOT NULL,               -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    kind            TEXT NOT NULL DEFAULT 'text'
                    CHECK (kind IN ('text', 'image', 'file', 'system')),
    timestamp       TEXT NOT NULL,
    edited_at       TEXT,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp, seq);
CREATE INDEX IF NOT EXISTS idx_messages_sender
    ON messages(sender_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
