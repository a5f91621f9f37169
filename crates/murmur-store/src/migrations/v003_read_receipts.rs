use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Read receipts: at most one row per (message, reader)
CREATE TABLE IF NOT EXISTS read_receipts (
    message_id TEXT NOT NULL,                -- FK -> messages(id)
    user_id    TEXT NOT NULL,                -- weak reference, no FK
    read_at    TEXT NOT NULL,                -- RFC-3339

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_read_receipts_user ON read_receipts(user_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
