//! v001 -- Initial schema creation.
//!
//! Creates the identity and friendship tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    username      TEXT NOT NULL,
    email         TEXT NOT NULL,
    password_hash TEXT NOT NULL,              -- hashed by the caller
    created_at    TEXT NOT NULL               -- RFC-3339, microseconds, UTC
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users(username);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);

-- ----------------------------------------------------------------
-- Friendships
-- ----------------------------------------------------------------
-- One directed edge per unordered pair. user_lo/user_hi hold the pair in
-- sorted order so the unique index covers both directions.
CREATE TABLE IF NOT EXISTS friendships (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,                -- FK -> users(id)
    receiver_id TEXT NOT NULL,                -- FK -> users(id)
    user_lo     TEXT NOT NULL,
    user_hi     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'accepted')),
    created_at  TEXT NOT NULL,

    CHECK (sender_id <> receiver_id),
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_friendships_pair
    ON friendships(user_lo, user_hi);
CREATE INDEX IF NOT EXISTS idx_friendships_sender_status
    ON friendships(sender_id, status);
CREATE INDEX IF NOT EXISTS idx_friendships_receiver_status
    ON friendships(receiver_id, status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
