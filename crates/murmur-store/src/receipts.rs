//! Read receipts keyed by `(message_id, user_id)`.
//!
//! The primary key is the idempotency guard: a second mark for the same
//! reader is absorbed by `INSERT OR IGNORE` no matter which writer wins.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use murmur_shared::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ReadReceipt;
use crate::rows::{fmt_ts, ts_at, uuid_at};

impl Database {
    /// Record that `user` read `message`. Returns `false` when a receipt for
    /// the pair already existed and nothing was written.
    pub fn insert_read_receipt(
        &self,
        message: MessageId,
        user: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
             VALUES (?1, ?2, ?3)",
            params![message.to_string(), user.to_string(), fmt_ts(&read_at)],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_read_receipt(&self, message: MessageId, user: UserId) -> Result<Option<ReadReceipt>> {
        let receipt = self
            .conn()
            .query_row(
                "SELECT message_id, user_id, read_at FROM read_receipts
                 WHERE message_id = ?1 AND user_id = ?2",
                params![message.to_string(), user.to_string()],
                row_to_receipt,
            )
            .optional()?;
        Ok(receipt)
    }

    pub fn is_read_by(&self, message: MessageId, user: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM read_receipts WHERE message_id = ?1 AND user_id = ?2
             )",
            params![message.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Every receipt on `message`, earliest reader first.
    pub fn list_read_receipts(&self, message: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT message_id, user_id, read_at FROM read_receipts
             WHERE message_id = ?1
             ORDER BY read_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![message.to_string()], row_to_receipt)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Messages in `conversation` sent by someone other than `user` that
    /// `user` has no receipt for.
    pub fn count_unread(&self, conversation: ConversationId, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.conversation_id = ?1
               AND m.sender_id <> ?2
               AND NOT EXISTS (
                   SELECT 1 FROM read_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )",
            params![conversation.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadReceipt> {
    Ok(ReadReceipt {
        message_id: MessageId(uuid_at(row, 0)?),
        user_id: UserId(uuid_at(row, 1)?),
        read_at: ts_at(row, 2)?,
    })
}
