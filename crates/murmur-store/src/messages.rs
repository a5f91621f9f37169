use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use murmur_shared::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Message, MessageKind};
use crate::rows::{fmt_ts, opt_ts_at, ts_at, unknown_variant, uuid_at};

const COLUMNS: &str = "seq, id, conversation_id, sender_id, content, kind, timestamp, edited_at";

/// Position of a message in a conversation's `(timestamp, seq)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePosition {
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
}

impl From<&Message> for MessagePosition {
    fn from(m: &Message) -> Self {
        Self {
            timestamp: m.timestamp,
            seq: m.seq,
        }
    }
}

impl Database {
    /// Store a message and bump its conversation's `last_message_id`,
    /// `last_activity` and `updated_at`, all in one transaction.
    ///
    /// Returns the message with its assigned `seq`.
    pub fn insert_message(&self, message: &Message) -> Result<Message> {
        let tx = self.write_tx()?;
        let ts = fmt_ts(&message.timestamp);

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content, kind, timestamp, edited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.kind.as_str(),
                ts,
                message.edited_at.as_ref().map(fmt_ts),
            ],
        )?;
        let seq = tx.last_insert_rowid();

        let affected = tx.execute(
            "UPDATE conversations
             SET last_message_id = ?1, last_activity = ?2, updated_at = ?2
             WHERE id = ?3",
            params![
                message.id.to_string(),
                ts,
                message.conversation_id.to_string()
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit()?;

        Ok(Message {
            seq,
            ..message.clone()
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Up to `limit` messages of a conversation in ascending
    /// `(timestamp, seq)` order, strictly after `after` when given.
    pub fn page_messages(
        &self,
        conversation_id: ConversationId,
        after: Option<MessagePosition>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let conversation = conversation_id.to_string();

        let mut messages = Vec::new();
        match after {
            None => {
                let mut stmt = self.conn().prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp ASC, seq ASC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![conversation, limit], row_to_message)?;
                for row in rows {
                    messages.push(row?);
                }
            }
            Some(pos) => {
                let mut stmt = self.conn().prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                       AND (timestamp > ?2 OR (timestamp = ?2 AND seq > ?3))
                     ORDER BY timestamp ASC, seq ASC
                     LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![conversation, fmt_ts(&pos.timestamp), pos.seq, limit],
                    row_to_message,
                )?;
                for row in rows {
                    messages.push(row?);
                }
            }
        }
        Ok(messages)
    }

    pub fn count_messages(&self, conversation_id: ConversationId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Overwrite message content and stamp `edited_at`.
    pub fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
            params![content, fmt_ts(&edited_at), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Hard-delete a message. If it was its conversation's last message,
    /// the conversation is repointed to the newest remaining one.
    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let tx = self.write_tx()?;

        let conversation: Option<String> = {
            let mut stmt =
                tx.prepare_cached("SELECT conversation_id FROM messages WHERE id = ?1")?;
            let mut rows = stmt.query(params![id.to_string()])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        let Some(conversation) = conversation else {
            return Ok(false);
        };

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        refresh_last_message(&tx, &conversation)?;

        tx.commit()?;
        Ok(true)
    }
}

/// Point `last_message_id` at the newest message still in the conversation,
/// or NULL when none is left.
pub(crate) fn refresh_last_message(conn: &Connection, conversation_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET last_message_id = (
             SELECT id FROM messages
             WHERE conversation_id = ?1
             ORDER BY timestamp DESC, seq DESC
             LIMIT 1
         )
         WHERE id = ?1",
        params![conversation_id],
    )?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(5)?;
    let kind =
        MessageKind::parse(&kind_str).ok_or_else(|| unknown_variant(5, "message kind", kind_str))?;

    Ok(Message {
        seq: row.get(0)?,
        id: MessageId(uuid_at(row, 1)?),
        conversation_id: ConversationId(uuid_at(row, 2)?),
        sender_id: UserId(uuid_at(row, 3)?),
        content: row.get(4)?,
        kind,
        timestamp: ts_at(row, 6)?,
        edited_at: opt_ts_at(row, 7)?,
    })
}
