//! CRUD operations for [`Conversation`] records.
//!
//! The participant set lives in `conversation_participants`; the hashed
//! `participant_key` on the conversation row is what makes "same members,
//! same conversation" a schema rule rather than a read-then-write check.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use murmur_shared::{ConversationId, MessageId, ParticipantSet, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Conversation, ConversationKind};
use crate::rows::{fmt_ts, opt_uuid_at, ts_at, uuid_at};

const COLUMNS: &str =
    "id, is_group, group_name, created_by, last_message_id, last_activity, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a conversation and its participant rows in one transaction.
    ///
    /// A conversation with the same participant set already present surfaces
    /// as a unique violation on `participant_key`.
    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let tx = self.write_tx()?;
        let id = conversation.id.to_string();

        tx.execute(
            "INSERT INTO conversations
                 (id, participant_key, is_group, group_name, created_by,
                  last_message_id, last_activity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                conversation.participants.key(),
                conversation.kind.is_group(),
                conversation.kind.group_name(),
                conversation.created_by.to_string(),
                conversation.last_message_id.map(|m| m.to_string()),
                fmt_ts(&conversation.last_activity),
                fmt_ts(&conversation.created_at),
                fmt_ts(&conversation.updated_at),
            ],
        )?;
        insert_participants(&tx, &id, &conversation.participants)?;

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation by id, participants included.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let header = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
                row_to_header,
            )
            .map_err(not_found)?;
        self.attach_participants(header)
    }

    /// Exact participant-set lookup through the unique key index.
    pub fn find_conversation_by_participants(
        &self,
        participants: &ParticipantSet,
    ) -> Result<Option<Conversation>> {
        let header = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM conversations WHERE participant_key = ?1"),
                params![participants.key()],
                row_to_header,
            )
            .optional()?;
        header.map(|h| self.attach_participants(h)).transpose()
    }

    pub fn conversation_exists(&self, id: ConversationId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    pub fn is_participant(&self, id: ConversationId, user: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2
             )",
            params![id.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Every conversation `user` belongs to, most recently updated first.
    pub fn list_conversations_for_user(&self, user: UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.is_group, c.group_name, c.created_by, c.last_message_id,
                    c.last_activity, c.created_at, c.updated_at
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.updated_at DESC, c.id ASC",
        )?;
        let headers = stmt
            .query_map(params![user.to_string()], row_to_header)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        headers
            .into_iter()
            .map(|h| self.attach_participants(h))
            .collect()
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the participant set of a conversation and re-key it.
    ///
    /// Fails with a unique violation when another conversation already has
    /// exactly the new set.
    pub fn update_participants(
        &self,
        id: ConversationId,
        participants: &ParticipantSet,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.write_tx()?;
        let id = id.to_string();

        let affected = tx.execute(
            "UPDATE conversations SET participant_key = ?1, updated_at = ?2 WHERE id = ?3",
            params![participants.key(), fmt_ts(&now), id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "DELETE FROM conversation_participants WHERE conversation_id = ?1",
            params![id],
        )?;
        insert_participants(&tx, &id, participants)?;

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a conversation and all of its messages in one transaction.
    /// Returns the number of messages removed.
    pub fn delete_conversation_cascade(&self, id: ConversationId) -> Result<usize> {
        let tx = self.write_tx()?;
        let id = id.to_string();

        let messages = tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id],
        )?;
        let affected = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit()?;
        Ok(messages)
    }

    fn attach_participants(&self, header: Header) -> Result<Conversation> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![header.id.to_string()], |row| {
                Ok(UserId(uuid_at(row, 0)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(header.into_conversation(ParticipantSet::new(ids)))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_participants(conn: &Connection, id: &str, participants: &ParticipantSet) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
    )?;
    for user in participants {
        stmt.execute(params![id, user.to_string()])?;
    }
    Ok(())
}

/// Conversation row without its participant set.
struct Header {
    id: ConversationId,
    kind: ConversationKind,
    created_by: UserId,
    last_message_id: Option<MessageId>,
    last_activity: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Header {
    fn into_conversation(self, participants: ParticipantSet) -> Conversation {
        Conversation {
            id: self.id,
            participants,
            kind: self.kind,
            created_by: self.created_by,
            last_message_id: self.last_message_id,
            last_activity: self.last_activity,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn row_to_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<Header> {
    let is_group: bool = row.get(1)?;
    let group_name: Option<String> = row.get(2)?;
    let kind = match (is_group, group_name) {
        (true, Some(name)) => ConversationKind::Group { name },
        _ => ConversationKind::Direct,
    };

    Ok(Header {
        id: ConversationId(uuid_at(row, 0)?),
        kind,
        created_by: UserId(uuid_at(row, 3)?),
        last_message_id: opt_uuid_at(row, 4)?.map(MessageId),
        last_activity: ts_at(row, 5)?,
        created_at: ts_at(row, 6)?,
        updated_at: ts_at(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("conversations.db")).unwrap();
        (dir, db)
    }

    fn conversation(participants: ParticipantSet, kind: ConversationKind) -> Conversation {
        let now = crate::now();
        let created_by = *participants.iter().next().unwrap();
        Conversation {
            id: ConversationId::new(),
            participants,
            kind,
            created_by,
            last_message_id: None,
            last_activity: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_then_lookup_by_participants() {
        let (_dir, db) = open();
        let a = UserId::new();
        let b = UserId::new();
        let conv = conversation(ParticipantSet::new([a, b]), ConversationKind::Direct);
        db.insert_conversation(&conv).unwrap();

        let found = db
            .find_conversation_by_participants(&ParticipantSet::new([b, a]))
            .unwrap()
            .expect("exact set should match");
        assert_eq!(found, conv);
        assert!(db.is_participant(conv.id, a).unwrap());
        assert!(!db.is_participant(conv.id, UserId::new()).unwrap());
    }

    #[test]
    fn duplicate_participant_set_is_unique_violation() {
        let (_dir, db) = open();
        let set = ParticipantSet::new([UserId::new(), UserId::new()]);
        db.insert_conversation(&conversation(set.clone(), ConversationKind::Direct))
            .unwrap();

        let err = db
            .insert_conversation(&conversation(set, ConversationKind::Direct))
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn rekey_on_participant_change() {
        let (_dir, db) = open();
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();
        let d = UserId::new();
        let conv = conversation(
            ParticipantSet::new([a, b, c]),
            ConversationKind::Group {
                name: "team".into(),
            },
        );
        db.insert_conversation(&conv).unwrap();

        let grown = ParticipantSet::new([a, b, c, d]);
        db.update_participants(conv.id, &grown, Utc::now()).unwrap();

        assert!(db
            .find_conversation_by_participants(&ParticipantSet::new([a, b, c]))
            .unwrap()
            .is_none());
        let found = db.find_conversation_by_participants(&grown).unwrap().unwrap();
        assert_eq!(found.id, conv.id);
        assert_eq!(found.participants.len(), 4);
    }

    #[test]
    fn list_for_user_orders_by_update() {
        let (_dir, db) = open();
        let me = UserId::new();
        let older = conversation(ParticipantSet::new([me, UserId::new()]), ConversationKind::Direct);
        let mut newer =
            conversation(ParticipantSet::new([me, UserId::new()]), ConversationKind::Direct);
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);

        db.insert_conversation(&older).unwrap();
        db.insert_conversation(&newer).unwrap();

        let listed = db.list_conversations_for_user(me).unwrap();
        assert_eq!(
            listed.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
    }

    #[test]
    fn delete_missing_conversation_is_not_found() {
        let (_dir, db) = open();
        assert!(matches!(
            db.delete_conversation_cascade(ConversationId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn group_kind_survives_round_trip() {
        let (_dir, db) = open();
        let conv = conversation(
            ParticipantSet::new([UserId::new(), UserId::new(), UserId::new()]),
            ConversationKind::Group {
                name: "climbers".into(),
            },
        );
        db.insert_conversation(&conv).unwrap();

        let fetched = db.get_conversation(conv.id).unwrap();
        assert_eq!(fetched.kind.group_name(), Some("climbers"));
    }
}
