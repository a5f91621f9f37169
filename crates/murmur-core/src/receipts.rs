//! Read receipts and the statistics derived from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use murmur_shared::{ConversationId, MessageId, UserId};
use murmur_store::{Database, Message, ReadReceipt};

use crate::error::{CoreError, Result};
use crate::{lock, SharedDatabase};

/// Outcome of [`ReadReceipts::mark_read`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkRead {
    pub receipt: ReadReceipt,
    /// `true` when the receipt existed before this call.
    pub already_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reader {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    pub message_id: MessageId,
    pub total_readers: usize,
    /// Earliest reader first.
    pub readers: Vec<Reader>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadCount {
    pub conversation_id: ConversationId,
    pub unread: u64,
    pub is_group: bool,
    pub group_name: Option<String>,
}

#[derive(Clone)]
pub struct ReadReceipts {
    db: SharedDatabase,
}

impl ReadReceipts {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Record that `user` has seen `message_id`. Marking twice keeps the
    /// first receipt.
    pub fn mark_read(&self, message_id: MessageId, user: UserId) -> Result<MarkRead> {
        let db = lock(&self.db)?;
        let message = fetch_message(&db, message_id)?;
        if !db.is_participant(message.conversation_id, user)? {
            return Err(CoreError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }

        let inserted = record_receipt(&db, message_id, user)?;
        let receipt = db
            .get_read_receipt(message_id, user)?
            .ok_or(CoreError::NotFound("read receipt"))?;

        if inserted {
            info!(message = %message_id, user = %user, "message read");
        } else {
            debug!(message = %message_id, user = %user, "message already read");
        }
        Ok(MarkRead {
            receipt,
            already_read: !inserted,
        })
    }

    pub fn read_stats(&self, message_id: MessageId) -> Result<ReadStats> {
        let db = lock(&self.db)?;
        fetch_message(&db, message_id)?;

        let readers: Vec<Reader> = db
            .list_read_receipts(message_id)?
            .into_iter()
            .map(|r| Reader {
                user_id: r.user_id,
                read_at: r.read_at,
            })
            .collect();

        Ok(ReadStats {
            message_id,
            total_readers: readers.len(),
            readers,
        })
    }

    /// Messages from others in the conversation that `user` has not read.
    pub fn unread_count_for_user(
        &self,
        conversation_id: ConversationId,
        user: UserId,
    ) -> Result<UnreadCount> {
        let db = lock(&self.db)?;
        let conversation = db
            .get_conversation(conversation_id)
            .map_err(|e| CoreError::from_store(e, "conversation"))?;
        if !conversation.participants.contains(&user) {
            return Err(CoreError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }

        let unread = db.count_unread(conversation_id, user)?;
        Ok(UnreadCount {
            conversation_id,
            unread,
            is_group: conversation.kind.is_group(),
            group_name: conversation.kind.group_name().map(str::to_string),
        })
    }

    pub fn is_read_by(&self, message_id: MessageId, user: UserId) -> Result<bool> {
        Ok(lock(&self.db)?.is_read_by(message_id, user)?)
    }
}

/// Write the receipt. The message may have been deleted by another handle
/// since it was looked up.
fn record_receipt(db: &Database, message_id: MessageId, user: UserId) -> Result<bool> {
    match db.insert_read_receipt(message_id, user, murmur_store::now()) {
        Ok(inserted) => Ok(inserted),
        Err(e) if e.is_foreign_key_violation() => Err(CoreError::NotFound("message")),
        Err(e) => Err(e.into()),
    }
}

fn fetch_message(db: &Database, id: MessageId) -> Result<Message> {
    db.get_message(id)
        .map_err(|e| CoreError::from_store(e, "message"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::NewConversation;
    use crate::testutil::{env, Env};
    use murmur_store::MessageKind;

    fn conversation(env: &Env, members: Vec<UserId>, name: Option<&str>) -> ConversationId {
        let created_by = members[0];
        env.services
            .conversations
            .find_or_create(NewConversation {
                participants: members,
                created_by,
                is_group: None,
                group_name: name.map(str::to_string),
            })
            .unwrap()
            .conversation()
            .id
    }

    #[test]
    fn hi_scenario() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = conversation(&env, vec![a, b], None);

        let hi = env.services.messages.send(conv, a, "hi", MessageKind::Text).unwrap();
        assert!(!env.services.receipts.is_read_by(hi.id, b).unwrap());

        let marked = env.services.receipts.mark_read(hi.id, b).unwrap();
        assert!(!marked.already_read);
        assert!(env.services.receipts.is_read_by(hi.id, b).unwrap());

        let stats = env.services.receipts.read_stats(hi.id).unwrap();
        assert_eq!(stats.total_readers, 1);
        assert_eq!(stats.readers[0].user_id, b);
        assert_eq!(stats.readers[0].read_at, marked.receipt.read_at);

        let receipts = &env.services.receipts;
        assert_eq!(receipts.unread_count_for_user(conv, b).unwrap().unread, 0);
        assert_eq!(receipts.unread_count_for_user(conv, a).unwrap().unread, 0);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = conversation(&env, vec![a, b], None);
        let msg = env.services.messages.send(conv, a, "hello", MessageKind::Text).unwrap();

        let first = env.services.receipts.mark_read(msg.id, b).unwrap();
        let second = env.services.receipts.mark_read(msg.id, b).unwrap();
        assert!(second.already_read);
        assert_eq!(second.receipt, first.receipt);
        assert_eq!(env.services.receipts.read_stats(msg.id).unwrap().total_readers, 1);
    }

    #[test]
    fn receipt_written_by_another_handle_reports_already_read() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = conversation(&env, vec![a, b], None);
        let msg = env.services.messages.send(conv, a, "race", MessageKind::Text).unwrap();

        let winner_at = murmur_store::now();
        assert!(env
            .second_handle()
            .insert_read_receipt(msg.id, b, winner_at)
            .unwrap());

        let marked = env.services.receipts.mark_read(msg.id, b).unwrap();
        assert!(marked.already_read);
        assert_eq!(marked.receipt.read_at, winner_at);
    }

    #[test]
    fn message_deleted_after_lookup_is_not_found() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = conversation(&env, vec![a, b], None);
        let msg = env.services.messages.send(conv, a, "gone", MessageKind::Text).unwrap();

        let db = lock(&env.db).unwrap();
        fetch_message(&db, msg.id).unwrap();
        assert!(env.second_handle().delete_message(msg.id).unwrap());

        assert!(matches!(
            record_receipt(&db, msg.id, b),
            Err(CoreError::NotFound("message"))
        ));
    }

    #[test]
    fn unread_goes_from_n_to_zero() {
        let env = env();
        let [a, b, c] = ["alice", "bob", "carol"].map(|n| env.user(n));
        let conv = conversation(&env, vec![a, b, c], Some("crew"));

        let mut sent = Vec::new();
        for i in 0..3 {
            sent.push(
                env.services
                    .messages
                    .send(conv, a, &format!("n{i}"), MessageKind::Text)
                    .unwrap(),
            );
        }
        env.services.messages.send(conv, b, "own", MessageKind::Text).unwrap();

        let count = env.services.receipts.unread_count_for_user(conv, b).unwrap();
        assert_eq!(count.unread, 3);
        assert!(count.is_group);
        assert_eq!(count.group_name.as_deref(), Some("crew"));

        for m in &sent {
            env.services.receipts.mark_read(m.id, b).unwrap();
        }
        assert_eq!(
            env.services.receipts.unread_count_for_user(conv, b).unwrap().unread,
            0
        );
        assert_eq!(
            env.services.receipts.unread_count_for_user(conv, c).unwrap().unread,
            4
        );
    }

    #[test]
    fn outsiders_and_missing_records() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let outsider = env.user("eve");
        let conv = conversation(&env, vec![a, b], None);
        let msg = env.services.messages.send(conv, a, "private", MessageKind::Text).unwrap();
        let receipts = &env.services.receipts;

        assert!(matches!(receipts.mark_read(msg.id, outsider), Err(CoreError::Forbidden(_))));
        assert!(matches!(
            receipts.unread_count_for_user(conv, outsider),
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            receipts.mark_read(MessageId::new(), a),
            Err(CoreError::NotFound("message"))
        ));
        assert!(matches!(
            receipts.read_stats(MessageId::new()),
            Err(CoreError::NotFound("message"))
        ));
        assert!(matches!(
            receipts.unread_count_for_user(ConversationId::new(), a),
            Err(CoreError::NotFound("conversation"))
        ));
    }
}
