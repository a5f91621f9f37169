//! Message store and the paged message cursor.

use std::collections::VecDeque;

use tracing::{debug, info};

use murmur_shared::constants::MAX_MESSAGE_CHARS;
use murmur_shared::{ConversationId, MessageId, UserId};
use murmur_store::{Database, Message, MessageKind, MessagePosition};

use crate::error::{CoreError, Result};
use crate::{lock, SharedDatabase};

#[derive(Clone)]
pub struct MessageStore {
    db: SharedDatabase,
    page_size: u32,
}

impl MessageStore {
    /// `page_size` is the number of rows each cursor fetches per query.
    pub fn new(db: SharedDatabase, page_size: u32) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }

    /// Post a message to a conversation `sender` belongs to.
    pub fn send(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message> {
        let db = lock(&self.db)?;
        let conversation = db
            .get_conversation(conversation_id)
            .map_err(|e| CoreError::from_store(e, "conversation"))?;
        if !conversation.participants.contains(&sender) {
            return Err(CoreError::Forbidden(
                "sender is not a participant of this conversation".into(),
            ));
        }
        validate_content(content, kind)?;

        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender_id: sender,
            content: content.to_string(),
            kind,
            timestamp: murmur_store::now(),
            edited_at: None,
            seq: 0,
        };
        let stored = db
            .insert_message(&message)
            .map_err(|e| CoreError::from_store(e, "conversation"))?;

        info!(
            conversation = %conversation_id,
            message = %stored.id,
            sender = %sender,
            kind = kind.as_str(),
            "message sent"
        );
        Ok(stored)
    }

    /// Replace the content of a message. Only its sender may edit it.
    pub fn edit(&self, message_id: MessageId, caller: UserId, new_content: &str) -> Result<Message> {
        let db = lock(&self.db)?;
        let mut message = owned_by(&db, message_id, caller)?;
        validate_content(new_content, message.kind)?;

        let edited_at = murmur_store::now();
        if !db.update_message_content(message_id, new_content, edited_at)? {
            return Err(CoreError::NotFound("message"));
        }
        message.content = new_content.to_string();
        message.edited_at = Some(edited_at);

        info!(message = %message_id, "message edited");
        Ok(message)
    }

    /// Hard-delete a message. Only its sender may delete it.
    pub fn delete(&self, message_id: MessageId, caller: UserId) -> Result<()> {
        let db = lock(&self.db)?;
        owned_by(&db, message_id, caller)?;

        if !db.delete_message(message_id)? {
            return Err(CoreError::NotFound("message"));
        }
        info!(message = %message_id, "message deleted");
        Ok(())
    }

    pub fn get(&self, message_id: MessageId) -> Result<Message> {
        lock(&self.db)?
            .get_message(message_id)
            .map_err(|e| CoreError::from_store(e, "message"))
    }

    /// A cursor over the conversation's messages, oldest first. Nothing is
    /// read until the cursor is first advanced.
    pub fn list_for_conversation(&self, conversation_id: ConversationId) -> Result<MessageCursor> {
        if !lock(&self.db)?.conversation_exists(conversation_id)? {
            return Err(CoreError::NotFound("conversation"));
        }
        Ok(MessageCursor::new(
            self.db.clone(),
            conversation_id,
            self.page_size,
        ))
    }
}

/// Lazy, finite iterator over a conversation's messages in
/// `(timestamp, seq)` order.
///
/// Rows are fetched `page_size` at a time with a keyset query that resumes
/// strictly after the last row handed out, so messages inserted or deleted
/// between pages never cause a row to be skipped or repeated.
pub struct MessageCursor {
    db: SharedDatabase,
    conversation_id: ConversationId,
    page_size: u32,
    buffer: VecDeque<Message>,
    after: Option<MessagePosition>,
    exhausted: bool,
}

impl MessageCursor {
    fn new(db: SharedDatabase, conversation_id: ConversationId, page_size: u32) -> Self {
        Self {
            db,
            conversation_id,
            page_size,
            buffer: VecDeque::new(),
            after: None,
            exhausted: false,
        }
    }

    /// Rewind to the first message.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.after = None;
        self.exhausted = false;
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = lock(&self.db)?.page_messages(self.conversation_id, self.after, self.page_size)?;
        debug!(
            conversation = %self.conversation_id,
            rows = page.len(),
            "message page fetched"
        );

        if page.len() < self.page_size as usize {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.into());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for MessageCursor {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn owned_by(db: &Database, message_id: MessageId, caller: UserId) -> Result<Message> {
    let message = db
        .get_message(message_id)
        .map_err(|e| CoreError::from_store(e, "message"))?;
    if message.sender_id != caller {
        return Err(CoreError::Forbidden("only the sender can change a message".into()));
    }
    Ok(message)
}

fn validate_content(content: &str, kind: MessageKind) -> Result<()> {
    let blank = match kind {
        MessageKind::Text => content.trim().is_empty(),
        MessageKind::Image | MessageKind::File | MessageKind::System => content.is_empty(),
    };
    if blank {
        return Err(CoreError::InvalidArgument("message content is empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(CoreError::InvalidArgument(format!(
            "message content exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::NewConversation;
    use crate::testutil::{env, env_with_page_size, Env};

    fn direct(env: &Env, a: UserId, b: UserId) -> ConversationId {
        env.services
            .conversations
            .find_or_create(NewConversation {
                participants: vec![a, b],
                created_by: a,
                is_group: None,
                group_name: None,
            })
            .unwrap()
            .conversation()
            .id
    }

    fn contents(cursor: &mut MessageCursor) -> Vec<String> {
        cursor.map(|m| m.unwrap().content).collect()
    }

    #[test]
    fn outsider_send_is_forbidden_and_changes_nothing() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let mallory = env.user("mallory");
        let conv = direct(&env, a, b);
        let before = env.services.conversations.get(conv).unwrap();

        let err = env
            .services
            .messages
            .send(conv, mallory, "let me in", MessageKind::Text)
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let after = env.services.conversations.get(conv).unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert!(after.last_message.is_none());
        let mut cursor = env.services.messages.list_for_conversation(conv).unwrap();
        assert!(cursor.next().is_none());
    }

    #[test]
    fn send_to_missing_conversation_is_not_found() {
        let env = env();
        let a = env.user("alice");
        assert!(matches!(
            env.services
                .messages
                .send(ConversationId::new(), a, "hello", MessageKind::Text),
            Err(CoreError::NotFound("conversation"))
        ));
    }

    #[test]
    fn content_rules() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        let messages = &env.services.messages;

        assert!(matches!(
            messages.send(conv, a, "  \n ", MessageKind::Text),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            messages.send(conv, a, "", MessageKind::Image),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            messages.send(conv, a, &"x".repeat(MAX_MESSAGE_CHARS + 1), MessageKind::Text),
            Err(CoreError::InvalidArgument(_))
        ));
        messages
            .send(conv, a, &"é".repeat(MAX_MESSAGE_CHARS), MessageKind::Text)
            .unwrap();
        messages
            .send(conv, a, "https://example.com/cat.png", MessageKind::Image)
            .unwrap();
    }

    #[test]
    fn send_bumps_conversation() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);

        let sent = env.services.messages.send(conv, b, "yo", MessageKind::Text).unwrap();
        let view = env.services.conversations.get(conv).unwrap();
        assert_eq!(view.last_message.map(|m| m.id), Some(sent.id));
        assert_eq!(view.last_activity, sent.timestamp);
        assert_eq!(view.updated_at, sent.timestamp);
    }

    #[test]
    fn only_sender_edits_and_deletes() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        let messages = &env.services.messages;
        let sent = messages.send(conv, a, "tpyo", MessageKind::Text).unwrap();

        assert!(matches!(messages.edit(sent.id, b, "nope"), Err(CoreError::Forbidden(_))));
        assert!(matches!(messages.delete(sent.id, b), Err(CoreError::Forbidden(_))));
        assert!(matches!(messages.edit(sent.id, a, " "), Err(CoreError::InvalidArgument(_))));

        let edited = messages.edit(sent.id, a, "typo").unwrap();
        assert!(edited.edited());
        assert_eq!(messages.get(sent.id).unwrap(), edited);

        messages.delete(sent.id, a).unwrap();
        assert!(matches!(messages.get(sent.id), Err(CoreError::NotFound("message"))));
        assert!(matches!(messages.delete(sent.id, a), Err(CoreError::NotFound("message"))));
    }

    #[test]
    fn delete_repoints_last_message() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        let messages = &env.services.messages;
        let first = messages.send(conv, a, "first", MessageKind::Text).unwrap();
        let second = messages.send(conv, a, "second", MessageKind::Text).unwrap();

        messages.delete(second.id, a).unwrap();
        let view = env.services.conversations.get(conv).unwrap();
        assert_eq!(view.last_message.map(|m| m.id), Some(first.id));
    }

    #[test]
    fn cursor_pages_restarts_and_ends() {
        let env = env_with_page_size(2);
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        for i in 0..5 {
            env.services
                .messages
                .send(conv, a, &format!("m{i}"), MessageKind::Text)
                .unwrap();
        }

        let mut cursor = env.services.messages.list_for_conversation(conv).unwrap();
        assert_eq!(cursor.next().unwrap().unwrap().content, "m0");
        assert_eq!(contents(&mut cursor), vec!["m1", "m2", "m3", "m4"]);
        assert!(cursor.next().is_none());

        cursor.restart();
        assert_eq!(contents(&mut cursor).len(), 5);
    }

    #[test]
    fn cursor_is_lazy() {
        let env = env_with_page_size(2);
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);

        let mut cursor = env.services.messages.list_for_conversation(conv).unwrap();
        env.services.messages.send(conv, a, "late", MessageKind::Text).unwrap();
        assert_eq!(contents(&mut cursor), vec!["late"]);
    }

    #[test]
    fn cursor_on_missing_conversation_is_not_found() {
        let env = env();
        assert!(matches!(
            env.services.messages.list_for_conversation(ConversationId::new()),
            Err(CoreError::NotFound("conversation"))
        ));
    }

    #[test]
    fn user_delete_cascade() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        env.services.friendships.send_request(a, b).unwrap();
        let from_b = env.services.messages.send(conv, b, "from bob", MessageKind::Text).unwrap();
        env.services.receipts.mark_read(from_b.id, a).unwrap();
        let from_a = env.services.messages.send(conv, a, "from alice", MessageKind::Text).unwrap();

        env.services.identity.delete(a).unwrap();

        assert!(matches!(
            env.services.messages.get(from_a.id),
            Err(CoreError::NotFound("message"))
        ));
        // The conversation stays and points at what is left.
        let view = env.services.conversations.get(conv).unwrap();
        assert_eq!(view.last_message.map(|m| m.id), Some(from_b.id));
        // Alice's receipt on Bob's message is kept.
        assert!(env.services.receipts.is_read_by(from_b.id, a).unwrap());
        assert!(env.services.friendships.pending_requests(b).unwrap().is_empty());
        assert!(matches!(
            env.services.identity.delete(a),
            Err(CoreError::NotFound("user"))
        ));
    }
}
