//! Conversation registry.
//!
//! A conversation is identified by its exact participant set. Looking one up
//! and creating it are a single operation, [`ConversationRegistry::find_or_create`],
//! and the store's unique `participant_key` makes it safe for two callers to
//! race on the same set: the loser adopts the winner's row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use murmur_shared::constants::{
    DEFAULT_MESSAGE_PAGE_SIZE, MAX_GROUP_NAME_CHARS, MAX_PARTICIPANTS, MIN_GROUP_PARTICIPANTS,
    MIN_PARTICIPANTS,
};
use murmur_shared::{ConversationId, ParticipantSet, UserId};
use murmur_store::{Conversation, ConversationKind, Database, Message, StoreError, UserSummary};

use crate::error::{CoreError, Result};
use crate::{lock, SharedDatabase};

/// Input of [`ConversationRegistry::find_or_create`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub participants: Vec<UserId>,
    pub created_by: UserId,
    /// When given, must agree with the kind implied by the participant count.
    #[serde(default)]
    pub is_group: Option<bool>,
    #[serde(default)]
    pub group_name: Option<String>,
}

/// Outcome of [`ConversationRegistry::find_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOrCreate {
    Found(Conversation),
    Created(Conversation),
}

impl FindOrCreate {
    pub fn conversation(&self) -> &Conversation {
        match self {
            FindOrCreate::Found(c) | FindOrCreate::Created(c) => c,
        }
    }

    pub fn into_conversation(self) -> Conversation {
        match self {
            FindOrCreate::Found(c) | FindOrCreate::Created(c) => c,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, FindOrCreate::Created(_))
    }
}

/// A conversation enriched for display.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub created_by: UserId,
    /// Participants that still resolve to a user, ordered by username.
    pub participants: Vec<UserSummary>,
    pub last_message: Option<Message>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ConversationRegistry {
    db: SharedDatabase,
}

impl ConversationRegistry {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Return the conversation with exactly these participants, creating it
    /// if none exists yet.
    ///
    /// Order and duplicates in `request.participants` are ignored. Validation
    /// only applies when a new conversation has to be created.
    pub fn find_or_create(&self, request: NewConversation) -> Result<FindOrCreate> {
        let participants = ParticipantSet::new(request.participants);
        let db = lock(&self.db)?;

        if let Some(existing) = db.find_conversation_by_participants(&participants)? {
            debug!(conversation = %existing.id, "conversation already exists");
            return Ok(FindOrCreate::Found(existing));
        }

        let kind = classify(&participants, request.is_group, request.group_name)?;
        if request.created_by.is_nil() {
            return Err(CoreError::InvalidArgument("created_by is required".into()));
        }

        let now = murmur_store::now();
        let candidate = Conversation {
            id: ConversationId::new(),
            participants,
            kind,
            created_by: request.created_by,
            last_message_id: None,
            last_activity: now,
            created_at: now,
            updated_at: now,
        };
        insert_or_adopt(&db, candidate)
    }

    /// Add `user` to a group conversation.
    pub fn add_participant(&self, id: ConversationId, user: UserId) -> Result<Conversation> {
        let db = lock(&self.db)?;
        let mut conversation = fetch(&db, id)?;
        ensure_group(&conversation)?;

        let mut participants = conversation.participants.clone();
        if !participants.insert(user) {
            return Err(CoreError::Conflict("user is already a participant".into()));
        }
        if participants.len() > MAX_PARTICIPANTS {
            return Err(CoreError::InvalidArgument(format!(
                "a conversation holds at most {MAX_PARTICIPANTS} participants"
            )));
        }

        conversation.updated_at = rekey(&db, id, &participants)?;
        conversation.participants = participants;

        info!(conversation = %id, user = %user, "participant added");
        Ok(conversation)
    }

    /// Remove `user` from a group conversation.
    pub fn remove_participant(&self, id: ConversationId, user: UserId) -> Result<Conversation> {
        let db = lock(&self.db)?;
        let mut conversation = fetch(&db, id)?;
        ensure_group(&conversation)?;

        let mut participants = conversation.participants.clone();
        if !participants.remove(&user) {
            return Err(CoreError::InvalidArgument("user is not a participant".into()));
        }
        if participants.len() < MIN_GROUP_PARTICIPANTS {
            return Err(CoreError::InvalidArgument(format!(
                "a group needs at least {MIN_GROUP_PARTICIPANTS} participants"
            )));
        }

        conversation.updated_at = rekey(&db, id, &participants)?;
        conversation.participants = participants;

        info!(conversation = %id, user = %user, "participant removed");
        Ok(conversation)
    }

    /// Conversations `user` belongs to, most recently updated first.
    pub fn get_for_user(&self, user: UserId) -> Result<Vec<ConversationView>> {
        let db = lock(&self.db)?;
        db.list_conversations_for_user(user)?
            .into_iter()
            .map(|c| view(&db, c))
            .collect()
    }

    pub fn get(&self, id: ConversationId) -> Result<ConversationView> {
        let db = lock(&self.db)?;
        let conversation = fetch(&db, id)?;
        view(&db, conversation)
    }

    /// The conversation view together with its full history, oldest first.
    pub fn get_with_messages(&self, id: ConversationId) -> Result<(ConversationView, Vec<Message>)> {
        let db = lock(&self.db)?;
        let conversation = fetch(&db, id)?;

        let mut messages: Vec<Message> = Vec::new();
        loop {
            let after = messages.last().map(Into::into);
            let page = db.page_messages(id, after, DEFAULT_MESSAGE_PAGE_SIZE)?;
            let done = page.len() < DEFAULT_MESSAGE_PAGE_SIZE as usize;
            messages.extend(page);
            if done {
                break;
            }
        }

        Ok((view(&db, conversation)?, messages))
    }

    /// Fetch a conversation after checking that `user` is in it.
    pub fn require_participant(&self, id: ConversationId, user: UserId) -> Result<Conversation> {
        let db = lock(&self.db)?;
        let conversation = fetch(&db, id)?;
        if !conversation.participants.contains(&user) {
            return Err(CoreError::Forbidden("not a participant of this conversation".into()));
        }
        Ok(conversation)
    }

    /// Delete a conversation and every message in it.
    pub fn delete(&self, id: ConversationId) -> Result<()> {
        let messages = lock(&self.db)?
            .delete_conversation_cascade(id)
            .map_err(|e| CoreError::from_store(e, "conversation"))?;
        info!(conversation = %id, messages, "conversation deleted");
        Ok(())
    }
}

/// Insert `candidate`, or return the conversation that beat it to the same
/// participant set.
pub(crate) fn insert_or_adopt(db: &Database, candidate: Conversation) -> Result<FindOrCreate> {
    match db.insert_conversation(&candidate) {
        Ok(()) => {
            info!(
                conversation = %candidate.id,
                participants = candidate.participants.len(),
                group = candidate.kind.is_group(),
                "conversation created"
            );
            Ok(FindOrCreate::Created(candidate))
        }
        Err(e) if e.is_unique_violation() => {
            match db.find_conversation_by_participants(&candidate.participants)? {
                Some(winner) => {
                    debug!(conversation = %winner.id, "lost creation race, adopting winner");
                    Ok(FindOrCreate::Found(winner))
                }
                None => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn classify(
    participants: &ParticipantSet,
    is_group: Option<bool>,
    group_name: Option<String>,
) -> Result<ConversationKind> {
    let count = participants.len();
    if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&count) {
        return Err(CoreError::InvalidArgument(format!(
            "a conversation needs {MIN_PARTICIPANTS} to {MAX_PARTICIPANTS} distinct participants"
        )));
    }

    let group = participants.is_group();
    if is_group.is_some_and(|flag| flag != group) {
        return Err(CoreError::InvalidArgument(
            "is_group does not match the number of participants".into(),
        ));
    }

    if !group {
        return Ok(ConversationKind::Direct);
    }

    let name = group_name.map(|n| n.trim().to_string()).unwrap_or_default();
    let len = name.chars().count();
    if len == 0 || len > MAX_GROUP_NAME_CHARS {
        return Err(CoreError::InvalidArgument(format!(
            "a group needs a name of 1 to {MAX_GROUP_NAME_CHARS} characters"
        )));
    }
    Ok(ConversationKind::Group { name })
}

fn fetch(db: &Database, id: ConversationId) -> Result<Conversation> {
    db.get_conversation(id)
        .map_err(|e| CoreError::from_store(e, "conversation"))
}

fn ensure_group(conversation: &Conversation) -> Result<()> {
    if conversation.kind.is_group() {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(
            "direct conversations have fixed membership".into(),
        ))
    }
}

/// Store a new participant set. Returns the new `updated_at`.
fn rekey(db: &Database, id: ConversationId, participants: &ParticipantSet) -> Result<DateTime<Utc>> {
    let now = murmur_store::now();
    match db.update_participants(id, participants, now) {
        Ok(()) => Ok(now),
        Err(e) if e.is_unique_violation() => Err(CoreError::Conflict(
            "another conversation already has exactly these participants".into(),
        )),
        Err(e) => Err(CoreError::from_store(e, "conversation")),
    }
}

fn view(db: &Database, conversation: Conversation) -> Result<ConversationView> {
    let participants = db.get_user_summaries(conversation.participants.as_slice())?;
    let last_message = match conversation.last_message_id {
        Some(id) => match db.get_message(id) {
            Ok(m) => Some(m),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    Ok(ConversationView {
        id: conversation.id,
        kind: conversation.kind,
        created_by: conversation.created_by,
        participants,
        last_message,
        last_activity: conversation.last_activity,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{env, Env};
    use murmur_store::MessageKind;

    fn direct(env: &Env, a: UserId, b: UserId) -> Conversation {
        env.services
            .conversations
            .find_or_create(NewConversation {
                participants: vec![a, b],
                created_by: a,
                is_group: None,
                group_name: None,
            })
            .unwrap()
            .into_conversation()
    }

    fn group(env: &Env, members: Vec<UserId>, name: &str) -> Result<FindOrCreate> {
        let created_by = members[0];
        env.services.conversations.find_or_create(NewConversation {
            participants: members,
            created_by,
            is_group: Some(true),
            group_name: Some(name.into()),
        })
    }

    #[test]
    fn find_or_create_is_idempotent_under_reordering() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let c = env.user("carol");

        let first = group(&env, vec![a, b, c], "trio").unwrap();
        assert!(first.was_created());
        let again = group(&env, vec![c, a, b, a], "ignored").unwrap();
        assert!(!again.was_created());
        assert_eq!(first.conversation().id, again.conversation().id);

        let d1 = direct(&env, a, b);
        let d2 = direct(&env, b, a);
        assert_eq!(d1.id, d2.id);
        assert_eq!(d1.kind, ConversationKind::Direct);
    }

    #[test]
    fn participant_count_bounds() {
        let env = env();
        let a = env.user("alice");
        let registry = &env.services.conversations;

        let alone = registry.find_or_create(NewConversation {
            participants: vec![a, a],
            created_by: a,
            is_group: None,
            group_name: None,
        });
        assert!(matches!(alone, Err(CoreError::InvalidArgument(_))));

        let crowd: Vec<UserId> = (0..=MAX_PARTICIPANTS).map(|_| UserId::new()).collect();
        assert!(matches!(
            group(&env, crowd, "crowd"),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn kind_must_match_count() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let c = env.user("carol");
        let registry = &env.services.conversations;

        let flagged_pair = registry.find_or_create(NewConversation {
            participants: vec![a, b],
            created_by: a,
            is_group: Some(true),
            group_name: Some("pair".into()),
        });
        assert!(matches!(flagged_pair, Err(CoreError::InvalidArgument(_))));

        assert!(matches!(
            group(&env, vec![a, b, c], "   "),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            group(&env, vec![a, b, c], &"n".repeat(MAX_GROUP_NAME_CHARS + 1)),
            Err(CoreError::InvalidArgument(_))
        ));

        let made = group(&env, vec![a, b, c], " hikers ").unwrap();
        assert_eq!(made.conversation().kind.group_name(), Some("hikers"));
    }

    #[test]
    fn nil_creator_is_rejected() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let result = env.services.conversations.find_or_create(NewConversation {
            participants: vec![a, b],
            created_by: UserId(uuid::Uuid::nil()),
            is_group: None,
            group_name: None,
        });
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn lost_creation_race_returns_winner() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let now = murmur_store::now();
        let candidate = |id| Conversation {
            id,
            participants: ParticipantSet::new([a, b]),
            kind: ConversationKind::Direct,
            created_by: a,
            last_message_id: None,
            last_activity: now,
            created_at: now,
            updated_at: now,
        };

        let winner = candidate(ConversationId::new());
        env.second_handle().insert_conversation(&winner).unwrap();

        let db = lock(&env.db).unwrap();
        let outcome = insert_or_adopt(&db, candidate(ConversationId::new())).unwrap();
        assert_eq!(outcome, FindOrCreate::Found(winner));
    }

    #[test]
    fn add_and_remove_participants() {
        let env = env();
        let [a, b, c, d] = ["alice", "bob", "carol", "dave"].map(|n| env.user(n));
        let registry = &env.services.conversations;
        let conv = group(&env, vec![a, b, c], "team").unwrap().into_conversation();

        let grown = registry.add_participant(conv.id, d).unwrap();
        assert_eq!(grown.participants.len(), 4);
        assert!(matches!(
            registry.add_participant(conv.id, d),
            Err(CoreError::Conflict(_))
        ));

        let shrunk = registry.remove_participant(conv.id, d).unwrap();
        assert_eq!(shrunk.participants, conv.participants);
        assert!(matches!(
            registry.remove_participant(conv.id, d),
            Err(CoreError::InvalidArgument(_))
        ));
        // Three is the floor for a group.
        assert!(matches!(
            registry.remove_participant(conv.id, c),
            Err(CoreError::InvalidArgument(_))
        ));

        assert!(matches!(
            registry.add_participant(ConversationId::new(), d),
            Err(CoreError::NotFound("conversation"))
        ));
    }

    #[test]
    fn direct_membership_is_fixed() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);

        assert!(matches!(
            env.services.conversations.add_participant(conv.id, UserId::new()),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            env.services.conversations.remove_participant(conv.id, b),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rekey_collision_is_conflict() {
        let env = env();
        let [a, b, c, d] = ["alice", "bob", "carol", "dave"].map(|n| env.user(n));
        group(&env, vec![a, b, c], "three").unwrap();
        let four = group(&env, vec![a, b, c, d], "four").unwrap().into_conversation();

        assert!(matches!(
            env.services.conversations.remove_participant(four.id, d),
            Err(CoreError::Conflict(_))
        ));
        let unchanged = env.services.conversations.get(four.id).unwrap();
        assert_eq!(unchanged.participants.len(), 4);
    }

    #[test]
    fn views_carry_participants_and_last_message() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let c = env.user("carol");
        let older = direct(&env, a, b);
        let newer = direct(&env, a, c);

        let sent = env
            .services
            .messages
            .send(older.id, a, "ping", MessageKind::Text)
            .unwrap();

        let views = env.services.conversations.get_for_user(a).unwrap();
        assert_eq!(
            views.iter().map(|v| v.id).collect::<Vec<_>>(),
            vec![older.id, newer.id]
        );
        assert_eq!(views[0].last_message.as_ref().map(|m| m.id), Some(sent.id));
        assert!(views[1].last_message.is_none());

        let names: Vec<_> = views[0].participants.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn views_skip_deleted_users() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);

        env.services.identity.delete(b).unwrap();

        let view = env.services.conversations.get(conv.id).unwrap();
        assert_eq!(view.participants.len(), 1);
        assert_eq!(view.participants[0].id, a);
    }

    #[test]
    fn get_with_messages_returns_history_in_order() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        for text in ["one", "two", "three"] {
            env.services.messages.send(conv.id, a, text, MessageKind::Text).unwrap();
        }

        let (view, messages) = env.services.conversations.get_with_messages(conv.id).unwrap();
        assert_eq!(view.id, conv.id);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn delete_removes_messages() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);
        let sent = env
            .services
            .messages
            .send(conv.id, a, "soon gone", MessageKind::Text)
            .unwrap();

        env.services.conversations.delete(conv.id).unwrap();

        assert!(matches!(
            env.services.messages.get(sent.id),
            Err(CoreError::NotFound("message"))
        ));
        assert!(matches!(
            env.services.conversations.delete(conv.id),
            Err(CoreError::NotFound("conversation"))
        ));
    }

    #[test]
    fn outsiders_are_forbidden() {
        let env = env();
        let a = env.user("alice");
        let b = env.user("bob");
        let conv = direct(&env, a, b);

        assert!(env.services.conversations.require_participant(conv.id, a).is_ok());
        assert!(matches!(
            env.services.conversations.require_participant(conv.id, UserId::new()),
            Err(CoreError::Forbidden(_))
        ));
    }
}
