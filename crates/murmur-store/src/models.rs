//! Domain model structs persisted in the SQLite database.
//!
//! Every struct is `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use murmur_shared::{ConversationId, MessageId, ParticipantSet, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique, 3 to 30 characters.
    pub username: String,
    /// Unique.
    pub email: String,
    /// Opaque hash produced by the authentication layer. Never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh identity stamped with the current time.
    pub fn new(username: &str, email: &str, password_hash: &str) -> Self {
        Self {
            id: UserId::new(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: crate::rows::now(),
        }
    }
}

/// Display fields of a user, as embedded in conversation views and search
/// results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

/// Stored state of a friendship edge. Rejected requests are deleted, so there
/// is no rejected variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipState {
    Pending,
    Accepted,
}

impl FriendshipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipState::Pending => "pending",
            FriendshipState::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipState::Pending),
            "accepted" => Some(FriendshipState::Accepted),
            _ => None,
        }
    }
}

/// A directed friendship edge from `sender` to `receiver`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: FriendshipState,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Direct conversations have exactly two members and no name; groups have
/// more than two and always carry one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group { name: String },
}

impl ConversationKind {
    pub fn is_group(&self) -> bool {
        matches!(self, ConversationKind::Group { .. })
    }

    pub fn group_name(&self) -> Option<&str> {
        match self {
            ConversationKind::Direct => None,
            ConversationKind::Group { name } => Some(name),
        }
    }
}

/// A conversation between a fixed-size-bounded set of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: ParticipantSet,
    pub kind: ConversationKind,
    pub created_by: UserId,
    /// Most recent message, `None` until the first message is sent.
    pub last_message_id: Option<MessageId>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// A single chat message.
///
/// Serialises with a derived `edited` flag next to `edited_at`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    /// Set on every edit; previous content is not kept.
    pub edited_at: Option<DateTime<Utc>>,
    /// Insertion order within the database, used to break timestamp ties.
    /// Zero until the message has been stored.
    #[serde(skip)]
    pub seq: i64,
}

impl Message {
    pub fn edited(&self) -> bool {
        self.edited_at.is_some()
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            id: MessageId,
            conversation_id: ConversationId,
            sender_id: UserId,
            content: &'a str,
            kind: MessageKind,
            timestamp: &'a DateTime<Utc>,
            edited: bool,
            edited_at: &'a Option<DateTime<Utc>>,
        }

        Wire {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: &self.content,
            kind: self.kind,
            timestamp: &self.timestamp,
            edited: self.edited(),
            edited_at: &self.edited_at,
        }
        .serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Read receipt
// ---------------------------------------------------------------------------

/// Marks `message_id` as seen by `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}
