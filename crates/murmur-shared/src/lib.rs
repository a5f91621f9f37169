//! # murmur-shared
//!
//! Identifier types, participant-set normalisation and platform limits shared
//! by the store, the core services and the HTTP boundary.

pub mod constants;
pub mod participants;
pub mod types;

pub use participants::ParticipantSet;
pub use types::{ConversationId, MessageId, UserId};
