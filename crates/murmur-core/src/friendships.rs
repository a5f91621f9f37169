//! Friendship request state machine.
//!
//! `pending` is created by the sender and can only be moved on by the
//! receiver: accept turns it into `accepted`, reject deletes it. Either side
//! may remove an edge at any time.

use serde::{Deserialize, Serialize};
use tracing::info;

use murmur_shared::UserId;
use murmur_store::{Database, Friendship, FriendshipState};

use crate::error::{CoreError, Result};
use crate::{lock, SharedDatabase};

/// Undirected view of the relationship between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    NotFriends,
    Pending,
    Accepted,
}

#[derive(Clone)]
pub struct FriendshipLedger {
    db: SharedDatabase,
}

impl FriendshipLedger {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn send_request(&self, sender: UserId, receiver: UserId) -> Result<Friendship> {
        if sender == receiver {
            return Err(CoreError::InvalidArgument(
                "cannot send a friend request to yourself".into(),
            ));
        }

        let db = lock(&self.db)?;
        for user in [sender, receiver] {
            if !db.user_exists(user)? {
                return Err(CoreError::NotFound("user"));
            }
        }
        if db.find_friendship_between(sender, receiver)?.is_some() {
            return Err(already_linked());
        }
        let friendship = record_request(&db, sender, receiver)?;

        info!(sender = %sender, receiver = %receiver, "friend request sent");
        Ok(friendship)
    }

    pub fn accept(&self, caller: UserId, sender: UserId, receiver: UserId) -> Result<Friendship> {
        let db = lock(&self.db)?;
        let mut pending = pending_request(&db, caller, sender, receiver)?;

        if !db.set_friendship_status(pending.id, FriendshipState::Accepted)? {
            return Err(CoreError::NotFound("friend request"));
        }
        pending.status = FriendshipState::Accepted;

        info!(sender = %sender, receiver = %receiver, "friend request accepted");
        Ok(pending)
    }

    /// Refuse a pending request. The record is deleted, so the sender may
    /// ask again later.
    pub fn reject(&self, caller: UserId, sender: UserId, receiver: UserId) -> Result<()> {
        let db = lock(&self.db)?;
        let pending = pending_request(&db, caller, sender, receiver)?;

        if !db.delete_friendship(pending.id)? {
            return Err(CoreError::NotFound("friend request"));
        }

        info!(sender = %sender, receiver = %receiver, "friend request rejected");
        Ok(())
    }

    pub fn list_friends(&self, user: UserId) -> Result<Vec<UserId>> {
        Ok(lock(&self.db)?.list_friend_ids(user)?)
    }

    /// Requests waiting on `user`, newest first.
    pub fn pending_requests(&self, user: UserId) -> Result<Vec<Friendship>> {
        Ok(lock(&self.db)?.list_incoming_requests(user)?)
    }

    pub fn status(&self, a: UserId, b: UserId) -> Result<FriendshipStatus> {
        let edge = lock(&self.db)?.find_friendship_between(a, b)?;
        Ok(match edge.map(|f| f.status) {
            None => FriendshipStatus::NotFriends,
            Some(FriendshipState::Pending) => FriendshipStatus::Pending,
            Some(FriendshipState::Accepted) => FriendshipStatus::Accepted,
        })
    }

    pub fn get(&self, a: UserId, b: UserId) -> Result<Friendship> {
        lock(&self.db)?
            .find_friendship_between(a, b)?
            .ok_or(CoreError::NotFound("friendship"))
    }

    /// Drop whatever edge exists between `a` and `b`, pending or accepted.
    pub fn remove(&self, a: UserId, b: UserId) -> Result<()> {
        let db = lock(&self.db)?;
        let edge = db
            .find_friendship_between(a, b)?
            .ok_or(CoreError::NotFound("friendship"))?;
        if !db.delete_friendship(edge.id)? {
            return Err(CoreError::NotFound("friendship"));
        }

        info!(a = %a, b = %b, "friendship removed");
        Ok(())
    }
}

/// Insert the pending edge. Another writer may have created an edge for the
/// pair since the caller looked, in which case the pair index rejects ours.
fn record_request(db: &Database, sender: UserId, receiver: UserId) -> Result<Friendship> {
    match db.insert_friend_request(sender, receiver) {
        Ok(f) => Ok(f),
        Err(e) if e.is_unique_violation() => Err(already_linked()),
        Err(e) => Err(e.into()),
    }
}

fn already_linked() -> CoreError {
    CoreError::Conflict("a friendship or request already exists between these users".into())
}

/// The pending edge `sender -> receiver`, checked for `caller` being its
/// receiver.
fn pending_request(
    db: &murmur_store::Database,
    caller: UserId,
    sender: UserId,
    receiver: UserId,
) -> Result<Friendship> {
    let edge = db
        .find_friendship_between(sender, receiver)?
        .filter(|f| {
            f.sender_id == sender && f.receiver_id == receiver && f.status == FriendshipState::Pending
        })
        .ok_or(CoreError::NotFound("friend request"))?;

    if caller != edge.receiver_id {
        return Err(CoreError::Forbidden(
            "only the receiver can answer a friend request".into(),
        ));
    }
    Ok(edge)
}
