//! CRUD operations for [`Friendship`] edges.
//!
//! Each edge is stored once with its direction (`sender_id`, `receiver_id`)
//! and with the pair normalised into `user_lo`/`user_hi`, which carries the
//! unique index. Lookups "in either direction" go through the normalised
//! columns.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use murmur_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Friendship, FriendshipState};
use crate::rows::{fmt_ts, ts_at, unknown_variant, uuid_at};

const COLUMNS: &str = "id, sender_id, receiver_id, status, created_at";

impl Database {
    /// Insert a pending edge from `sender` to `receiver`.
    ///
    /// Fails with a unique violation when any edge already exists for the
    /// pair, whichever way round.
    pub fn insert_friend_request(&self, sender: UserId, receiver: UserId) -> Result<Friendship> {
        let friendship = Friendship {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            status: FriendshipState::Pending,
            created_at: crate::now(),
        };
        let (lo, hi) = ordered(sender, receiver);

        self.conn().execute(
            "INSERT INTO friendships (id, sender_id, receiver_id, user_lo, user_hi, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                friendship.id.to_string(),
                sender.to_string(),
                receiver.to_string(),
                lo.to_string(),
                hi.to_string(),
                friendship.status.as_str(),
                fmt_ts(&friendship.created_at),
            ],
        )?;

        Ok(friendship)
    }

    /// The edge between `a` and `b`, in either direction.
    pub fn find_friendship_between(&self, a: UserId, b: UserId) -> Result<Option<Friendship>> {
        let (lo, hi) = ordered(a, b);
        let friendship = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM friendships WHERE user_lo = ?1 AND user_hi = ?2"),
                params![lo.to_string(), hi.to_string()],
                row_to_friendship,
            )
            .optional()?;
        Ok(friendship)
    }

    /// Move an edge to `status`. Returns `false` if the edge is gone.
    pub fn set_friendship_status(&self, id: Uuid, status: FriendshipState) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE friendships SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_friendship(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM friendships WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Ids on the other side of every accepted edge touching `user`.
    pub fn list_friend_ids(&self, user: UserId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
             FROM friendships
             WHERE status = 'accepted' AND (sender_id = ?1 OR receiver_id = ?1)
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            Ok(UserId(uuid_at(row, 0)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Pending requests addressed to `user`, newest first.
    pub fn list_incoming_requests(&self, user: UserId) -> Result<Vec<Friendship>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM friendships
             WHERE receiver_id = ?1 AND status = 'pending'
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![user.to_string()], row_to_friendship)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn ordered(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    let status_str: String = row.get(3)?;
    let status = FriendshipState::parse(&status_str)
        .ok_or_else(|| unknown_variant(3, "friendship status", status_str))?;

    Ok(Friendship {
        id: uuid_at(row, 0)?,
        sender_id: UserId(uuid_at(row, 1)?),
        receiver_id: UserId(uuid_at(row, 2)?),
        status,
        created_at: ts_at(row, 4)?,
    })
}
