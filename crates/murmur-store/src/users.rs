//! CRUD operations for [`User`] records.

use rusqlite::{params, params_from_iter};

use murmur_shared::UserId;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{User, UserSummary};
use crate::rows::{fmt_ts, ts_at, uuid_at};

/// Rows removed by [`Database::delete_user_cascade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDeletion {
    pub messages: usize,
    pub friendships: usize,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user. A taken username or email surfaces as a unique
    /// violation (see [`StoreError::is_unique_violation`]).
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                fmt_ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, email, password_hash, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, email, password_hash, created_at
                 FROM users WHERE email = ?1",
                params![email],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Display info for every id that still resolves to a user, ordered by
    /// username. Unknown ids are skipped.
    pub fn get_user_summaries(&self, ids: &[UserId]) -> Result<Vec<UserSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, username, email FROM users
             WHERE id IN ({placeholders})
             ORDER BY username ASC"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(ids.iter().map(|id| id.to_string())),
            row_to_summary,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Case-insensitive username prefix search that leaves out `caller` and
    /// everyone `caller` is already friends with.
    pub fn search_users(&self, caller: UserId, prefix: &str, limit: u32) -> Result<Vec<UserSummary>> {
        let pattern = format!("{}%", escape_like(prefix));

        let mut stmt = self.conn().prepare(
            "SELECT id, username, email FROM users
             WHERE username LIKE ?1 ESCAPE '\\'
               AND id <> ?2
               AND id NOT IN (
                   SELECT CASE WHEN sender_id = ?2 THEN receiver_id ELSE sender_id END
                   FROM friendships
                   WHERE status = 'accepted' AND (sender_id = ?2 OR receiver_id = ?2)
               )
             ORDER BY username ASC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![pattern, caller.to_string(), limit], row_to_summary)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_password_hash(&self, id: UserId, password_hash: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a user together with the messages they authored and every
    /// friendship they are part of, in one transaction.
    ///
    /// Conversations the user belonged to are kept, as are read receipts the
    /// user left on other people's messages. Conversations whose last message
    /// was authored by the user are repointed to their newest remaining one.
    pub fn delete_user_cascade(&self, id: UserId) -> Result<UserDeletion> {
        let tx = self.write_tx()?;
        let user = id.to_string();

        let touched: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT conversation_id FROM messages WHERE sender_id = ?1",
            )?;
            let rows = stmt.query_map(params![user], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let messages = tx.execute("DELETE FROM messages WHERE sender_id = ?1", params![user])?;
        let friendships = tx.execute(
            "DELETE FROM friendships WHERE sender_id = ?1 OR receiver_id = ?1",
            params![user],
        )?;
        let removed = tx.execute("DELETE FROM users WHERE id = ?1", params![user])?;
        if removed == 0 {
            // Dropping the transaction rolls back the deletes above.
            return Err(StoreError::NotFound);
        }

        for conversation_id in &touched {
            crate::messages::refresh_last_message(&tx, conversation_id)?;
        }

        tx.commit()?;

        Ok(UserDeletion {
            messages,
            friendships,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(uuid_at(row, 0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: UserId(uuid_at(row, 0)?),
        username: row.get(1)?,
        email: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("users.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn insert_and_fetch() {
        let (_dir, db) = open();
        let user = User::new("alice", "alice@example.com", "hash");
        db.insert_user(&user).unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(db.get_user_by_email("alice@example.com").unwrap().id, user.id);
        assert!(db.user_exists(user.id).unwrap());
    }

    #[test]
    fn duplicate_email_is_unique_violation() {
        let (_dir, db) = open();
        db.insert_user(&User::new("alice", "same@example.com", "h")).unwrap();

        let err = db
            .insert_user(&User::new("bob", "same@example.com", "h"))
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn missing_user_is_not_found() {
        let (_dir, db) = open();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn search_escapes_wildcards() {
        let (_dir, db) = open();
        let caller = User::new("caller", "c@example.com", "h");
        db.insert_user(&caller).unwrap();
        db.insert_user(&User::new("a_b", "ab@example.com", "h")).unwrap();
        db.insert_user(&User::new("axb", "axb@example.com", "h")).unwrap();

        let hits = db.search_users(caller.id, "a_", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].username, "a_b");

        let hits = db.search_users(caller.id, "A", 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn summaries_skip_unknown_ids() {
        let (_dir, db) = open();
        let user = User::new("alice", "alice@example.com", "h");
        db.insert_user(&user).unwrap();

        let summaries = db.get_user_summaries(&[user.id, UserId::new()]).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, user.id);
    }

    #[test]
    fn delete_missing_user_is_not_found() {
        let (_dir, db) = open();
        assert!(matches!(
            db.delete_user_cascade(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }
}
