//! Registered users.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use murmur_shared::constants::{MAX_USERNAME_CHARS, MIN_USERNAME_CHARS, SEARCH_RESULT_LIMIT};
use murmur_shared::UserId;
use murmur_store::{User, UserSummary};

use crate::error::{CoreError, Result};
use crate::{lock, SharedDatabase};

/// One account in a [`IdentityStore::register_many`] batch.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationFailure {
    pub username: String,
    pub error: String,
}

/// Per-entry outcome of a batch registration, in input order.
#[derive(Debug, Default, Serialize)]
pub struct BatchRegistration {
    pub created: Vec<User>,
    pub failed: Vec<RegistrationFailure>,
}

#[derive(Clone)]
pub struct IdentityStore {
    db: SharedDatabase,
}

impl IdentityStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Create a user. `password_hash` is stored as given.
    pub fn register(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let username = username.trim();
        let email = email.trim();
        validate_username(username)?;
        if email.is_empty() || !email.contains('@') {
            return Err(CoreError::InvalidArgument("email is not valid".into()));
        }
        if password_hash.is_empty() {
            return Err(CoreError::InvalidArgument("password hash is empty".into()));
        }

        let user = User::new(username, email, password_hash);
        let db = lock(&self.db)?;
        match db.insert_user(&user) {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                return Err(CoreError::Conflict("username or email already taken".into()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(user = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Register each entry independently. A rejected entry is reported and
    /// the rest still go through; only internal failures abort the batch.
    pub fn register_many(&self, batch: &[Registration]) -> Result<BatchRegistration> {
        if batch.is_empty() {
            return Err(CoreError::InvalidArgument("no users to register".into()));
        }

        let mut outcome = BatchRegistration::default();
        for entry in batch {
            match self.register(&entry.username, &entry.email, &entry.password_hash) {
                Ok(user) => outcome.created.push(user),
                Err(e @ (CoreError::InvalidArgument(_) | CoreError::Conflict(_))) => {
                    warn!(username = %entry.username, error = %e, "batch entry rejected");
                    outcome.failed.push(RegistrationFailure {
                        username: entry.username.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            created = outcome.created.len(),
            failed = outcome.failed.len(),
            "batch registration"
        );
        Ok(outcome)
    }

    pub fn get(&self, id: UserId) -> Result<User> {
        lock(&self.db)?
            .get_user(id)
            .map_err(|e| CoreError::from_store(e, "user"))
    }

    pub fn find_by_email(&self, email: &str) -> Result<User> {
        lock(&self.db)?
            .get_user_by_email(email.trim())
            .map_err(|e| CoreError::from_store(e, "user"))
    }

    /// Username prefix search for people `caller` could befriend.
    pub fn search(&self, caller: UserId, prefix: &str) -> Result<Vec<UserSummary>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(CoreError::InvalidArgument("search prefix is empty".into()));
        }
        let found = lock(&self.db)?.search_users(caller, prefix, SEARCH_RESULT_LIMIT)?;
        debug!(caller = %caller, prefix, hits = found.len(), "user search");
        Ok(found)
    }

    pub fn change_password(&self, id: UserId, new_hash: &str) -> Result<()> {
        if new_hash.is_empty() {
            return Err(CoreError::InvalidArgument("password hash is empty".into()));
        }
        if !lock(&self.db)?.update_password_hash(id, new_hash)? {
            return Err(CoreError::NotFound("user"));
        }
        info!(user = %id, "password changed");
        Ok(())
    }

    /// Delete a user with their messages and friendships.
    pub fn delete(&self, id: UserId) -> Result<()> {
        let removed = lock(&self.db)?
            .delete_user_cascade(id)
            .map_err(|e| CoreError::from_store(e, "user"))?;
        info!(
            user = %id,
            messages = removed.messages,
            friendships = removed.friendships,
            "user deleted"
        );
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        return Err(CoreError::InvalidArgument(format!(
            "username must be {MIN_USERNAME_CHARS} to {MAX_USERNAME_CHARS} characters"
        )));
    }
    Ok(())
}
