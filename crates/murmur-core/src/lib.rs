//! # murmur-core
//!
//! Service layer of the murmur messaging backend. Each service validates its
//! inputs, checks authorization against the caller id it is given, and
//! delegates persistence to a [`murmur_store::Database`] shared behind a
//! mutex.
//!
//! Consistency under concurrent writers does not depend on that mutex: the
//! schema's unique indexes decide every race, and the services translate a
//! lost race into the same answer the winner got.

pub mod conversations;
pub mod error;
pub mod friendships;
pub mod identity;
pub mod messages;
pub mod receipts;

use std::sync::{Arc, Mutex, MutexGuard};

use murmur_store::Database;

pub use conversations::{ConversationRegistry, ConversationView, FindOrCreate, NewConversation};
pub use error::{CoreError, Result};
pub use friendships::{FriendshipLedger, FriendshipStatus};
pub use identity::{BatchRegistration, IdentityStore, Registration, RegistrationFailure};
pub use messages::{MessageCursor, MessageStore};
pub use receipts::{MarkRead, ReadReceipts, ReadStats, Reader, UnreadCount};

/// Database handle shared by every service.
pub type SharedDatabase = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> SharedDatabase {
    Arc::new(Mutex::new(db))
}

pub(crate) fn lock(db: &SharedDatabase) -> Result<MutexGuard<'_, Database>> {
    db.lock().map_err(|_| CoreError::LockPoisoned)
}

/// All services over one shared handle.
#[derive(Clone)]
pub struct Services {
    pub identity: IdentityStore,
    pub friendships: FriendshipLedger,
    pub conversations: ConversationRegistry,
    pub messages: MessageStore,
    pub receipts: ReadReceipts,
}

impl Services {
    pub fn new(db: SharedDatabase, page_size: u32) -> Self {
        Self {
            identity: IdentityStore::new(db.clone()),
            friendships: FriendshipLedger::new(db.clone()),
            conversations: ConversationRegistry::new(db.clone()),
            messages: MessageStore::new(db.clone(), page_size),
            receipts: ReadReceipts::new(db),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use murmur_shared::UserId;

    pub struct Env {
        pub dir: tempfile::TempDir,
        pub db: SharedDatabase,
        pub services: Services,
    }

    impl Env {
        pub fn user(&self, name: &str) -> UserId {
            self.services
                .identity
                .register(name, &format!("{name}@example.com"), "hash")
                .unwrap()
                .id
        }

        /// A second, independent handle on the same database file.
        pub fn second_handle(&self) -> Database {
            Database::open_at(&self.dir.path().join("core.db")).unwrap()
        }
    }

    pub fn env() -> Env {
        env_with_page_size(murmur_shared::constants::DEFAULT_MESSAGE_PAGE_SIZE)
    }

    pub fn env_with_page_size(page_size: u32) -> Env {
        let dir = tempfile::tempdir().unwrap();
        let db = shared(Database::open_at(&dir.path().join("core.db")).unwrap());
        let services = Services::new(db.clone(), page_size);
        Env { dir, db, services }
    }
}
