/// Application name
pub const APP_NAME: &str = "murmur";

/// Minimum number of participants in any conversation
pub const MIN_PARTICIPANTS: usize = 2;

/// Maximum number of participants in any conversation
pub const MAX_PARTICIPANTS: usize = 50;

/// A conversation with more participants than this is a group
pub const DIRECT_PARTICIPANTS: usize = 2;

/// Smallest group a participant change may leave behind
pub const MIN_GROUP_PARTICIPANTS: usize = DIRECT_PARTICIPANTS + 1;

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_CHARS: usize = 50;

/// Maximum message content length in characters
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Username length bounds in characters
pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 30;

/// Maximum number of users returned by a username search
pub const SEARCH_RESULT_LIMIT: u32 = 20;

/// Default number of messages fetched per page by a message cursor
pub const DEFAULT_MESSAGE_PAGE_SIZE: u32 = 100;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Key derivation context for participant-set keys (BLAKE3)
pub const KDF_CONTEXT_PARTICIPANT_KEY: &str = "murmur-participant-key-v1";
