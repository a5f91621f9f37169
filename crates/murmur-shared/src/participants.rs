//! Normalised participant sets.
//!
//! A conversation is identified platform-wide by the exact set of users in
//! it. [`ParticipantSet`] holds that set sorted and deduplicated so two
//! orderings of the same members compare equal, and derives a fixed-width
//! BLAKE3 key that the store indexes with a `UNIQUE` constraint.

use serde::{Deserialize, Serialize};

use crate::constants::{DIRECT_PARTICIPANTS, KDF_CONTEXT_PARTICIPANT_KEY};
use crate::types::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<UserId>")]
pub struct ParticipantSet(Vec<UserId>);

impl ParticipantSet {
    /// Build a set from arbitrary input; order and duplicates are discarded.
    pub fn new<I: IntoIterator<Item = UserId>>(ids: I) -> Self {
        let mut ids: Vec<UserId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self(ids)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.0.binary_search(id).is_ok()
    }

    /// More than two members.
    pub fn is_group(&self) -> bool {
        self.0.len() > DIRECT_PARTICIPANTS
    }

    /// Returns `false` if `id` was already a member.
    pub fn insert(&mut self, id: UserId) -> bool {
        match self.0.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, id);
                true
            }
        }
    }

    /// Returns `false` if `id` was not a member.
    pub fn remove(&mut self, id: &UserId) -> bool {
        match self.0.binary_search(id) {
            Ok(pos) => {
                self.0.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[UserId] {
        &self.0
    }

    /// Hex-encoded BLAKE3 digest over the sorted member ids.
    pub fn key(&self) -> String {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_PARTICIPANT_KEY);
        for id in &self.0 {
            hasher.update(id.0.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl From<Vec<UserId>> for ParticipantSet {
    fn from(ids: Vec<UserId>) -> Self {
        Self::new(ids)
    }
}

impl FromIterator<UserId> for ParticipantSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a ParticipantSet {
    type Item = &'a UserId;
    type IntoIter = std::slice::Iter<'a, UserId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
