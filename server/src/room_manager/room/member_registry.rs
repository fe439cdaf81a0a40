use std::collections::HashMap;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Membership {
    pub joined_at: Instant,
}

/// [MemberRegistry] keeps track of which users are members of a room.
///
/// A user is a member at most once, so the registry is keyed by user id.
#[derive(Debug, Default)]
pub struct MemberRegistry {
    members: HashMap<String, Membership>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        MemberRegistry {
            members: HashMap::new(),
        }
    }

    /// Add a member, returns true if the user was not a member already
    pub fn insert(&mut self, user_id: &str) -> bool {
        if self.members.contains_key(user_id) {
            return false;
        }

        self.members.insert(
            String::from(user_id),
            Membership {
                joined_at: Instant::now(),
            },
        );

        true
    }

    /// Removes a member, returns true if the user was a member
    /// Does nothing and returns false if the user does not exist
    pub fn remove(&mut self, user_id: &str) -> bool {
        self.members.remove(user_id).is_some()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&Membership> {
        self.members.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }
}
