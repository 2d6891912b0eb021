use std::sync::RwLock;

use dashmap::DashMap;
use uuid::Uuid;

/// Session key holding the acting member's profile id.
pub const SESSION_MEMBER_ID_KEY: &str = "member_id";
/// Session key holding the acting member's membership group.
pub const SESSION_GROUP_ID_KEY: &str = "member_group_id";

/// The caller's session, as seen by the data access layer.
pub trait SessionStore: Send + Sync {
    fn id(&self) -> String;
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
    fn regenerate_id(&self);

    /// Profile id of the logged-in actor, if any.
    fn member_id(&self) -> Option<i64> {
        self.get(SESSION_MEMBER_ID_KEY).and_then(|id| id.parse().ok())
    }
}

pub struct MemorySessionStore {
    id: RwLock<String>,
    values: DashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            id: RwLock::new(Uuid::new_v4().to_string()),
            values: DashMap::new(),
        }
    }

    /// A session already carrying a logged-in member.
    pub fn for_member(profile_id: i64) -> Self {
        let session = Self::new();
        session.set(SESSION_MEMBER_ID_KEY, &profile_id.to_string());
        session
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn id(&self) -> String {
        self.id.read().map(|id| id.clone()).unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|value| value.clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn regenerate_id(&self) {
        let mut id = self.id.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *id = Uuid::new_v4().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regenerate_keeps_values() {
        let session = MemorySessionStore::for_member(42);
        let before = session.id();
        session.regenerate_id();
        assert_ne!(before, session.id());
        assert_eq!(session.member_id(), Some(42));
        assert!(!session.exists(SESSION_GROUP_ID_KEY));
    }
}
