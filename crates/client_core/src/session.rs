use std::{collections::HashMap, sync::Mutex};

/// Key recording that this session has already placed its one marker.
pub const HAS_PLACED_MARK_KEY: &str = "hasPlacedMark";

/// Minimal session-scoped key-value store. Injected into the board so the
/// placement guard never depends on ambient global state.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);

    fn has_placed_mark(&self) -> bool {
        self.get(HAS_PLACED_MARK_KEY).is_some()
    }

    fn mark_placed(&self) {
        self.set(HAS_PLACED_MARK_KEY, "true");
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_flag_starts_unset_and_sticks_once_marked() {
        let store = MemorySessionStore::new();
        assert!(!store.has_placed_mark());

        store.mark_placed();
        assert!(store.has_placed_mark());

        store.mark_placed();
        assert_eq!(store.get(HAS_PLACED_MARK_KEY).as_deref(), Some("true"));
    }
}
