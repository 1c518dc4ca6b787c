use std::collections::HashMap;

use maintenance_types::ActionDescription;
use parking_lot::Mutex;

/// Maps a shard id to the `ActionDescription` currently holding it. At most
/// one action runs against a given shard at a time; phaseOne consults a
/// snapshot of this map taken *before* sampling local state (§5's critical
/// ordering invariant) to avoid scheduling over an in-flight action.
#[derive(Default)]
pub struct ShardLocks {
    inner: Mutex<HashMap<String, ActionDescription>>,
}

impl ShardLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` iff the shard was unlocked and is now held.
    pub fn lock_shard(&self, shard: &str, description: ActionDescription) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(shard) {
            false
        } else {
            inner.insert(shard.to_string(), description);
            true
        }
    }

    /// Returns `true` iff the shard was held (and is now released).
    pub fn unlock_shard(&self, shard: &str) -> bool {
        self.inner.lock().remove(shard).is_some()
    }

    pub fn is_locked(&self, shard: &str) -> bool {
        self.inner.lock().contains_key(shard)
    }

    pub fn snapshot(&self) -> HashMap<String, ActionDescription> {
        self.inner.lock().clone()
    }
}
