use std::collections::HashMap;

use parking_lot::Mutex;

/// Per-shard monotonically increasing counter, bumped whenever an action on
/// that shard completes successfully. Used to invalidate in-flight
/// replication state from a prior epoch.
#[derive(Default)]
pub struct ShardVersions(Mutex<HashMap<String, u64>>);

impl ShardVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, shard: &str) -> u64 {
        *self.0.lock().get(shard).unwrap_or(&0)
    }

    pub fn inc(&self, shard: &str) -> u64 {
        let mut inner = self.0.lock();
        let entry = inner.entry(shard.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn delete(&self, shard: &str) {
        self.0.lock().remove(shard);
    }
}
