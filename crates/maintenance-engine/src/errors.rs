use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use maintenance_types::MaintenanceError;
use parking_lot::Mutex;

/// How many replication-failure timestamps are kept per shard before the
/// oldest are dropped, regardless of age.
pub const MAX_REPLICATION_ERRORS_PER_SHARD: usize = 20;
/// Replication-failure timestamps older than this are aged out on read.
pub const MAX_REPLICATION_ERRORS_PER_SHARD_AGE: Duration = Duration::from_secs(24 * 3600);
/// Threshold at which `SynchronizeShard` Stage 1 attempts to auto-repair the
/// follower-side (at exactly `K`) then the leader-side (at `K+1`) revision
/// tree, per the original's `maxReplicationErrorsPerShardBeforeAutoRepair`.
pub const MAX_ERRORS_BEFORE_AUTO_REPAIR: usize = 6;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorBlob {
    pub code: i32,
    pub message: String,
}

impl From<&MaintenanceError> for ErrorBlob {
    fn from(e: &MaintenanceError) -> Self {
        ErrorBlob { code: e.error_num(), message: e.to_string() }
    }
}

#[derive(Default)]
struct Bucket<K: std::hash::Hash + Eq>(Mutex<HashMap<K, ErrorBlob>>);

impl<K: std::hash::Hash + Eq + Clone> Bucket<K> {
    fn store(&self, key: K, blob: ErrorBlob) -> maintenance_types::Result<()> {
        let mut inner = self.0.lock();
        if inner.contains_key(&key) {
            return Err(MaintenanceError::DuplicateAction);
        }
        inner.insert(key, blob);
        Ok(())
    }

    fn remove(&self, key: &K) {
        self.0.lock().remove(key);
    }

    fn get(&self, key: &K) -> Option<ErrorBlob> {
        self.0.lock().get(key).cloned()
    }
}

/// Replication failures are kept as an ordered, aged, capped list of
/// timestamps per (database, shard) rather than a single blob, since Stage 1
/// of `SynchronizeShard` needs the *count* of recent failures in a row.
#[derive(Default)]
struct ReplicationBucket(Mutex<HashMap<(String, String), Vec<SystemTime>>>);

impl ReplicationBucket {
    fn store(&self, database: &str, shard: &str) {
        let mut inner = self.0.lock();
        let entry = inner.entry((database.to_string(), shard.to_string())).or_default();
        let now = SystemTime::now();
        entry.retain(|t| now.duration_since(*t).unwrap_or_default() < MAX_REPLICATION_ERRORS_PER_SHARD_AGE);
        entry.push(now);
        if entry.len() > MAX_REPLICATION_ERRORS_PER_SHARD {
            let overflow = entry.len() - MAX_REPLICATION_ERRORS_PER_SHARD;
            entry.drain(0..overflow);
        }
    }

    fn remove(&self, database: &str, shard: &str) {
        self.0.lock().remove(&(database.to_string(), shard.to_string()));
    }

    fn count(&self, database: &str, shard: &str) -> usize {
        let mut inner = self.0.lock();
        let Some(entry) = inner.get_mut(&(database.to_string(), shard.to_string())) else {
            return 0;
        };
        let now = SystemTime::now();
        entry.retain(|t| now.duration_since(*t).unwrap_or_default() < MAX_REPLICATION_ERRORS_PER_SHARD_AGE);
        entry.len()
    }
}

/// Four thread-safe buckets of last-known errors, plus the aging/capped
/// replication-failure log that drives `SynchronizeShard`'s backoff and
/// auto-repair heuristics.
#[derive(Default)]
pub struct ErrorRegistry {
    databases: Bucket<String>,
    shards: Bucket<String>,
    indexes: Bucket<String>,
    replication: ReplicationBucket,
}

fn shard_key(database: &str, collection: &str, shard: &str) -> String {
    format!("{database}/{collection}/{shard}")
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_db_error(&self, database: &str, err: &MaintenanceError) -> maintenance_types::Result<()> {
        self.databases.store(database.to_string(), err.into())
    }
    pub fn remove_db_error(&self, database: &str) {
        self.databases.remove(&database.to_string());
    }
    pub fn db_error(&self, database: &str) -> Option<ErrorBlob> {
        self.databases.get(&database.to_string())
    }

    pub fn store_shard_error(&self, database: &str, collection: &str, shard: &str, err: &MaintenanceError) -> maintenance_types::Result<()> {
        self.shards.store(shard_key(database, collection, shard), err.into())
    }
    pub fn remove_shard_error(&self, database: &str, collection: &str, shard: &str) {
        self.shards.remove(&shard_key(database, collection, shard));
    }
    pub fn shard_error(&self, database: &str, collection: &str, shard: &str) -> Option<ErrorBlob> {
        self.shards.get(&shard_key(database, collection, shard))
    }

    pub fn store_index_error(&self, database: &str, collection: &str, shard: &str, index: &str, err: &MaintenanceError) -> maintenance_types::Result<()> {
        self.indexes.store(format!("{}/{}", shard_key(database, collection, shard), index), err.into())
    }
    pub fn remove_index_errors(&self, database: &str, collection: &str, shard: &str) {
        let prefix = shard_key(database, collection, shard);
        self.indexes.0.lock().retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn store_replication_error(&self, database: &str, shard: &str) {
        self.replication.store(database, shard);
    }
    pub fn remove_replication_errors(&self, database: &str, shard: &str) {
        self.replication.remove(database, shard);
    }
    /// Number of replication failures recorded in a row for this shard,
    /// after aging out entries older than `MAX_REPLICATION_ERRORS_PER_SHARD_AGE`.
    pub fn replication_errors(&self, database: &str, shard: &str) -> usize {
        self.replication.count(database, shard)
    }

    pub fn copy_all_errors(&self) -> serde_json::Value {
        serde_json::json!({
            "databases": self.databases.0.lock().clone(),
            "shards": self.shards.0.lock().clone(),
            "indexes": self.indexes.0.lock().clone(),
        })
    }
}
