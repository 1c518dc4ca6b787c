use std::collections::BTreeMap;

/// Well-known `ActionDescription` keys. Any other key is carried but
/// opaque to the engine itself; concrete actions interpret them.
pub mod keys {
    pub const NAME: &str = "name";
    pub const DATABASE: &str = "database";
    pub const COLLECTION: &str = "collection";
    pub const SHARD: &str = "shard";
    pub const THE_LEADER: &str = "theLeader";
    pub const SERVER_ID: &str = "serverId";
    pub const SHARD_VERSION: &str = "shardVersion";
    pub const FORCED_RESYNC: &str = "forcedResync";
    pub const SYNC_BY_REVISION: &str = "syncByRevision";
    pub const FAST_TRACK_LABEL: &str = "fastTrack";
}

/// Fast-track fast-track priorities (labelled `fastTrack`): actions carrying
/// this label are guaranteed to find a worker even under saturation.
pub mod priority {
    pub const NORMAL: i32 = 1;
    pub const FOLLOWER: i32 = 1;
    pub const LEADER: i32 = 2;
    pub const HIGHER: i32 = 2;
    pub const RESIGN: i32 = 3;

    // Non-fast-track priorities.
    pub const INDEX: i32 = 2;
    pub const SYNCHRONIZE: i32 = 1;
    pub const SLOW_OP: i32 = 0;
}

/// Immutable identity and parameters of a unit of work. Two descriptions are
/// equal iff their string maps are equal; `hash()` is a stable hash of that
/// map, used for duplicate-action suppression and `ShardActionMap` lookups.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionDescription {
    params: BTreeMap<String, String>,
    #[serde(default)]
    properties: Option<serde_json::Value>,
    priority: i32,
    #[serde(default)]
    run_even_if_duplicate: bool,
    #[serde(default)]
    labels: std::collections::BTreeSet<String>,
}

/// Equality ignores `properties`, `priority`, `run_even_if_duplicate`, and
/// `labels`, matching `hash()`: only the parameter map is identity.
impl PartialEq for ActionDescription {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
    }
}

impl Eq for ActionDescription {}

impl ActionDescription {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        let mut params = BTreeMap::new();
        params.insert(keys::NAME.to_string(), name.into());
        ActionDescription {
            params,
            properties: None,
            priority,
            run_even_if_duplicate: false,
            labels: Default::default(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_run_even_if_duplicate(mut self) -> Self {
        self.run_even_if_duplicate = true;
        self
    }

    pub fn with_fast_track(mut self) -> Self {
        self.labels.insert(keys::FAST_TRACK_LABEL.to_string());
        self
    }

    pub fn name(&self) -> &str {
        self.params.get(keys::NAME).map(String::as_str).unwrap_or("")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn properties(&self) -> Option<&serde_json::Value> {
        self.properties.as_ref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_run_even_if_duplicate(&self) -> bool {
        self.run_even_if_duplicate
    }

    pub fn fast_track(&self) -> bool {
        self.labels.contains(keys::FAST_TRACK_LABEL)
    }

    pub fn matches(&self, labels: &std::collections::BTreeSet<String>) -> bool {
        labels.is_subset(&self.labels)
    }

    /// Stable hash of the parameter map, used for duplicate-action
    /// suppression. Properties and priority do not participate: two
    /// descriptions that name the same operation on the same shard collide
    /// regardless of cosmetic differences in priority or payload.
    pub fn hash(&self) -> u64 {
        let mut buf = Vec::new();
        for (k, v) in &self.params {
            buf.extend_from_slice(k.as_bytes());
            buf.push(0);
            buf.extend_from_slice(v.as_bytes());
            buf.push(0);
        }
        xxhash_rust::xxh3::xxh3_64(&buf)
    }

    pub fn database(&self) -> Option<&str> {
        self.get(keys::DATABASE)
    }

    pub fn shard(&self) -> Option<&str> {
        self.get(keys::SHARD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_hash_ignore_priority_and_properties() {
        let a = ActionDescription::new("DropIndex", priority::INDEX)
            .with(keys::DATABASE, "d")
            .with(keys::SHARD, "s1");
        let b = ActionDescription::new("DropIndex", priority::SLOW_OP)
            .with(keys::DATABASE, "d")
            .with(keys::SHARD, "s1")
            .with_properties(serde_json::json!({"x": 1}));
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn fast_track_label_and_matches() {
        let fast = ActionDescription::new("Test", priority::NORMAL).with_fast_track();
        assert!(fast.fast_track());
        let required: std::collections::BTreeSet<String> =
            [keys::FAST_TRACK_LABEL.to_string()].into();
        assert!(fast.matches(&required));
        let slow = ActionDescription::new("Test", priority::NORMAL);
        assert!(!slow.matches(&required));
    }
}
