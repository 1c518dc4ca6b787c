//! The three snapshots the reconcile/report loop diffs against each other:
//! the agreement store's `Plan`, the local storage engine's observed state,
//! and the agreement store's `Current`. These are the concrete shape of
//! §3's "planned state" / "local state" / "current state" views, kept as
//! plain serializable data so `phaseOne`/`phaseTwo` stay pure functions of
//! their inputs (§4.5, §4.6) and collaborators can be faked in tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ErrorBlob;

pub type DatabaseName = String;
pub type CollectionId = String;
pub type ShardId = String;
pub type ServerId = String;
pub type IndexId = String;

/// A planned secondary index: enough to detect "planned but not local" and
/// "local but not planned" without needing the storage engine's full index
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexPlan {
    pub id: IndexId,
    pub kind: String,
    pub fields: Vec<String>,
}

/// A shard's planned server list: the first entry is the planned leader,
/// the rest are planned followers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardPlan {
    pub servers: Vec<ServerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    Leader,
    Follower,
}

impl ShardPlan {
    pub fn leader(&self) -> Option<&str> {
        self.servers.first().map(String::as_str)
    }

    pub fn role(&self, server_id: &str) -> Option<ShardRole> {
        if self.leader() == Some(server_id) {
            Some(ShardRole::Leader)
        } else if self.servers.iter().any(|s| s == server_id) {
            Some(ShardRole::Follower)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionPlan {
    pub properties: serde_json::Value,
    pub shards: BTreeMap<ShardId, ShardPlan>,
    pub indexes: Vec<IndexPlan>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabasePlan {
    pub collections: BTreeMap<CollectionId, CollectionPlan>,
}

pub type Plan = BTreeMap<DatabaseName, DatabasePlan>;

/// One shard as the local storage engine observes it. `leader: None` means
/// this server believes itself the leader; `Some(id)` names the server this
/// server currently follows (the value set by `SynchronizeShard`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalShard {
    pub leader: Option<ServerId>,
    pub indexes: Vec<IndexId>,
}

impl LocalShard {
    /// The server id this server currently treats as leader, substituting
    /// `server_id` when it believes itself the leader.
    pub fn effective_leader<'a>(&'a self, server_id: &'a str) -> &'a str {
        self.leader.as_deref().unwrap_or(server_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCollection {
    pub properties: serde_json::Value,
    pub shards: BTreeMap<ShardId, LocalShard>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalDatabase {
    pub collections: BTreeMap<CollectionId, LocalCollection>,
}

pub type Local = BTreeMap<DatabaseName, LocalDatabase>;

/// The agreement store's observed state for one shard: leader first,
/// in-sync followers after, plus the index list and last-known error this
/// server reported. Equality is used directly by `phaseTwo`'s diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentShard {
    pub servers: Vec<ServerId>,
    pub indexes: Vec<IndexId>,
    pub error: Option<ErrorBlob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentCollection {
    pub shards: BTreeMap<ShardId, CurrentShard>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentDatabase {
    pub collections: BTreeMap<CollectionId, CurrentCollection>,
}

pub type Current = BTreeMap<DatabaseName, CurrentDatabase>;
