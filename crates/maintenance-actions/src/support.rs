//! Shared parameter-extraction helpers for concrete actions. Every concrete
//! action is constructed from an `ActionDescription`'s string map; these
//! read the well-known keys and turn a missing/malformed one into the same
//! `BadParameter` the original's action constructors raise.

use maintenance_types::{keys, ActionDescription, MaintenanceError};

pub fn required(description: &ActionDescription, key: &str) -> maintenance_types::Result<String> {
    description
        .get(key)
        .map(str::to_string)
        .ok_or_else(|| MaintenanceError::BadParameter(format!("missing required parameter `{key}`")))
}

pub fn database(description: &ActionDescription) -> maintenance_types::Result<String> {
    required(description, keys::DATABASE)
}

pub fn collection(description: &ActionDescription) -> maintenance_types::Result<String> {
    required(description, keys::COLLECTION)
}

pub fn shard(description: &ActionDescription) -> maintenance_types::Result<String> {
    required(description, keys::SHARD)
}

pub fn the_leader(description: &ActionDescription) -> maintenance_types::Result<String> {
    required(description, keys::THE_LEADER)
}

pub fn server_id(description: &ActionDescription) -> maintenance_types::Result<String> {
    required(description, keys::SERVER_ID)
}

pub fn forced_resync(description: &ActionDescription) -> bool {
    description.get(keys::FORCED_RESYNC).map(|v| v == "true").unwrap_or(false)
}

pub fn sync_by_revision(description: &ActionDescription) -> bool {
    description.get(keys::SYNC_BY_REVISION).map(|v| v != "false").unwrap_or(true)
}

pub fn shard_version(description: &ActionDescription) -> u64 {
    description.get(keys::SHARD_VERSION).and_then(|v| v.parse().ok()).unwrap_or(0)
}

pub fn index_id(description: &ActionDescription) -> maintenance_types::Result<String> {
    required(description, "index")
}

pub fn properties(description: &ActionDescription) -> serde_json::Value {
    description.properties().cloned().unwrap_or(serde_json::Value::Null)
}
