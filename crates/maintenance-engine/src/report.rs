//! `phaseTwo`: diffs `local` against `current` to produce the single
//! agreement-store write transaction that brings `Current` up to date with
//! what this server actually observes (§4.6). Only shards this server
//! currently leads are authored here — a follower's `Current` entry for a
//! shard it does not lead is owned by that shard's leader, so a follower
//! never overwrites it (Open Question, resolved; see DESIGN.md). Idempotent
//! by construction: re-running on the same `local`/`current` inputs (after
//! the prior transaction's SET/DELETE ops, not its version bump, have been
//! applied) produces an empty-op transaction (§8 property 6).

use std::collections::{BTreeSet, HashMap};

use crate::collaborators::{WriteOp, WriteTransaction};
use crate::errors::ErrorRegistry;
use crate::model::{Current, CurrentShard, DatabaseName, Local, ShardId};

pub const CURRENT_VERSION_KEY: &str = "Current/Version";

fn shard_key(db: &str, collection: &str, shard: &str) -> String {
    format!("Current/Collections/{db}/{collection}/{shard}")
}

pub fn diff_local_current(
    local: &Local,
    current: &Current,
    dirty: &BTreeSet<DatabaseName>,
    server_id: &str,
    errors: &ErrorRegistry,
    shard_locks: &HashMap<ShardId, maintenance_types::ActionDescription>,
) -> WriteTransaction {
    let mut txn = WriteTransaction::default();

    for db_name in dirty {
        let local_db = local.get(db_name);
        let current_db = current.get(db_name);

        if let Some(local_db) = local_db {
            for (coll_id, local_coll) in &local_db.collections {
                for (shard_id, local_shard) in &local_coll.shards {
                    if shard_locks.contains_key(shard_id) {
                        // Locked: the last-known reported state stands.
                        continue;
                    }
                    if local_shard.leader.is_some() {
                        // We're a follower; the leader authors this entry.
                        continue;
                    }

                    let existing_servers = current_db
                        .and_then(|c| c.collections.get(coll_id))
                        .and_then(|c| c.shards.get(shard_id))
                        .map(|s| s.servers.clone())
                        .unwrap_or_default();
                    let mut servers = vec![server_id.to_string()];
                    servers.extend(existing_servers.into_iter().filter(|s| s != server_id));

                    let desired = CurrentShard {
                        servers,
                        indexes: local_shard.indexes.clone(),
                        error: errors.shard_error(db_name, coll_id, shard_id),
                    };

                    let existing = current_db
                        .and_then(|c| c.collections.get(coll_id))
                        .and_then(|c| c.shards.get(shard_id));
                    if existing != Some(&desired) {
                        txn.ops.push(WriteOp::Set {
                            key: shard_key(db_name, coll_id, shard_id),
                            value: serde_json::to_value(&desired).expect("CurrentShard always serializes"),
                            precondition: None,
                        });
                    }
                }
            }
        }

        // Entries this server authored (it's listed first) for shards it no
        // longer locally leads: remove them so a stale leader is never left
        // behind in `Current`.
        if let Some(current_db) = current_db {
            for (coll_id, current_coll) in &current_db.collections {
                for (shard_id, current_shard) in &current_coll.shards {
                    if current_shard.servers.first().map(String::as_str) != Some(server_id) {
                        continue;
                    }
                    if shard_locks.contains_key(shard_id) {
                        continue;
                    }
                    let still_leading = local_db
                        .and_then(|l| l.collections.get(coll_id))
                        .and_then(|c| c.shards.get(shard_id))
                        .map(|s| s.leader.is_none())
                        .unwrap_or(false);
                    if !still_leading {
                        txn.ops.push(WriteOp::Delete { key: shard_key(db_name, coll_id, shard_id) });
                    }
                }
            }
        }
    }

    txn.ops.push(WriteOp::Increment { key: CURRENT_VERSION_KEY.to_string() });
    txn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use maintenance_types::ActionDescription;

    fn leader_shard(indexes: &[&str]) -> LocalShard {
        LocalShard { leader: None, indexes: indexes.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn reports_new_leader_shard() {
        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), leader_shard(&["idx1"]));
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);

        let current = Current::new();
        let errors = ErrorRegistry::new();
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let txn = diff_local_current(&local, &current, &dirty, "PRMR-1", &errors, &HashMap::new());

        assert_eq!(txn.ops.len(), 2); // one SET + the version increment
        assert!(matches!(&txn.ops[0], WriteOp::Set { key, .. } if key == "Current/Collections/d/c/s1"));
        assert!(matches!(&txn.ops[1], WriteOp::Increment { key } if key == CURRENT_VERSION_KEY));
    }

    #[test]
    fn follower_shard_is_never_authored() {
        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), LocalShard { leader: Some("PRMR-2".into()), indexes: vec![] });
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);

        let current = Current::new();
        let errors = ErrorRegistry::new();
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let txn = diff_local_current(&local, &current, &dirty, "PRMR-1", &errors, &HashMap::new());
        assert!(txn.is_noop());
    }

    #[test]
    fn idempotent_on_unchanged_state() {
        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), leader_shard(&["idx1"]));
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db.clone());

        let mut current_coll = CurrentCollection::default();
        current_coll.shards.insert(
            "s1".into(),
            CurrentShard { servers: vec!["PRMR-1".into()], indexes: vec!["idx1".into()], error: None },
        );
        let mut current_db = CurrentDatabase::default();
        current_db.collections.insert("c".into(), current_coll);
        let mut current = Current::new();
        current.insert("d".into(), current_db);

        let errors = ErrorRegistry::new();
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let txn = diff_local_current(&local, &current, &dirty, "PRMR-1", &errors, &HashMap::new());
        assert!(txn.is_noop(), "expected only the version increment, got {:?}", txn.ops);
    }

    #[test]
    fn locked_shard_keeps_last_known_state() {
        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), leader_shard(&["idx-new"]));
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);

        let current = Current::new();
        let errors = ErrorRegistry::new();
        let mut locks = HashMap::new();
        locks.insert("s1".to_string(), ActionDescription::new("DropIndex", 2));
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let txn = diff_local_current(&local, &current, &dirty, "PRMR-1", &errors, &locks);
        assert!(txn.is_noop());
    }

    #[test]
    fn removes_stale_leader_entry_when_shard_dropped_locally() {
        let local = Local::new();
        let mut current_coll = CurrentCollection::default();
        current_coll.shards.insert(
            "s1".into(),
            CurrentShard { servers: vec!["PRMR-1".into()], indexes: vec![], error: None },
        );
        let mut current_db = CurrentDatabase::default();
        current_db.collections.insert("c".into(), current_coll);
        let mut current = Current::new();
        current.insert("d".into(), current_db);

        let errors = ErrorRegistry::new();
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let txn = diff_local_current(&local, &current, &dirty, "PRMR-1", &errors, &HashMap::new());
        assert!(txn.ops.iter().any(|op| matches!(op, WriteOp::Delete { key } if key == "Current/Collections/d/c/s1")));
    }
}
