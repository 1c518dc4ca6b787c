//! `phaseOne`: diffs `plan` against `local` to produce the action
//! descriptions that reconcile this server's collections/shards/indexes
//! with the planned topology (§4.5). `diff_plan_local` is a pure function of
//! its inputs; the shard-lock snapshot must be taken *before* the matching
//! `local` snapshot by the caller (§4.7's critical ordering invariant) —
//! this module only consumes the snapshot, it does not enforce the order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use maintenance_types::{kinds, priority, keys, ActionDescription};

use crate::model::{DatabaseName, Local, Plan, ShardId, ShardRole};

/// The outcome of one `phaseOne` run: the actions to enqueue, and whether
/// anything was produced (callers use this to decide whether to broadcast a
/// scheduler wake-up, §4.5 step 5).
pub struct ReconcileResult {
    pub actions: Vec<ActionDescription>,
    pub notify: bool,
}

pub fn diff_plan_local(
    plan: &Plan,
    local: &Local,
    dirty: &BTreeSet<DatabaseName>,
    server_id: &str,
    shard_locks: &HashMap<ShardId, ActionDescription>,
) -> ReconcileResult {
    let mut actions = Vec::new();

    for db_name in dirty {
        let planned = plan.get(db_name);
        let local_db = local.get(db_name);

        match (planned, local_db) {
            (Some(_), None) => {
                actions.push(ActionDescription::new(kinds::CREATE_DATABASE, priority::NORMAL).with(keys::DATABASE, db_name));
                continue;
            }
            (None, Some(_)) => {
                actions.push(ActionDescription::new(kinds::DROP_DATABASE, priority::NORMAL).with(keys::DATABASE, db_name));
                continue;
            }
            (None, None) => continue,
            (Some(planned), Some(local_db)) => {
                diff_collections(db_name, planned, local_db, server_id, shard_locks, &mut actions);
            }
        }
    }

    let notify = !actions.is_empty();
    ReconcileResult { actions, notify }
}

fn diff_collections(
    db_name: &str,
    planned: &crate::model::DatabasePlan,
    local_db: &crate::model::LocalDatabase,
    server_id: &str,
    shard_locks: &HashMap<ShardId, ActionDescription>,
    actions: &mut Vec<ActionDescription>,
) {
    // Planned-not-local and property/leader/index drift, for every shard
    // this server is planned to host (leader or follower).
    for (coll_id, coll_plan) in &planned.collections {
        let local_coll = local_db.collections.get(coll_id);
        for (shard_id, shard_plan) in &coll_plan.shards {
            let Some(role) = shard_plan.role(server_id) else { continue };
            if shard_locks.contains_key(shard_id) {
                // An action is already in flight for this shard; a later
                // run will see the result once it unlocks and dirties us.
                continue;
            }

            let local_shard = local_coll.and_then(|c| c.shards.get(shard_id));
            let Some(local_shard) = local_shard else {
                let create_priority = match role {
                    ShardRole::Leader => priority::LEADER,
                    ShardRole::Follower => priority::FOLLOWER,
                };
                actions.push(
                    ActionDescription::new(kinds::CREATE_COLLECTION, create_priority)
                        .with(keys::DATABASE, db_name)
                        .with(keys::COLLECTION, coll_id)
                        .with(keys::SHARD, shard_id)
                        .with(keys::THE_LEADER, shard_plan.leader().unwrap_or(""))
                        .with_properties(coll_plan.properties.clone()),
                );
                continue;
            };

            if local_coll.map(|c| &c.properties) != Some(&coll_plan.properties) {
                actions.push(
                    ActionDescription::new(kinds::UPDATE_COLLECTION, priority::NORMAL)
                        .with(keys::DATABASE, db_name)
                        .with(keys::COLLECTION, coll_id)
                        .with(keys::SHARD, shard_id)
                        .with_properties(coll_plan.properties.clone()),
                );
            }

            let local_leader = local_shard.effective_leader(server_id);
            let planned_leader = shard_plan.leader().unwrap_or("");
            if local_leader != planned_leader {
                if local_leader == server_id {
                    // We are local leader, but the plan wants someone else:
                    // hand off before the new leader starts syncing us.
                    actions.push(
                        ActionDescription::new(kinds::RESIGN_SHARD_LEADERSHIP, priority::RESIGN)
                            .with(keys::DATABASE, db_name)
                            .with(keys::COLLECTION, coll_id)
                            .with(keys::SHARD, shard_id)
                            .with(keys::THE_LEADER, planned_leader),
                    );
                } else if planned_leader != server_id {
                    // We're a follower and the plan moved our leader:
                    // catch up with the new one.
                    actions.push(
                        ActionDescription::new(kinds::SYNCHRONIZE_SHARD, priority::SYNCHRONIZE)
                            .with(keys::DATABASE, db_name)
                            .with(keys::COLLECTION, coll_id)
                            .with(keys::SHARD, shard_id)
                            .with(keys::THE_LEADER, planned_leader)
                            .with(keys::SERVER_ID, server_id),
                    );
                }
            }

            diff_indexes(db_name, coll_id, shard_id, &coll_plan.indexes, &local_shard.indexes, actions);
        }
    }

    // Local-but-not-planned-for-this-server: drop the collection.
    for (coll_id, local_coll) in &local_db.collections {
        for shard_id in local_coll.shards.keys() {
            let still_wanted = planned
                .collections
                .get(coll_id)
                .and_then(|c| c.shards.get(shard_id))
                .and_then(|s| s.role(server_id))
                .is_some();
            if still_wanted {
                continue;
            }
            if shard_locks.contains_key(shard_id) {
                continue;
            }
            actions.push(
                ActionDescription::new(kinds::DROP_COLLECTION, priority::NORMAL)
                    .with(keys::DATABASE, db_name)
                    .with(keys::COLLECTION, coll_id)
                    .with(keys::SHARD, shard_id),
            );
        }
    }
}

fn diff_indexes(
    db_name: &str,
    coll_id: &str,
    shard_id: &str,
    planned_indexes: &[crate::model::IndexPlan],
    local_indexes: &[crate::model::IndexId],
    actions: &mut Vec<ActionDescription>,
) {
    let planned_ids: BTreeMap<&str, &crate::model::IndexPlan> =
        planned_indexes.iter().map(|i| (i.id.as_str(), i)).collect();
    let local_ids: BTreeSet<&str> = local_indexes.iter().map(String::as_str).collect();

    for (id, _) in &planned_ids {
        if !local_ids.contains(id) {
            actions.push(
                ActionDescription::new(kinds::ENSURE_INDEX, priority::INDEX)
                    .with(keys::DATABASE, db_name)
                    .with(keys::COLLECTION, coll_id)
                    .with(keys::SHARD, shard_id)
                    .with("index", *id),
            );
        }
    }
    for id in &local_ids {
        if !planned_ids.contains_key(id) {
            actions.push(
                ActionDescription::new(kinds::DROP_INDEX, priority::INDEX)
                    .with(keys::DATABASE, db_name)
                    .with(keys::COLLECTION, coll_id)
                    .with(keys::SHARD, shard_id)
                    .with("index", *id),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn shard_plan(servers: &[&str]) -> ShardPlan {
        ShardPlan { servers: servers.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn creates_database_planned_but_not_local() {
        let mut plan = Plan::new();
        plan.insert("d".into(), DatabasePlan::default());
        let local = Local::new();
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].name(), kinds::CREATE_DATABASE);
    }

    #[test]
    fn drops_database_local_but_not_planned() {
        let plan = Plan::new();
        let mut local = Local::new();
        local.insert("d".into(), LocalDatabase::default());
        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].name(), kinds::DROP_DATABASE);
    }

    #[test]
    fn creates_collection_for_planned_leader_shard() {
        let mut coll = CollectionPlan::default();
        coll.shards.insert("s1".into(), shard_plan(&["PRMR-1"]));
        let mut db = DatabasePlan::default();
        db.collections.insert("c".into(), coll);
        let mut plan = Plan::new();
        plan.insert("d".into(), db);

        let mut local = Local::new();
        local.insert("d".into(), LocalDatabase::default());

        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].name(), kinds::CREATE_COLLECTION);
        assert_eq!(result.actions[0].priority(), priority::LEADER);
    }

    #[test]
    fn locked_shard_is_skipped() {
        let mut coll = CollectionPlan::default();
        coll.shards.insert("s1".into(), shard_plan(&["PRMR-1"]));
        let mut db = DatabasePlan::default();
        db.collections.insert("c".into(), coll);
        let mut plan = Plan::new();
        plan.insert("d".into(), db);
        let local = Local::new();

        let mut locks = HashMap::new();
        locks.insert("s1".to_string(), ActionDescription::new(kinds::CREATE_COLLECTION, priority::LEADER));

        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &locks);
        assert!(result.actions.is_empty());
        assert!(!result.notify);
    }

    #[test]
    fn follower_moved_to_new_leader_synchronizes() {
        let mut coll = CollectionPlan::default();
        coll.shards.insert("s1".into(), shard_plan(&["PRMR-2", "PRMR-1"]));
        let mut db = DatabasePlan::default();
        db.collections.insert("c".into(), coll);
        let mut plan = Plan::new();
        plan.insert("d".into(), db);

        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), LocalShard { leader: Some("PRMR-3".into()), indexes: vec![] });
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);

        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].name(), kinds::SYNCHRONIZE_SHARD);
        assert_eq!(result.actions[0].get(keys::THE_LEADER), Some("PRMR-2"));
    }

    #[test]
    fn resigns_leadership_when_plan_moves_us_off() {
        let mut coll = CollectionPlan::default();
        coll.shards.insert("s1".into(), shard_plan(&["PRMR-2"]));
        let mut db = DatabasePlan::default();
        db.collections.insert("c".into(), coll);
        let mut plan = Plan::new();
        plan.insert("d".into(), db);

        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), LocalShard { leader: None, indexes: vec![] });
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);

        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].name(), kinds::RESIGN_SHARD_LEADERSHIP);
    }

    #[test]
    fn drops_collection_no_longer_planned_for_us() {
        let mut local_coll = LocalCollection::default();
        local_coll.shards.insert("s1".into(), LocalShard { leader: None, indexes: vec![] });
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);
        let mut plan = Plan::new();
        plan.insert("d".into(), DatabasePlan::default());

        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        assert_eq!(result.actions.len(), 1);
        assert_eq!(result.actions[0].name(), kinds::DROP_COLLECTION);
    }

    #[test]
    fn index_diff_produces_ensure_and_drop() {
        let mut coll = CollectionPlan::default();
        coll.shards.insert("s1".into(), shard_plan(&["PRMR-1"]));
        coll.indexes.push(IndexPlan { id: "idx-new".into(), kind: "persistent".into(), fields: vec!["a".into()] });
        let mut db = DatabasePlan::default();
        db.collections.insert("c".into(), coll);
        let mut plan = Plan::new();
        plan.insert("d".into(), db);

        let mut local_coll = LocalCollection::default();
        local_coll
            .shards
            .insert("s1".into(), LocalShard { leader: None, indexes: vec!["idx-old".into()] });
        let mut local_db = LocalDatabase::default();
        local_db.collections.insert("c".into(), local_coll);
        let mut local = Local::new();
        local.insert("d".into(), local_db);

        let dirty: BTreeSet<String> = ["d".to_string()].into();
        let result = diff_plan_local(&plan, &local, &dirty, "PRMR-1", &HashMap::new());
        let names: BTreeSet<&str> = result.actions.iter().map(|a| a.name()).collect();
        assert!(names.contains(kinds::ENSURE_INDEX));
        assert!(names.contains(kinds::DROP_INDEX));
    }
}
