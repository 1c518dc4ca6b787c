//! The two external collaborators named but not owned by this crate (§1,
//! §6): the agreement store (`Plan`/`Current`/version reads, one write
//! transaction per `phaseTwo` call) and the local storage engine (the
//! `Local` snapshot plus the document counts `SynchronizeShard` needs for
//! its size gate). Both are plain, synchronous, object-safe traits —
//! `maintenance-node` wires in real implementations that talk to the actual
//! Raft-style KV and storage engine; tests wire in in-memory fakes.

use std::collections::BTreeMap;

use crate::model::{Current, DatabaseName, Local, Plan, ShardId};

/// One mutation against an agreement-store key, as produced by `phaseTwo`'s
/// diff and applied atomically in a single transaction (§4.6 step 4, §6).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum WriteOp {
    Set {
        key: String,
        value: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        precondition: Option<serde_json::Value>,
    },
    Delete {
        key: String,
    },
    Increment {
        key: String,
    },
}

/// A single atomic write against the agreement store: the SET/DELETE
/// operations `phaseTwo` derived from its diff, plus the trailing
/// `Current/Version` increment (§4.6 step 3).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WriteTransaction {
    pub ops: Vec<WriteOp>,
}

impl WriteTransaction {
    /// A transaction with no observable effect but the version bump, i.e.
    /// what a no-op reconcile produces (§8 property 6).
    pub fn is_noop(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, WriteOp::Increment { .. }))
    }
}

/// Read/write access to the agreement store's `Plan`/`Current` views and
/// version counters. Out of scope per §1: this crate names only the
/// interface it consumes.
pub trait AgreementStore: Send + Sync {
    /// Plan for exactly the named databases, plus the plan index (version)
    /// it was read at.
    fn read_plan(&self, databases: &[DatabaseName]) -> maintenance_types::Result<(Plan, u64)>;

    /// Current for exactly the named databases, plus the current index.
    fn read_current(&self, databases: &[DatabaseName]) -> maintenance_types::Result<(Current, u64)>;

    /// Applies one write transaction. Failures are logged and retried on
    /// the next cycle (§4.6 step 4); they must never panic the driver.
    fn apply(&self, txn: WriteTransaction) -> maintenance_types::Result<()>;

    /// The agreement store's current `Current/Version` counter, polled by
    /// `SynchronizeShard` Stage 8 to confirm its write landed.
    fn current_version(&self) -> u64;

    /// All database names known to the cluster, for the driver's
    /// bounded-revisit background refill (§3 `DirtyDatabases`, §4.7 step 1).
    fn all_databases(&self) -> Vec<DatabaseName>;
}

/// Read access to the local storage engine's collections/shards, and the
/// one write the leader-side `SynchronizeShard` needs mid-protocol (revision
/// tree rebuild is modelled on the leader RPC client instead; this trait
/// covers only what the *local* node's own engine exposes).
pub trait LocalStorageEngine: Send + Sync {
    /// Local snapshot for exactly the named databases.
    fn local_collections(&self, databases: &[DatabaseName]) -> maintenance_types::Result<Local>;

    /// Document count for one shard, used by `SynchronizeShard`'s Stage 1
    /// size gate and Stage 7's checksum.
    fn document_count(&self, database: &DatabaseName, shard: &ShardId) -> maintenance_types::Result<u64>;

    /// Sets this server's belief about who leads `shard`: `None` to claim
    /// leadership, `Some(id)` to follow `id` (possibly `"id_term"` once a
    /// following term has been adopted, Stage 5).
    fn set_follower_state(
        &self,
        database: &DatabaseName,
        shard: &ShardId,
        leader: Option<String>,
    ) -> maintenance_types::Result<()>;
}

/// An in-memory fake of both collaborators, for unit/integration tests.
/// Mirrors the shape of a tiny single-process cluster: one map per view,
/// mutated directly by the test, read by the driver exactly as the real
/// collaborators would be.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub struct FakeAgreementStore {
        pub plan: Mutex<Plan>,
        pub current: Mutex<Current>,
        pub databases: Mutex<Vec<DatabaseName>>,
        pub plan_index: AtomicU64,
        pub current_index: AtomicU64,
        pub applied: Mutex<Vec<WriteTransaction>>,
    }

    impl AgreementStore for FakeAgreementStore {
        fn read_plan(&self, databases: &[DatabaseName]) -> maintenance_types::Result<(Plan, u64)> {
            let plan = self.plan.lock();
            let slice: Plan = databases
                .iter()
                .filter_map(|d| plan.get(d).map(|v| (d.clone(), v.clone())))
                .collect();
            Ok((slice, self.plan_index.load(Ordering::Relaxed)))
        }

        fn read_current(&self, databases: &[DatabaseName]) -> maintenance_types::Result<(Current, u64)> {
            let current = self.current.lock();
            let slice: Current = databases
                .iter()
                .filter_map(|d| current.get(d).map(|v| (d.clone(), v.clone())))
                .collect();
            Ok((slice, self.current_index.load(Ordering::Relaxed)))
        }

        fn apply(&self, txn: WriteTransaction) -> maintenance_types::Result<()> {
            let mut current = self.current.lock();
            for op in &txn.ops {
                match op {
                    WriteOp::Set { key, value, .. } => apply_set(&mut current, key, value),
                    WriteOp::Delete { key } => apply_delete(&mut current, key),
                    WriteOp::Increment { .. } => {
                        self.current_index.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            self.applied.lock().push(txn);
            Ok(())
        }

        fn current_version(&self) -> u64 {
            self.current_index.load(Ordering::Relaxed)
        }

        fn all_databases(&self) -> Vec<DatabaseName> {
            self.databases.lock().clone()
        }
    }

    /// Parses a `Current/Collections/<db>/<coll>/<shard>` key and writes the
    /// shard entry, creating intermediate maps as needed. Good enough for a
    /// test fake; the real agreement store's key schema is out of scope.
    fn apply_set(current: &mut Current, key: &str, value: &serde_json::Value) {
        if let Some((db, coll, shard)) = split_shard_key(key) {
            let shard_value: crate::model::CurrentShard =
                serde_json::from_value(value.clone()).unwrap_or_default();
            current
                .entry(db)
                .or_default()
                .collections
                .entry(coll)
                .or_default()
                .shards
                .insert(shard, shard_value);
        }
    }

    fn apply_delete(current: &mut Current, key: &str) {
        if let Some((db, coll, shard)) = split_shard_key(key) {
            if let Some(db_entry) = current.get_mut(&db) {
                if let Some(coll_entry) = db_entry.collections.get_mut(&coll) {
                    coll_entry.shards.remove(&shard);
                }
            }
        }
    }

    fn split_shard_key(key: &str) -> Option<(String, String, String)> {
        let rest = key.strip_prefix("Current/Collections/")?;
        let mut parts = rest.splitn(3, '/');
        let db = parts.next()?.to_string();
        let coll = parts.next()?.to_string();
        let shard = parts.next()?.to_string();
        Some((db, coll, shard))
    }

    #[derive(Default)]
    pub struct FakeStorageEngine {
        pub local: Mutex<Local>,
        pub counts: Mutex<BTreeMap<(String, String), u64>>,
    }

    impl LocalStorageEngine for FakeStorageEngine {
        fn local_collections(&self, databases: &[DatabaseName]) -> maintenance_types::Result<Local> {
            let local = self.local.lock();
            Ok(databases
                .iter()
                .filter_map(|d| local.get(d).map(|v| (d.clone(), v.clone())))
                .collect())
        }

        fn document_count(&self, database: &DatabaseName, shard: &ShardId) -> maintenance_types::Result<u64> {
            Ok(*self.counts.lock().get(&(database.clone(), shard.clone())).unwrap_or(&0))
        }

        fn set_follower_state(
            &self,
            database: &DatabaseName,
            shard: &ShardId,
            leader: Option<String>,
        ) -> maintenance_types::Result<()> {
            let mut local = self.local.lock();
            if let Some(db) = local.get_mut(database) {
                for coll in db.collections.values_mut() {
                    if let Some(s) = coll.shards.get_mut(shard) {
                        s.leader = leader.clone();
                    }
                }
            }
            Ok(())
        }
    }
}
