//! The Maintenance Engine: the action registry, priority queue, worker
//! pool, error buckets, dirty-database tracker, and the reconcile/report
//! loop that reconciles this storage node's local shard/collection/database
//! state with the agreement store's planned state (§2). Concrete action
//! kinds (`CreateCollection`, `SynchronizeShard`, ...) and the leader/agreement
//! store clients live downstream, in `maintenance-actions` and
//! `maintenance-node`; this crate only knows the `ActionFactory`,
//! `AgreementStore`, and `LocalStorageEngine` seams they plug into.

mod action;
mod collaborators;
mod dirty;
mod driver;
mod errors;
mod feature;
mod model;
mod queue;
mod reconcile;
mod registry;
mod report;
mod shard_locks;
mod shard_version;
mod worker;

pub use action::{ActionFactory, ActionImpl, ActionRecord, Outcome};
pub use collaborators::{AgreementStore, LocalStorageEngine, WriteOp, WriteTransaction};
#[cfg(any(test, feature = "test-util"))]
pub use collaborators::fake;
pub use dirty::DirtyDatabases;
pub use driver::{DriverOutcome, SyncDriver};
pub use errors::{ErrorBlob, ErrorRegistry, MAX_ERRORS_BEFORE_AUTO_REPAIR, MAX_REPLICATION_ERRORS_PER_SHARD, MAX_REPLICATION_ERRORS_PER_SHARD_AGE};
pub use feature::{default_thread_count, Feature, FeatureConfig, MAX_THREAD_LIMIT, MIN_THREAD_LIMIT};
pub use model::{
    Current, CurrentCollection, CurrentDatabase, CurrentShard, DatabaseName, IndexPlan, Local,
    LocalCollection, LocalDatabase, LocalShard, Plan, ServerId, ShardId, ShardPlan, ShardRole,
};
pub use queue::QueueKey;
pub use reconcile::{diff_plan_local, ReconcileResult};
pub use registry::Registry;
pub use report::{diff_local_current, CURRENT_VERSION_KEY};
pub use shard_locks::ShardLocks;
pub use shard_version::ShardVersions;
