use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

use maintenance_types::ActionDescription;
use parking_lot::Mutex;

use crate::action::{ActionFactory, ActionRecord};
use crate::dirty::DirtyDatabases;
use crate::errors::ErrorRegistry;
use crate::registry::Registry;
use crate::shard_locks::ShardLocks;
use crate::shard_version::ShardVersions;
use crate::worker::Worker;

pub const MIN_THREAD_LIMIT: u32 = 3;
pub const MAX_THREAD_LIMIT: u32 = 64;

/// `clamp(cores/4 + 1, 3, 64)`: the default worker pool size.
pub fn default_thread_count(cores: u32) -> u32 {
    (cores / 4 + 1).clamp(MIN_THREAD_LIMIT, MAX_THREAD_LIMIT)
}

pub struct FeatureConfig {
    pub threads: u32,
    /// Minimum seconds a finished action blocks duplicate submissions.
    pub seconds_actions_block: i64,
    /// Minimum seconds a finished action stays in the registry.
    pub seconds_actions_linger: i64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            threads: default_thread_count(std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(4)),
            seconds_actions_block: 2,
            seconds_actions_linger: 3600,
        }
    }
}

/// The registry, priority queue, shard-lock map, error buckets, dirty-db
/// tracker, and worker pool, bound together as one unit exactly as the
/// original's `MaintenanceFeature` aggregates them. `maintenance-node` owns
/// one `Feature` per process.
pub struct Feature {
    pub registry: Registry,
    pub shard_locks: ShardLocks,
    pub errors: ErrorRegistry,
    pub dirty: DirtyDatabases,
    pub shard_versions: ShardVersions,
    config: FeatureConfig,
    shutting_down: AtomicBool,
    pause_until_millis: AtomicI64,
    duplicate_counter: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Feature {
    pub fn new(config: FeatureConfig, factory: Arc<dyn ActionFactory>) -> Arc<Self> {
        Arc::new(Feature {
            registry: Registry::new(factory),
            shard_locks: ShardLocks::new(),
            errors: ErrorRegistry::new(),
            dirty: DirtyDatabases::new(),
            shard_versions: ShardVersions::new(),
            config,
            shutting_down: AtomicBool::new(false),
            pause_until_millis: AtomicI64::new(0),
            duplicate_counter: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawns `N = clamp(cores/4+1, 3, 64)` (or `config.threads`) worker
    /// threads. Exactly one carries the `fastTrack`-only restriction; a
    /// second (or the same, when the pool is at its 3-thread minimum) is
    /// reserved from `SLOW_OP`-priority work. All others accept any `READY`
    /// action.
    pub fn start(self: &Arc<Self>) {
        let n = self.config.threads.clamp(MIN_THREAD_LIMIT, MAX_THREAD_LIMIT) as usize;
        let mut workers = self.workers.lock();
        for i in 0..n {
            let fast_track_only = i == 0;
            let skip_slow_op = i == 0 || i == 1;
            let required_labels: std::collections::BTreeSet<String> = if fast_track_only {
                [maintenance_types::keys::FAST_TRACK_LABEL.to_string()].into()
            } else {
                Default::default()
            };
            let worker = Worker { required_labels, skip_slow_op };
            let feature = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("maintenance-{i}"))
                .spawn(move || worker.run(feature))
                .expect("failed to spawn maintenance worker thread");
            workers.push(handle);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn shutting_down_flag(&self) -> &AtomicBool {
        &self.shutting_down
    }

    /// Sets the shutdown flag and broadcasts the new-work condition so all
    /// workers observe it and exit `find_ready_action` with `None`.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, AtomicOrdering::Relaxed);
        self.registry.notify_shutdown();
    }

    pub fn stop(self: &Arc<Self>) {
        self.begin_shutdown();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn seconds_actions_block(&self) -> i64 {
        self.config.seconds_actions_block
    }

    pub fn seconds_actions_linger(&self) -> i64 {
        self.config.seconds_actions_linger
    }

    /// §3's ShardActionMap invariant ("at most one non-done action per
    /// shard") is enforced here, at registration, rather than inside any
    /// concrete action: if `description` names a shard, the lock is acquired
    /// before the record is created and released by the worker (`mark_dirty`)
    /// once the action resolves, unless it requests a requeue.
    pub fn add_action(self: &Arc<Self>, description: ActionDescription, execute_now: bool) -> maintenance_types::Result<Arc<ActionRecord>> {
        let shard = description.shard().map(|s| s.to_string());
        if let Some(shard) = &shard {
            if !self.shard_locks.lock_shard(shard, description.clone()) {
                return Err(maintenance_types::MaintenanceError::DuplicateAction);
            }
        }
        let result = self.registry.add_action(description, execute_now);
        if result.is_err() {
            if let Some(shard) = &shard {
                self.shard_locks.unlock_shard(shard);
            }
        }
        if let Err(maintenance_types::MaintenanceError::DuplicateAction) = &result {
            self.duplicate_counter.fetch_add(1, AtomicOrdering::Relaxed);
        }
        if execute_now {
            if let Ok(action) = &result {
                crate::worker::drive(self, action.clone());
            }
        }
        result
    }

    pub fn duplicate_counter(&self) -> u64 {
        self.duplicate_counter.load(AtomicOrdering::Relaxed)
    }

    /// Forces a non-complete action to `FAILED` and, since a deleted action
    /// may never reach `worker::drive`/`mark_dirty` (it can be popped and
    /// discarded straight out of the priority queue by `find_ready_action`),
    /// releases its shard lock and dirties its database here instead.
    pub fn delete_action(&self, id: u64) -> maintenance_types::Result<()> {
        let action = self.registry.delete_action(id)?;
        if let Some(shard) = action.description().shard() {
            self.shard_locks.unlock_shard(shard);
        }
        if let Some(database) = action.description().database() {
            self.add_dirty(database.to_string());
        }
        Ok(())
    }

    pub fn add_dirty(&self, database: impl Into<String>) {
        self.dirty.add_dirty(database);
    }

    pub fn pause(&self, seconds: u64) {
        let until = now_millis() + seconds as i64 * 1000;
        self.pause_until_millis.store(until, AtomicOrdering::Relaxed);
    }

    pub fn proceed(&self) {
        self.pause_until_millis.store(0, AtomicOrdering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        let until = self.pause_until_millis.load(AtomicOrdering::Relaxed);
        until != 0 && until > now_millis()
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
