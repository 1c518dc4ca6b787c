use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use maintenance_types::{ActionDescription, ActionState, MaintenanceError};
use parking_lot::Mutex;

/// The outcome of one `first()`/`next()` tick of a concrete action.
pub struct Outcome {
    /// Whether another tick (`next()`) should be scheduled.
    pub more: bool,
    pub result: maintenance_types::Result<()>,
    /// Set if this tick wants a pre-action run (and this action parked) before
    /// continuing.
    pub pre_action: Option<ActionDescription>,
    /// Set once, typically alongside `more: false`, to run after this action
    /// completes successfully.
    pub post_action: Option<ActionDescription>,
    /// Set to return this action to `READY` at a new priority instead of
    /// resolving COMPLETE/FAILED.
    pub requeue_priority: Option<i32>,
}

impl Outcome {
    pub fn more() -> Self {
        Outcome { more: true, result: Ok(()), pre_action: None, post_action: None, requeue_priority: None }
    }

    pub fn done() -> Self {
        Outcome { more: false, result: Ok(()), pre_action: None, post_action: None, requeue_priority: None }
    }

    pub fn failed(err: MaintenanceError) -> Self {
        Outcome { more: false, result: Err(err), pre_action: None, post_action: None, requeue_priority: None }
    }

    /// Terminates this attempt without resolving COMPLETE/FAILED: the
    /// action returns to `READY` at `priority`, the shard lock (if any)
    /// stays held, and a later tick re-runs `first()` from scratch. Mirrors
    /// `SynchronizeShard` Stage 1's "reschedule at SLOW_OP and terminate
    /// this run with a transient error" (§4.9).
    pub fn requeue_at(priority: i32) -> Self {
        Outcome { more: false, result: Ok(()), pre_action: None, post_action: None, requeue_priority: Some(priority) }
    }

    pub fn with_pre_action(mut self, desc: ActionDescription) -> Self {
        self.pre_action = Some(desc);
        self
    }

    pub fn with_post_action(mut self, desc: ActionDescription) -> Self {
        self.post_action = Some(desc);
        self
    }
}

/// The state machine a concrete action implements. `first`/`next` run under
/// the invariant that the wrapping `ActionRecord` is `EXECUTING`; the worker
/// (not the implementation) advances timestamps and transitions state based
/// on the returned `Outcome`.
pub trait ActionImpl: Send {
    fn first(&mut self) -> Outcome;

    /// Resume after a previous tick returned `more: true`. The default
    /// implementation suits one-shot actions (like `SynchronizeShard`, which
    /// drives its whole protocol out of a single `first()` call).
    fn next(&mut self) -> Outcome {
        Outcome::done()
    }
}

/// Constructs the concrete `ActionImpl` named by an `ActionDescription`.
/// Implemented downstream (`maintenance-actions`) so the engine never needs
/// to know about concrete action kinds.
pub trait ActionFactory: Send + Sync {
    fn create(&self, description: &ActionDescription) -> maintenance_types::Result<Box<dyn ActionImpl>>;
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One live entry in the registry: an `ActionDescription` plus its running
/// concrete implementation and bookkeeping. Reference-counted so pre/post
/// chains and the admin REST surface can all hold a handle.
pub struct ActionRecord {
    id: u64,
    hash: u64,
    description: ActionDescription,
    labels: BTreeSet<String>,
    state: Mutex<ActionState>,
    progress: AtomicU64,
    result: Mutex<maintenance_types::Result<()>>,
    created_millis: i64,
    started_millis: AtomicU64,
    last_stat_millis: AtomicU64,
    done_millis: AtomicU64,
    pre_action: Mutex<Option<ActionDescription>>,
    post_action: Mutex<Option<ActionDescription>>,
    requeue_requested: std::sync::atomic::AtomicBool,
    priority_override: std::sync::atomic::AtomicI32,
    pub(crate) imp: Mutex<Box<dyn ActionImpl>>,
}

/// Sentinel meaning "no override; use the description's own priority".
const NO_PRIORITY_OVERRIDE: i32 = i32::MIN;

impl ActionRecord {
    pub(crate) fn new(id: u64, description: ActionDescription, imp: Box<dyn ActionImpl>) -> Self {
        let hash = description.hash();
        let mut labels = BTreeSet::new();
        if description.fast_track() {
            labels.insert(maintenance_types::keys::FAST_TRACK_LABEL.to_string());
        }
        ActionRecord {
            id,
            hash,
            description,
            labels,
            state: Mutex::new(ActionState::Ready),
            progress: AtomicU64::new(0),
            result: Mutex::new(Ok(())),
            created_millis: now_millis(),
            started_millis: AtomicU64::new(0),
            last_stat_millis: AtomicU64::new(0),
            done_millis: AtomicU64::new(0),
            pre_action: Mutex::new(None),
            post_action: Mutex::new(None),
            requeue_requested: std::sync::atomic::AtomicBool::new(false),
            priority_override: std::sync::atomic::AtomicI32::new(NO_PRIORITY_OVERRIDE),
            imp: Mutex::new(imp),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn description(&self) -> &ActionDescription {
        &self.description
    }

    pub fn priority(&self) -> i32 {
        match self.priority_override.load(AtomicOrdering::Relaxed) {
            NO_PRIORITY_OVERRIDE => self.description.priority(),
            p => p,
        }
    }

    /// Overrides the queue priority used from here on, without touching the
    /// original `ActionDescription`. Used by `requeue_at` rescheduling.
    pub(crate) fn set_priority_override(&self, priority: i32) {
        self.priority_override.store(priority, AtomicOrdering::Relaxed);
    }

    pub fn fast_track(&self) -> bool {
        self.description.fast_track()
    }

    pub fn matches(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.labels)
    }

    pub fn state(&self) -> ActionState {
        *self.state.lock()
    }

    /// Sets state directly with no side effects. Used for `READY`,
    /// `WAITINGPRE`, `WAITINGPOST`, `EXECUTING` transitions, which do not
    /// dirty a database.
    pub(crate) fn set_state(&self, state: ActionState) {
        *self.state.lock() = state;
    }

    /// Transitions to `COMPLETE`/`FAILED`, returning the database to mark
    /// dirty (mirrors `ActionBase::setState`'s dirtying side effect).
    pub(crate) fn finish(&self, state: ActionState, result: maintenance_types::Result<()>) -> Option<String> {
        debug_assert!(matches!(state, ActionState::Complete | ActionState::Failed));
        *self.state.lock() = state;
        *self.result.lock() = result;
        self.done_millis.store(now_millis() as u64, AtomicOrdering::Relaxed);
        self.description.database().map(|d| d.to_string())
    }

    pub fn done(&self, seconds_actions_block: i64) -> bool {
        let state = self.state();
        if !state.is_done() {
            return false;
        }
        let done_at = self.done_millis.load(AtomicOrdering::Relaxed) as i64;
        done_at != 0 && done_at + seconds_actions_block * 1000 <= now_millis()
    }

    pub fn runnable(&self) -> bool {
        matches!(self.state(), ActionState::Ready)
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn start_stats(&self) {
        self.started_millis.store(now_millis() as u64, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_stats(&self) {
        self.progress.fetch_add(1, AtomicOrdering::Relaxed);
        self.last_stat_millis.store(now_millis() as u64, AtomicOrdering::Relaxed);
    }

    pub fn result(&self) -> maintenance_types::Result<()> {
        match &*self.result.lock() {
            Ok(()) => Ok(()),
            Err(e) => Err(clone_err(e)),
        }
    }

    pub(crate) fn set_pre_action(&self, desc: ActionDescription) {
        *self.pre_action.lock() = Some(desc);
    }

    pub(crate) fn take_pre_action(&self) -> Option<ActionDescription> {
        self.pre_action.lock().clone()
    }

    pub(crate) fn clear_pre_action(&self) {
        *self.pre_action.lock() = None;
    }

    pub(crate) fn set_post_action(&self, desc: ActionDescription) {
        *self.post_action.lock() = Some(desc);
    }

    pub fn post_action(&self) -> Option<ActionDescription> {
        self.post_action.lock().clone()
    }

    pub fn request_requeue(&self) {
        self.requeue_requested.store(true, AtomicOrdering::Relaxed);
    }

    pub fn requeue_requested(&self) -> bool {
        self.requeue_requested.load(AtomicOrdering::Relaxed)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "state": self.state(),
            "progress": self.progress(),
            "created": self.created_millis,
            "started": self.started_millis.load(AtomicOrdering::Relaxed),
            "lastStat": self.last_stat_millis.load(AtomicOrdering::Relaxed),
            "done": self.done_millis.load(AtomicOrdering::Relaxed),
            "result": self.result.lock().as_ref().err().map(|e| e.error_num()).unwrap_or(0),
            "description": self.description,
        })
    }
}

fn clone_err(e: &MaintenanceError) -> MaintenanceError {
    // `MaintenanceError` is not `Clone` (it wraps `anyhow::Error`); callers
    // that need the original typically only need the error_num/message, so
    // degrade to a textual `Internal` error on clone.
    match e {
        MaintenanceError::BadParameter(s) => MaintenanceError::BadParameter(s.clone()),
        MaintenanceError::DuplicateAction => MaintenanceError::DuplicateAction,
        MaintenanceError::NotFound(s) => MaintenanceError::NotFound(s.clone()),
        MaintenanceError::ShuttingDown => MaintenanceError::ShuttingDown,
        MaintenanceError::WrongChecksum { shard } => MaintenanceError::WrongChecksum { shard: shard.clone() },
        MaintenanceError::AttemptTimeoutExceeded => MaintenanceError::AttemptTimeoutExceeded,
        MaintenanceError::AlreadyComplete { id } => MaintenanceError::AlreadyComplete { id: *id },
        MaintenanceError::Transient(e) => MaintenanceError::Transient(anyhow::anyhow!(e.to_string())),
        MaintenanceError::Internal(e) => MaintenanceError::Internal(anyhow::anyhow!(e.to_string())),
        MaintenanceError::Coded { code, message } => MaintenanceError::Coded { code: *code, message: message.clone() },
    }
}
