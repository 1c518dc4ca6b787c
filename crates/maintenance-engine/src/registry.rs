use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use maintenance_types::{ActionDescription, ActionState, MaintenanceError};
use parking_lot::{Condvar, Mutex};

use crate::action::{ActionFactory, ActionRecord};
use crate::queue::QueueKey;

struct Inner {
    by_id: HashMap<u64, Arc<ActionRecord>>,
    order: VecDeque<u64>,
    queue: BinaryHeap<QueueKey>,
}

/// The registry: a double-ended collection of live actions in insertion
/// order, a priority queue over the subset in `READY`, and duplicate
/// detection by description hash. A single `parking_lot::Mutex` protects
/// both the map and the queue (mirroring the original's single read/write
/// lock guarding both structures together); a `Condvar` is *broadcast*
/// (never signalled) whenever a non-executing action is registered, since a
/// sleeping worker may be the label-restricted fast-track worker and only a
/// broadcast guarantees every label-compatible sleeper wakes to check.
pub struct Registry {
    inner: Mutex<Inner>,
    new_work: Condvar,
    next_id: AtomicU64,
    factory: Arc<dyn ActionFactory>,
}

impl Registry {
    pub fn new(factory: Arc<dyn ActionFactory>) -> Self {
        Registry {
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                order: VecDeque::new(),
                queue: BinaryHeap::new(),
            }),
            new_work: Condvar::new(),
            next_id: AtomicU64::new(1),
            factory,
        }
    }

    pub fn next_action_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn find_first_action_hash_no_lock(inner: &Inner, hash: u64) -> Option<Arc<ActionRecord>> {
        for id in &inner.order {
            let action = &inner.by_id[id];
            if action.hash() == hash && !action.state().is_done() {
                return Some(action.clone());
            }
        }
        None
    }

    /// Creates, registers, and (depending on `executing`) enqueues or runs an
    /// action immediately. Shared by `add_action`, `pre_action`, and
    /// `post_action`, which differ only in initial state and duplicate
    /// handling.
    fn register(
        &self,
        description: ActionDescription,
        initial_state: ActionState,
        check_duplicate: bool,
    ) -> maintenance_types::Result<Arc<ActionRecord>> {
        let imp = self.factory.create(&description)?;
        let id = self.next_action_id();
        let record = Arc::new(ActionRecord::new(id, description, imp));

        let mut inner = self.inner.lock();
        if check_duplicate && !record.description().is_run_even_if_duplicate() {
            if Self::find_first_action_hash_no_lock(&inner, record.hash()).is_some() {
                return Err(MaintenanceError::DuplicateAction);
            }
        }
        record.set_state(initial_state);
        inner.order.push_back(id);
        if matches!(initial_state, ActionState::Ready) {
            inner.queue.push(QueueKey {
                fast_track: record.fast_track(),
                priority: record.priority(),
                id,
            });
        }
        inner.by_id.insert(id, record.clone());
        drop(inner);

        if !matches!(initial_state, ActionState::Executing) {
            // Broadcast: a sleeping fast-track-only worker must see this.
            self.new_work.notify_all();
        }
        Ok(record)
    }

    /// `addAction`: creates a READY action (or runs it EXECUTING inline if
    /// `execute_now`), rejecting duplicates unless the description opts out.
    pub fn add_action(
        &self,
        description: ActionDescription,
        execute_now: bool,
    ) -> maintenance_types::Result<Arc<ActionRecord>> {
        let state = if execute_now { ActionState::Executing } else { ActionState::Ready };
        self.register(description, state, true)
    }

    /// `preAction`: registered immediately `EXECUTING`, for the caller
    /// (the parent action's `createPreAction`) to drive directly.
    pub fn pre_action(&self, description: ActionDescription) -> maintenance_types::Result<Arc<ActionRecord>> {
        self.register(description, ActionState::Executing, true)
    }

    /// `postAction`: registered `WAITINGPOST`; made `READY` by the worker
    /// once the parent action completes successfully.
    pub fn post_action(&self, description: ActionDescription) -> maintenance_types::Result<Arc<ActionRecord>> {
        self.register(description, ActionState::WaitingPost, true)
    }

    /// Transitions a post-action from `WAITINGPOST` to `READY` and pushes it
    /// onto the priority queue, broadcasting the new-work condition.
    pub(crate) fn admit_post_action(&self, action: &Arc<ActionRecord>) {
        let mut inner = self.inner.lock();
        action.set_state(ActionState::Ready);
        inner.queue.push(QueueKey {
            fast_track: action.fast_track(),
            priority: action.priority(),
            id: action.id(),
        });
        drop(inner);
        self.new_work.notify_all();
    }

    /// Returns `action` to `READY` at `priority` instead of resolving it
    /// COMPLETE/FAILED (`Outcome::requeue_at`). The action keeps its id, hash,
    /// and any shard lock it holds; only the queue ordering changes.
    pub(crate) fn requeue(&self, action: &Arc<ActionRecord>, priority: i32) {
        action.set_priority_override(priority);
        let mut inner = self.inner.lock();
        action.set_state(ActionState::Ready);
        inner.queue.push(QueueKey { fast_track: action.fast_track(), priority: action.priority(), id: action.id() });
        drop(inner);
        self.new_work.notify_all();
    }

    pub fn find_first_not_done_action(&self, description: &ActionDescription) -> Option<Arc<ActionRecord>> {
        let inner = self.inner.lock();
        Self::find_first_action_hash_no_lock(&inner, description.hash())
    }

    pub fn get(&self, id: u64) -> Option<Arc<ActionRecord>> {
        self.inner.lock().by_id.get(&id).cloned()
    }

    /// `deleteAction`: forces a non-complete action to `FAILED`. Returns the
    /// action so the caller (`Feature::delete_action`) can release its shard
    /// lock and mark its database dirty, exactly as a normal completion
    /// would (§4.8, §8 property 7) — a deleted action may be popped and
    /// discarded by `find_ready_action` without ever reaching
    /// `worker::drive`, so nothing else performs that bookkeeping for it.
    pub fn delete_action(&self, id: u64) -> maintenance_types::Result<Arc<ActionRecord>> {
        let action = self.get(id).ok_or_else(|| MaintenanceError::NotFound(format!("action {id}")))?;
        if action.state() == ActionState::Complete {
            return Err(MaintenanceError::AlreadyComplete { id });
        }
        action.finish(ActionState::Failed, Err(MaintenanceError::ShuttingDown));
        Ok(action)
    }

    /// Blocks up to 100ms (or until notified or `shutting_down` flips) for a
    /// `READY` action matching `required` labels, transitioning it to
    /// `EXECUTING` on return. `skip_slow_op` reserves capacity for urgent
    /// work by leaving `SLOW_OP`-priority, non-fast-track actions for other
    /// workers; by heap order, any stale (non-`READY`) top entry is popped
    /// and discarded regardless.
    pub fn find_ready_action(
        &self,
        required: &BTreeSet<String>,
        skip_slow_op: bool,
        shutting_down: &std::sync::atomic::AtomicBool,
        seconds_actions_linger: i64,
    ) -> Option<Arc<ActionRecord>> {
        use maintenance_types::priority::SLOW_OP;

        if shutting_down.load(AtomicOrdering::Relaxed) {
            return None;
        }
        let mut inner = self.inner.lock();
        loop {
            loop {
                let Some(top) = inner.queue.peek().copied() else { break };
                let Some(action) = inner.by_id.get(&top.id).cloned() else {
                    inner.queue.pop();
                    continue;
                };
                if !action.runnable() {
                    inner.queue.pop();
                    continue;
                }
                if !action.matches(required) {
                    // Fast-track sorts first; if the top isn't usable for a
                    // label-restricted worker, nothing below it is either.
                    break;
                }
                if skip_slow_op && !action.fast_track() && action.priority() == SLOW_OP {
                    break;
                }
                inner.queue.pop();
                action.set_state(ActionState::Executing);
                return Some(action);
            }

            // Opportunistic GC: 1-in-10 chance, sweep done-and-lingered
            // actions while already holding the write lock. Uses the same
            // `seconds_actions_linger` as `sweep_lingered`, so an action
            // observed via `GET /admin/actions` stays put for the full
            // configured linger regardless of which sweep finds it first.
            if rand::random::<u8>() % 10 == 0 {
                inner.order.retain(|id| {
                    let keep = match inner.by_id.get(id) {
                        Some(a) => !a.done(seconds_actions_linger),
                        None => false,
                    };
                    if !keep {
                        inner.by_id.remove(id);
                    }
                    keep
                });
            }

            if shutting_down.load(AtomicOrdering::Relaxed) {
                return None;
            }
            let result = self.new_work.wait_for(&mut inner, Duration::from_millis(100));
            let _ = result;
            if shutting_down.load(AtomicOrdering::Relaxed) {
                return None;
            }
        }
    }

    pub fn notify_shutdown(&self) {
        self.new_work.notify_all();
    }

    /// Removes any `done() && lingered past seconds_actions_linger` entries.
    pub fn sweep_lingered(&self, seconds_actions_linger: i64) {
        let mut inner = self.inner.lock();
        inner.order.retain(|id| {
            let keep = match inner.by_id.get(id) {
                Some(a) => !a.done(seconds_actions_linger),
                None => false,
            };
            if !keep {
                inner.by_id.remove(id);
            }
            keep
        });
    }

    pub fn snapshot(&self) -> Vec<Arc<ActionRecord>> {
        let inner = self.inner.lock();
        inner.order.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
