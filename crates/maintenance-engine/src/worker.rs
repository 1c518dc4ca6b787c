use std::collections::BTreeSet;
use std::sync::Arc;

use maintenance_types::ActionState;

use crate::action::ActionRecord;
use crate::feature::Feature;

/// Runs one action (and any pre-action chain it spawns) to completion,
/// following §4.3's transition rules. `direct` mirrors the original's
/// "direct action" worker constructed to execute a single inline action
/// (`addAction(desc, executeNow=true)`); it never consults the priority
/// queue and stops once this action (and its chain) resolves.
pub(crate) fn drive(feature: &Feature, mut current: Arc<ActionRecord>) {
    let registry = &feature.registry;
    let mut parent_stack: Vec<Arc<ActionRecord>> = Vec::new();
    current.start_stats();
    let mut outcome = catch_tick(&current, true);

    loop {
        if let Some(new_priority) = outcome.requeue_priority {
            if parent_stack.is_empty() {
                registry.requeue(&current, new_priority);
                return;
            }
            // `SynchronizeShard` never runs as anyone's pre/post-action, so
            // this should not happen; fail the chain rather than leave the
            // parent stuck in WAITINGPRE forever.
            let dirtied = current.finish(
                ActionState::Failed,
                Err(maintenance_types::MaintenanceError::Internal(anyhow::anyhow!(
                    "requeue requested with a pending parent action"
                ))),
            );
            mark_dirty(feature, &current, dirtied);
            fail_chain(feature, &mut parent_stack);
            return;
        }

        let mut more = outcome.more;
        if outcome.result.is_err() {
            more = false;
        }

        if more {
            if let Some(pre_desc) = outcome.pre_action.take() {
                match registry.pre_action(pre_desc.clone()) {
                    Ok(pre_record) => {
                        current.set_pre_action(pre_desc);
                        current.set_state(ActionState::WaitingPre);
                        parent_stack.push(current.clone());
                        current = pre_record;
                        current.start_stats();
                        outcome = catch_tick(&current, true);
                        continue;
                    }
                    Err(e) => {
                        mark_dirty(feature, &current, current.finish(ActionState::Failed, Err(e)));
                        fail_chain(feature, &mut parent_stack);
                        return;
                    }
                }
            } else {
                current.inc_stats();
                outcome = catch_tick(&current, false);
                continue;
            }
        }

        // No more ticks for `current`: resolve COMPLETE or FAILED.
        if outcome.result.is_ok() {
            let dirtied = current.finish(ActionState::Complete, Ok(()));
            mark_dirty(feature, &current, dirtied);
            if let Some(post_desc) = outcome.post_action.take() {
                if let Ok(post_record) = registry.post_action(post_desc) {
                    current.set_post_action(post_record.description().clone());
                    registry.admit_post_action(&post_record);
                }
            }
            match parent_stack.pop() {
                Some(parent) => {
                    parent.clear_pre_action();
                    parent.set_state(ActionState::Executing);
                    current = parent;
                    outcome = catch_tick(&current, false);
                    continue;
                }
                None => return,
            }
        } else {
            let err = outcome.result.unwrap_err();
            let counts_as_failure = err.counts_as_replication_failure();
            let dirtied = current.finish(ActionState::Failed, Err(err));
            mark_dirty(feature, &current, dirtied);
            if counts_as_failure {
                if let (Some(database), Some(shard)) =
                    (current.description().database(), current.description().shard())
                {
                    feature.errors.store_replication_error(database, shard);
                }
            }
            fail_chain(feature, &mut parent_stack);
            return;
        }
    }
}

/// §4.8: whenever an action transitions to `COMPLETE`/`FAILED` its database
/// (if any) is marked dirty so the driver wakes promptly for it; successful
/// shard-level actions also bump that shard's version to invalidate
/// in-flight replication from a prior epoch.
fn mark_dirty(feature: &Feature, action: &Arc<ActionRecord>, database: Option<String>) {
    if let Some(database) = database {
        feature.add_dirty(database);
    }
    if let Some(shard) = action.description().shard() {
        if action.state() == ActionState::Complete {
            feature.shard_versions.inc(shard);
        }
        // §4.9 Stage 8: unlock unless the action asked to stay locked across
        // a requeue (it didn't here, since requeued actions return early in
        // `drive` before ever reaching `finish`).
        if !action.requeue_requested() {
            feature.shard_locks.unlock_shard(shard);
        }
    }
}

fn fail_chain(feature: &Feature, parent_stack: &mut Vec<Arc<ActionRecord>>) {
    while let Some(parent) = parent_stack.pop() {
        let dirtied = parent.finish(ActionState::Failed, Err(maintenance_types::MaintenanceError::Internal(
            anyhow::anyhow!("pre-action chain failed"),
        )));
        mark_dirty(feature, &parent, dirtied);
    }
}

/// Calls `first()` (if `is_first`) or `next()` on the action's implementation,
/// converting any panic into a `FAILED` outcome. This is the only place
/// `first`/`next` may panic without poisoning the engine, mirroring the
/// original's try/catch around each worker tick.
fn catch_tick(action: &Arc<ActionRecord>, is_first: bool) -> crate::action::Outcome {
    let mut imp = action.imp.lock();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        if is_first {
            imp.first()
        } else {
            imp.next()
        }
    }));
    match result {
        Ok(outcome) => outcome,
        Err(_) => crate::action::Outcome::failed(maintenance_types::MaintenanceError::Internal(
            anyhow::anyhow!("action implementation panicked"),
        )),
    }
}

/// A long-lived OS thread that repeatedly pops a `READY` action matching
/// `required_labels` and drives it to completion. One worker in the pool is
/// `skip_slow_op`, reserving itself from `SLOW_OP`-priority work so urgent
/// jobs are never starved; at most one other worker is constructed with
/// `required_labels = {fastTrack}` so fast-track admission is never blocked
/// behind a long-running normal job.
pub struct Worker {
    pub required_labels: BTreeSet<String>,
    pub skip_slow_op: bool,
}

impl Worker {
    pub fn run(&self, feature: Arc<Feature>) {
        loop {
            if feature.is_paused() {
                if feature.shutting_down_flag().load(std::sync::atomic::Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
                continue;
            }
            match feature.registry.find_ready_action(
                &self.required_labels,
                self.skip_slow_op,
                feature.shutting_down_flag(),
                feature.seconds_actions_linger(),
            ) {
                Some(action) => drive(&feature, action),
                None => return,
            }
        }
    }
}
