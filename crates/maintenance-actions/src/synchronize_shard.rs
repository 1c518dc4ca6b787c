//! The multi-stage follower catch-up protocol (§4.9). Everything happens in
//! one `first()` tick; `next()` is never called (the action runs to
//! completion or failure on the worker thread that picked it up, which is
//! safe because there are multiple workers and this one may simply block
//! for a long time, per §5's suspension-point rules).

use std::time::{Duration, Instant};

use maintenance_engine::{ActionImpl, Outcome};
use maintenance_types::{keys, priority, MaintenanceError};

use crate::deps::Deps;
use crate::leader_client::{AddFollowerRequest, HoldReadLockRequest, InitialSyncOptions, TailOptions};
use crate::support;

const SIZE_GATE_DOCUMENT_DELTA: u64 = 10_000;
const TAILING_ROUNDS: u32 = 18;
const TAILING_ROUND_TIMEOUT: Duration = Duration::from_secs_f64(0.6 * 300.0);
const MAX_ATTEMPT_WAIT: Duration = Duration::from_secs(600);

pub struct SynchronizeShard {
    deps: Deps,
    database: String,
    collection: String,
    shard: String,
    the_leader: String,
    server_id: String,
    forced_resync: bool,
    sync_by_revision: bool,

    // The same `ActionImpl` instance is reused across every attempt of this
    // action (the worker never reconstructs it), so the size-gate reschedule
    // is tracked here rather than read back off the description: once this
    // attempt itself was admitted at `SLOW_OP`, the gate no longer applies.
    attempted_slow_op: bool,
    requeue_priority: Option<i32>,
    rollback_armed: bool,
    lock_id: Option<u64>,
}

impl SynchronizeShard {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        // Pre-conditions validated at construction (§4.9).
        let database = support::database(description)?;
        let collection = support::collection(description)?;
        let shard = support::shard(description)?;
        let the_leader = support::the_leader(description)?;
        if the_leader.is_empty() {
            return Err(MaintenanceError::BadParameter("theLeader must be non-empty".into()));
        }
        let server_id = description.get(keys::SERVER_ID).map(str::to_string).unwrap_or_else(|| deps.server_id.clone());

        Ok(SynchronizeShard {
            deps,
            database,
            collection,
            shard,
            the_leader,
            server_id,
            forced_resync: support::forced_resync(description),
            sync_by_revision: support::sync_by_revision(description),
            attempted_slow_op: description.priority() == priority::SLOW_OP,
            requeue_priority: None,
            rollback_armed: false,
            lock_id: None,
        })
    }

    fn shutting_down(&self) -> bool {
        self.deps.feature.is_shutting_down()
    }

    /// Stage 0: wait until either the agreement store reports us as an
    /// in-sync follower, or we detect we should bail out entirely.
    fn stage0_gate(&mut self) -> maintenance_types::Result<bool> {
        loop {
            if self.shutting_down() {
                return Err(MaintenanceError::ShuttingDown);
            }
            let (plan, _) = self.deps.store.read_plan(std::slice::from_ref(&self.database))?;
            let still_wanted = plan
                .get(&self.database)
                .and_then(|d| d.collections.get(&self.collection))
                .and_then(|c| c.shards.get(&self.shard))
                .map(|s| s.role(&self.server_id).is_some() && s.leader() == Some(self.the_leader.as_str()));
            match still_wanted {
                None => return Err(MaintenanceError::NotFound(format!("{}/{}/{}", self.database, self.collection, self.shard))),
                Some(false) => return Err(MaintenanceError::NotFound("plan no longer wants this synchronize".into())),
                Some(true) => {}
            }

            let (current, _) = self.deps.store.read_current(std::slice::from_ref(&self.database))?;
            let current_shard = current
                .get(&self.database)
                .and_then(|d| d.collections.get(&self.collection))
                .and_then(|c| c.shards.get(&self.shard));
            let leader_is_current = current_shard.and_then(|s| s.servers.first()).map(String::as_str) == Some(self.the_leader.as_str());
            let we_are_current = current_shard.map(|s| s.servers.iter().any(|s| s == &self.server_id)).unwrap_or(false);

            if leader_is_current && !we_are_current {
                return Ok(false);
            }
            if leader_is_current && we_are_current && !self.forced_resync {
                return Ok(true);
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    /// Stage 1: size gate, rebuild heuristic, backoff.
    fn stage1_size_gate_and_backoff(&mut self) -> maintenance_types::Result<()> {
        let leader_count = self.deps.leader_client.document_count(&self.the_leader, &self.database, &self.shard)?;
        let local_count = self.deps.storage.document_count(&self.database, &self.shard)?;
        let delta = leader_count.abs_diff(local_count);
        if delta > SIZE_GATE_DOCUMENT_DELTA && !self.attempted_slow_op {
            self.attempted_slow_op = true;
            self.requeue_priority = Some(priority::SLOW_OP);
            return Err(MaintenanceError::Transient(anyhow::anyhow!("shard size delta {delta} exceeds gate; rescheduled at SLOW_OP")));
        }

        let failures = self.deps.feature.errors.replication_errors(&self.database, &self.shard);
        if failures == maintenance_engine::MAX_ERRORS_BEFORE_AUTO_REPAIR && self.sync_by_revision {
            // Auto-repair the follower side first; fail so the next attempt
            // starts clean with the tree rebuilt.
            let _ = self.deps.storage.recalculate_counts(&self.database, &self.shard);
            return Err(MaintenanceError::Transient(anyhow::anyhow!("follower-side auto-repair attempted after {failures} failures")));
        }
        if failures == maintenance_engine::MAX_ERRORS_BEFORE_AUTO_REPAIR + 1 {
            self.deps.leader_client.rebuild_revision_tree(&self.the_leader, &self.database, &self.shard)?;
            return Err(MaintenanceError::Transient(anyhow::anyhow!("leader-side tree rebuild requested after {failures} failures")));
        }
        if failures >= 4 {
            let n = failures as f64;
            let backoff = (2.0 + 0.1 * n * (n + 1.0) / 2.0).min(15.0);
            std::thread::sleep(Duration::from_secs_f64(backoff));
        }
        Ok(())
    }

    /// Stage 2: initial dump, no read lock held on the leader.
    fn stage2_initial_dump(&mut self, deadline: Option<Instant>) -> maintenance_types::Result<u64> {
        // Rejects all in-flight replication from any claimed leader while the
        // dump is running: no following term yet.
        self.deps.storage.set_follower_state(&self.database, &self.shard, Some(self.the_leader.clone()))?;
        self.rollback_armed = true;

        let has_documents = self.deps.storage.document_count(&self.database, &self.shard)? > 0;
        let opts = InitialSyncOptions { incremental: has_documents, shard: self.shard.clone(), include_system_collections: true };
        self.check_cancelled(deadline)?;
        let result = self.deps.leader_client.replication_synchronize(&self.the_leader, &self.database, opts)?;
        Ok(result.last_log_tick)
    }

    fn check_cancelled(&self, deadline: Option<Instant>) -> maintenance_types::Result<()> {
        if self.shutting_down() {
            return Err(MaintenanceError::ShuttingDown);
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(MaintenanceError::AttemptTimeoutExceeded);
            }
        }
        let (plan, _) = self.deps.store.read_plan(std::slice::from_ref(&self.database))?;
        let still_planned = plan
            .get(&self.database)
            .and_then(|d| d.collections.get(&self.collection))
            .and_then(|c| c.shards.get(&self.shard))
            .and_then(|s| s.role(&self.server_id))
            .is_some();
        if !still_planned {
            return Err(MaintenanceError::NotFound("no longer a planned follower for this shard".into()));
        }
        Ok(())
    }

    /// Stage 3: lock-free tailing, best effort, never fatal.
    fn stage3_lock_free_tailing(&mut self, mut tick: u64, deadline: Option<Instant>) -> u64 {
        for _ in 0..TAILING_ROUNDS {
            if self.check_cancelled(deadline).is_err() {
                break;
            }
            let opts = TailOptions { shard: self.shard.clone(), from_tick: tick, soft_timeout: TAILING_ROUND_TIMEOUT };
            match self.deps.leader_client.tail_wal(&self.the_leader, &self.database, opts) {
                Ok(result) => {
                    tick = result.reached_tick;
                    if result.timed_out {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        tick
    }

    /// Stage 4: acquire the exclusive lock.
    fn stage4_exclusive_lock(&mut self, timeout: Duration) -> maintenance_types::Result<(u64, u64)> {
        let id = self.deps.leader_client.acquire_read_lock_id(&self.the_leader, &self.database)?;
        let req = HoldReadLockRequest {
            id,
            collection: self.shard.clone(),
            ttl_secs: 0.8 * timeout.as_secs_f64(),
            server_id: self.server_id.clone(),
            reboot_id: self.deps.reboot_id,
            do_soft_lock_only: false,
            want_following_term: true,
        };
        match self.deps.leader_client.hold_read_lock(&self.the_leader, &self.database, req) {
            Ok(response) => {
                self.lock_id = Some(id);
                Ok((response.following_term_id, response.last_log_tick))
            }
            Err(e) => {
                // Ambiguous: the POST may have landed despite the error.
                // Issue a compensating release and bail.
                let _ = self.deps.leader_client.release_read_lock(&self.the_leader, &self.database, id);
                Err(e)
            }
        }
    }

    /// Stage 5: adopt the following term.
    fn stage5_adopt_term(&mut self, following_term_id: u64) -> maintenance_types::Result<()> {
        let epoch = format!("{}_{}", self.the_leader, following_term_id);
        self.deps.storage.set_follower_state(&self.database, &self.shard, Some(epoch))
    }

    /// Stage 6: final catch-up under the exclusive lock.
    fn stage6_final_tailing(&mut self, tick: u64, upper_bound: u64) -> u64 {
        let opts = TailOptions { shard: self.shard.clone(), from_tick: tick, soft_timeout: TAILING_ROUND_TIMEOUT };
        match self.deps.leader_client.tail_wal(&self.the_leader, &self.database, opts) {
            Ok(result) => result.reached_tick.max(upper_bound),
            Err(_) => tick.max(upper_bound),
        }
    }

    /// Stage 7: follower registration. Handles WRONG_CHECKSUM inline.
    fn stage7_register(&mut self) -> maintenance_types::Result<()> {
        let checksum = self.deps.storage.document_count(&self.database, &self.shard)?;
        let req = AddFollowerRequest {
            follower_id: self.server_id.clone(),
            shard: self.shard.clone(),
            checksum,
            server_id: self.server_id.clone(),
            syncer_id: None,
            client_info: Some("maintenance-engine".to_string()),
            read_lock_id: self.lock_id,
        };
        let response = self.deps.leader_client.add_follower(&self.the_leader, &self.database, req);
        match response {
            Ok(r) if r.wrong_checksum => {
                // Release the exclusive lock immediately to unblock writes,
                // then attempt a local recount before giving up this attempt.
                if let Some(id) = self.lock_id.take() {
                    let _ = self.deps.leader_client.release_read_lock(&self.the_leader, &self.database, id);
                }
                let recomputed = self.deps.storage.recalculate_counts(&self.database, &self.shard)?;
                if recomputed == checksum {
                    let _ = self.deps.leader_client.rebuild_revision_tree(&self.the_leader, &self.database, &self.shard);
                }
                Err(MaintenanceError::WrongChecksum { shard: self.shard.clone() })
            }
            Ok(_) => {
                self.rollback_armed = false;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stage 8: finalization. Always runs, whatever the outcome of 0-7.
    fn stage8_finalize(&mut self, result: &maintenance_types::Result<()>) {
        if let Some(id) = self.lock_id.take() {
            let _ = self.deps.leader_client.release_read_lock(&self.the_leader, &self.database, id);
        }
        if self.requeue_priority.is_some() {
            // A size-gate reschedule is not itself a failed attempt: no
            // rollback, no replication-failure bookkeeping.
            return;
        }
        match result {
            Ok(()) => {
                self.deps.feature.errors.remove_replication_errors(&self.database, &self.shard);
            }
            Err(e) if e.counts_as_replication_failure() => {
                self.deps.feature.errors.store_replication_error(&self.database, &self.shard);
            }
            Err(_) => {}
        }
        if result.is_err() && self.rollback_armed {
            let _ = self.deps.storage.set_follower_state(&self.database, &self.shard, Some(String::new()));
        }
        if result.is_ok() {
            // Give the agreement-store write this attempt is about to trigger
            // (via `phaseTwo`'s next cycle) a bounded chance to land before
            // the worker unlocks the shard, per §4.9 Stage 8.
            let observed = self.deps.store.current_version();
            let started = Instant::now();
            while self.deps.store.current_version() <= observed {
                if started.elapsed() > MAX_ATTEMPT_WAIT || self.shutting_down() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    fn run(&mut self) -> maintenance_types::Result<()> {
        if self.shutting_down() {
            return Err(MaintenanceError::ShuttingDown);
        }
        if self.stage0_gate()? {
            return Ok(());
        }
        self.stage1_size_gate_and_backoff()?;

        let deadline = if self.sync_by_revision { Some(Instant::now() + MAX_ATTEMPT_WAIT) } else { None };
        let tick = self.stage2_initial_dump(deadline)?;
        let tick = self.stage3_lock_free_tailing(tick, deadline);

        let lock_timeout = Duration::from_secs(30);
        let (following_term_id, upper_bound) = self.stage4_exclusive_lock(lock_timeout)?;
        self.stage5_adopt_term(following_term_id)?;
        let _ = self.stage6_final_tailing(tick, upper_bound);
        self.stage7_register()
    }
}

impl ActionImpl for SynchronizeShard {
    fn first(&mut self) -> Outcome {
        let result = self.run();
        self.stage8_finalize(&result);

        if let Some(priority) = self.requeue_priority.take() {
            return Outcome::requeue_at(priority);
        }
        match result {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed(e),
        }
    }
}
