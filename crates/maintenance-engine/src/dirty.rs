use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use rand::seq::SliceRandom;

/// Tracks databases known to need reconciliation, plus a shuffled
/// "all databases" queue so that `pick_random_dirty` eventually revisits
/// every database even if nothing else marks it dirty, bounding the
/// interval between forced reconciles.
#[derive(Default)]
pub struct DirtyDatabases {
    dirty: Mutex<HashSet<String>>,
    revisit_queue: Mutex<VecDeque<String>>,
}

impl DirtyDatabases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dirty(&self, database: impl Into<String>) {
        self.dirty.lock().insert(database.into());
    }

    pub fn add_dirty_many(&self, databases: impl IntoIterator<Item = String>) {
        let mut dirty = self.dirty.lock();
        dirty.extend(databases);
    }

    /// Drains and returns the full dirty set.
    pub fn dirty(&self) -> HashSet<String> {
        std::mem::take(&mut *self.dirty.lock())
    }

    /// Refills the revisit queue from `all_databases` (shuffled) whenever it
    /// runs dry, then pops up to `n` names from the front.
    pub fn pick_random_dirty(&self, n: usize, all_databases: &[String]) -> Vec<String> {
        let mut queue = self.revisit_queue.lock();
        if queue.is_empty() && !all_databases.is_empty() {
            let mut shuffled: Vec<String> = all_databases.to_vec();
            shuffled.shuffle(&mut rand::thread_rng());
            queue.extend(shuffled);
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match queue.pop_front() {
                Some(name) => out.push(name),
                None => break,
            }
        }
        out
    }
}
