use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

/// Hands off local leadership of a shard ahead of the plan's new leader
/// taking over. Sets the local follower state to the "not yet known"
/// sentinel so the next reconcile sees a leader mismatch and schedules
/// `SynchronizeShard` against whoever the plan now names.
pub struct ResignShardLeadership {
    deps: Deps,
    database: String,
    shard: String,
}

impl ResignShardLeadership {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(ResignShardLeadership { deps, database: support::database(description)?, shard: support::shard(description)? })
    }
}

impl ActionImpl for ResignShardLeadership {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.set_follower_state(&self.database, &self.shard, Some(String::new())) {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed(e),
        }
    }
}
