use maintenance_engine::{ActionImpl, Outcome};
use maintenance_types::keys;

use crate::deps::Deps;
use crate::support;

/// Creates a local collection/shard. The initial local leader belief is
/// seeded from `theLeader` (set by `phaseOne`, §4.5 step 2): `None` if the
/// plan wants us to lead, or the "not yet known" sentinel (empty string) if
/// we are a follower, so the next reconcile notices the mismatch against
/// the planned leader and schedules `SynchronizeShard`.
pub struct CreateCollection {
    deps: Deps,
    database: String,
    collection: String,
    shard: String,
    planned_leader: Option<String>,
    properties: serde_json::Value,
}

impl CreateCollection {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        let planned_leader = description.get(keys::THE_LEADER).map(str::to_string);
        Ok(CreateCollection {
            deps,
            database: support::database(description)?,
            collection: support::collection(description)?,
            shard: support::shard(description)?,
            planned_leader,
            properties: support::properties(description),
        })
    }
}

impl ActionImpl for CreateCollection {
    fn first(&mut self) -> Outcome {
        if let Err(e) = self.deps.storage.create_collection(&self.database, &self.collection, &self.shard, &self.properties) {
            return Outcome::failed(e);
        }
        let we_lead = self.planned_leader.as_deref() == Some(self.deps.server_id.as_str()) || self.planned_leader.as_deref() == Some("");
        let leader = if we_lead { None } else { Some(String::new()) };
        match self.deps.storage.set_follower_state(&self.database, &self.shard, leader) {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed(e),
        }
    }
}
