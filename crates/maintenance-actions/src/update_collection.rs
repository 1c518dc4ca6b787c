use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

pub struct UpdateCollection {
    deps: Deps,
    database: String,
    collection: String,
    shard: String,
    properties: serde_json::Value,
}

impl UpdateCollection {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(UpdateCollection {
            deps,
            database: support::database(description)?,
            collection: support::collection(description)?,
            shard: support::shard(description)?,
            properties: support::properties(description),
        })
    }
}

impl ActionImpl for UpdateCollection {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.update_collection(&self.database, &self.collection, &self.shard, &self.properties) {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed(e),
        }
    }
}
