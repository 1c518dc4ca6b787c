use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

pub struct EnsureIndex {
    deps: Deps,
    database: String,
    collection: String,
    shard: String,
    index: String,
}

impl EnsureIndex {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(EnsureIndex {
            deps,
            database: support::database(description)?,
            collection: support::collection(description)?,
            shard: support::shard(description)?,
            index: support::index_id(description)?,
        })
    }
}

impl ActionImpl for EnsureIndex {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.ensure_index(&self.database, &self.collection, &self.shard, &self.index) {
            Ok(()) => Outcome::done(),
            Err(e) => {
                let _ = self.deps.feature.errors.store_index_error(&self.database, &self.collection, &self.shard, &self.index, &e);
                Outcome::failed(e)
            }
        }
    }
}
