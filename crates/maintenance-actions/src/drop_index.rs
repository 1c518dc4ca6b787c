use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

pub struct DropIndex {
    deps: Deps,
    database: String,
    collection: String,
    shard: String,
    index: String,
}

impl DropIndex {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(DropIndex {
            deps,
            database: support::database(description)?,
            collection: support::collection(description)?,
            shard: support::shard(description)?,
            index: support::index_id(description)?,
        })
    }
}

impl ActionImpl for DropIndex {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.drop_index(&self.database, &self.collection, &self.shard, &self.index) {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed(e),
        }
    }
}
