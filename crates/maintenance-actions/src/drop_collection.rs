use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

pub struct DropCollection {
    deps: Deps,
    database: String,
    collection: String,
    shard: String,
}

impl DropCollection {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(DropCollection {
            deps,
            database: support::database(description)?,
            collection: support::collection(description)?,
            shard: support::shard(description)?,
        })
    }
}

impl ActionImpl for DropCollection {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.drop_collection(&self.database, &self.collection, &self.shard) {
            Ok(()) => {
                self.deps.feature.errors.remove_shard_error(&self.database, &self.collection, &self.shard);
                self.deps.feature.errors.remove_index_errors(&self.database, &self.collection, &self.shard);
                self.deps.feature.errors.remove_replication_errors(&self.database, &self.shard);
                self.deps.feature.shard_versions.delete(&self.shard);
                Outcome::done()
            }
            Err(e) => Outcome::failed(e),
        }
    }
}
