use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

pub struct CreateDatabase {
    deps: Deps,
    database: String,
}

impl CreateDatabase {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(CreateDatabase { deps, database: support::database(description)? })
    }
}

impl ActionImpl for CreateDatabase {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.create_database(&self.database) {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed(e),
        }
    }
}
