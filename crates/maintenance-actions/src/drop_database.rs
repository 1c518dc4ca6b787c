use maintenance_engine::{ActionImpl, Outcome};

use crate::deps::Deps;
use crate::support;

pub struct DropDatabase {
    deps: Deps,
    database: String,
}

impl DropDatabase {
    pub fn new(deps: Deps, description: &maintenance_types::ActionDescription) -> maintenance_types::Result<Self> {
        Ok(DropDatabase { deps, database: support::database(description)? })
    }
}

impl ActionImpl for DropDatabase {
    fn first(&mut self) -> Outcome {
        match self.deps.storage.drop_database(&self.database) {
            Ok(()) => {
                self.deps.feature.errors.remove_db_error(&self.database);
                Outcome::done()
            }
            Err(e) => Outcome::failed(e),
        }
    }
}
