//! Dispatches an `ActionDescription`'s `name()` to the concrete `ActionImpl`
//! it names (§2's component table). The one piece of engine-facing plumbing
//! every concrete action needs (`Deps`) is captured once, at construction,
//! and cloned into each action built from here.

use std::sync::{Arc, OnceLock};

use maintenance_engine::{ActionFactory, ActionImpl};
use maintenance_types::{kinds, ActionDescription};

use crate::create_collection::CreateCollection;
use crate::create_database::CreateDatabase;
use crate::deps::Deps;
use crate::drop_collection::DropCollection;
use crate::drop_database::DropDatabase;
use crate::drop_index::DropIndex;
use crate::ensure_index::EnsureIndex;
use crate::resign_shard_leadership::ResignShardLeadership;
use crate::synchronize_shard::SynchronizeShard;
use crate::update_collection::UpdateCollection;

pub struct DefaultActionFactory {
    deps: Deps,
}

impl DefaultActionFactory {
    pub fn new(deps: Deps) -> Arc<Self> {
        Arc::new(DefaultActionFactory { deps })
    }
}

impl ActionFactory for DefaultActionFactory {
    fn create(&self, description: &ActionDescription) -> maintenance_types::Result<Box<dyn ActionImpl>> {
        let deps = self.deps.clone();
        match description.name() {
            kinds::CREATE_DATABASE => Ok(Box::new(CreateDatabase::new(deps, description)?)),
            kinds::DROP_DATABASE => Ok(Box::new(DropDatabase::new(deps, description)?)),
            kinds::CREATE_COLLECTION => Ok(Box::new(CreateCollection::new(deps, description)?)),
            kinds::UPDATE_COLLECTION => Ok(Box::new(UpdateCollection::new(deps, description)?)),
            kinds::DROP_COLLECTION => Ok(Box::new(DropCollection::new(deps, description)?)),
            kinds::ENSURE_INDEX => Ok(Box::new(EnsureIndex::new(deps, description)?)),
            kinds::DROP_INDEX => Ok(Box::new(DropIndex::new(deps, description)?)),
            kinds::RESIGN_SHARD_LEADERSHIP => Ok(Box::new(ResignShardLeadership::new(deps, description)?)),
            kinds::SYNCHRONIZE_SHARD => Ok(Box::new(SynchronizeShard::new(deps, description)?)),
            #[cfg(any(test, feature = "test-util"))]
            kinds::TEST => Ok(Box::new(crate::test_action::Test::new(description)?)),
            other => Err(maintenance_types::MaintenanceError::BadParameter(format!("unknown action kind `{other}`"))),
        }
    }
}

/// Breaks the `Feature` <-> `Deps` construction cycle: `Deps` holds an
/// `Arc<Feature>`, but `Feature::new` takes the factory *before* it can hand
/// out that `Arc`. Wire it up with a placeholder, get the `Arc<Feature>`
/// back, then call `set` once with the real `Deps` before starting workers.
#[derive(Default)]
pub struct DeferredActionFactory(OnceLock<Arc<DefaultActionFactory>>);

impl DeferredActionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(DeferredActionFactory(OnceLock::new()))
    }

    /// Panics if called more than once; `Feature::start` must not run before
    /// this is set.
    pub fn set(&self, deps: Deps) {
        self.0.set(DefaultActionFactory::new(deps)).map_err(|_| ()).expect("DeferredActionFactory::set called twice");
    }
}

impl ActionFactory for DeferredActionFactory {
    fn create(&self, description: &ActionDescription) -> maintenance_types::Result<Box<dyn ActionImpl>> {
        let factory = self.0.get().expect("DeferredActionFactory::set must run before the first action is created");
        factory.create(description)
    }
}
