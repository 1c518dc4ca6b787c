//! Concrete `ActionImpl`s for every action kind named in the maintenance
//! engine's component table, plus the collaborator seams (`StorageEngine`,
//! `LeaderClient`) and `Deps` bundle `maintenance-node` wires real
//! implementations into. `maintenance-engine` knows only the `ActionFactory`
//! trait; `DefaultActionFactory` here is the one production implementation
//! of it.

mod create_collection;
mod create_database;
mod deps;
mod drop_collection;
mod drop_database;
mod drop_index;
mod ensure_index;
mod factory;
mod leader_client;
mod resign_shard_leadership;
mod storage;
mod support;
mod synchronize_shard;
mod update_collection;

#[cfg(any(test, feature = "test-util"))]
mod test_action;

pub use create_collection::CreateCollection;
pub use create_database::CreateDatabase;
pub use deps::Deps;
pub use drop_collection::DropCollection;
pub use drop_database::DropDatabase;
pub use drop_index::DropIndex;
pub use ensure_index::EnsureIndex;
pub use factory::{DeferredActionFactory, DefaultActionFactory};
pub use leader_client::{
    AddFollowerRequest, AddFollowerResponse, HoldReadLockRequest, HoldReadLockResponse,
    HttpLeaderClient, InitialSyncOptions, InitialSyncResult, LeaderClient, ServerResolver,
    TailOptions, TailResult,
};
pub use resign_shard_leadership::ResignShardLeadership;
pub use storage::StorageEngine;
pub use synchronize_shard::SynchronizeShard;
pub use update_collection::UpdateCollection;

#[cfg(any(test, feature = "test-util"))]
pub use test_action::Test;

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    pub use crate::leader_client::fake::FakeLeaderClient;
    pub use crate::storage::fake::FakeStorageEngine;
}
