//! Shared collaborator handles every concrete action is constructed with.
//! One `Deps` is built once per process (in `maintenance-node`) and cloned
//! (cheaply: everything inside is an `Arc`) into each action by the
//! `ActionFactory`.

use std::sync::Arc;

use maintenance_engine::{AgreementStore, Feature};

use crate::leader_client::LeaderClient;
use crate::storage::StorageEngine;

#[derive(Clone)]
pub struct Deps {
    pub feature: Arc<Feature>,
    pub store: Arc<dyn AgreementStore>,
    pub storage: Arc<dyn StorageEngine>,
    pub leader_client: Arc<dyn LeaderClient>,
    pub server_id: String,
    pub reboot_id: u64,
}
