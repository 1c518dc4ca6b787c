//! The local storage engine surface concrete actions mutate. `maintenance-engine`
//! only names the read-only half (`LocalStorageEngine`, for the driver's
//! `local` snapshot); this crate's actions additionally need to create/drop
//! databases, collections and indexes, and recompute a shard's document
//! count (`SynchronizeShard` Stage 7's WRONG_CHECKSUM handling). One
//! concrete implementation (`maintenance-node`) satisfies both traits.

use maintenance_engine::LocalStorageEngine;
use maintenance_types::Result;

pub trait StorageEngine: LocalStorageEngine {
    fn create_database(&self, database: &str) -> Result<()>;
    fn drop_database(&self, database: &str) -> Result<()>;

    fn create_collection(&self, database: &str, collection: &str, shard: &str, properties: &serde_json::Value) -> Result<()>;
    fn update_collection(&self, database: &str, collection: &str, shard: &str, properties: &serde_json::Value) -> Result<()>;
    fn drop_collection(&self, database: &str, collection: &str, shard: &str) -> Result<()>;

    fn ensure_index(&self, database: &str, collection: &str, shard: &str, index: &str) -> Result<()>;
    fn drop_index(&self, database: &str, collection: &str, shard: &str, index: &str) -> Result<()>;

    /// Recomputes and returns the authoritative local document count for a
    /// shard, used by Stage 7's WRONG_CHECKSUM recovery path.
    fn recalculate_counts(&self, database: &str, shard: &str) -> Result<u64>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use maintenance_engine::fake::FakeStorageEngine as EngineFake;
    use maintenance_engine::{DatabaseName, Local, LocalCollection, LocalDatabase, LocalShard, ShardId};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Wraps the engine's `FakeStorageEngine` (which already knows how to
    /// answer `local_collections`/`document_count`/`set_follower_state`) and
    /// adds the mutation methods concrete actions need.
    #[derive(Default)]
    pub struct FakeStorageEngine {
        inner: EngineFake,
    }

    impl FakeStorageEngine {
        pub fn local(&self) -> &Mutex<Local> {
            &self.inner.local
        }

        pub fn counts(&self) -> &Mutex<BTreeMap<(String, String), u64>> {
            &self.inner.counts
        }
    }

    impl LocalStorageEngine for FakeStorageEngine {
        fn local_collections(&self, databases: &[DatabaseName]) -> Result<Local> {
            self.inner.local_collections(databases)
        }

        fn document_count(&self, database: &DatabaseName, shard: &ShardId) -> Result<u64> {
            self.inner.document_count(database, shard)
        }

        fn set_follower_state(&self, database: &DatabaseName, shard: &ShardId, leader: Option<String>) -> Result<()> {
            self.inner.set_follower_state(database, shard, leader)
        }
    }

    impl StorageEngine for FakeStorageEngine {
        fn create_database(&self, database: &str) -> Result<()> {
            self.inner.local.lock().entry(database.to_string()).or_default();
            Ok(())
        }

        fn drop_database(&self, database: &str) -> Result<()> {
            self.inner.local.lock().remove(database);
            Ok(())
        }

        fn create_collection(&self, database: &str, collection: &str, shard: &str, properties: &serde_json::Value) -> Result<()> {
            let mut local = self.inner.local.lock();
            let db = local.entry(database.to_string()).or_insert_with(LocalDatabase::default);
            let coll = db.collections.entry(collection.to_string()).or_insert_with(LocalCollection::default);
            coll.properties = properties.clone();
            coll.shards.entry(shard.to_string()).or_insert_with(LocalShard::default);
            Ok(())
        }

        fn update_collection(&self, database: &str, collection: &str, _shard: &str, properties: &serde_json::Value) -> Result<()> {
            let mut local = self.inner.local.lock();
            if let Some(db) = local.get_mut(database) {
                if let Some(coll) = db.collections.get_mut(collection) {
                    coll.properties = properties.clone();
                }
            }
            Ok(())
        }

        fn drop_collection(&self, database: &str, collection: &str, shard: &str) -> Result<()> {
            let mut local = self.inner.local.lock();
            if let Some(db) = local.get_mut(database) {
                if let Some(coll) = db.collections.get_mut(collection) {
                    coll.shards.remove(shard);
                    if coll.shards.is_empty() {
                        db.collections.remove(collection);
                    }
                }
            }
            Ok(())
        }

        fn ensure_index(&self, database: &str, collection: &str, shard: &str, index: &str) -> Result<()> {
            let mut local = self.inner.local.lock();
            if let Some(db) = local.get_mut(database) {
                if let Some(coll) = db.collections.get_mut(collection) {
                    if let Some(s) = coll.shards.get_mut(shard) {
                        if !s.indexes.iter().any(|i| i == index) {
                            s.indexes.push(index.to_string());
                        }
                    }
                }
            }
            Ok(())
        }

        fn drop_index(&self, database: &str, collection: &str, shard: &str, index: &str) -> Result<()> {
            let mut local = self.inner.local.lock();
            if let Some(db) = local.get_mut(database) {
                if let Some(coll) = db.collections.get_mut(collection) {
                    if let Some(s) = coll.shards.get_mut(shard) {
                        s.indexes.retain(|i| i != index);
                    }
                }
            }
            Ok(())
        }

        fn recalculate_counts(&self, database: &str, shard: &str) -> Result<u64> {
            self.inner.document_count(&database.to_string(), &shard.to_string())
        }
    }
}
