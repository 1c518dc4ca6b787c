//! Outbound RPCs to a shard's leader (§6). One shard-synchronize attempt
//! issues, in order: a read-lock id (GET then POST), a follower
//! registration (PUT), and optionally a revision-tree rebuild (POST); the
//! lock is always released (DELETE) on the way out, successful or not.

use maintenance_types::{MaintenanceError, Result};
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HoldReadLockRequest {
    pub id: u64,
    pub collection: String,
    pub ttl_secs: f64,
    pub server_id: String,
    pub reboot_id: u64,
    pub do_soft_lock_only: bool,
    pub want_following_term: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct HoldReadLockResponse {
    pub following_term_id: u64,
    pub last_log_tick: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AddFollowerRequest {
    pub follower_id: String,
    pub shard: String,
    pub checksum: u64,
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syncer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_lock_id: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AddFollowerResponse {
    pub wrong_checksum: bool,
}

#[derive(Debug, Clone)]
pub struct InitialSyncOptions {
    pub incremental: bool,
    pub shard: String,
    pub include_system_collections: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InitialSyncResult {
    pub last_log_tick: u64,
}

#[derive(Debug, Clone)]
pub struct TailOptions {
    pub shard: String,
    pub from_tick: u64,
    pub soft_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TailResult {
    pub reached_tick: u64,
    pub timed_out: bool,
}

/// Everything `SynchronizeShard` needs from the leader it is catching up
/// with. Implemented over `reqwest::blocking` in `HttpLeaderClient`; faked
/// in-memory in tests.
pub trait LeaderClient: Send + Sync {
    fn document_count(&self, leader: &str, database: &str, shard: &str) -> Result<u64>;

    fn acquire_read_lock_id(&self, leader: &str, database: &str) -> Result<u64>;
    fn hold_read_lock(&self, leader: &str, database: &str, req: HoldReadLockRequest) -> Result<HoldReadLockResponse>;
    fn release_read_lock(&self, leader: &str, database: &str, id: u64) -> Result<()>;

    fn add_follower(&self, leader: &str, database: &str, req: AddFollowerRequest) -> Result<AddFollowerResponse>;
    fn rebuild_revision_tree(&self, leader: &str, database: &str, shard: &str) -> Result<()>;

    fn replication_synchronize(&self, leader: &str, database: &str, opts: InitialSyncOptions) -> Result<InitialSyncResult>;
    fn tail_wal(&self, leader: &str, database: &str, opts: TailOptions) -> Result<TailResult>;
}

/// Resolves a server id to a base URL. `maintenance-node` backs this with
/// whatever service discovery the cluster already uses; out of scope here,
/// mirrored by the `AgreementStore`/`LocalStorageEngine` seams.
pub trait ServerResolver: Send + Sync {
    fn base_url(&self, server_id: &str) -> Result<String>;
}

pub struct HttpLeaderClient {
    client: reqwest::blocking::Client,
    resolver: Box<dyn ServerResolver>,
}

impl HttpLeaderClient {
    pub fn new(resolver: Box<dyn ServerResolver>, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client with a finite timeout always builds");
        HttpLeaderClient { client, resolver }
    }

    fn url(&self, leader: &str, path: &str) -> Result<String> {
        let base = self.resolver.base_url(leader)?;
        Ok(format!("{}{}", base.trim_end_matches('/'), path))
    }

    fn transient(err: impl std::fmt::Display) -> MaintenanceError {
        MaintenanceError::Transient(anyhow::anyhow!(err.to_string()))
    }
}

impl LeaderClient for HttpLeaderClient {
    fn document_count(&self, leader: &str, _database: &str, shard: &str) -> Result<u64> {
        let url = self.url(leader, &format!("/_api/collection/{shard}/count"))?;
        let resp: serde_json::Value = self.client.get(&url).send().map_err(Self::transient)?.json().map_err(Self::transient)?;
        resp.get("count")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| MaintenanceError::Internal(anyhow::anyhow!("malformed count response")))
    }

    fn acquire_read_lock_id(&self, leader: &str, database: &str) -> Result<u64> {
        let url = self.url(leader, &format!("/replication/holdReadLockCollection?db={database}"))?;
        let resp: serde_json::Value = self.client.get(&url).send().map_err(Self::transient)?.json().map_err(Self::transient)?;
        resp.get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MaintenanceError::Internal(anyhow::anyhow!("malformed lock-id response")))
    }

    fn hold_read_lock(&self, leader: &str, database: &str, req: HoldReadLockRequest) -> Result<HoldReadLockResponse> {
        let url = self.url(leader, "/replication/holdReadLockCollection")?;
        let body = serde_json::json!({
            "id": req.id.to_string(),
            "collection": req.collection,
            "ttl": req.ttl_secs,
            "serverId": req.server_id,
            "rebootId": req.reboot_id,
            "doSoftLockOnly": req.do_soft_lock_only,
            "wantFollowingTerm": req.want_following_term,
            "database": database,
        });
        let response = self.client.post(&url).json(&body).send().map_err(Self::transient)?;
        if !response.status().is_success() {
            return Err(Self::transient(format!("holdReadLockCollection: HTTP {}", response.status())));
        }
        response.json().map_err(Self::transient)
    }

    fn release_read_lock(&self, leader: &str, database: &str, id: u64) -> Result<()> {
        let url = self.url(leader, "/replication/holdReadLockCollection")?;
        let body = serde_json::json!({ "id": id.to_string(), "database": database });
        let response = self.client.delete(&url).json(&body).send().map_err(Self::transient)?;
        // 404 / database-not-found is treated as a successful release (§6).
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::transient(format!("releasing read lock: HTTP {}", response.status())))
        }
    }

    fn add_follower(&self, leader: &str, database: &str, req: AddFollowerRequest) -> Result<AddFollowerResponse> {
        let url = self.url(leader, "/replication/addFollower")?;
        let mut body = serde_json::to_value(&req).map_err(|e| MaintenanceError::Internal(anyhow::anyhow!(e)))?;
        body["database"] = serde_json::Value::String(database.to_string());
        let response = self.client.put(&url).json(&body).send().map_err(Self::transient)?;
        if response.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Ok(AddFollowerResponse { wrong_checksum: true });
        }
        if !response.status().is_success() {
            return Err(Self::transient(format!("addFollower: HTTP {}", response.status())));
        }
        Ok(AddFollowerResponse { wrong_checksum: false })
    }

    fn rebuild_revision_tree(&self, leader: &str, database: &str, shard: &str) -> Result<()> {
        let url = self.url(leader, &format!("/_api/replication/revisions/tree?collection={shard}&database={database}"))?;
        let response = self.client.post(&url).send().map_err(Self::transient)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::transient(format!("rebuild revision tree: HTTP {}", response.status())))
        }
    }

    fn replication_synchronize(&self, leader: &str, database: &str, opts: InitialSyncOptions) -> Result<InitialSyncResult> {
        let url = self.url(leader, "/_api/replication/synchronize")?;
        let body = serde_json::json!({
            "database": database,
            "incremental": opts.incremental,
            "restrictCollections": [opts.shard],
            "includeSystem": opts.include_system_collections,
        });
        let resp: serde_json::Value = self.client.post(&url).json(&body).send().map_err(Self::transient)?.json().map_err(Self::transient)?;
        Ok(InitialSyncResult { last_log_tick: resp.get("lastLogTick").and_then(|v| v.as_u64()).unwrap_or(0) })
    }

    fn tail_wal(&self, leader: &str, database: &str, opts: TailOptions) -> Result<TailResult> {
        let url = self.url(leader, &format!("/_api/wal/tail?from={}", opts.from_tick))?;
        let body = serde_json::json!({ "database": database, "collection": opts.shard });
        let resp = self
            .client
            .get(&url)
            .timeout(opts.soft_timeout)
            .json(&body)
            .send();
        match resp {
            Ok(resp) => {
                let value: serde_json::Value = resp.json().map_err(Self::transient)?;
                Ok(TailResult { reached_tick: value.get("tick").and_then(|v| v.as_u64()).unwrap_or(opts.from_tick), timed_out: false })
            }
            Err(e) if e.is_timeout() => Ok(TailResult { reached_tick: opts.from_tick, timed_out: true }),
            Err(e) => Err(Self::transient(e)),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// A scripted leader, for `SynchronizeShard` tests: each server id maps
    /// to either "reachable with these counts" or "unreachable" (`None`).
    #[derive(Default)]
    pub struct FakeLeaderClient {
        pub reachable: Mutex<BTreeMap<String, bool>>,
        pub counts: Mutex<BTreeMap<String, u64>>,
        pub next_lock_id: std::sync::atomic::AtomicU64,
        pub granted_term: Mutex<BTreeMap<String, u64>>,
        pub wrong_checksum_once: Mutex<bool>,
    }

    impl FakeLeaderClient {
        pub fn set_reachable(&self, server: &str, reachable: bool) {
            self.reachable.lock().insert(server.to_string(), reachable);
        }

        pub fn set_count(&self, shard: &str, count: u64) {
            self.counts.lock().insert(shard.to_string(), count);
        }

        fn check_reachable(&self, leader: &str) -> Result<()> {
            if self.reachable.lock().get(leader).copied().unwrap_or(true) {
                Ok(())
            } else {
                Err(MaintenanceError::Transient(anyhow::anyhow!("leader {leader} unreachable")))
            }
        }
    }

    impl LeaderClient for FakeLeaderClient {
        fn document_count(&self, leader: &str, _database: &str, shard: &str) -> Result<u64> {
            self.check_reachable(leader)?;
            Ok(*self.counts.lock().get(shard).unwrap_or(&0))
        }

        fn acquire_read_lock_id(&self, leader: &str, _database: &str) -> Result<u64> {
            self.check_reachable(leader)?;
            Ok(self.next_lock_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
        }

        fn hold_read_lock(&self, leader: &str, _database: &str, req: HoldReadLockRequest) -> Result<HoldReadLockResponse> {
            self.check_reachable(leader)?;
            let term = rand::random::<u32>() as u64 + 1;
            self.granted_term.lock().insert(req.collection, term);
            Ok(HoldReadLockResponse { following_term_id: term, last_log_tick: 0 })
        }

        fn release_read_lock(&self, leader: &str, _database: &str, _id: u64) -> Result<()> {
            self.check_reachable(leader)?;
            Ok(())
        }

        fn add_follower(&self, leader: &str, _database: &str, _req: AddFollowerRequest) -> Result<AddFollowerResponse> {
            self.check_reachable(leader)?;
            let mut once = self.wrong_checksum_once.lock();
            if *once {
                *once = false;
                return Ok(AddFollowerResponse { wrong_checksum: true });
            }
            Ok(AddFollowerResponse { wrong_checksum: false })
        }

        fn rebuild_revision_tree(&self, leader: &str, _database: &str, _shard: &str) -> Result<()> {
            self.check_reachable(leader)
        }

        fn replication_synchronize(&self, leader: &str, _database: &str, _opts: InitialSyncOptions) -> Result<InitialSyncResult> {
            self.check_reachable(leader)?;
            Ok(InitialSyncResult { last_log_tick: 1 })
        }

        fn tail_wal(&self, leader: &str, _database: &str, opts: TailOptions) -> Result<TailResult> {
            self.check_reachable(leader)?;
            Ok(TailResult { reached_tick: opts.from_tick + 1, timed_out: false })
        }
    }
}
