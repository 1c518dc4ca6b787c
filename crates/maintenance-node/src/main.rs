//! The maintenance engine wired up as a standalone process: an admin REST
//! surface over the action registry, a background sync driver, and
//! graceful shutdown. Structured the way `agent/src/main.rs` wires up its
//! API server and job-execution loop side by side under one Tokio runtime.
//!
//! The agreement store and local storage engine are explicitly out of
//! scope for this crate (they belong to the rest of the DB server this
//! engine would be embedded in); this binary wires the in-memory fakes in
//! their place so the process is runnable end to end on its own. A real
//! deployment replaces `build_deps` with implementations backed by that
//! DB server's actual agreement store and storage engine.

mod api;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use maintenance_actions::{fake::FakeStorageEngine, DeferredActionFactory, Deps};
use maintenance_engine::fake::FakeAgreementStore;
use maintenance_engine::{Feature, FeatureConfig, SyncDriver};
use maintenance_types::{priority, ActionDescription};

/// Maintenance engine node: action registry, worker pool, and sync driver
/// behind an admin REST API.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Number of maintenance worker threads. Clamped to [3, 64] regardless
    /// of what is passed here.
    #[clap(long = "maintenance-threads", env = "MAINTENANCE_THREADS", default_value_t = maintenance_engine::default_thread_count(num_cores()))]
    maintenance_threads: u32,
    /// Seconds a finished action blocks duplicate resubmission.
    #[clap(long = "maintenance-actions-block", env = "MAINTENANCE_ACTIONS_BLOCK", default_value = "2")]
    maintenance_actions_block: i64,
    /// Seconds a finished action lingers in the registry before GC.
    #[clap(long = "maintenance-actions-linger", env = "MAINTENANCE_ACTIONS_LINGER", default_value = "3600")]
    maintenance_actions_linger: i64,
    /// Resign leadership of any locally-led shard before shutting down.
    #[clap(long = "resign-leadership-on-shutdown", env = "RESIGN_LEADERSHIP_ON_SHUTDOWN")]
    resign_leadership_on_shutdown: bool,
    /// Interval between sync driver iterations.
    #[clap(long = "sync-interval-ms", env = "SYNC_INTERVAL_MS", default_value = "5000")]
    sync_interval_ms: u64,
    /// This server's id, as it appears in the agreement store's plans.
    #[clap(long = "server-id", env = "SERVER_ID", default_value = "PRMR-1")]
    server_id: String,
    /// The port to listen on for the admin REST API.
    #[clap(long, default_value = "8080", env = "API_PORT")]
    api_port: u16,
}

fn num_cores() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(4)
}

fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(async_main(args));
    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

fn build_feature(args: &Args) -> (Arc<Feature>, Arc<FakeAgreementStore>, Arc<FakeStorageEngine>) {
    let factory = DeferredActionFactory::new();
    let config = FeatureConfig {
        threads: args.maintenance_threads,
        seconds_actions_block: args.maintenance_actions_block,
        seconds_actions_linger: args.maintenance_actions_linger,
    };
    let feature = Feature::new(config, factory.clone());
    let store = Arc::new(FakeAgreementStore::default());
    let storage = Arc::new(FakeStorageEngine::default());
    let leader_client = Arc::new(maintenance_actions::fake::FakeLeaderClient::default());
    factory.set(Deps {
        feature: feature.clone(),
        store: store.clone(),
        storage: storage.clone(),
        leader_client,
        server_id: args.server_id.clone(),
        reboot_id: 1,
    });
    (feature, store, storage)
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.api_port)).await?;
    let (feature, store, storage) = build_feature(&args);
    feature.start();

    let driver = SyncDriver::new(feature.clone(), store.clone(), storage.clone(), args.server_id.clone());
    let driver_shutdown = Arc::new(AtomicBool::new(false));
    let driver_interval = Duration::from_millis(args.sync_interval_ms);
    let driver_handle = {
        let shutdown = driver_shutdown.clone();
        std::thread::Builder::new()
            .name("maintenance-sync-driver".to_string())
            .spawn(move || driver.run(driver_interval, &shutdown, None))
            .expect("failed to spawn sync driver thread")
    };

    let router = api::router(feature.clone());
    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    tracing::info!(port = args.api_port, "admin API listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await?;

    tracing::info!("shutting down");
    if args.resign_leadership_on_shutdown {
        resign_local_leadership(&feature, &store, &args.server_id);
    }
    feature.stop();
    driver_shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = driver_handle.join();
    Ok(())
}

/// Enqueues `ResignShardLeadership` for every shard this server currently
/// leads, inline (so the process does not exit while they are still
/// queued). Best-effort: a failed resignation is logged, not fatal to
/// shutdown.
fn resign_local_leadership(feature: &Arc<Feature>, store: &Arc<FakeAgreementStore>, server_id: &str) {
    use maintenance_engine::AgreementStore;
    let databases = store.all_databases();
    let (current, _) = match store.read_current(&databases) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "could not read current state before resigning leadership");
            return;
        }
    };
    for (db_name, db) in &current {
        for (coll_name, coll) in &db.collections {
            for (shard_name, shard) in &coll.shards {
                if shard.servers.first().map(String::as_str) == Some(server_id) {
                    let desc = ActionDescription::new(maintenance_types::kinds::RESIGN_SHARD_LEADERSHIP, priority::RESIGN)
                        .with(maintenance_types::keys::DATABASE, db_name.as_str())
                        .with(maintenance_types::keys::COLLECTION, coll_name.as_str())
                        .with(maintenance_types::keys::SHARD, shard_name.as_str());
                    if let Err(e) = feature.add_action(desc, true) {
                        tracing::warn!(error = %e, shard = %shard_name, "failed to resign shard leadership on shutdown");
                    }
                }
            }
        }
    }
}
