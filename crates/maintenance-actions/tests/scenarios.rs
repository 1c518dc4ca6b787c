//! Integration tests for the literal catalogue scenarios: a scriptable
//! `Test` action exercising the registry/queue/worker-pool state machine end
//! to end, plus one `SynchronizeShard` abort-on-shutdown scenario.

use std::sync::Arc;
use std::time::{Duration, Instant};

use maintenance_actions::fake::{FakeLeaderClient, FakeStorageEngine};
use maintenance_actions::{DeferredActionFactory, Deps};
use maintenance_engine::fake::FakeAgreementStore;
use maintenance_engine::{Feature, FeatureConfig};
use maintenance_types::{kinds, keys, priority, ActionDescription, ActionState};

fn harness(threads: u32) -> (Arc<Feature>, Arc<FakeLeaderClient>) {
    let factory = DeferredActionFactory::new();
    let feature = Feature::new(FeatureConfig { threads, seconds_actions_block: 0, seconds_actions_linger: 3600 }, factory.clone());
    let store = Arc::new(FakeAgreementStore::default());
    let storage = Arc::new(FakeStorageEngine::default());
    let leader_client = Arc::new(FakeLeaderClient::default());
    factory.set(Deps {
        feature: feature.clone(),
        store,
        storage,
        leader_client: leader_client.clone(),
        server_id: "PRMR-1".to_string(),
        reboot_id: 1,
    });
    (feature, leader_client)
}

fn await_done(feature: &Feature, id: u64, timeout: Duration) {
    let started = Instant::now();
    loop {
        let action = feature.registry.get(id).expect("action still registered");
        if action.state().is_done() {
            return;
        }
        if started.elapsed() > timeout {
            panic!("action {id} did not finish within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn s1_zero_iteration_success_runs_inline() {
    let (feature, _leader) = harness(3);
    let desc = ActionDescription::new(kinds::TEST, priority::NORMAL).with("iterate_count", "0");
    let action = feature.add_action(desc, true).expect("addAction");

    assert_eq!(action.id(), 1);
    assert_eq!(action.state(), ActionState::Complete);
    assert_eq!(action.progress(), 0);
    assert!(action.result().is_ok());

    let json = action.to_json();
    let created = json["created"].as_i64().unwrap();
    let started = json["started"].as_i64().unwrap();
    let done = json["done"].as_i64().unwrap();
    assert!(created <= started);
    assert!(started <= done);
    assert_eq!(json["lastStat"].as_i64().unwrap(), 0);
}

#[test]
fn s2_hundred_iteration_success() {
    let (feature, _leader) = harness(3);
    let desc = ActionDescription::new(kinds::TEST, priority::NORMAL).with("iterate_count", "100");
    let action = feature.add_action(desc, true).expect("addAction");

    assert_eq!(action.state(), ActionState::Complete);
    assert_eq!(action.progress(), 100);
    assert!(action.result().is_ok());
}

#[test]
fn s3_hundred_iteration_failure() {
    let (feature, _leader) = harness(3);
    let desc = ActionDescription::new(kinds::TEST, priority::NORMAL)
        .with("iterate_count", "100")
        .with("result_code", "1");
    let action = feature.add_action(desc, true).expect("addAction");

    assert_eq!(action.state(), ActionState::Failed);
    assert_eq!(action.progress(), 100);
    let err = action.result().unwrap_err();
    assert_eq!(err.error_num(), 1);
}

#[test]
fn s4_duplicate_rejected() {
    let (feature, _leader) = harness(3);
    let desc = ActionDescription::new(kinds::TEST, priority::NORMAL)
        .with("iterate_count", "100")
        .with("result_code", "1");
    feature.add_action(desc.clone(), false).expect("first addAction accepted");
    let err = feature.add_action(desc, false).expect_err("duplicate rejected");

    assert_eq!(err.to_string(), "addAction called while similar action already processing");
    assert_eq!(feature.duplicate_counter(), 1);
}

#[test]
fn s5_pre_action_chain_runs_before_parent() {
    let (feature, _leader) = harness(3);
    let desc = ActionDescription::new(kinds::TEST, priority::NORMAL)
        .with("iterate_count", "100")
        .with("preaction_result_code", "0");
    let parent = feature.add_action(desc, false).expect("addAction");
    feature.start();

    await_done(&feature, parent.id(), Duration::from_secs(5));

    assert_eq!(parent.state(), ActionState::Complete);
    assert_eq!(parent.progress(), 100);

    // The pre-action ran (and completed) as a separate, earlier-numbered
    // registry entry: both are done by the time the parent is.
    let snapshot = feature.registry.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|a| a.state() == ActionState::Complete));

    feature.stop();
}

#[test]
fn s6_fast_track_runs_under_saturation() {
    // `threads` is clamped to `MIN_THREAD_LIMIT` (3): one fast-track-only
    // worker, two general-purpose workers. Saturating both general workers
    // still leaves the fast-track worker free.
    let (feature, _leader) = harness(2);
    feature.start();

    for _ in 0..2 {
        let busy = ActionDescription::new(kinds::TEST, priority::NORMAL).with("sleep_ms", "300");
        feature.add_action(busy, false).expect("addAction busy");
    }
    std::thread::sleep(Duration::from_millis(50));

    let fast = ActionDescription::new(kinds::TEST, priority::NORMAL).with("iterate_count", "0").with_fast_track();
    let fast_action = feature.add_action(fast, false).expect("addAction fast-track");

    await_done(&feature, fast_action.id(), Duration::from_millis(250));
    assert_eq!(fast_action.state(), ActionState::Complete);

    feature.stop();
}

#[test]
fn s7_delete_while_queued_skips_post_action() {
    let (feature, _leader) = harness(3);
    let desc = ActionDescription::new(kinds::TEST, priority::NORMAL)
        .with("iterate_count", "100")
        .with("postaction_result_code", "0");
    let action = feature.add_action(desc, false).expect("addAction");

    feature.delete_action(action.id()).expect("deleteAction");
    feature.start();
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(action.state(), ActionState::Failed);
    assert_eq!(action.progress(), 0);
    assert_eq!(feature.registry.len(), 1, "the post-action must never have been created");

    feature.stop();
}

#[test]
fn s8_synchronize_shard_aborts_on_shutdown() {
    let (feature, leader_client) = harness(3);
    leader_client.set_reachable("PRMR-2", false);

    feature.begin_shutdown();
    let desc = ActionDescription::new(kinds::SYNCHRONIZE_SHARD, priority::SYNCHRONIZE)
        .with(keys::DATABASE, "d")
        .with(keys::COLLECTION, "c")
        .with(keys::SHARD, "s1")
        .with(keys::THE_LEADER, "PRMR-2")
        .with(keys::SERVER_ID, "PRMR-1");
    let action = feature.add_action(desc, true).expect("addAction executes inline even while shutting down");

    assert_eq!(action.state(), ActionState::Failed);
    assert!(action.result().is_err());

    let stopped = Instant::now();
    feature.stop();
    assert!(stopped.elapsed() < Duration::from_secs(5), "stop() must return promptly, not hang");
}
