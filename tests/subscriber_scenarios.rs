//! End-to-end scenarios for the stream subscriber: active-bin changes
//! propagating into `ActiveBinChanged`/`HarvestNeeded` events, and duplicate
//! suppression of the same opportunity reaching the executor's queue.
//! Exercises the subscriber through its public API only, with a fake pool
//! byte layout built from the documented on-chain offsets.

use harvester::config::StreamConfig;
use harvester::core::types::Side;
use harvester::events::{DomainEvent, EventBus};
use harvester::executor::{Executor, HarvestJob};
use harvester::registry::{Position, Registry, MIN_INITIAL_AMOUNT_LAMPORTS};
use harvester::rpc::RpcClient;
use harvester::subscriber::Subscriber;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio::sync::RwLock;

const OFF_ACTIVE_BIN: usize = 0;
const OFF_BIN_STEP: usize = 4;
const POOL_MIN_LEN: usize = 138;

fn pool_update_buf(active_bin: i32, bin_step: u16) -> Vec<u8> {
    let mut buf = vec![0u8; POOL_MIN_LEN];
    buf[OFF_ACTIVE_BIN..OFF_ACTIVE_BIN + 4].copy_from_slice(&active_bin.to_le_bytes());
    buf[OFF_BIN_STEP..OFF_BIN_STEP + 2].copy_from_slice(&bin_step.to_le_bytes());
    buf
}

fn sample_position(pool: Pubkey, min_bin: i32, max_bin: i32) -> Position {
    Position {
        id: Pubkey::new_unique(),
        owner: Pubkey::new_unique(),
        pool,
        aux: Pubkey::new_unique(),
        side: Side::Sell,
        min_bin,
        max_bin,
        initial_amount: MIN_INITIAL_AMOUNT_LAMPORTS + 1,
        harvested_amount: 0,
        created_at: 0,
    }
}

// Scenario 2 (harvest triggered): a position spanning [95..104] sees the
// pool's active bin move from 99 to 100, and the subscriber reports the
// newly-safe bins below it.
#[tokio::test]
async fn active_bin_advance_emits_harvest_needed_for_newly_safe_bins() {
    let pool = Pubkey::new_unique();
    let registry = Arc::new(RwLock::new(Registry::new()));
    let events = EventBus::new();
    let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));
    let dir = tempfile::tempdir().unwrap();

    let sub = Subscriber::new(
        Pubkey::new_unique(),
        StreamConfig::default(),
        rpc,
        registry.clone(),
        dir.path().join("cache.json"),
        events.clone(),
    );

    registry.write().await.upsert_position(sample_position(pool, 95, 104));
    registry
        .write()
        .await
        .set_pool_info(pool, harvester::decoder::decode_pool_info(&pool_update_buf(99, 20)).unwrap());

    let mut rx = events.subscribe();
    sub.handle_account_update(pool, Some(pool_update_buf(100, 20))).await;

    let active_bin_changed = rx.recv().await.unwrap();
    assert_eq!(active_bin_changed.type_name(), "active_bin_changed");

    let harvest_needed = rx.recv().await.unwrap();
    match harvest_needed {
        DomainEvent::HarvestNeeded { safe_bins, .. } => {
            assert_eq!(safe_bins, vec![95, 96, 97, 98, 99]);
        }
        other => panic!("expected HarvestNeeded, got {:?}", other),
    }
}

// Scenario 1 tail: a pool update that doesn't move the active bin past any
// of the position's range changes nothing and emits no harvest signal.
#[tokio::test]
async fn active_bin_change_below_position_range_emits_no_harvest() {
    let pool = Pubkey::new_unique();
    let registry = Arc::new(RwLock::new(Registry::new()));
    let events = EventBus::new();
    let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));
    let dir = tempfile::tempdir().unwrap();

    let sub = Subscriber::new(
        Pubkey::new_unique(),
        StreamConfig::default(),
        rpc,
        registry.clone(),
        dir.path().join("cache.json"),
        events.clone(),
    );

    registry.write().await.upsert_position(sample_position(pool, 95, 104));
    registry
        .write()
        .await
        .set_pool_info(pool, harvester::decoder::decode_pool_info(&pool_update_buf(50, 20)).unwrap());

    let mut rx = events.subscribe();
    sub.handle_account_update(pool, Some(pool_update_buf(60, 20))).await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.type_name(), "active_bin_changed");
    assert!(rx.try_recv().is_err(), "no HarvestNeeded should follow");
}

// Scenario 4 (duplicate suppression): two enqueue calls for the same
// position before the processing loop has had a chance to run result in
// only one job sitting in the queue.
#[tokio::test]
async fn duplicate_harvest_opportunity_is_enqueued_only_once() {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let events = EventBus::new();
    let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));
    let executor = Executor::new(Default::default(), rpc, registry, events);

    let position = Pubkey::new_unique();
    let job = HarvestJob {
        position,
        pool: Pubkey::new_unique(),
        owner: Pubkey::new_unique(),
        side: Side::Sell,
        safe_bins: vec![1, 2, 3],
    };

    executor.enqueue(job.clone()).await;
    executor.enqueue(job).await;

    assert_eq!(executor.queue_depth().await, 1);
}
