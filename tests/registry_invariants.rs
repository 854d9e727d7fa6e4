//! Registry invariants and the harvest/close end-to-end scenarios, exercised
//! through the public `Registry`/`Position` API only.

use harvester::core::types::Side;
use harvester::registry::{Position, Registry, MIN_INITIAL_AMOUNT_LAMPORTS, MIN_POSITION_WIDTH};
use solana_sdk::pubkey::Pubkey;

fn position(pool: Pubkey, side: Side, min_bin: i32, max_bin: i32) -> Position {
    Position {
        id: Pubkey::new_unique(),
        owner: Pubkey::new_unique(),
        pool,
        aux: Pubkey::new_unique(),
        side,
        min_bin,
        max_bin,
        initial_amount: MIN_INITIAL_AMOUNT_LAMPORTS + 1,
        harvested_amount: 0,
        created_at: 0,
    }
}

#[test]
fn every_position_satisfies_minimum_width() {
    let mut registry = Registry::new();
    let pool = Pubkey::new_unique();
    registry.upsert_position(position(pool, Side::Sell, 0, 1)); // width exactly 2, allowed
    registry.upsert_position(position(pool, Side::Sell, 5, 5)); // width 1, rejected

    for p in registry.positions() {
        assert!(p.width() >= MIN_POSITION_WIDTH);
    }
    assert_eq!(registry.position_count(), 1);
}

#[test]
fn primary_and_secondary_index_stay_consistent_across_churn() {
    let mut registry = Registry::new();
    let pool_a = Pubkey::new_unique();
    let pool_b = Pubkey::new_unique();

    let ids: Vec<Pubkey> = (0..5)
        .map(|i| {
            let pool = if i % 2 == 0 { pool_a } else { pool_b };
            let p = position(pool, Side::Sell, 0, 10);
            let id = p.id;
            registry.upsert_position(p);
            id
        })
        .collect();

    assert!(registry.is_consistent());

    registry.remove_position(&ids[0]);
    registry.remove_position(&ids[2]);
    assert!(registry.is_consistent());

    for pool in [pool_a, pool_b] {
        for p in registry.positions_for_pool(&pool) {
            assert_eq!(p.pool, pool);
        }
    }
}

// Scenario 2 (harvest triggered): active bin moves from 99 to 100 on a
// Sell position spanning [95..104]; only bins strictly below the new
// active bin are reported safe.
#[test]
fn sell_position_reports_safe_bins_below_new_active_bin() {
    let pool = Pubkey::new_unique();
    let pos = position(pool, Side::Sell, 95, 104);

    let safe = pos.safe_bins(100);
    assert_eq!(safe, vec![95, 96, 97, 98, 99]);
}

// Scenario 3 (full exhaustion -> close): once the active bin has moved past
// every bin in the position's range, the safe set covers the whole width.
#[test]
fn sell_position_is_fully_exhausted_once_active_bin_passes_max() {
    let pool = Pubkey::new_unique();
    let pos = position(pool, Side::Sell, 95, 104);

    let safe = pos.safe_bins(105);
    assert_eq!(safe.len() as i32, pos.total_bins());
    assert_eq!(safe, (95..=104).collect::<Vec<_>>());
}

#[test]
fn sell_side_has_no_safe_bins_when_active_bin_is_at_min() {
    let pool = Pubkey::new_unique();
    let pos = position(pool, Side::Sell, 10, 20);
    assert!(pos.safe_bins(10).is_empty());
}

#[test]
fn buy_side_has_no_safe_bins_when_active_bin_is_at_max() {
    let pool = Pubkey::new_unique();
    let pos = position(pool, Side::Buy, 10, 20);
    assert!(pos.safe_bins(20).is_empty());
}

#[test]
fn negative_bin_ranges_round_trip_through_safe_bin_computation() {
    let pool = Pubkey::new_unique();
    let pos = position(pool, Side::Buy, -50, -40);
    assert_eq!(pos.safe_bins(-45), vec![-44, -43, -42, -41, -40]);
}
