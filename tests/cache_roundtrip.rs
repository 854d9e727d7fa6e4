//! Disk cache persistence as seen from outside the crate.

use harvester::core::types::Side;
use harvester::registry::cache::RegistryCache;
use harvester::registry::CachedPosition;
use solana_sdk::pubkey::Pubkey;

fn sample(pool: Pubkey) -> CachedPosition {
    CachedPosition {
        id: Pubkey::new_unique(),
        owner: Pubkey::new_unique(),
        pool,
        aux: Pubkey::new_unique(),
        side: Side::Sell,
        min_bin: 0,
        max_bin: 9,
    }
}

// Scenario 1 (cold start from cache): a cache file with 3 positions across 2
// pools survives a save/load cycle intact.
#[test]
fn cache_with_three_positions_on_two_pools_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let cache = RegistryCache::new(dir.path().join("registry.json"));

    let pool_a = Pubkey::new_unique();
    let pool_b = Pubkey::new_unique();
    let positions = vec![sample(pool_a), sample(pool_a), sample(pool_b)];

    cache.save(&positions).unwrap();
    let loaded = cache.load().unwrap();

    assert_eq!(loaded.len(), 3);
    let distinct_pools: std::collections::HashSet<_> = loaded.iter().map(|p| p.pool).collect();
    assert_eq!(distinct_pools.len(), 2);
}

#[test]
fn saving_twice_leaves_no_stale_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    let cache = RegistryCache::new(&path);

    cache.save(&[sample(Pubkey::new_unique())]).unwrap();
    cache.save(&[sample(Pubkey::new_unique()), sample(Pubkey::new_unique())]).unwrap();

    let tmp_path = dir.path().join("registry.json.tmp");
    assert!(!tmp_path.exists());
    assert_eq!(cache.load().unwrap().len(), 2);
}
