//! In-memory position registry.
//!
//! Holds every tracked position plus the last known state of every pool
//! those positions reference. A secondary index (pool -> position ids)
//! keeps pool-triggered recomputation cheap. The registry is the single
//! piece of shared mutable state in the daemon; callers take the lock,
//! do their read or write, and let go — nothing holds it across an
//! await point.

pub mod cache;

use crate::core::types::Side;
use crate::decoder::PoolInfo;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};

pub const MIN_POSITION_WIDTH: i32 = 2;
pub const MIN_INITIAL_AMOUNT_LAMPORTS: u64 = 100_000_000; // 0.1 native units at 9 decimals

/// A tracked liquidity position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub id: Pubkey,
    pub owner: Pubkey,
    pub pool: Pubkey,
    pub aux: Pubkey,
    pub side: Side,
    pub min_bin: i32,
    pub max_bin: i32,
    pub initial_amount: u64,
    pub harvested_amount: u64,
    pub created_at: i64,
}

impl Position {
    pub fn width(&self) -> i32 {
        self.max_bin - self.min_bin + 1
    }

    pub fn is_dust(&self) -> bool {
        self.width() < MIN_POSITION_WIDTH || self.initial_amount < MIN_INITIAL_AMOUNT_LAMPORTS
    }

    /// Bins that are fully converted given the pool's current active bin,
    /// restricted to this position's own range. This is the range-only
    /// check the subscriber uses; the executor additionally confirms
    /// non-zero balance per bin before acting.
    pub fn safe_bins(&self, active_bin: i32) -> Vec<i32> {
        match self.side {
            Side::Sell => (self.min_bin..=self.max_bin).filter(|&b| b < active_bin).collect(),
            Side::Buy => (self.min_bin..=self.max_bin).filter(|&b| b > active_bin).collect(),
        }
    }

    pub fn total_bins(&self) -> i32 {
        self.width()
    }

    pub fn fill_percent(&self, active_bin: i32) -> f64 {
        let total = self.total_bins();
        if total <= 0 {
            return 0.0;
        }
        (self.safe_bins(active_bin).len() as f64 / total as f64) * 100.0
    }
}

/// A minimal, persistable view of a position — this is what the disk cache
/// stores and restores across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPosition {
    pub id: Pubkey,
    pub owner: Pubkey,
    pub pool: Pubkey,
    pub aux: Pubkey,
    pub side: Side,
    pub min_bin: i32,
    pub max_bin: i32,
}

impl From<&Position> for CachedPosition {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id,
            owner: p.owner,
            pool: p.pool,
            aux: p.aux,
            side: p.side,
            min_bin: p.min_bin,
            max_bin: p.max_bin,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    positions: HashMap<Pubkey, Position>,
    pool_positions: HashMap<Pubkey, HashSet<Pubkey>>,
    pools: HashMap<Pubkey, PoolInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a position. Dust positions are silently rejected —
    /// callers should filter before inserting, but this is a final guard.
    pub fn upsert_position(&mut self, position: Position) {
        if position.is_dust() {
            return;
        }
        self.pool_positions.entry(position.pool).or_default().insert(position.id);
        self.positions.insert(position.id, position);
    }

    pub fn remove_position(&mut self, id: &Pubkey) -> Option<Position> {
        let removed = self.positions.remove(id)?;
        if let Some(set) = self.pool_positions.get_mut(&removed.pool) {
            set.remove(id);
            if set.is_empty() {
                self.pool_positions.remove(&removed.pool);
            }
        }
        Some(removed)
    }

    pub fn position(&self, id: &Pubkey) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn positions_for_pool(&self, pool: &Pubkey) -> Vec<&Position> {
        self.pool_positions
            .get(pool)
            .map(|ids| ids.iter().filter_map(|id| self.positions.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn contains_position(&self, id: &Pubkey) -> bool {
        self.positions.contains_key(id)
    }

    pub fn set_pool_info(&mut self, pool: Pubkey, info: PoolInfo) {
        self.pools.insert(pool, info);
    }

    pub fn pool_info(&self, pool: &Pubkey) -> Option<&PoolInfo> {
        self.pools.get(pool)
    }

    pub fn active_bin(&self, pool: &Pubkey) -> Option<i32> {
        self.pools.get(pool).map(|p| p.active_bin)
    }

    pub fn watched_pools(&self) -> Vec<Pubkey> {
        self.pools.keys().copied().collect()
    }

    pub fn is_watched_pool(&self, pool: &Pubkey) -> bool {
        self.pools.contains_key(pool)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Clear every position and pool-position association, keeping known
    /// pool info intact (a rebuild repopulates positions, not pools).
    pub fn clear_positions(&mut self) {
        self.positions.clear();
        self.pool_positions.clear();
    }

    /// Check primary/secondary index consistency. Used by tests and by the
    /// occasional debug assertion after a rebuild.
    pub fn is_consistent(&self) -> bool {
        for (pool, ids) in &self.pool_positions {
            for id in ids {
                match self.positions.get(id) {
                    Some(p) if &p.pool == pool => {}
                    _ => return false,
                }
            }
        }
        for position in self.positions.values() {
            match self.pool_positions.get(&position.pool) {
                Some(ids) if ids.contains(&position.id) => {}
                _ => return false,
            }
        }
        true
    }
}
