//! Stream subscriber: maintains the push subscription, keeps the registry,
//! and emits domain events.

pub mod stream;

use crate::config::StreamConfig;
use crate::core::error::HarvesterResult;
use crate::core::types::{LifecycleChange, Side};
use crate::decoder::{decode_pool_info, decode_position};
use crate::events::{DomainEvent, EventBus};
use crate::registry::cache::RegistryCache;
use crate::registry::{CachedPosition, Position, Registry};
use crate::rpc::{ProgramAccountFilter, RpcClient};
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Size (in bytes) of a fully populated position account, used as the
/// `dataSize` filter when enumerating positions by program ownership.
const POSITION_ACCOUNT_SIZE: u64 = 200;

pub struct Subscriber {
    program_id: Pubkey,
    config: StreamConfig,
    rpc: Arc<RpcClient>,
    registry: Arc<RwLock<Registry>>,
    cache: RegistryCache,
    events: EventBus,
    rebuild_in_flight: AtomicBool,
    reconnect_count: AtomicU64,
    last_pong_unix: AtomicU64,
    resubscribe_requested: AtomicBool,
}

impl Subscriber {
    pub fn new(
        program_id: Pubkey,
        config: StreamConfig,
        rpc: Arc<RpcClient>,
        registry: Arc<RwLock<Registry>>,
        cache_path: impl Into<std::path::PathBuf>,
        events: EventBus,
    ) -> Self {
        Self {
            program_id,
            config,
            rpc,
            registry,
            cache: RegistryCache::new(cache_path),
            events,
            rebuild_in_flight: AtomicBool::new(false),
            reconnect_count: AtomicU64::new(0),
            last_pong_unix: AtomicU64::new(0),
            resubscribe_requested: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        self.registry.clone()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Flag that the subscription filter is stale (a new pool was
    /// discovered) and the stream should reconnect to pick it up.
    pub fn request_resubscribe(&self) {
        self.resubscribe_requested.store(true, Ordering::SeqCst);
    }

    /// Consume the resubscribe flag, returning whether one was pending.
    pub fn take_resubscribe_request(&self) -> bool {
        self.resubscribe_requested.swap(false, Ordering::SeqCst)
    }

    /// Attempt to load from the on-disk cache; fall back to a full
    /// on-chain rebuild when there's no cache or it's empty.
    pub async fn bootstrap(&self) -> HarvesterResult<()> {
        if let Some(cached) = self.cache.load() {
            if !cached.is_empty() {
                info!(count = cached.len(), "restoring registry from disk cache");
                self.restore_from_cache(cached).await?;
                return Ok(());
            }
        }
        info!("no usable cache, performing full registry rebuild");
        self.rebuild_registry().await
    }

    async fn restore_from_cache(&self, cached: Vec<CachedPosition>) -> HarvesterResult<()> {
        let mut registry = self.registry.write().await;
        for c in cached {
            registry.upsert_position(Position {
                id: c.id,
                owner: c.owner,
                pool: c.pool,
                aux: c.aux,
                side: c.side,
                min_bin: c.min_bin,
                max_bin: c.max_bin,
                initial_amount: 0,
                harvested_amount: 0,
                created_at: 0,
            });
        }
        drop(registry);
        self.refresh_watched_pools().await?;
        Ok(())
    }

    /// Full rebuild: enumerate every position account owned by the program,
    /// decode, dust-filter, and replace the registry contents. Guarded by
    /// an in-flight flag — a second trigger while one is running is dropped.
    pub async fn rebuild_registry(&self) -> HarvesterResult<()> {
        if self.rebuild_in_flight.swap(true, Ordering::SeqCst) {
            debug!("rebuild already in flight, dropping duplicate trigger");
            return Ok(());
        }

        let result = self.do_rebuild().await;
        self.rebuild_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn do_rebuild(&self) -> HarvesterResult<()> {
        let accounts = self
            .rpc
            .get_program_accounts(&self.program_id, &[ProgramAccountFilter::DataSize(POSITION_ACCOUNT_SIZE)])
            .await?;

        let mut fresh = Vec::new();
        for (pubkey, account) in accounts {
            match decode_position(&account.data) {
                Ok(decoded) => {
                    let position = Position {
                        id: pubkey,
                        owner: decoded.owner,
                        pool: decoded.pool,
                        aux: decoded.aux,
                        side: decoded.side,
                        min_bin: decoded.min_bin,
                        max_bin: decoded.max_bin,
                        initial_amount: decoded.initial_amount,
                        harvested_amount: decoded.harvested_amount,
                        created_at: decoded.created_at,
                    };
                    if !position.is_dust() {
                        fresh.push(position);
                    }
                }
                Err(e) => {
                    warn!(pubkey = %pubkey, error = %e, "dropping undecodable position account");
                }
            }
        }

        let mut registry = self.registry.write().await;
        registry.clear_positions();
        for position in fresh {
            registry.upsert_position(position);
        }
        drop(registry);

        self.refresh_watched_pools().await?;
        self.persist_cache().await;
        Ok(())
    }

    async fn refresh_watched_pools(&self) -> HarvesterResult<()> {
        let pools: Vec<Pubkey> = {
            let registry = self.registry.read().await;
            registry.positions().map(|p| p.pool).collect::<std::collections::HashSet<_>>().into_iter().collect()
        };

        for pool in pools {
            if let Some(account) = self.rpc.get_account(&pool).await? {
                match decode_pool_info(&account.data) {
                    Ok(info) => {
                        let mut registry = self.registry.write().await;
                        registry.set_pool_info(pool, info);
                    }
                    Err(e) => warn!(pool = %pool, error = %e, "dropping undecodable pool account"),
                }
            }
        }
        Ok(())
    }

    async fn persist_cache(&self) {
        let cached: Vec<CachedPosition> = {
            let registry = self.registry.read().await;
            registry.positions().map(CachedPosition::from).collect()
        };
        if let Err(e) = self.cache.save(&cached) {
            warn!(error = %e, "failed to persist registry cache");
        }
    }

    /// Handle one decoded account update. Routes to the pool path or the
    /// position path depending on whether the account id is a watched pool.
    pub async fn handle_account_update(&self, pubkey: Pubkey, data: Option<Vec<u8>>) {
        let is_watched_pool = { self.registry.read().await.is_watched_pool(&pubkey) };

        if is_watched_pool {
            self.handle_pool_update(pubkey, data).await;
        } else {
            self.handle_position_update(pubkey, data).await;
        }
    }

    async fn handle_pool_update(&self, pool: Pubkey, data: Option<Vec<u8>>) {
        let Some(data) = data else {
            // Pools don't get deleted in practice; nothing to do.
            return;
        };

        let info = match decode_pool_info(&data) {
            Ok(info) => info,
            Err(e) => {
                warn!(pool = %pool, error = %e, "dropping malformed pool update");
                return;
            }
        };

        let previous_active_bin = { self.registry.read().await.active_bin(&pool) };

        {
            let mut registry = self.registry.write().await;
            registry.set_pool_info(pool, info.clone());
        }

        if previous_active_bin == Some(info.active_bin) {
            return;
        }

        self.events.publish(DomainEvent::ActiveBinChanged {
            pool,
            new_active_bin: info.active_bin,
            previous_active_bin,
        });

        let positions: Vec<Position> = {
            let registry = self.registry.read().await;
            registry.positions_for_pool(&pool).into_iter().cloned().collect()
        };

        for position in positions {
            let safe_bins = position.safe_bins(info.active_bin);
            if !safe_bins.is_empty() {
                self.events.publish(DomainEvent::HarvestNeeded {
                    position: position.id,
                    pool,
                    safe_bins,
                });
            }
        }
    }

    async fn handle_position_update(&self, position_id: Pubkey, data: Option<Vec<u8>>) {
        match data {
            None => {
                let removed = { self.registry.write().await.remove_position(&position_id) };
                if let Some(position) = removed {
                    self.persist_cache().await;
                    self.events.publish(DomainEvent::PositionChanged {
                        position: position_id,
                        change: LifecycleChange::Closed,
                        pool: position.pool,
                        owner: position.owner,
                        side: position.side,
                    });
                }
            }
            Some(data) => {
                let already_known = { self.registry.read().await.contains_position(&position_id) };
                if already_known {
                    return;
                }

                let decoded = match decode_position(&data) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(position = %position_id, error = %e, "dropping malformed position update");
                        return;
                    }
                };

                let pool_was_known = { self.registry.read().await.is_watched_pool(&decoded.pool) };

                if let Err(e) = self.rebuild_registry().await {
                    warn!(error = %e, "rebuild triggered by new position failed");
                    return;
                }

                if self.registry.read().await.contains_position(&position_id) {
                    self.events.publish(DomainEvent::PositionChanged {
                        position: position_id,
                        change: LifecycleChange::Created,
                        pool: decoded.pool,
                        owner: decoded.owner,
                        side: decoded.side,
                    });
                }

                if !pool_was_known {
                    info!(pool = %decoded.pool, "new pool discovered, triggering reconnect to extend subscription");
                    self.request_resubscribe();
                }
            }
        }
    }

    pub fn record_pong(&self) {
        self.last_pong_unix.store(now_unix(), Ordering::Relaxed);
    }

    pub fn seconds_since_last_pong(&self) -> u64 {
        now_unix().saturating_sub(self.last_pong_unix.load(Ordering::Relaxed))
    }

    pub fn note_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Low-cadence safety net: poll every watched pool's live active bin
    /// directly from chain and evaluate safe bins for every position on
    /// it, independent of whatever the push stream delivered.
    pub async fn run_safety_poll(&self, publish: impl Fn(DomainEvent)) -> HarvesterResult<()> {
        let pools = { self.registry.read().await.watched_pools() };

        for pool in pools {
            let Some(account) = self.rpc.get_account(&pool).await? else {
                continue;
            };
            let info = match decode_pool_info(&account.data) {
                Ok(info) => info,
                Err(e) => {
                    warn!(pool = %pool, error = %e, "safety poll: dropping malformed pool account");
                    continue;
                }
            };

            {
                let mut registry = self.registry.write().await;
                registry.set_pool_info(pool, info.clone());
            }

            let positions: Vec<Position> = {
                let registry = self.registry.read().await;
                registry.positions_for_pool(&pool).into_iter().cloned().collect()
            };

            for position in positions {
                let safe = position.safe_bins(info.active_bin);
                if !safe.is_empty() {
                    publish(DomainEvent::HarvestNeeded { position: position.id, pool, safe_bins: safe });
                }
            }

            tokio::time::sleep(self.config.safety_poll_inter_pool_delay).await;
        }

        Ok(())
    }
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_subscriber() -> (Subscriber, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let sub = Subscriber::new(
            Pubkey::new_unique(),
            StreamConfig::default(),
            Arc::new(RpcClient::new("http://localhost:8899".to_string())),
            Arc::new(RwLock::new(Registry::new())),
            path,
            EventBus::new(),
        );
        (sub, dir)
    }

    #[tokio::test]
    async fn position_delete_removes_and_emits_closed() {
        let (sub, _dir) = make_subscriber();
        let pool = Pubkey::new_unique();
        let position = Position {
            id: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            pool,
            aux: Pubkey::new_unique(),
            side: Side::Sell,
            min_bin: 0,
            max_bin: 10,
            initial_amount: crate::registry::MIN_INITIAL_AMOUNT_LAMPORTS + 1,
            harvested_amount: 0,
            created_at: 0,
        };
        let id = position.id;
        sub.registry.write().await.upsert_position(position);

        let mut rx = sub.events.subscribe();
        sub.handle_position_update(id, None).await;

        assert!(!sub.registry.read().await.contains_position(&id));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.type_name(), "position_changed");
    }

    #[tokio::test]
    async fn rebuild_guard_drops_concurrent_trigger() {
        let (sub, _dir) = make_subscriber();
        sub.rebuild_in_flight.store(true, Ordering::SeqCst);
        // Should return Ok immediately without touching the network.
        assert!(sub.rebuild_registry().await.is_ok());
    }

    #[tokio::test]
    async fn first_pool_observation_emits_active_bin_changed_with_no_previous() {
        let (sub, _dir) = make_subscriber();
        let pool = Pubkey::new_unique();

        let mut buf = vec![0u8; 138];
        buf[0..4].copy_from_slice(&100i32.to_le_bytes());
        buf[4..6].copy_from_slice(&20u16.to_le_bytes());

        let mut rx = sub.events.subscribe();
        sub.handle_pool_update(pool, Some(buf)).await;

        let event = rx.recv().await.unwrap();
        match event {
            DomainEvent::ActiveBinChanged { new_active_bin, previous_active_bin, .. } => {
                assert_eq!(new_active_bin, 100);
                assert_eq!(previous_active_bin, None);
            }
            other => panic!("expected ActiveBinChanged, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn new_pool_discovery_requests_resubscribe() {
        let (sub, _dir) = make_subscriber();
        assert!(!sub.take_resubscribe_request());
        sub.request_resubscribe();
        assert!(sub.take_resubscribe_request());
        // consuming clears it
        assert!(!sub.take_resubscribe_request());
    }
}
