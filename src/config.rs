//! Environment-driven configuration.
//!
//! Every tunable the daemon needs is read from the environment at startup.
//! Loading the full config is a hard boundary: if anything required is
//! missing or unparsable, `Config::from_env()` fails fast with a
//! `Configuration` error so the process exits before touching the network.

use crate::core::error::{HarvesterError, HarvesterResult};
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub program_id: Pubkey,
    pub signer_pubkey: Pubkey,
    pub rpc_url: String,
    pub stream: StreamConfig,
    pub executor: ExecutorConfig,
    pub sequencer: SequencerConfig,
    pub api: ApiConfig,
    pub registry_cache_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub grpc_endpoint: String,
    pub grpc_token: Option<String>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub safety_poll_interval: Duration,
    pub safety_poll_inter_pool_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub priority_fee_floor_micro_lamports: u64,
    pub compute_unit_limit: u32,
    pub pool_cache_ttl: Duration,
    pub pool_cache_max_entries: usize,
    pub shutdown_drain_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub active_interval: Duration,
    pub processing_interval: Duration,
    pub auto_deposit_threshold_lamports: u64,
    pub inter_step_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub push_history_len: usize,
    pub push_replay_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            grpc_endpoint: String::new(),
            grpc_token: None,
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            safety_poll_interval: Duration::from_secs(300),
            safety_poll_inter_pool_delay: Duration::from_millis(200),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            retry_attempts: 3,
            retry_base: Duration::from_secs(1),
            priority_fee_floor_micro_lamports: 10_000,
            compute_unit_limit: 400_000,
            pool_cache_ttl: Duration::from_secs(600),
            pool_cache_max_entries: 2000,
            shutdown_drain_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(3600),
            processing_interval: Duration::from_secs(30),
            auto_deposit_threshold_lamports: 500_000_000, // 0.5 native units
            inter_step_delay: Duration::from_secs(2),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            push_history_len: 200,
            push_replay_len: 50,
        }
    }
}

fn env_var(key: &str) -> HarvesterResult<String> {
    std::env::var(key).map_err(|_| HarvesterError::Configuration(format!("missing required env var {key}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_pubkey(key: &str) -> HarvesterResult<Pubkey> {
    let raw = env_var(key)?;
    Pubkey::from_str(&raw).map_err(|e| HarvesterError::Configuration(format!("invalid pubkey for {key}: {e}")))
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> HarvesterResult<Self> {
        let stream = StreamConfig {
            grpc_endpoint: env_var("HARVESTER_GRPC_ENDPOINT")?,
            grpc_token: std::env::var("HARVESTER_GRPC_TOKEN").ok(),
            ping_interval: env_duration_secs("HARVESTER_PING_INTERVAL_SECS", StreamConfig::default().ping_interval),
            ping_timeout: env_duration_secs("HARVESTER_PING_TIMEOUT_SECS", StreamConfig::default().ping_timeout),
            reconnect_base: env_duration_secs("HARVESTER_RECONNECT_BASE_SECS", StreamConfig::default().reconnect_base),
            reconnect_max: env_duration_secs("HARVESTER_RECONNECT_MAX_SECS", StreamConfig::default().reconnect_max),
            safety_poll_interval: env_duration_secs(
                "HARVESTER_SAFETY_POLL_SECS",
                StreamConfig::default().safety_poll_interval,
            ),
            safety_poll_inter_pool_delay: Duration::from_millis(env_u64(
                "HARVESTER_SAFETY_POLL_DELAY_MS",
                200,
            )),
        };

        let executor = ExecutorConfig {
            max_concurrent: env_usize("HARVESTER_MAX_CONCURRENT", ExecutorConfig::default().max_concurrent),
            retry_attempts: env_u32("HARVESTER_RETRY_ATTEMPTS", ExecutorConfig::default().retry_attempts),
            retry_base: env_duration_secs("HARVESTER_RETRY_BASE_SECS", ExecutorConfig::default().retry_base),
            priority_fee_floor_micro_lamports: env_u64(
                "HARVESTER_PRIORITY_FEE_FLOOR",
                ExecutorConfig::default().priority_fee_floor_micro_lamports,
            ),
            compute_unit_limit: env_u32("HARVESTER_COMPUTE_UNIT_LIMIT", ExecutorConfig::default().compute_unit_limit),
            pool_cache_ttl: env_duration_secs("HARVESTER_POOL_CACHE_TTL_SECS", ExecutorConfig::default().pool_cache_ttl),
            pool_cache_max_entries: env_usize(
                "HARVESTER_POOL_CACHE_MAX",
                ExecutorConfig::default().pool_cache_max_entries,
            ),
            shutdown_drain_timeout: env_duration_secs(
                "HARVESTER_SHUTDOWN_DRAIN_SECS",
                ExecutorConfig::default().shutdown_drain_timeout,
            ),
        };

        let sequencer = SequencerConfig {
            active_interval: env_duration_secs("HARVESTER_SEQUENCER_ACTIVE_SECS", SequencerConfig::default().active_interval),
            processing_interval: env_duration_secs(
                "HARVESTER_SEQUENCER_PROCESSING_SECS",
                SequencerConfig::default().processing_interval,
            ),
            auto_deposit_threshold_lamports: env_u64(
                "HARVESTER_AUTO_DEPOSIT_THRESHOLD",
                SequencerConfig::default().auto_deposit_threshold_lamports,
            ),
            inter_step_delay: env_duration_secs(
                "HARVESTER_SEQUENCER_STEP_DELAY_SECS",
                SequencerConfig::default().inter_step_delay,
            ),
        };

        let api = ApiConfig {
            bind_addr: env_var_or("HARVESTER_BIND_ADDR", &ApiConfig::default().bind_addr),
            push_history_len: env_usize("HARVESTER_PUSH_HISTORY_LEN", ApiConfig::default().push_history_len),
            push_replay_len: env_usize("HARVESTER_PUSH_REPLAY_LEN", ApiConfig::default().push_replay_len),
        };

        let config = Self {
            program_id: env_pubkey("HARVESTER_PROGRAM_ID")?,
            signer_pubkey: env_pubkey("HARVESTER_SIGNER_PUBKEY")?,
            rpc_url: env_var("HARVESTER_RPC_URL")?,
            stream,
            executor,
            sequencer,
            api,
            registry_cache_path: PathBuf::from(env_var_or(
                "HARVESTER_CACHE_PATH",
                "./harvester-registry-cache.json",
            )),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> HarvesterResult<()> {
        if self.rpc_url.is_empty() {
            return Err(HarvesterError::Configuration("rpc_url must not be empty".into()));
        }
        if self.executor.max_concurrent == 0 {
            return Err(HarvesterError::Configuration("max_concurrent must be > 0".into()));
        }
        if self.stream.ping_timeout <= self.stream.ping_interval {
            return Err(HarvesterError::Configuration(
                "ping_timeout must exceed ping_interval".into(),
            ));
        }
        Ok(())
    }
}
