//! JSON response shapes for the pull API.

use crate::decoder::{PoolInfo, TokenProgramKind};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub pool: String,
    pub active_bin: i32,
    pub bin_step: u16,
    pub status: u8,
    pub token_x_mint: String,
    pub token_y_mint: String,
    pub reserve_x: String,
    pub reserve_y: String,
    pub token_x_extended: bool,
    pub token_y_extended: bool,
}

impl PoolResponse {
    pub fn from_info(pool: Pubkey, info: &PoolInfo) -> Self {
        Self {
            pool: pool.to_string(),
            active_bin: info.active_bin,
            bin_step: info.bin_step,
            status: info.status,
            token_x_mint: info.token_x_mint.to_string(),
            token_y_mint: info.token_y_mint.to_string(),
            reserve_x: info.reserve_x.to_string(),
            reserve_y: info.reserve_y.to_string(),
            token_x_extended: matches!(info.token_x_program, TokenProgramKind::Extended),
            token_y_extended: matches!(info.token_y_program, TokenProgramKind::Extended),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub id: String,
    pub owner: String,
    pub pool: String,
    pub side: String,
    pub min_bin: i32,
    pub max_bin: i32,
    pub fill_percent: f64,
    pub safe_bins: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub position_count: usize,
    pub watched_pools: usize,
    pub total_harvests: u64,
    pub total_closes: u64,
    pub queue_depth: usize,
    pub inflight_count: usize,
    pub push_clients: usize,
    pub reconnect_count: u64,
}

#[derive(Debug, Serialize)]
pub struct UserBinResponse {
    pub bin_id: i32,
    pub amount_x: u64,
    pub amount_y: u64,
}

#[derive(Debug, Serialize)]
pub struct UserBinsResponse {
    pub active_bin: Option<i32>,
    pub bins: Vec<UserBinResponse>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub subsystems: HealthSubsystems,
}

#[derive(Debug, Serialize)]
pub struct HealthSubsystems {
    pub subscriber: bool,
    pub executor: bool,
    pub sequencer: bool,
}
