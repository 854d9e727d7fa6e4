//! Pull API handlers.

use super::responses::{
    ErrorResponse, HealthResponse, HealthSubsystems, PoolResponse, PositionResponse, StatsResponse, UserBinResponse,
    UserBinsResponse,
};
use super::RelayState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::Ordering;

pub async fn list_pools(State(state): State<RelayState>) -> Json<Vec<PoolResponse>> {
    let registry = state.registry.read().await;
    let pools = registry
        .watched_pools()
        .into_iter()
        .filter_map(|pool| registry.pool_info(&pool).map(|info| PoolResponse::from_info(pool, info)))
        .collect();
    Json(pools)
}

pub async fn get_pool(
    State(state): State<RelayState>,
    Path(pool): Path<String>,
) -> Result<Json<PoolResponse>, (StatusCode, Json<ErrorResponse>)> {
    let pool_key = solana_sdk::pubkey::Pubkey::from_str(&pool)
        .map_err(|_| bad_request("invalid pool pubkey"))?;

    let registry = state.registry.read().await;
    let info = registry.pool_info(&pool_key).ok_or_else(|| not_found("pool not found"))?;
    Ok(Json(PoolResponse::from_info(pool_key, info)))
}

pub async fn list_positions(State(state): State<RelayState>) -> Json<Vec<PositionResponse>> {
    let registry = state.registry.read().await;
    let positions = registry
        .positions()
        .map(|p| {
            let active_bin = registry.active_bin(&p.pool).unwrap_or(p.min_bin);
            PositionResponse {
                id: p.id.to_string(),
                owner: p.owner.to_string(),
                pool: p.pool.to_string(),
                side: p.side.to_string(),
                min_bin: p.min_bin,
                max_bin: p.max_bin,
                fill_percent: p.fill_percent(active_bin),
                safe_bins: p.safe_bins(active_bin),
            }
        })
        .collect();
    Json(positions)
}

pub async fn list_pending_harvests(State(state): State<RelayState>) -> Json<Vec<PositionResponse>> {
    let registry = state.registry.read().await;
    let positions = registry
        .positions()
        .filter_map(|p| {
            let active_bin = registry.active_bin(&p.pool)?;
            let safe = p.safe_bins(active_bin);
            if safe.is_empty() {
                return None;
            }
            Some(PositionResponse {
                id: p.id.to_string(),
                owner: p.owner.to_string(),
                pool: p.pool.to_string(),
                side: p.side.to_string(),
                min_bin: p.min_bin,
                max_bin: p.max_bin,
                fill_percent: p.fill_percent(active_bin),
                safe_bins: safe,
            })
        })
        .collect();
    Json(positions)
}

pub async fn stats(State(state): State<RelayState>) -> Json<StatsResponse> {
    let registry = state.registry.read().await;
    Json(StatsResponse {
        position_count: registry.position_count(),
        watched_pools: registry.pool_count(),
        total_harvests: state.executor.harvests_done(),
        total_closes: state.executor.closes_done(),
        queue_depth: state.executor.queue_depth().await,
        inflight_count: state.executor.inflight_count().await,
        push_clients: state.push_clients.load(Ordering::Relaxed),
        reconnect_count: state.subscriber.reconnect_count(),
    })
}

#[derive(Debug, Deserialize)]
pub struct UserBinsQuery {
    pub pool: String,
    pub owner: String,
}

pub async fn user_bins(
    State(state): State<RelayState>,
    axum::extract::Query(query): axum::extract::Query<UserBinsQuery>,
) -> Result<Json<UserBinsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let pool = solana_sdk::pubkey::Pubkey::from_str(&query.pool).map_err(|_| bad_request("invalid pool pubkey"))?;
    let owner = solana_sdk::pubkey::Pubkey::from_str(&query.owner).map_err(|_| bad_request("invalid owner pubkey"))?;

    let (owned, active_bin) = {
        let registry = state.registry.read().await;
        let owned: Vec<crate::registry::Position> = registry
            .positions_for_pool(&pool)
            .into_iter()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect();
        (owned, registry.active_bin(&pool))
    };

    let mut bins = Vec::new();
    for position in owned {
        let Some(aux_account) = state
            .rpc
            .get_account(&position.aux)
            .await
            .map_err(|_| (StatusCode::BAD_GATEWAY, Json(ErrorResponse::new("failed to fetch live bin balances"))))?
        else {
            continue;
        };

        let total_bins = (position.max_bin - position.min_bin + 1) as usize;
        let balances: HashMap<i32, (u64, u64)> =
            match crate::decoder::decode_bin_balances(&aux_account.data, position.min_bin, total_bins) {
                Ok(decoded) => decoded.into_iter().map(|(bin, x, y)| (bin, (x, y))).collect(),
                Err(_) => continue,
            };

        for bin_id in position.min_bin..=position.max_bin {
            let (amount_x, amount_y) = balances.get(&bin_id).copied().unwrap_or((0, 0));
            bins.push(UserBinResponse { bin_id, amount_x, amount_y });
        }
    }

    Ok(Json(UserBinsResponse { active_bin, bins }))
}

pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.stats.uptime_secs(),
        subsystems: HealthSubsystems { subscriber: true, executor: true, sequencer: true },
    })
}

fn bad_request(msg: &str) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg)))
}

fn not_found(msg: &str) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(msg)))
}
