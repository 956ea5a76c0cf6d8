use super::{chain_runtime, internal_error, ApiReply, ApiResponse};
use crate::api::ApiState;
use axum::extract::{Path, State};
use serde_json::json;

pub async fn health(State(state): State<ApiState>) -> Result<ApiReply, ApiReply> {
    let mut chains: Vec<u64> = state.context.chains.keys().copied().collect();
    chains.sort_unstable();
    let swaps = state
        .context
        .store
        .swap_count()
        .await
        .map_err(|e| internal_error("Failed to count swaps", e))?;

    Ok(ApiResponse::success(json!({
        "status": "ok",
        "chains": chains,
        "swaps": swaps,
    })))
}

/// 当前价格、来源、是否过时
pub async fn get_price_status(
    Path(chain_id): Path<u64>,
    State(state): State<ApiState>,
) -> Result<ApiReply, ApiReply> {
    let runtime = chain_runtime(&state, chain_id)?;
    match runtime.oracle.status().await {
        Ok(status) => Ok(ApiResponse::success(status)),
        Err(e) => Err(internal_error("Failed to resolve price", e)),
    }
}

/// 被监控池子的链上状态
pub async fn get_pool_states(
    Path(chain_id): Path<u64>,
    State(state): State<ApiState>,
) -> Result<ApiReply, ApiReply> {
    let runtime = chain_runtime(&state, chain_id)?;

    let mut pools = Vec::new();
    for pool_id in &runtime.config.monitored_pools {
        let tokens = runtime.directory.pool_tokens(*pool_id).await;
        let entry = match runtime.directory.pool_state(*pool_id).await {
            Ok(pool_state) => json!({
                "pool_id": format!("0x{:x}", pool_id),
                "tokens": tokens.ok(),
                "state": pool_state,
            }),
            Err(e) => {
                tracing::warn!("⚠️ 读取池子 0x{:x} 状态失败: {}", pool_id, e);
                json!({
                    "pool_id": format!("0x{:x}", pool_id),
                    "tokens": tokens.ok(),
                    "error": e.to_string(),
                })
            }
        };
        pools.push(entry);
    }

    Ok(ApiResponse::success(pools))
}
