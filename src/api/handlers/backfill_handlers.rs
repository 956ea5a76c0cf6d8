use super::{chain_runtime, ApiReply, ApiResponse};
use crate::api::ApiState;
use crate::types::{BackfillProgress, BackfillRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use tracing::info;

const MAX_BACKFILL_DAYS: u64 = 365;

/// 回填状态机当前状态
pub async fn get_backfill_status(
    Path(chain_id): Path<u64>,
    State(state): State<ApiState>,
) -> Result<ApiReply, ApiReply> {
    let runtime = chain_runtime(&state, chain_id)?;
    Ok(ApiResponse::success(runtime.backfill.state()))
}

/// 在后台启动回填
///
/// # 示例请求
/// ```text
/// POST /api/chains/1/backfill  {"days": 7, "notify": false}
/// ```
pub async fn start_backfill(
    Path(chain_id): Path<u64>,
    State(state): State<ApiState>,
    body: Option<Json<BackfillRequest>>,
) -> Result<ApiReply, ApiReply> {
    let runtime = chain_runtime(&state, chain_id)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    if request.days == 0 || request.days > MAX_BACKFILL_DAYS {
        return Err(ApiResponse::<()>::error(
            StatusCode::BAD_REQUEST,
            format!("Days must be between 1 and {}", MAX_BACKFILL_DAYS),
        ));
    }
    if runtime.backfill.is_running() {
        return Err(ApiResponse::<()>::error(
            StatusCode::CONFLICT,
            "A backfill is already running for this chain".to_string(),
        ));
    }

    let coordinator = runtime.backfill.clone();
    tokio::spawn(async move {
        // 进度已由协调器写入日志和状态
        let outcome = coordinator.run(request, &|_: &BackfillProgress| {}).await;
        info!(
            "📋 [{}] 回填结束: {:?}, 处理 {} 笔, 跳过 {} 笔",
            coordinator.chain().name,
            outcome.status,
            outcome.swaps_processed,
            outcome.swaps_skipped
        );
    });

    Ok(ApiResponse::with_status(
        StatusCode::ACCEPTED,
        json!({
            "chain_id": chain_id,
            "days": request.days,
            "notify": request.notify,
        }),
    ))
}

pub async fn cancel_backfill(
    Path(chain_id): Path<u64>,
    State(state): State<ApiState>,
) -> Result<ApiReply, ApiReply> {
    let runtime = chain_runtime(&state, chain_id)?;
    if !runtime.backfill.cancel() {
        return Err(ApiResponse::<()>::error(
            StatusCode::CONFLICT,
            "No backfill is running".to_string(),
        ));
    }
    Ok(ApiResponse::success(json!({ "cancelled": true })))
}
