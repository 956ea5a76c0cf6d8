use super::{internal_error, ApiReply, ApiResponse};
use crate::api::ApiState;
use crate::types::AlertSettings;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use ethers::types::Address;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct TopWalletsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackRequest {
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    #[serde(default = "default_muted")]
    pub muted: bool,
}

fn default_muted() -> bool {
    true
}

fn parse_wallet(address: &str) -> Result<Address, ApiReply> {
    if address.len() != 42 || !address.starts_with("0x") {
        return Err(ApiResponse::<()>::error(
            StatusCode::BAD_REQUEST,
            "Invalid wallet address format".to_string(),
        ));
    }
    address.parse::<Address>().map_err(|_| {
        ApiResponse::<()>::error(
            StatusCode::BAD_REQUEST,
            "Invalid wallet address format".to_string(),
        )
    })
}

/// 按总交易额排序的钱包
///
/// # 示例请求
/// ```text
/// GET /api/wallets/top?limit=10
/// ```
pub async fn get_top_wallets(
    Query(params): Query<TopWalletsQuery>,
    State(state): State<ApiState>,
) -> Result<ApiReply, ApiReply> {
    let limit = params.limit.unwrap_or(10);
    if limit == 0 || limit > 100 {
        return Err(ApiResponse::<()>::error(
            StatusCode::BAD_REQUEST,
            "Limit must be between 1 and 100".to_string(),
        ));
    }

    match state.context.store.get_top_wallets(limit).await {
        Ok(wallets) => Ok(ApiResponse::success(wallets)),
        Err(e) => Err(internal_error("Failed to get top wallets", e)),
    }
}

pub async fn get_tracked_wallets(State(state): State<ApiState>) -> Result<ApiReply, ApiReply> {
    match state.context.store.get_tracked_wallets().await {
        Ok(wallets) => Ok(ApiResponse::success(wallets)),
        Err(e) => Err(internal_error("Failed to get tracked wallets", e)),
    }
}

/// 钱包统计 + 渲染好的钱包卡片
pub async fn get_wallet(
    Path(address): Path<String>,
    State(state): State<ApiState>,
) -> Result<ApiReply, ApiReply> {
    let wallet = parse_wallet(&address)?;
    let stats = state
        .context
        .store
        .get_wallet(wallet)
        .await
        .map_err(|e| internal_error("Failed to get wallet", e))?;

    let summary = state
        .context
        .primary_chain()
        .map(|runtime| {
            runtime
                .dispatcher
                .renderer()
                .render_wallet_summary(wallet, stats.as_ref())
        });

    match stats {
        Some(stats) => Ok(ApiResponse::success(json!({
            "stats": stats,
            "summary": summary,
        }))),
        None => Err(ApiResponse::<()>::error(
            StatusCode::NOT_FOUND,
            format!("Wallet {} not found", address),
        )),
    }
}

pub async fn track_wallet(
    Path(address): Path<String>,
    State(state): State<ApiState>,
    body: Option<Json<TrackRequest>>,
) -> Result<ApiReply, ApiReply> {
    let wallet = parse_wallet(&address)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    match state.context.store.track_wallet(wallet, request.label).await {
        Ok(stats) => {
            tracing::info!("👀 开始跟踪钱包 {}", address);
            Ok(ApiResponse::success(stats))
        }
        Err(e) => Err(internal_error("Failed to track wallet", e)),
    }
}

pub async fn mute_wallet(
    Path(address): Path<String>,
    State(state): State<ApiState>,
    body: Option<Json<MuteRequest>>,
) -> Result<ApiReply, ApiReply> {
    let wallet = parse_wallet(&address)?;
    let muted = body.map(|Json(request)| request.muted).unwrap_or(true);

    match state.context.store.mute_wallet(wallet, muted).await {
        Ok(stats) => Ok(ApiResponse::success(stats)),
        Err(e) => Err(internal_error("Failed to mute wallet", e)),
    }
}

/// 统计面板（文本卡片 + 结构化数据）
pub async fn get_stats_dashboard(State(state): State<ApiState>) -> Result<ApiReply, ApiReply> {
    let store = &state.context.store;
    let settings = store
        .get_alert_settings()
        .await
        .map_err(|e| internal_error("Failed to get alert settings", e))?;
    let tracked = store
        .get_tracked_wallets()
        .await
        .map_err(|e| internal_error("Failed to get tracked wallets", e))?;
    let top = store
        .get_top_wallets(5)
        .await
        .map_err(|e| internal_error("Failed to get top wallets", e))?;

    let text = state.context.primary_chain().map(|runtime| {
        runtime
            .dispatcher
            .renderer()
            .render_stats_dashboard(&settings, tracked.len(), &top)
    });

    Ok(ApiResponse::success(json!({
        "text": text,
        "settings": settings,
        "tracked_wallets": tracked.len(),
        "top_wallets": top,
    })))
}

pub async fn get_alert_settings(State(state): State<ApiState>) -> Result<ApiReply, ApiReply> {
    let settings = state
        .context
        .store
        .get_alert_settings()
        .await
        .map_err(|e| internal_error("Failed to get alert settings", e))?;
    let text = state
        .context
        .primary_chain()
        .map(|runtime| runtime.dispatcher.renderer().render_settings(&settings));

    Ok(ApiResponse::success(json!({
        "settings": settings,
        "text": text,
    })))
}

pub async fn update_alert_settings(
    State(state): State<ApiState>,
    Json(settings): Json<AlertSettings>,
) -> Result<ApiReply, ApiReply> {
    if settings.min_threshold_usd.is_sign_negative() {
        return Err(ApiResponse::<()>::error(
            StatusCode::BAD_REQUEST,
            "Minimum threshold must be non-negative".to_string(),
        ));
    }
    if let Some(max) = settings.max_threshold_usd {
        if max < settings.min_threshold_usd {
            return Err(ApiResponse::<()>::error(
                StatusCode::BAD_REQUEST,
                "Maximum threshold must not be below the minimum".to_string(),
            ));
        }
    }

    match state.context.store.update_alert_settings(&settings).await {
        Ok(updated) => {
            tracing::info!("⚙️ 告警设置已更新: 最低 ${}", updated.min_threshold_usd);
            Ok(ApiResponse::success(updated))
        }
        Err(e) => Err(internal_error("Failed to update alert settings", e)),
    }
}
