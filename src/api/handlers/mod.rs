pub mod backfill_handlers;
pub mod status_handlers;
pub mod wallet_handlers;

pub use backfill_handlers::*;
pub use status_handlers::*;
pub use wallet_handlers::*;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::ApiState;
use crate::services::ChainRuntime;
use std::sync::Arc;

pub type ApiReply = (StatusCode, Json<JsonValue>);

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> ApiReply {
        Self::with_status(StatusCode::OK, data)
    }

    fn with_status(status: StatusCode, data: T) -> ApiReply {
        let response = Self {
            success: true,
            data: Some(data),
            message: None,
        };
        (status, Json(serde_json::to_value(&response).unwrap_or(JsonValue::Null)))
    }
}

impl ApiResponse<()> {
    fn error(status: StatusCode, message: String) -> ApiReply {
        let response = ApiResponse::<()> {
            success: false,
            data: None,
            message: Some(message),
        };
        (status, Json(serde_json::to_value(&response).unwrap_or(JsonValue::Null)))
    }
}

fn internal_error(context: &str, e: anyhow::Error) -> ApiReply {
    let error_msg = format!("{}: {}", context, e);
    tracing::error!("{}", error_msg);
    ApiResponse::<()>::error(StatusCode::INTERNAL_SERVER_ERROR, error_msg)
}

fn chain_runtime(state: &ApiState, chain_id: u64) -> Result<Arc<ChainRuntime>, ApiReply> {
    state.context.chain(chain_id).cloned().ok_or_else(|| {
        ApiResponse::<()>::error(
            StatusCode::NOT_FOUND,
            format!("Chain {} is not configured", chain_id),
        )
    })
}
