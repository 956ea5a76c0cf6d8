use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::context::ServiceContext;
use crate::api::{create_router, ApiState};

pub struct ApiService {
    context: Arc<ServiceContext>,
}

impl ApiService {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        info!("🚀 启动API服务...");

        let server = &self.context.config.server;
        let app = create_router(ApiState::new(self.context.clone()));
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", server.host, server.port)).await?;

        info!("API Server starting on {}:{}", server.host, server.port);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}
