use anyhow::Result;
use std::sync::Arc;
use swap_monitor::services::{shutdown_on_ctrl_c, ApiService, EventService, ServiceContext};
use swap_monitor::Config;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("🔧 启动组合服务 (事件监听 + API)...");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    // 两个服务共享同一份存储、价格缓存和回填状态
    let context = Arc::new(ServiceContext::build(config).await?);
    let shutdown = shutdown_on_ctrl_c();

    let event_service = EventService::new(context.clone());
    let event_shutdown = shutdown.clone();
    let event_handle = tokio::spawn(async move {
        if let Err(e) = event_service.start(event_shutdown).await {
            tracing::error!("Event service error: {}", e);
        }
    });

    let api_service = ApiService::new(context);
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_service.start(shutdown).await {
            tracing::error!("API service error: {}", e);
        }
    });

    // Wait for both services
    tokio::try_join!(event_handle, api_handle)?;

    Ok(())
}
