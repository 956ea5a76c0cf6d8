use anyhow::Result;
use std::sync::Arc;
use swap_monitor::services::{shutdown_on_ctrl_c, EventService, ServiceContext};
use swap_monitor::Config;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("🔧 启动独立事件监听服务...");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    let context = Arc::new(ServiceContext::build(config).await?);

    // Create and start event service
    let event_service = EventService::new(context);
    event_service.start(shutdown_on_ctrl_c()).await?;

    Ok(())
}
