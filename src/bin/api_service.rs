use anyhow::Result;
use std::sync::Arc;
use swap_monitor::config::Config;
use swap_monitor::services::{shutdown_on_ctrl_c, ApiService, ServiceContext};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("🔧 启动独立API服务...");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    let context = Arc::new(ServiceContext::build(config).await?);

    // Create and start API service
    let api_service = ApiService::new(context);
    api_service.start(shutdown_on_ctrl_c()).await?;

    Ok(())
}
