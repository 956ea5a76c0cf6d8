use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::context::ServiceContext;
use super::monitor::SwapMonitor;

/// 对所有启用的链运行实时监控
pub struct EventService {
    context: Arc<ServiceContext>,
}

impl EventService {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        info!("🚀 启动事件监听服务...");

        let mut handles = Vec::new();
        for runtime in self.context.chains.values() {
            info!(
                "Starting monitoring for chain {} ({})",
                runtime.config.chain_id, runtime.config.name
            );

            let monitor = SwapMonitor::new(
                runtime.config.clone(),
                runtime.source.clone(),
                runtime.pipeline.clone(),
                runtime.dispatcher.clone(),
            );
            let chain_id = runtime.config.chain_id;
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                if let Err(e) = monitor.run(shutdown).await {
                    error!("Event monitor error for chain {}: {}", chain_id, e);
                }
            }));
        }

        for handle in handles {
            handle.await?;
        }

        info!("👋 事件监听服务已停止");
        Ok(())
    }
}
