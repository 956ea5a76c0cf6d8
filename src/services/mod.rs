pub mod api_service;
pub mod backfill;
pub mod classifier;
pub mod context;
pub mod event_service;
pub mod monitor;
pub mod notification;
pub mod pipeline;
pub mod price;

pub use api_service::ApiService;
pub use backfill::{plan_chunks, BackfillCoordinator};
pub use classifier::{Classification, SwapClassifier};
pub use context::{ChainRuntime, ServiceContext};
pub use event_service::EventService;
pub use monitor::{LiveDisposition, SwapMonitor};
pub use notification::{
    AlertDecision, LogNotifier, MessageRenderer, MessageTheme, NotificationDispatcher, Notifier,
    RenderedMessage, TelegramNotifier,
};
pub use pipeline::{PipelineOutcome, SwapPipeline};
pub use price::{PriceCache, PriceOracle, PriceSource};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Ctrl+C 时触发关闭信号
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 收到关闭信号，正在停止...");
                trigger.cancel();
            }
            Err(e) => error!("❌ 无法监听关闭信号: {}", e),
        }
    });
    shutdown
}
