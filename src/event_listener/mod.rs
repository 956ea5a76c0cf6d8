pub mod block_cursor;
pub mod chain;
pub mod pool_manager;
pub mod source;

pub use block_cursor::BlockCursor;
pub use chain::{EthersChain, LIVE_MAX_FAILURES};
pub use source::{
    EventSource, FetchedLog, LiveSubscription, MalformedLog, PoolState, SubscriptionEnd,
    TokenDirectory,
};

use crate::config::ChainConfig;
use anyhow::Result;
use ethers::providers::{Http, Provider, Ws};
use std::sync::Arc;
use tracing::info;

/// 按 URL 协议选择的 RPC 传输
pub enum ChainProvider {
    Ws(Arc<Provider<Ws>>),
    Http(Arc<Provider<Http>>),
}

pub async fn connect_provider(config: &ChainConfig) -> Result<ChainProvider> {
    let url = config.rpc_url.as_str();
    if url.starts_with("ws://") || url.starts_with("wss://") {
        info!("🔌 链 {}: 使用 WebSocket 连接", config.name);
        let provider = Provider::<Ws>::connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("链 {} WebSocket 连接失败: {}", config.name, e))?;
        Ok(ChainProvider::Ws(Arc::new(provider.interval(config.poll_interval()))))
    } else {
        info!("🔌 链 {}: 使用 HTTP 轮询", config.name);
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| anyhow::anyhow!("链 {} RPC 地址无效: {}", config.name, e))?;
        Ok(ChainProvider::Http(Arc::new(provider.interval(config.poll_interval()))))
    }
}
