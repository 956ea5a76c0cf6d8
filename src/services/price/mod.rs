pub mod cache;
pub mod chainlink;
pub mod http_sources;
pub mod oracle;

pub use cache::PriceCache;
pub use chainlink::ChainlinkSource;
pub use http_sources::{CoinGeckoSource, DexScreenerSource, EtherscanSource};
pub use oracle::{PriceOracle, PriceStatus};

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::types::PriceQuote;

/// 一个"当前价格"来源（链上喂价或 HTTP API）
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// 报价在缓存中被视为新鲜的时长
    fn cache_ttl(&self) -> Duration;

    async fn fetch_current(&self) -> Result<PriceQuote>;
}

/// 支持按区块高度读取价格的来源
#[async_trait]
pub trait HistoricalPriceSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    async fn quote_at_block(&self, block_number: u64) -> Result<PriceQuote>;
}
