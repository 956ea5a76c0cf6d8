use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::{
    providers::Middleware,
    types::{Address, BlockId, I256, U256},
    utils::format_units,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

use super::{HistoricalPriceSource, PriceSource};
use crate::event_listener::chain::RPC_TIMEOUT;
use crate::types::PriceQuote;

ethers::contract::abigen!(
    ChainlinkAggregator,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
        function decimals() external view returns (uint8)
    ]"#,
);

pub const CHAINLINK_SOURCE: &str = "chainlink";

/// 链上 ETH/USD 喂价：最可信的来源，支持按区块读取
pub struct ChainlinkSource<M> {
    aggregator: ChainlinkAggregator<M>,
    provider: Arc<M>,
}

impl<M: Middleware + 'static> ChainlinkSource<M> {
    pub fn new(feed: Address, provider: Arc<M>) -> Self {
        info!("📡 Chainlink 喂价合约: 0x{:x}", feed);
        Self {
            aggregator: ChainlinkAggregator::new(feed, Arc::clone(&provider)),
            provider,
        }
    }

    async fn read_round(&self, block: Option<BlockId>) -> Result<PriceQuote> {
        let mut round_call = self.aggregator.latest_round_data();
        let mut decimals_call = self.aggregator.decimals();
        if let Some(block) = block {
            round_call = round_call.block(block);
            decimals_call = decimals_call.block(block);
        }

        let (round, decimals) = timeout(RPC_TIMEOUT, async {
            tokio::join!(round_call.call(), decimals_call.call())
        })
        .await
        .map_err(|_| anyhow::anyhow!("Chainlink 调用超时 ({}s)", RPC_TIMEOUT.as_secs()))?;
        let (round_id, answer, _started_at, updated_at, answered_in_round) =
            round.map_err(|e| anyhow::anyhow!("latestRoundData 调用失败: {}", e))?;
        let decimals = decimals.map_err(|e| anyhow::anyhow!("decimals 调用失败: {}", e))?;

        quote_from_round(round_id, answer, updated_at, answered_in_round, decimals)
    }
}

/// 校验一轮喂价数据并换算成报价
pub fn quote_from_round(
    round_id: u128,
    answer: I256,
    updated_at: U256,
    answered_in_round: u128,
    decimals: u8,
) -> Result<PriceQuote> {
    if answered_in_round < round_id {
        return Err(anyhow::anyhow!(
            "Chainlink 数据无效: answeredInRound {} < roundId {}",
            answered_in_round,
            round_id
        ));
    }
    if answer <= I256::zero() {
        return Err(anyhow::anyhow!("Chainlink 价格无效: {}", answer));
    }

    let price: f64 = format_units(answer, decimals as u32)
        .map_err(|e| anyhow::anyhow!("Chainlink 价格换算失败: {}", e))?
        .parse()?;
    let updated_at = DateTime::<Utc>::from_timestamp(updated_at.low_u64() as i64, 0)
        .ok_or_else(|| anyhow::anyhow!("Chainlink 更新时间无效: {}", updated_at))?;

    Ok(PriceQuote::new(CHAINLINK_SOURCE, price, decimals, updated_at).with_round_id(round_id))
}

#[async_trait]
impl<M: Middleware + 'static> PriceSource for ChainlinkSource<M> {
    fn name(&self) -> &str {
        CHAINLINK_SOURCE
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn fetch_current(&self) -> Result<PriceQuote> {
        let quote = self.read_round(None).await?;
        let age_min = quote.update_age_secs(Utc::now()) / 60;
        info!("📊 Chainlink ETH/USD: ${:.2} ({} 分钟前更新)", quote.price, age_min);
        Ok(quote)
    }
}

#[async_trait]
impl<M: Middleware + 'static> HistoricalPriceSource for ChainlinkSource<M> {
    async fn latest_block(&self) -> Result<u64> {
        let latest = timeout(RPC_TIMEOUT, self.provider.get_block_number())
            .await
            .map_err(|_| anyhow::anyhow!("获取最新区块超时 ({}s)", RPC_TIMEOUT.as_secs()))?
            .map_err(|e| anyhow::anyhow!("获取最新区块失败: {}", e))?;
        Ok(latest.as_u64())
    }

    async fn quote_at_block(&self, block_number: u64) -> Result<PriceQuote> {
        self.read_round(Some(BlockId::from(block_number))).await
    }
}
