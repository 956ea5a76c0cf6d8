use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::{PoolTokens, RawSwapEvent, TokenMetadata};

/// 无法解码的日志，回填时跳过并计数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLog {
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<u64>,
    pub reason: String,
}

impl fmt::Display for MalformedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.transaction_hash, self.log_index) {
            (Some(hash), Some(index)) => write!(f, "0x{:x}#{}: {}", hash, index, self.reason),
            _ => write!(f, "block {:?}: {}", self.block_number, self.reason),
        }
    }
}

pub type FetchedLog = std::result::Result<RawSwapEvent, MalformedLog>;

/// 实时订阅的结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// 调用方主动停止
    Stopped,
    /// RPC 连续失败，调用方应从 `resume_from` 重新订阅；为 0 表示断点未知
    Dropped { resume_from: u64, error: String },
}

/// 一个活跃的实时订阅，持有者负责停止它
pub struct LiveSubscription {
    cancel: CancellationToken,
    handle: JoinHandle<SubscriptionEnd>,
}

impl LiveSubscription {
    pub fn new(cancel: CancellationToken, handle: JoinHandle<SubscriptionEnd>) -> Self {
        Self { cancel, handle }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待订阅结束（停止或掉线）
    pub async fn join(self) -> SubscriptionEnd {
        match self.handle.await {
            Ok(end) => end,
            Err(e) => SubscriptionEnd::Dropped {
                resume_from: 0,
                error: format!("订阅任务异常退出: {}", e),
            },
        }
    }
}

/// 链上 Swap 事件的两种来源：实时订阅和有界区块范围查询
#[async_trait]
pub trait EventSource: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn current_block(&self) -> Result<u64>;

    /// 从 `from_block`（默认当前区块之后）开始，把每个新观察到的事件送入 `sink`
    async fn subscribe_live(
        &self,
        from_block: Option<u64>,
        sink: mpsc::Sender<RawSwapEvent>,
    ) -> Result<LiveSubscription>;

    /// 查询闭区间 [from, to]，按 (区块, 日志序号) 排序；每次调用都是独立的结果
    async fn query_range(&self, from_block: u64, to_block: u64) -> Result<Vec<FetchedLog>>;
}

/// 池子链上状态（getPool / getLiquidity）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub pool_id: H256,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub protocol_fee: u32,
    pub lp_fee: u32,
    pub liquidity: u128,
    /// token1 / token0 的原始价格（未按精度调整）
    pub price: f64,
}

/// 池子币种与代币元数据查询
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn pool_tokens(&self, pool_id: H256) -> Result<PoolTokens>;

    /// 永不失败：查询失败时返回 `TokenMetadata::Unknown`
    async fn token_metadata(&self, token: Address) -> TokenMetadata;

    async fn pool_state(&self, pool_id: H256) -> Result<PoolState>;
}

/// 由 sqrtPriceX96 计算 token1/token0 的原始价格
pub fn price_from_sqrt_x96(sqrt_price_x96: U256) -> f64 {
    let q96 = 2f64.powi(96);
    let sqrt = u256_to_f64(sqrt_price_x96) / q96;
    sqrt * sqrt
}

fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0f64, |acc, limb| acc * 18_446_744_073_709_551_616f64 + *limb as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_from_sqrt_x96() {
        // sqrtPriceX96 = 2^96 => price 1
        let one = U256::from(1u128 << 96);
        assert!((price_from_sqrt_x96(one) - 1.0).abs() < 1e-12);

        // sqrtPriceX96 = 2 * 2^96 => price 4
        let two = U256::from(1u128 << 97);
        assert!((price_from_sqrt_x96(two) - 4.0).abs() < 1e-12);
        assert_eq!(price_from_sqrt_x96(U256::zero()), 0.0);
    }

    #[test]
    fn test_malformed_log_display() {
        let log = MalformedLog {
            block_number: Some(10),
            transaction_hash: Some(H256::from_low_u64_be(0xab)),
            log_index: Some(3),
            reason: "data too short".into(),
        };
        assert!(log.to_string().ends_with("ab#3: data too short"));
    }
}
