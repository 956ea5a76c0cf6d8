use chrono::{DateTime, Utc};
use ethers::{
    contract::{abigen, EthEvent},
    core::abi::RawLog,
    types::{Address, Log, H256, U256},
};

use super::source::MalformedLog;
use crate::types::RawSwapEvent;

abigen!(
    PoolManager,
    r#"[
        event Swap(bytes32 indexed id, address indexed sender, int128 amount0, int128 amount1, uint160 sqrtPriceX96, uint128 liquidity, int24 tick, uint24 fee)
        event Initialize(bytes32 indexed id, address indexed currency0, address indexed currency1, uint24 fee, int24 tickSpacing, address hooks, uint160 sqrtPriceX96, int24 tick)
        function getPool(bytes32 id) external view returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee)
        function getLiquidity(bytes32 id) external view returns (uint128 liquidity)
    ]"#
);

abigen!(
    Erc20Metadata,
    r#"[
        function symbol() external view returns (string)
        function name() external view returns (string)
        function decimals() external view returns (uint8)
    ]"#
);

pub fn swap_topic() -> H256 {
    SwapFilter::signature()
}

pub fn initialize_topic() -> H256 {
    InitializeFilter::signature()
}

/// 已解码但尚未补全时间戳 / 交易发起人的 Swap
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSwap {
    pub pool_id: H256,
    pub sender: Address,
    pub amount0: i128,
    pub amount1: i128,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
    pub fee: u32,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl DecodedSwap {
    pub fn into_event(self, chain_id: u64, timestamp: DateTime<Utc>, trader: Address) -> RawSwapEvent {
        RawSwapEvent {
            chain_id,
            pool_id: self.pool_id,
            sender: self.sender,
            trader,
            amount0: self.amount0,
            amount1: self.amount1,
            sqrt_price_x96: self.sqrt_price_x96,
            liquidity: self.liquidity,
            tick: self.tick,
            fee: self.fee,
            block_number: self.block_number,
            timestamp,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

/// 解码 PoolManager 的 Swap 日志；缺少区块/交易元数据的日志视为无效
pub fn decode_swap_log(log: &Log) -> Result<DecodedSwap, MalformedLog> {
    let malformed = |reason: String| MalformedLog {
        block_number: log.block_number.map(|b| b.as_u64()),
        transaction_hash: log.transaction_hash,
        log_index: log.log_index.map(|i| i.as_u64()),
        reason,
    };

    if log.topics.first() != Some(&swap_topic()) {
        return Err(malformed("不是 Swap 事件".to_string()));
    }
    if log.removed == Some(true) {
        return Err(malformed("日志已因重组被移除".to_string()));
    }

    let block_number = log
        .block_number
        .ok_or_else(|| malformed("缺少区块号".to_string()))?
        .as_u64();
    let transaction_hash = log
        .transaction_hash
        .ok_or_else(|| malformed("缺少交易哈希".to_string()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| malformed("缺少日志序号".to_string()))?
        .as_u64();

    let event = <SwapFilter as EthEvent>::decode_log(&RawLog {
        topics: log.topics.clone(),
        data: log.data.0.to_vec(),
    })
    .map_err(|e| malformed(format!("Swap 事件解析失败: {} (data=0x{})", e, hex::encode(&log.data))))?;

    Ok(DecodedSwap {
        pool_id: H256::from(event.id),
        sender: event.sender,
        amount0: event.amount_0,
        amount1: event.amount_1,
        sqrt_price_x96: event.sqrt_price_x96,
        liquidity: event.liquidity,
        tick: event.tick,
        fee: event.fee,
        block_number,
        transaction_hash,
        log_index,
    })
}

/// 解码 Initialize 日志，返回 (池子 id, currency0, currency1)
pub fn decode_initialize_log(log: &Log) -> Option<(H256, Address, Address)> {
    if log.topics.first() != Some(&initialize_topic()) {
        return None;
    }
    <InitializeFilter as EthEvent>::decode_log(&RawLog {
        topics: log.topics.clone(),
        data: log.data.0.to_vec(),
    })
    .ok()
    .map(|event| (H256::from(event.id), event.currency_0, event.currency_1))
}
