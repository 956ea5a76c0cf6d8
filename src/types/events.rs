use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::wallet::TradeTier;

/// 原生资产（ETH）在池子里的占位地址
pub const NATIVE_ADDRESS: Address = Address::zero();

/// 链上观察到的一次 Swap 事件，观察后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSwapEvent {
    pub chain_id: u64,
    pub pool_id: H256,
    /// 调用池子的合约（通常是路由）
    pub sender: Address,
    /// 交易发起人 tx.from，钱包统计以它为键
    pub trader: Address,
    pub amount0: i128,
    pub amount1: i128,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
    pub fee: u32,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl RawSwapEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    /// 指定槽位的池子余额变化（负数 = 池子付出）
    pub fn delta(&self, slot: TokenSlot) -> i128 {
        match slot {
            TokenSlot::Token0 => self.amount0,
            TokenSlot::Token1 => self.amount1,
        }
    }
}

/// 去重键：(交易哈希, 日志序号)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}#{}", self.transaction_hash, self.log_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSlot {
    Token0,
    Token1,
}

impl TokenSlot {
    pub fn other(self) -> Self {
        match self {
            TokenSlot::Token0 => TokenSlot::Token1,
            TokenSlot::Token1 => TokenSlot::Token0,
        }
    }
}

/// 池子的两个币种（currency0 / currency1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTokens {
    pub token0: Address,
    pub token1: Address,
}

impl PoolTokens {
    pub fn new(token0: Address, token1: Address) -> Self {
        Self { token0, token1 }
    }

    pub fn address(&self, slot: TokenSlot) -> Address {
        match slot {
            TokenSlot::Token0 => self.token0,
            TokenSlot::Token1 => self.token1,
        }
    }

    pub fn slot_of(&self, token: Address) -> Option<TokenSlot> {
        if self.token0 == token {
            Some(TokenSlot::Token0)
        } else if self.token1 == token {
            Some(TokenSlot::Token1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub const DEFAULT_DECIMALS: u8 = 18;

    pub fn native(symbol: &str, name: &str) -> Self {
        Self {
            address: NATIVE_ADDRESS,
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals: 18,
        }
    }
}

/// 代币元数据查询结果：完整解析，或者带占位符的 "unknown"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenMetadata {
    Resolved(TokenInfo),
    Unknown(TokenInfo),
}

impl TokenMetadata {
    pub fn unknown(address: Address) -> Self {
        TokenMetadata::Unknown(TokenInfo {
            address,
            symbol: "UNKNOWN".to_string(),
            name: "Unknown Token".to_string(),
            decimals: TokenInfo::DEFAULT_DECIMALS,
        })
    }

    pub fn info(&self) -> &TokenInfo {
        match self {
            TokenMetadata::Resolved(info) | TokenMetadata::Unknown(info) => info,
        }
    }

    pub fn into_info(self) -> TokenInfo {
        match self {
            TokenMetadata::Resolved(info) | TokenMetadata::Unknown(info) => info,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, TokenMetadata::Resolved(_))
    }
}

/// 定价模式：实时事件用当前价格，回填事件用所在区块的价格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingMode {
    Live,
    Historical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpricedReason {
    /// 两边都不是原生资产或其包装代币
    NoNativeLeg,
    /// 所有价格源都失败了
    PriceUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PricingState {
    Priced { source: String, native_price_usd: f64 },
    Unpriced { reason: UnpricedReason },
}

/// 分类、定价之后的交易记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSwap {
    pub event: RawSwapEvent,
    pub chain_name: String,
    /// 相对于被监控代币：池子付出被监控代币 = 买入
    pub is_buy: bool,
    pub monitored_slot: TokenSlot,
    pub buy_token: String,
    pub buy_amount: String,
    pub sell_token: String,
    pub sell_amount: String,
    pub value_usd: Option<Decimal>,
    pub pricing: PricingState,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
}

impl ProcessedSwap {
    pub fn dedup_key(&self) -> DedupKey {
        self.event.dedup_key()
    }

    pub fn trader(&self) -> Address {
        self.event.trader
    }

    pub fn token(&self, slot: TokenSlot) -> &TokenInfo {
        match slot {
            TokenSlot::Token0 => &self.token0,
            TokenSlot::Token1 => &self.token1,
        }
    }

    pub fn monitored_token(&self) -> &TokenInfo {
        self.token(self.monitored_slot)
    }

    pub fn counter_token(&self) -> &TokenInfo {
        self.token(self.monitored_slot.other())
    }

    pub fn is_priced(&self) -> bool {
        self.value_usd.is_some()
    }

    pub fn tier(&self) -> TradeTier {
        TradeTier::for_value(self.value_usd)
    }
}

/// save_swap 成功写入后返回的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSwap {
    pub id: Uuid,
    pub chain_id: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
    pub pool_id: H256,
    pub trader: Address,
    pub is_buy: bool,
    pub value_usd: Option<Decimal>,
    pub tier: TradeTier,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SavedSwap {
    pub fn from_processed(swap: &ProcessedSwap) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id: swap.event.chain_id,
            transaction_hash: swap.event.transaction_hash,
            log_index: swap.event.log_index,
            pool_id: swap.event.pool_id,
            trader: swap.event.trader,
            is_buy: swap.is_buy,
            value_usd: swap.value_usd,
            tier: swap.tier(),
            block_number: swap.event.block_number,
            timestamp: swap.event.timestamp,
            created_at: Utc::now(),
        }
    }
}
