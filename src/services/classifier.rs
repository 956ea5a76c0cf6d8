use anyhow::Result;
use ethers::types::U256;
use ethers::utils::format_units;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::price::PriceOracle;
use crate::config::ChainConfig;
use crate::event_listener::TokenDirectory;
use crate::types::{
    PoolTokens, PricingMode, PricingState, ProcessedSwap, RawSwapEvent, TokenInfo, TokenSlot,
    UnpricedReason,
};

/// 分类结果：属于被监控代币的交易，或者与配置无关的事件
#[derive(Debug, Clone)]
pub enum Classification {
    InScope(ProcessedSwap),
    OutOfScope,
}

/// 把原始 Swap 事件变成有方向、有 USD 估值的交易记录
pub struct SwapClassifier {
    chain: Arc<ChainConfig>,
    directory: Arc<dyn TokenDirectory>,
    oracle: Arc<PriceOracle>,
}

impl SwapClassifier {
    pub fn new(
        chain: Arc<ChainConfig>,
        directory: Arc<dyn TokenDirectory>,
        oracle: Arc<PriceOracle>,
    ) -> Self {
        Self {
            chain,
            directory,
            oracle,
        }
    }

    pub fn chain(&self) -> &Arc<ChainConfig> {
        &self.chain
    }

    pub fn oracle(&self) -> &Arc<PriceOracle> {
        &self.oracle
    }

    pub async fn classify(&self, raw: &RawSwapEvent, mode: PricingMode) -> Result<Classification> {
        let tokens = self.directory.pool_tokens(raw.pool_id).await?;

        let monitored_slot = match tokens.slot_of(self.chain.monitored_token) {
            Some(slot) => slot,
            None => {
                debug!(
                    "⏭️ [{}] 池子 0x{:x} 不包含被监控代币，跳过",
                    self.chain.name, raw.pool_id
                );
                return Ok(Classification::OutOfScope);
            }
        };

        let (meta0, meta1) = tokio::join!(
            self.directory.token_metadata(tokens.token0),
            self.directory.token_metadata(tokens.token1)
        );
        let token0 = meta0.into_info();
        let token1 = meta1.into_info();

        let is_buy = is_buy(raw, monitored_slot);
        // 池子付出的一边是交易者买到的币
        let (buy_slot, sell_slot) = if is_buy {
            (monitored_slot, monitored_slot.other())
        } else {
            (monitored_slot.other(), monitored_slot)
        };
        let info = |slot: TokenSlot| -> &TokenInfo {
            match slot {
                TokenSlot::Token0 => &token0,
                TokenSlot::Token1 => &token1,
            }
        };

        let buy_token = info(buy_slot).symbol.clone();
        let sell_token = info(sell_slot).symbol.clone();
        let buy_amount = format_token_amount(raw.delta(buy_slot), info(buy_slot).decimals);
        let sell_amount = format_token_amount(raw.delta(sell_slot), info(sell_slot).decimals);

        let (value_usd, pricing) = match native_slot(&self.chain, &tokens) {
            Some(slot) => self.price_native_leg(raw, mode, raw.delta(slot), info(slot).decimals).await,
            None => (
                None,
                PricingState::Unpriced {
                    reason: UnpricedReason::NoNativeLeg,
                },
            ),
        };

        Ok(Classification::InScope(ProcessedSwap {
            event: raw.clone(),
            chain_name: self.chain.name.clone(),
            is_buy,
            monitored_slot,
            buy_token,
            buy_amount,
            sell_token,
            sell_amount,
            value_usd,
            pricing,
            token0,
            token1,
        }))
    }

    async fn price_native_leg(
        &self,
        raw: &RawSwapEvent,
        mode: PricingMode,
        native_delta: i128,
        native_decimals: u8,
    ) -> (Option<Decimal>, PricingState) {
        let resolved = match mode {
            PricingMode::Live => self.oracle.current_price().await,
            PricingMode::Historical => self.oracle.price_at_block(raw.block_number).await,
        };

        match resolved {
            Ok(price) => match native_value_usd(native_delta, native_decimals, price.price) {
                Some(value) => (
                    Some(value),
                    PricingState::Priced {
                        source: price.source,
                        native_price_usd: price.price,
                    },
                ),
                None => (
                    None,
                    PricingState::Unpriced {
                        reason: UnpricedReason::PriceUnavailable,
                    },
                ),
            },
            Err(e) => {
                warn!(
                    "⚠️ [{}] 交易 0x{:x} 无法定价，按未定价记录: {}",
                    self.chain.name, raw.transaction_hash, e
                );
                (
                    None,
                    PricingState::Unpriced {
                        reason: UnpricedReason::PriceUnavailable,
                    },
                )
            }
        }
    }
}

/// 池子付出被监控代币（该槽位变化为负）即为买入
pub fn is_buy(raw: &RawSwapEvent, monitored_slot: TokenSlot) -> bool {
    raw.delta(monitored_slot) < 0
}

/// 原生资产或其包装代币所在的槽位，两边都是时取 token0
pub fn native_slot(chain: &ChainConfig, tokens: &PoolTokens) -> Option<TokenSlot> {
    if chain.is_native(tokens.token0) {
        Some(TokenSlot::Token0)
    } else if chain.is_native(tokens.token1) {
        Some(TokenSlot::Token1)
    } else {
        None
    }
}

/// 把带符号的原始数量按精度缩放成人类可读的绝对值
pub fn format_token_amount(delta: i128, decimals: u8) -> String {
    let raw = U256::from(delta.unsigned_abs());
    match format_units(raw, decimals as u32) {
        Ok(formatted) => trim_decimal(&formatted),
        Err(_) => raw.to_string(),
    }
}

fn trim_decimal(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    value.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// USD 价值 = 原生资产数量 × 单价
pub fn native_value_usd(native_delta: i128, decimals: u8, price: f64) -> Option<Decimal> {
    let amount = native_delta.unsigned_abs() as f64 / 10f64.powi(decimals as i32);
    let value = amount * price;
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|v| v.round_dp(12).normalize())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event_listener::PoolState;
    use crate::services::price::oracle::tests::FakeSource;
    use crate::services::price::{PriceCache, PriceSource};
    use crate::types::{TokenMetadata, NATIVE_ADDRESS};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ethers::types::{Address, H256};
    use std::str::FromStr;
    use std::collections::HashMap;

    pub(crate) fn eagle() -> Address {
        "0x474eD38C256A7FA0f3B8c48496CE1102ab0eA91E".parse().unwrap()
    }

    pub(crate) fn usdc() -> Address {
        "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap()
    }

    pub(crate) fn native_pool() -> H256 {
        H256::repeat_byte(0x11)
    }

    pub(crate) fn stable_pool() -> H256 {
        H256::repeat_byte(0x22)
    }

    pub(crate) fn foreign_pool() -> H256 {
        H256::repeat_byte(0x33)
    }

    pub(crate) fn chain_config() -> ChainConfig {
        ChainConfig::with_defaults(
            1,
            "http://localhost:8545",
            Address::repeat_byte(0x99),
            vec![native_pool(), stable_pool()],
            eagle(),
        )
        .unwrap()
    }

    /// 固定池子映射的测试目录：ETH/EAGLE、USDC/EAGLE、ETH/USDC
    pub(crate) struct FakeDirectory {
        pools: HashMap<H256, PoolTokens>,
    }

    impl FakeDirectory {
        pub(crate) fn new() -> Arc<Self> {
            let mut pools = HashMap::new();
            pools.insert(native_pool(), PoolTokens::new(NATIVE_ADDRESS, eagle()));
            pools.insert(stable_pool(), PoolTokens::new(usdc(), eagle()));
            pools.insert(foreign_pool(), PoolTokens::new(NATIVE_ADDRESS, usdc()));
            Arc::new(Self { pools })
        }
    }

    #[async_trait]
    impl TokenDirectory for FakeDirectory {
        async fn pool_tokens(&self, pool_id: H256) -> Result<PoolTokens> {
            self.pools
                .get(&pool_id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("unknown pool"))
        }

        async fn token_metadata(&self, token: Address) -> TokenMetadata {
            if token == NATIVE_ADDRESS {
                TokenMetadata::Resolved(TokenInfo::native("ETH", "Ethereum"))
            } else if token == eagle() {
                TokenMetadata::Resolved(TokenInfo {
                    address: token,
                    symbol: "EAGLE".to_string(),
                    name: "Eagle".to_string(),
                    decimals: 18,
                })
            } else if token == usdc() {
                TokenMetadata::Resolved(TokenInfo {
                    address: token,
                    symbol: "USDC".to_string(),
                    name: "USD Coin".to_string(),
                    decimals: 6,
                })
            } else {
                TokenMetadata::unknown(token)
            }
        }

        async fn pool_state(&self, pool_id: H256) -> Result<PoolState> {
            Ok(PoolState {
                pool_id,
                sqrt_price_x96: U256::from(1u128 << 96),
                tick: 0,
                protocol_fee: 0,
                lp_fee: 3000,
                liquidity: 1,
                price: 1.0,
            })
        }
    }

    pub(crate) fn oracle_at(price: f64) -> Arc<PriceOracle> {
        let source: Arc<dyn PriceSource> = FakeSource::new("chainlink", price);
        Arc::new(PriceOracle::new(vec![source], Arc::new(PriceCache::new())))
    }

    pub(crate) fn classifier_with(oracle: Arc<PriceOracle>) -> SwapClassifier {
        SwapClassifier::new(Arc::new(chain_config()), FakeDirectory::new(), oracle)
    }

    pub(crate) fn raw_swap(pool_id: H256, amount0: i128, amount1: i128, block: u64, log_index: u64) -> RawSwapEvent {
        RawSwapEvent {
            chain_id: 1,
            pool_id,
            sender: Address::repeat_byte(0x01),
            trader: Address::repeat_byte(0xaa),
            amount0,
            amount1,
            sqrt_price_x96: U256::from(1u128 << 96),
            liquidity: 1_000_000,
            tick: 0,
            fee: 3000,
            block_number: block,
            timestamp: Utc.timestamp_opt(1_700_000_000 + block as i64 * 12, 0).unwrap(),
            transaction_hash: H256::from_low_u64_be(block * 1000 + log_index),
            log_index,
        }
    }

    const ETH: i128 = 1_000_000_000_000_000_000;

    #[tokio::test]
    async fn test_buy_when_pool_pays_out_monitored_token() {
        let classifier = classifier_with(oracle_at(3_000.0));
        // 交易者付 0.5 ETH，池子付出 500 EAGLE
        let raw = raw_swap(native_pool(), ETH / 2, -500 * ETH, 100, 0);

        let swap = match classifier.classify(&raw, PricingMode::Live).await.unwrap() {
            Classification::InScope(swap) => swap,
            Classification::OutOfScope => panic!("expected in-scope swap"),
        };
        assert!(swap.is_buy);
        assert_eq!(swap.buy_token, "EAGLE");
        assert_eq!(swap.buy_amount, "500");
        assert_eq!(swap.sell_token, "ETH");
        assert_eq!(swap.sell_amount, "0.5");
        assert_eq!(swap.value_usd, Some(Decimal::from(1500)));
        assert_eq!(swap.monitored_slot, TokenSlot::Token1);
        assert!(matches!(swap.pricing, PricingState::Priced { .. }));
    }

    #[tokio::test]
    async fn test_sell_when_pool_receives_monitored_token() {
        let classifier = classifier_with(oracle_at(3_000.0));
        let raw = raw_swap(native_pool(), -ETH / 4, 500 * ETH, 100, 1);

        let swap = match classifier.classify(&raw, PricingMode::Historical).await.unwrap() {
            Classification::InScope(swap) => swap,
            Classification::OutOfScope => panic!("expected in-scope swap"),
        };
        assert!(!swap.is_buy);
        assert_eq!(swap.buy_token, "ETH");
        assert_eq!(swap.sell_token, "EAGLE");
        assert_eq!(swap.value_usd, Some(Decimal::from(750)));
    }

    #[tokio::test]
    async fn test_no_native_leg_is_unpriced_not_zero() {
        let classifier = classifier_with(oracle_at(3_000.0));
        let raw = raw_swap(stable_pool(), 1_000_000_000, -500 * ETH, 100, 0);

        let swap = match classifier.classify(&raw, PricingMode::Live).await.unwrap() {
            Classification::InScope(swap) => swap,
            Classification::OutOfScope => panic!("expected in-scope swap"),
        };
        assert_eq!(swap.value_usd, None);
        assert_eq!(
            swap.pricing,
            PricingState::Unpriced {
                reason: UnpricedReason::NoNativeLeg
            }
        );
        assert_eq!(swap.sell_amount, "1000");
    }

    #[tokio::test]
    async fn test_all_price_sources_down_without_emergency_is_unpriced() {
        let source: Arc<dyn PriceSource> = FakeSource::failing("chainlink");
        let oracle = Arc::new(
            PriceOracle::new(vec![source], Arc::new(PriceCache::new())).with_emergency_price(None),
        );
        let classifier = classifier_with(oracle);
        let raw = raw_swap(native_pool(), ETH, -10 * ETH, 100, 0);

        match classifier.classify(&raw, PricingMode::Live).await.unwrap() {
            Classification::InScope(swap) => {
                assert_eq!(swap.value_usd, None);
                assert_eq!(
                    swap.pricing,
                    PricingState::Unpriced {
                        reason: UnpricedReason::PriceUnavailable
                    }
                );
            }
            Classification::OutOfScope => panic!("expected in-scope swap"),
        }
    }

    #[tokio::test]
    async fn test_pool_without_monitored_token_is_out_of_scope() {
        let classifier = classifier_with(oracle_at(3_000.0));
        let raw = raw_swap(foreign_pool(), ETH, -3_000_000_000, 100, 0);
        assert!(matches!(
            classifier.classify(&raw, PricingMode::Live).await.unwrap(),
            Classification::OutOfScope
        ));
    }

    #[test]
    fn test_amount_and_value_helpers() {
        assert_eq!(format_token_amount(-1_500_000, 6), "1.5");
        assert_eq!(format_token_amount(2 * ETH, 18), "2");
        assert_eq!(format_token_amount(1, 18), "0.000000000000000001");
        assert_eq!(native_value_usd(-ETH, 18, 3_412.5), Some(Decimal::from_str("3412.5").unwrap()));
        assert_eq!(
            native_value_usd(1_000_000_000_000, 18, 3_000.0),
            Some(Decimal::from_str("0.003").unwrap())
        );

        let chain = chain_config();
        let weth_pool = PoolTokens::new(eagle(), chain.wrapped_native);
        assert_eq!(native_slot(&chain, &weth_pool), Some(TokenSlot::Token1));
        assert_eq!(native_slot(&chain, &PoolTokens::new(usdc(), eagle())), None);
    }
}
