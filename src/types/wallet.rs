use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::events::ProcessedSwap;

/// 单笔交易的规模档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeTier {
    Standard,
    Micro,
    Shrimp,
    Fish,
    Dolphin,
    Shark,
    Whale,
    MegaWhale,
    Legendary,
}

impl TradeTier {
    pub fn for_value(value_usd: Option<Decimal>) -> Self {
        let value = match value_usd {
            Some(v) if v > Decimal::ZERO => v,
            _ => return TradeTier::Standard,
        };

        if value >= Decimal::from(1_000_000) {
            TradeTier::Legendary
        } else if value >= Decimal::from(500_000) {
            TradeTier::MegaWhale
        } else if value >= Decimal::from(100_000) {
            TradeTier::Whale
        } else if value >= Decimal::from(50_000) {
            TradeTier::Shark
        } else if value >= Decimal::from(10_000) {
            TradeTier::Dolphin
        } else if value >= Decimal::from(5_000) {
            TradeTier::Fish
        } else if value >= Decimal::from(1_000) {
            TradeTier::Shrimp
        } else {
            TradeTier::Micro
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeTier::Standard => "STANDARD",
            TradeTier::Micro => "MICRO",
            TradeTier::Shrimp => "SHRIMP",
            TradeTier::Fish => "FISH",
            TradeTier::Dolphin => "DOLPHIN",
            TradeTier::Shark => "SHARK",
            TradeTier::Whale => "WHALE",
            TradeTier::MegaWhale => "MEGA WHALE",
            TradeTier::Legendary => "LEGENDARY",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MICRO" => TradeTier::Micro,
            "SHRIMP" => TradeTier::Shrimp,
            "FISH" => TradeTier::Fish,
            "DOLPHIN" => TradeTier::Dolphin,
            "SHARK" => TradeTier::Shark,
            "WHALE" => TradeTier::Whale,
            "MEGA WHALE" | "MEGA_WHALE" => TradeTier::MegaWhale,
            "LEGENDARY" => TradeTier::Legendary,
            _ => TradeTier::Standard,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TradeTier::Standard => "📊",
            TradeTier::Micro => "🔬",
            TradeTier::Shrimp => "🦐",
            TradeTier::Fish => "🐟",
            TradeTier::Dolphin => "🐬",
            TradeTier::Shark => "🦈",
            TradeTier::Whale => "🐳",
            TradeTier::MegaWhale => "🐋",
            TradeTier::Legendary => "👑",
        }
    }
}

/// 钱包分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTier {
    MegaWhale,
    Whale,
    SmartMoney,
    BigFish,
    ActiveTrader,
    RegularTrader,
    SmallTrader,
}

impl WalletTier {
    pub fn classify(total_volume_usd: Decimal, avg_buy_size: Decimal, buy_count: u64) -> Self {
        if total_volume_usd > Decimal::from(500_000) {
            WalletTier::MegaWhale
        } else if total_volume_usd > Decimal::from(100_000) {
            WalletTier::Whale
        } else if avg_buy_size > Decimal::from(50_000) && buy_count > 5 {
            WalletTier::SmartMoney
        } else if total_volume_usd > Decimal::from(50_000) {
            WalletTier::BigFish
        } else if avg_buy_size > Decimal::from(10_000) {
            WalletTier::ActiveTrader
        } else if total_volume_usd > Decimal::from(10_000) {
            WalletTier::RegularTrader
        } else {
            WalletTier::SmallTrader
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WalletTier::MegaWhale => "Mega Whale",
            WalletTier::Whale => "Whale",
            WalletTier::SmartMoney => "Smart Money",
            WalletTier::BigFish => "Big Fish",
            WalletTier::ActiveTrader => "Active Trader",
            WalletTier::RegularTrader => "Regular Trader",
            WalletTier::SmallTrader => "Small Trader",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "Mega Whale" => WalletTier::MegaWhale,
            "Whale" => WalletTier::Whale,
            "Smart Money" => WalletTier::SmartMoney,
            "Big Fish" => WalletTier::BigFish,
            "Active Trader" => WalletTier::ActiveTrader,
            "Regular Trader" => WalletTier::RegularTrader,
            _ => WalletTier::SmallTrader,
        }
    }

    pub fn indicator(&self) -> &'static str {
        match self {
            WalletTier::MegaWhale => "🐋",
            WalletTier::Whale => "🐳",
            WalletTier::SmartMoney => "⚡",
            WalletTier::BigFish => "🦈",
            WalletTier::ActiveTrader => "💼",
            WalletTier::RegularTrader | WalletTier::SmallTrader => "▪",
        }
    }
}

/// 钱包的累计统计，每条新入库的交易增量更新一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub address: Address,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_swaps: u64,
    pub buy_count: u64,
    pub sell_count: u64,
    pub total_volume_usd: Decimal,
    /// 有 USD 估值的买入笔数，平均买入额的分母
    pub priced_buy_count: u64,
    pub avg_buy_size: Decimal,
    pub largest_buy: Decimal,
    /// 卖出额高于当时平均买入额的次数
    pub profitable_tokens: u64,
    pub classification: WalletTier,
    pub is_tracked: bool,
    pub is_muted: bool,
    pub label: Option<String>,
}

impl WalletStats {
    pub fn new(address: Address, seen: DateTime<Utc>) -> Self {
        Self {
            address,
            first_seen: seen,
            last_seen: seen,
            total_swaps: 0,
            buy_count: 0,
            sell_count: 0,
            total_volume_usd: Decimal::ZERO,
            priced_buy_count: 0,
            avg_buy_size: Decimal::ZERO,
            largest_buy: Decimal::ZERO,
            profitable_tokens: 0,
            classification: WalletTier::SmallTrader,
            is_tracked: false,
            is_muted: false,
            label: None,
        }
    }

    /// 把一笔新交易折叠进统计，不重新扫描历史
    pub fn record_swap(&mut self, swap: &ProcessedSwap) {
        let seen = swap.event.timestamp;
        if self.total_swaps == 0 {
            self.first_seen = seen;
            self.last_seen = seen;
        } else {
            self.first_seen = self.first_seen.min(seen);
            self.last_seen = self.last_seen.max(seen);
        }

        self.total_swaps += 1;
        if swap.is_buy {
            self.buy_count += 1;
        } else {
            self.sell_count += 1;
        }

        if let Some(value) = swap.value_usd {
            self.total_volume_usd += value;

            if swap.is_buy {
                let priced = Decimal::from(self.priced_buy_count);
                self.avg_buy_size = (self.avg_buy_size * priced + value) / (priced + Decimal::ONE);
                self.priced_buy_count += 1;
                self.largest_buy = self.largest_buy.max(value);
            } else if self.avg_buy_size > Decimal::ZERO && value > self.avg_buy_size {
                self.profitable_tokens += 1;
            }
        }

        self.classification =
            WalletTier::classify(self.total_volume_usd, self.avg_buy_size, self.buy_count);
    }

    /// 胜率：盈利卖出 / 卖出总数
    pub fn win_rate(&self) -> Option<f64> {
        if self.sell_count == 0 || self.profitable_tokens == 0 {
            return None;
        }
        Some(self.profitable_tokens as f64 / self.sell_count as f64)
    }
}

/// 告警设置（单例）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub min_threshold_usd: Decimal,
    pub max_threshold_usd: Option<Decimal>,
    pub show_small_trades: bool,
    pub enable_whale_alerts: bool,
    pub enable_smart_money_alerts: bool,
}

impl AlertSettings {
    pub const SMALL_TRADE_USD: i64 = 1_000;

    pub fn with_min_threshold(min_threshold_usd: Decimal) -> Self {
        Self {
            min_threshold_usd,
            ..Self::default()
        }
    }

    /// 实时通知的 USD 过滤；未定价的交易不参与 USD 过滤
    pub fn allows(&self, swap: &ProcessedSwap) -> bool {
        let value = match swap.value_usd {
            Some(value) => value,
            None => return true,
        };

        if value < self.min_threshold_usd {
            return false;
        }
        if let Some(max) = self.max_threshold_usd {
            if value > max {
                return false;
            }
        }
        if !self.show_small_trades && value < Decimal::from(Self::SMALL_TRADE_USD) {
            return false;
        }
        true
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            min_threshold_usd: Decimal::ZERO,
            max_threshold_usd: None,
            show_small_trades: true,
            enable_whale_alerts: true,
            enable_smart_money_alerts: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PricingState, RawSwapEvent, TokenInfo, TokenSlot, UnpricedReason};
    use chrono::TimeZone;
    use ethers::types::{H256, U256};

    fn swap(is_buy: bool, value: Option<i64>, ts: i64) -> ProcessedSwap {
        let token = TokenInfo::native("ETH", "Ether");
        ProcessedSwap {
            event: RawSwapEvent {
                chain_id: 1,
                pool_id: H256::zero(),
                sender: Address::zero(),
                trader: Address::repeat_byte(0xaa),
                amount0: 0,
                amount1: 0,
                sqrt_price_x96: U256::zero(),
                liquidity: 0,
                tick: 0,
                fee: 0,
                block_number: 1,
                timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
                transaction_hash: H256::zero(),
                log_index: 0,
            },
            chain_name: "Ethereum".to_string(),
            is_buy,
            monitored_slot: TokenSlot::Token1,
            buy_token: String::new(),
            buy_amount: String::new(),
            sell_token: String::new(),
            sell_amount: String::new(),
            value_usd: value.map(Decimal::from),
            pricing: PricingState::Unpriced { reason: UnpricedReason::NoNativeLeg },
            token0: token.clone(),
            token1: token,
        }
    }

    #[test]
    fn test_record_swap_incremental_averages() {
        let mut stats = WalletStats::new(Address::repeat_byte(0xaa), Utc::now());

        stats.record_swap(&swap(true, Some(1_000), 100));
        stats.record_swap(&swap(true, Some(3_000), 200));
        stats.record_swap(&swap(true, None, 300));

        assert_eq!(stats.total_swaps, 3);
        assert_eq!(stats.buy_count, 3);
        assert_eq!(stats.priced_buy_count, 2);
        assert_eq!(stats.total_volume_usd, Decimal::from(4_000));
        // 未定价的买入不拉低平均值
        assert_eq!(stats.avg_buy_size, Decimal::from(2_000));
        assert_eq!(stats.largest_buy, Decimal::from(3_000));
    }

    #[test]
    fn test_first_and_last_seen_follow_chain_time() {
        let mut stats = WalletStats::new(Address::repeat_byte(0xaa), Utc::now());

        stats.record_swap(&swap(true, Some(10), 500));
        stats.record_swap(&swap(false, Some(10), 100));
        stats.record_swap(&swap(true, Some(10), 900));

        assert_eq!(stats.first_seen.timestamp(), 100);
        assert_eq!(stats.last_seen.timestamp(), 900);
        assert_eq!(stats.sell_count, 1);
    }

    #[test]
    fn test_profitable_sells_drive_win_rate() {
        let mut stats = WalletStats::new(Address::repeat_byte(0xaa), Utc::now());
        assert_eq!(stats.win_rate(), None);

        stats.record_swap(&swap(true, Some(1_000), 1));
        stats.record_swap(&swap(false, Some(1_500), 2));
        stats.record_swap(&swap(false, Some(500), 3));

        assert_eq!(stats.profitable_tokens, 1);
        assert_eq!(stats.win_rate(), Some(0.5));
    }

    #[test]
    fn test_wallet_classification_thresholds() {
        assert_eq!(
            WalletTier::classify(Decimal::from(600_000), Decimal::ZERO, 0),
            WalletTier::MegaWhale
        );
        assert_eq!(
            WalletTier::classify(Decimal::from(90_000), Decimal::from(60_000), 6),
            WalletTier::SmartMoney
        );
        assert_eq!(
            WalletTier::classify(Decimal::from(90_000), Decimal::from(60_000), 2),
            WalletTier::BigFish
        );
        assert_eq!(
            WalletTier::classify(Decimal::from(500), Decimal::from(100), 1),
            WalletTier::SmallTrader
        );
    }

    #[test]
    fn test_trade_tier_boundaries() {
        assert_eq!(TradeTier::for_value(None), TradeTier::Standard);
        assert_eq!(TradeTier::for_value(Some(Decimal::ZERO)), TradeTier::Standard);
        assert_eq!(TradeTier::for_value(Some(Decimal::from(999))), TradeTier::Micro);
        assert_eq!(TradeTier::for_value(Some(Decimal::from(1_000))), TradeTier::Shrimp);
        assert_eq!(TradeTier::for_value(Some(Decimal::from(100_000))), TradeTier::Whale);
        assert_eq!(TradeTier::for_value(Some(Decimal::from(2_000_000))), TradeTier::Legendary);
        assert_eq!(TradeTier::from_str("mega whale"), TradeTier::MegaWhale);
    }

    #[test]
    fn test_alert_settings_skip_unpriced_filter() {
        let settings = AlertSettings::with_min_threshold(Decimal::from(100));

        assert!(settings.allows(&swap(true, None, 1)));
        assert!(!settings.allows(&swap(true, Some(50), 1)));
        assert!(settings.allows(&swap(true, Some(150), 1)));

        let strict = AlertSettings {
            show_small_trades: false,
            ..settings
        };
        assert!(!strict.allows(&swap(true, Some(150), 1)));
    }
}
