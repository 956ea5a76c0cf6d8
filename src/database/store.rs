use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;

use crate::types::{AlertSettings, ProcessedSwap, SavedSwap, WalletStats};

/// 交易持久化与钱包统计的存储边界
///
/// `save_swap` 对去重键 (交易哈希, 日志序号) 必须是原子的：
/// 同一个键并发保存只能有一次成功。
/// `record_swap` 的入库与钱包统计要么一起生效，要么都不生效。
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// 新记录返回 `Some`，重复的去重键返回 `None`
    async fn save_swap(&self, swap: &ProcessedSwap) -> Result<Option<SavedSwap>>;

    /// 把一笔新入库的交易折叠进钱包统计
    async fn update_wallet_stats(&self, trader: Address, swap: &ProcessedSwap) -> Result<WalletStats>;

    async fn get_wallet(&self, address: Address) -> Result<Option<WalletStats>>;

    /// 按总交易额降序
    async fn get_top_wallets(&self, limit: usize) -> Result<Vec<WalletStats>>;

    /// 首次读取时按默认值创建
    async fn get_alert_settings(&self) -> Result<AlertSettings>;

    async fn update_alert_settings(&self, settings: &AlertSettings) -> Result<AlertSettings>;

    /// 按总交易额降序
    async fn get_tracked_wallets(&self) -> Result<Vec<WalletStats>>;

    async fn track_wallet(&self, address: Address, label: Option<String>) -> Result<WalletStats>;

    async fn mute_wallet(&self, address: Address, muted: bool) -> Result<WalletStats>;

    async fn swap_count(&self) -> Result<u64>;

    /// 保存交易并折叠进钱包统计，两步在同一个原子单元内完成
    ///
    /// 重复的去重键返回 `None` 且不改动统计；出错时两步都不落盘，重试是安全的。
    async fn record_swap(&self, swap: &ProcessedSwap) -> Result<Option<(SavedSwap, WalletStats)>>;
}
