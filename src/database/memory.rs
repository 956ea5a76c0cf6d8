use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Mutex;

use super::store::SwapStore;
use crate::types::{AlertSettings, DedupKey, ProcessedSwap, SavedSwap, WalletStats};

#[derive(Default)]
struct MemoryState {
    swaps: HashMap<DedupKey, SavedSwap>,
    wallets: HashMap<Address, WalletStats>,
    settings: Option<AlertSettings>,
}

/// 内存存储：测试以及未配置数据库时使用
pub struct MemorySwapStore {
    state: Mutex<MemoryState>,
    default_settings: AlertSettings,
}

impl MemorySwapStore {
    pub fn new(default_settings: AlertSettings) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            default_settings,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("内存存储锁已中毒"))
    }

    pub fn saved_swaps(&self) -> Result<Vec<SavedSwap>> {
        let state = self.lock()?;
        let mut swaps: Vec<SavedSwap> = state.swaps.values().cloned().collect();
        swaps.sort_by_key(|s| (s.block_number, s.log_index));
        Ok(swaps)
    }
}

impl Default for MemorySwapStore {
    fn default() -> Self {
        Self::new(AlertSettings::default())
    }
}

fn sorted_by_volume(mut wallets: Vec<WalletStats>) -> Vec<WalletStats> {
    wallets.sort_by(|a, b| {
        b.total_volume_usd
            .cmp(&a.total_volume_usd)
            .then_with(|| b.total_swaps.cmp(&a.total_swaps))
    });
    wallets
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn save_swap(&self, swap: &ProcessedSwap) -> Result<Option<SavedSwap>> {
        let mut state = self.lock()?;
        let key = swap.dedup_key();
        if state.swaps.contains_key(&key) {
            return Ok(None);
        }
        let saved = SavedSwap::from_processed(swap);
        state.swaps.insert(key, saved.clone());
        Ok(Some(saved))
    }

    async fn record_swap(&self, swap: &ProcessedSwap) -> Result<Option<(SavedSwap, WalletStats)>> {
        let mut state = self.lock()?;
        let key = swap.dedup_key();
        if state.swaps.contains_key(&key) {
            return Ok(None);
        }

        let trader = swap.trader();
        let saved = SavedSwap::from_processed(swap);
        state.swaps.insert(key, saved.clone());
        let stats = state
            .wallets
            .entry(trader)
            .or_insert_with(|| WalletStats::new(trader, swap.event.timestamp));
        stats.record_swap(swap);
        let stats = stats.clone();
        Ok(Some((saved, stats)))
    }

    async fn update_wallet_stats(&self, trader: Address, swap: &ProcessedSwap) -> Result<WalletStats> {
        let mut state = self.lock()?;
        let stats = state
            .wallets
            .entry(trader)
            .or_insert_with(|| WalletStats::new(trader, swap.event.timestamp));
        stats.record_swap(swap);
        Ok(stats.clone())
    }

    async fn get_wallet(&self, address: Address) -> Result<Option<WalletStats>> {
        Ok(self.lock()?.wallets.get(&address).cloned())
    }

    async fn get_top_wallets(&self, limit: usize) -> Result<Vec<WalletStats>> {
        let wallets = self.lock()?.wallets.values().cloned().collect();
        let mut wallets = sorted_by_volume(wallets);
        wallets.truncate(limit);
        Ok(wallets)
    }

    async fn get_alert_settings(&self) -> Result<AlertSettings> {
        let mut state = self.lock()?;
        Ok(state
            .settings
            .get_or_insert_with(|| self.default_settings.clone())
            .clone())
    }

    async fn update_alert_settings(&self, settings: &AlertSettings) -> Result<AlertSettings> {
        self.lock()?.settings = Some(settings.clone());
        Ok(settings.clone())
    }

    async fn get_tracked_wallets(&self) -> Result<Vec<WalletStats>> {
        let wallets = self
            .lock()?
            .wallets
            .values()
            .filter(|w| w.is_tracked)
            .cloned()
            .collect();
        Ok(sorted_by_volume(wallets))
    }

    async fn track_wallet(&self, address: Address, label: Option<String>) -> Result<WalletStats> {
        let mut state = self.lock()?;
        let stats = state
            .wallets
            .entry(address)
            .or_insert_with(|| WalletStats::new(address, Utc::now()));
        stats.is_tracked = true;
        if label.is_some() {
            stats.label = label;
        }
        Ok(stats.clone())
    }

    async fn mute_wallet(&self, address: Address, muted: bool) -> Result<WalletStats> {
        let mut state = self.lock()?;
        let stats = state
            .wallets
            .entry(address)
            .or_insert_with(|| WalletStats::new(address, Utc::now()));
        stats.is_muted = muted;
        Ok(stats.clone())
    }

    async fn swap_count(&self) -> Result<u64> {
        Ok(self.lock()?.swaps.len() as u64)
    }
}
