pub mod memory;
pub mod operations;
pub mod store;

pub use memory::MemorySwapStore;
pub use store::SwapStore;

use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use operations::{SettingsOperations, SwapOperations, SystemOperations, WalletOperations};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Postgres 存储
pub struct Database {
    pool: PgPool,
    default_settings: AlertSettings,
}

impl Database {
    pub fn new(pool: PgPool, default_settings: AlertSettings) -> Self {
        Self { pool, default_settings }
    }

    pub async fn connect(url: &str, max_connections: u32, default_settings: AlertSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, default_settings))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_tables(&self) -> Result<()> {
        SystemOperations::create_tables(&self.pool).await
    }
}

#[async_trait]
impl SwapStore for Database {
    async fn save_swap(&self, swap: &ProcessedSwap) -> Result<Option<SavedSwap>> {
        SwapOperations::save_swap(&self.pool, swap).await
    }

    async fn update_wallet_stats(&self, trader: Address, swap: &ProcessedSwap) -> Result<WalletStats> {
        let mut tx = self.pool.begin().await?;
        let stats = WalletOperations::apply_swap(&mut tx, trader, swap).await?;
        tx.commit().await?;
        Ok(stats)
    }

    async fn record_swap(&self, swap: &ProcessedSwap) -> Result<Option<(SavedSwap, WalletStats)>> {
        SwapOperations::record_swap(&self.pool, swap).await
    }

    async fn get_wallet(&self, address: Address) -> Result<Option<WalletStats>> {
        WalletOperations::get_wallet(&self.pool, address).await
    }

    async fn get_top_wallets(&self, limit: usize) -> Result<Vec<WalletStats>> {
        WalletOperations::get_top_wallets(&self.pool, limit as i64).await
    }

    async fn get_alert_settings(&self) -> Result<AlertSettings> {
        SettingsOperations::get_or_create(&self.pool, &self.default_settings).await
    }

    async fn update_alert_settings(&self, settings: &AlertSettings) -> Result<AlertSettings> {
        SettingsOperations::update(&self.pool, settings).await?;
        Ok(settings.clone())
    }

    async fn get_tracked_wallets(&self) -> Result<Vec<WalletStats>> {
        WalletOperations::get_tracked_wallets(&self.pool).await
    }

    async fn track_wallet(&self, address: Address, label: Option<String>) -> Result<WalletStats> {
        WalletOperations::set_tracked(&self.pool, address, label).await
    }

    async fn mute_wallet(&self, address: Address, muted: bool) -> Result<WalletStats> {
        WalletOperations::set_muted(&self.pool, address, muted).await
    }

    async fn swap_count(&self) -> Result<u64> {
        SwapOperations::count_swaps(&self.pool).await
    }
}
