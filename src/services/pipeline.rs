use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::classifier::{Classification, SwapClassifier};
use crate::database::SwapStore;
use crate::types::{PricingMode, ProcessedSwap, RawSwapEvent, SavedSwap, WalletStats};

/// 单个事件走完 分类 → 去重入库 → 钱包统计 之后的结果
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Saved {
        swap: ProcessedSwap,
        record: SavedSwap,
        stats: WalletStats,
    },
    /// 去重键已存在，钱包统计未变
    Duplicate(ProcessedSwap),
    OutOfScope,
}

impl PipelineOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, PipelineOutcome::Saved { .. })
    }
}

/// 实时监控和回填共用的处理路径
pub struct SwapPipeline {
    classifier: Arc<SwapClassifier>,
    store: Arc<dyn SwapStore>,
}

impl SwapPipeline {
    pub fn new(classifier: Arc<SwapClassifier>, store: Arc<dyn SwapStore>) -> Self {
        Self { classifier, store }
    }

    pub fn classifier(&self) -> &Arc<SwapClassifier> {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<dyn SwapStore> {
        &self.store
    }

    pub async fn process(&self, raw: &RawSwapEvent, mode: PricingMode) -> Result<PipelineOutcome> {
        let swap = match self.classifier.classify(raw, mode).await? {
            Classification::InScope(swap) => swap,
            Classification::OutOfScope => return Ok(PipelineOutcome::OutOfScope),
        };

        match self.store.record_swap(&swap).await? {
            Some((record, stats)) => {
                info!(
                    "💾 [{}] {} {} {} ({}) 交易 {}",
                    swap.chain_name,
                    if swap.is_buy { "买入" } else { "卖出" },
                    swap.buy_amount,
                    swap.buy_token,
                    swap.value_usd
                        .map(|v| format!("${}", v.round_dp(2)))
                        .unwrap_or_else(|| "未定价".to_string()),
                    swap.dedup_key()
                );
                Ok(PipelineOutcome::Saved {
                    swap,
                    record,
                    stats,
                })
            }
            None => {
                debug!("🔁 [{}] 交易 {} 已存在，跳过", swap.chain_name, swap.dedup_key());
                Ok(PipelineOutcome::Duplicate(swap))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::MemorySwapStore;
    use crate::services::classifier::tests::{classifier_with, foreign_pool, native_pool, oracle_at, raw_swap};
    use crate::types::AlertSettings;

    const ETH: i128 = 1_000_000_000_000_000_000;

    fn pipeline() -> (SwapPipeline, Arc<MemorySwapStore>) {
        let store = Arc::new(MemorySwapStore::new(AlertSettings::default()));
        let classifier = Arc::new(classifier_with(oracle_at(2_000.0)));
        (SwapPipeline::new(classifier, store.clone()), store)
    }

    #[tokio::test]
    async fn test_duplicate_event_does_not_touch_stats() {
        let (pipeline, store) = pipeline();
        let raw = raw_swap(native_pool(), ETH, -100 * ETH, 10, 3);

        let first = pipeline.process(&raw, PricingMode::Live).await.unwrap();
        let stats = match first {
            PipelineOutcome::Saved { stats, .. } => stats,
            other => panic!("expected save, got {:?}", other),
        };
        assert_eq!(stats.total_swaps, 1);

        let second = pipeline.process(&raw, PricingMode::Live).await.unwrap();
        assert!(matches!(second, PipelineOutcome::Duplicate(_)));

        let wallet = store.get_wallet(raw.trader).await.unwrap().unwrap();
        assert_eq!(wallet.total_swaps, 1);
        assert_eq!(wallet.total_volume_usd, stats.total_volume_usd);
        assert_eq!(store.swap_count().await.unwrap(), 1);
    }

    /// 第一次写入像事务回滚一样整体失败
    pub(crate) struct FlakyStore {
        inner: MemorySwapStore,
        failures_left: std::sync::atomic::AtomicU32,
    }

    impl FlakyStore {
        pub(crate) fn failing_once() -> Arc<Self> {
            Arc::new(Self {
                inner: MemorySwapStore::new(AlertSettings::default()),
                failures_left: std::sync::atomic::AtomicU32::new(1),
            })
        }
    }

    #[async_trait::async_trait]
    impl SwapStore for FlakyStore {
        async fn save_swap(&self, swap: &ProcessedSwap) -> Result<Option<SavedSwap>> {
            self.inner.save_swap(swap).await
        }

        async fn update_wallet_stats(
            &self,
            trader: ethers::types::Address,
            swap: &ProcessedSwap,
        ) -> Result<WalletStats> {
            self.inner.update_wallet_stats(trader, swap).await
        }

        async fn record_swap(&self, swap: &ProcessedSwap) -> Result<Option<(SavedSwap, WalletStats)>> {
            use std::sync::atomic::Ordering;
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("connection reset");
            }
            self.inner.record_swap(swap).await
        }

        async fn get_wallet(&self, address: ethers::types::Address) -> Result<Option<WalletStats>> {
            self.inner.get_wallet(address).await
        }

        async fn get_top_wallets(&self, limit: usize) -> Result<Vec<WalletStats>> {
            self.inner.get_top_wallets(limit).await
        }

        async fn get_alert_settings(&self) -> Result<AlertSettings> {
            self.inner.get_alert_settings().await
        }

        async fn update_alert_settings(&self, settings: &AlertSettings) -> Result<AlertSettings> {
            self.inner.update_alert_settings(settings).await
        }

        async fn get_tracked_wallets(&self) -> Result<Vec<WalletStats>> {
            self.inner.get_tracked_wallets().await
        }

        async fn track_wallet(
            &self,
            address: ethers::types::Address,
            label: Option<String>,
        ) -> Result<WalletStats> {
            self.inner.track_wallet(address, label).await
        }

        async fn mute_wallet(&self, address: ethers::types::Address, muted: bool) -> Result<WalletStats> {
            self.inner.mute_wallet(address, muted).await
        }

        async fn swap_count(&self) -> Result<u64> {
            self.inner.swap_count().await
        }
    }

    #[tokio::test]
    async fn test_failed_record_leaves_no_half_write_and_retry_applies_stats() {
        let store = FlakyStore::failing_once();
        let classifier = Arc::new(classifier_with(oracle_at(2_000.0)));
        let pipeline = SwapPipeline::new(classifier, store.clone());
        let raw = raw_swap(native_pool(), ETH, -100 * ETH, 10, 3);

        assert!(pipeline.process(&raw, PricingMode::Live).await.is_err());
        assert_eq!(store.swap_count().await.unwrap(), 0);
        assert!(store.get_wallet(raw.trader).await.unwrap().is_none());

        let retry = pipeline.process(&raw, PricingMode::Live).await.unwrap();
        assert!(retry.is_saved());
        let wallet = store.get_wallet(raw.trader).await.unwrap().unwrap();
        assert_eq!(wallet.total_swaps, 1);
        assert_eq!(store.swap_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_record_saves_and_folds_together() {
        let store = MemorySwapStore::new(AlertSettings::default());
        let classifier = classifier_with(oracle_at(2_000.0));
        let raw = raw_swap(native_pool(), ETH, -100 * ETH, 10, 3);
        let swap = match classifier.classify(&raw, PricingMode::Live).await.unwrap() {
            Classification::InScope(swap) => swap,
            Classification::OutOfScope => panic!("native pool swap should be in scope"),
        };

        let (record, stats) = store.record_swap(&swap).await.unwrap().unwrap();
        assert_eq!(record.log_index, 3);
        assert_eq!(stats.total_swaps, 1);
        assert!(store.record_swap(&swap).await.unwrap().is_none());
        assert_eq!(store.get_wallet(raw.trader).await.unwrap().unwrap().total_swaps, 1);
        assert_eq!(store.saved_swaps().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_scope_is_not_persisted() {
        let (pipeline, store) = pipeline();
        let raw = raw_swap(foreign_pool(), ETH, -5, 10, 0);
        let outcome = pipeline.process(&raw, PricingMode::Historical).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::OutOfScope));
        assert_eq!(store.swap_count().await.unwrap(), 0);
    }
}
