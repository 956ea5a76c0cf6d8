use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::notification::{AlertDecision, NotificationDispatcher};
use super::pipeline::{PipelineOutcome, SwapPipeline};
use crate::config::ChainConfig;
use crate::event_listener::{EventSource, SubscriptionEnd};
use crate::types::{PricingMode, RawSwapEvent};

const EVENT_BUFFER: usize = 256;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// 实时事件的最终去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveDisposition {
    Dispatched,
    Filtered,
    Muted,
    Duplicate,
    OutOfScope,
}

/// 单链实时监控：订阅 → 处理流水线 → 通知；订阅掉线后从断点续订
pub struct SwapMonitor {
    chain: Arc<ChainConfig>,
    source: Arc<dyn EventSource>,
    pipeline: Arc<SwapPipeline>,
    dispatcher: Arc<NotificationDispatcher>,
    resubscribe_delay: Duration,
}

impl SwapMonitor {
    pub fn new(
        chain: Arc<ChainConfig>,
        source: Arc<dyn EventSource>,
        pipeline: Arc<SwapPipeline>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            chain,
            source,
            pipeline,
            dispatcher,
            resubscribe_delay: RESUBSCRIBE_DELAY,
        }
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub async fn handle_event(&self, raw: &RawSwapEvent) -> Result<LiveDisposition> {
        let (swap, stats) = match self.pipeline.process(raw, PricingMode::Live).await? {
            PipelineOutcome::Saved { swap, stats, .. } => (swap, stats),
            PipelineOutcome::Duplicate(_) => return Ok(LiveDisposition::Duplicate),
            PipelineOutcome::OutOfScope => return Ok(LiveDisposition::OutOfScope),
        };

        let decision = self.dispatcher.notify_swap(&swap, &stats).await?;
        Ok(match decision {
            AlertDecision::Dispatched => LiveDisposition::Dispatched,
            AlertDecision::Filtered => LiveDisposition::Filtered,
            AlertDecision::Muted => LiveDisposition::Muted,
        })
    }

    /// 运行直到 `shutdown` 被触发或订阅被正常停止
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut resume_from: Option<u64> = None;
        // 已收到的最高区块；订阅任务异常退出时没有断点，从这里续订
        let mut last_delivered: Option<u64> = None;

        loop {
            let (sink, mut events) = mpsc::channel(EVENT_BUFFER);
            let subscription = match self.source.subscribe_live(resume_from, sink).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!("❌ [{}] 订阅 Swap 事件失败: {}", self.chain.name, e);
                    if !self.wait_before_resubscribe(&shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            info!("✅ [{}] 实时监控已启动", self.chain.name);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        subscription.stop();
                        subscription.join().await;
                        info!("👋 [{}] 实时监控已关闭", self.chain.name);
                        return Ok(());
                    }
                    event = events.recv() => match event {
                        Some(raw) => {
                            last_delivered = last_delivered.max(Some(raw.block_number));
                            if let Err(e) = self.handle_event(&raw).await {
                                error!(
                                    "❌ [{}] 处理交易 0x{:x} 失败: {}",
                                    self.chain.name, raw.transaction_hash, e
                                );
                            }
                        }
                        None => break,
                    }
                }
            }

            match subscription.join().await {
                SubscriptionEnd::Stopped => {
                    info!("🛑 [{}] 订阅已停止", self.chain.name);
                    return Ok(());
                }
                SubscriptionEnd::Dropped {
                    resume_from: next,
                    error,
                } => {
                    if next > 0 {
                        resume_from = Some(next);
                    } else if last_delivered.is_some() {
                        // 重新读取最后收到的区块，重复部分由去重键吸收
                        resume_from = last_delivered;
                    }
                    warn!(
                        "⚠️ [{}] 订阅掉线 ({}), 将从区块 {:?} 重新订阅",
                        self.chain.name, error, resume_from
                    );
                    if !self.wait_before_resubscribe(&shutdown).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn wait_before_resubscribe(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.resubscribe_delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemorySwapStore, SwapStore};
    use crate::event_listener::{FetchedLog, LiveSubscription};
    use crate::services::classifier::tests::{
        chain_config, classifier_with, native_pool, oracle_at, raw_swap, stable_pool,
    };
    use crate::services::notification::tests::RecordingNotifier;
    use crate::services::notification::{MessageRenderer, MessageTheme};
    use crate::types::AlertSettings;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    const ETH: i128 = 1_000_000_000_000_000_000;

    /// 第一次订阅推送两笔后掉线，续订后推送剩下的一笔并停止
    struct FlakyLiveSource {
        subscriptions: Mutex<Vec<Option<u64>>>,
    }

    #[async_trait]
    impl EventSource for FlakyLiveSource {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn current_block(&self) -> Result<u64> {
            Ok(100)
        }

        async fn subscribe_live(
            &self,
            from_block: Option<u64>,
            sink: mpsc::Sender<RawSwapEvent>,
        ) -> Result<LiveSubscription> {
            let attempt = {
                let mut subscriptions = self.subscriptions.lock().unwrap();
                subscriptions.push(from_block);
                subscriptions.len()
            };
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(async move {
                if attempt == 1 {
                    let _ = sink.send(raw_swap(native_pool(), ETH, -ETH, 101, 0)).await;
                    let _ = sink.send(raw_swap(native_pool(), ETH, -ETH, 101, 0)).await;
                    SubscriptionEnd::Dropped {
                        resume_from: 102,
                        error: "connection reset".to_string(),
                    }
                } else {
                    let _ = sink.send(raw_swap(native_pool(), ETH, -ETH, 102, 0)).await;
                    SubscriptionEnd::Stopped
                }
            });
            Ok(LiveSubscription::new(cancel, handle))
        }

        async fn query_range(&self, _from: u64, _to: u64) -> Result<Vec<FetchedLog>> {
            Err(anyhow!("not used"))
        }
    }

    fn monitor(
        source: Arc<dyn EventSource>,
        min_usd: i64,
    ) -> (SwapMonitor, Arc<MemorySwapStore>, Arc<RecordingNotifier>) {
        let chain = Arc::new(chain_config());
        let store = Arc::new(MemorySwapStore::new(AlertSettings::with_min_threshold(
            Decimal::from(min_usd),
        )));
        let pipeline = Arc::new(SwapPipeline::new(
            Arc::new(classifier_with(oracle_at(3_000.0))),
            store.clone(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            MessageRenderer::new(MessageTheme::Minimal, chain.clone()),
            notifier.clone(),
            store.clone(),
        ));
        let monitor = SwapMonitor::new(chain, source, pipeline, dispatcher)
            .with_resubscribe_delay(Duration::from_millis(1));
        (monitor, store, notifier)
    }

    #[tokio::test]
    async fn test_resubscribes_from_resume_point_after_drop() {
        let source = Arc::new(FlakyLiveSource {
            subscriptions: Mutex::new(Vec::new()),
        });
        let (monitor, store, notifier) = monitor(source.clone(), 0);

        monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(*source.subscriptions.lock().unwrap(), vec![None, Some(102)]);
        // 重复推送的同一事件只入库、只通知一次
        assert_eq!(store.swap_count().await.unwrap(), 2);
        assert_eq!(notifier.count(), 2);
    }

    /// 第一次订阅推送区块 101 后任务崩溃，没有给出断点
    struct CrashingLiveSource {
        subscriptions: Mutex<Vec<Option<u64>>>,
    }

    #[async_trait]
    impl EventSource for CrashingLiveSource {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn current_block(&self) -> Result<u64> {
            Ok(100)
        }

        async fn subscribe_live(
            &self,
            from_block: Option<u64>,
            sink: mpsc::Sender<RawSwapEvent>,
        ) -> Result<LiveSubscription> {
            let attempt = {
                let mut subscriptions = self.subscriptions.lock().unwrap();
                subscriptions.push(from_block);
                subscriptions.len()
            };
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(async move {
                if attempt == 1 {
                    let _ = sink.send(raw_swap(native_pool(), ETH, -ETH, 101, 0)).await;
                    panic!("decoder blew up");
                }
                let _ = sink.send(raw_swap(native_pool(), ETH, -ETH, 101, 0)).await;
                let _ = sink.send(raw_swap(native_pool(), ETH, -ETH, 102, 0)).await;
                SubscriptionEnd::Stopped
            });
            Ok(LiveSubscription::new(cancel, handle))
        }

        async fn query_range(&self, _from: u64, _to: u64) -> Result<Vec<FetchedLog>> {
            Err(anyhow!("not used"))
        }
    }

    #[tokio::test]
    async fn test_crashed_subscription_resumes_from_last_delivered_block() {
        let source = Arc::new(CrashingLiveSource {
            subscriptions: Mutex::new(Vec::new()),
        });
        let (monitor, store, _notifier) = monitor(source.clone(), 0);

        monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(*source.subscriptions.lock().unwrap(), vec![None, Some(101)]);
        assert_eq!(store.swap_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_handle_event_dispositions() {
        let source = Arc::new(FlakyLiveSource {
            subscriptions: Mutex::new(Vec::new()),
        });
        let (monitor, store, notifier) = monitor(source, 1_000);

        // 0.1 ETH × 3000 = $300，低于阈值
        let small = raw_swap(native_pool(), ETH / 10, -ETH, 10, 0);
        assert_eq!(monitor.handle_event(&small).await.unwrap(), LiveDisposition::Filtered);
        assert_eq!(monitor.handle_event(&small).await.unwrap(), LiveDisposition::Duplicate);

        // 无原生资产一边，不参与 USD 过滤
        let unpriced = raw_swap(stable_pool(), 1_000_000, -ETH, 11, 0);
        assert_eq!(monitor.handle_event(&unpriced).await.unwrap(), LiveDisposition::Dispatched);

        let trader = unpriced.trader;
        store.mute_wallet(trader, true).await.unwrap();
        let muted = raw_swap(native_pool(), ETH, -ETH, 12, 0);
        assert_eq!(monitor.handle_event(&muted).await.unwrap(), LiveDisposition::Muted);

        assert_eq!(notifier.count(), 1);
        assert_eq!(store.swap_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_monitor() {
        struct IdleSource;

        #[async_trait]
        impl EventSource for IdleSource {
            fn chain_id(&self) -> u64 {
                1
            }
            async fn current_block(&self) -> Result<u64> {
                Ok(1)
            }
            async fn subscribe_live(
                &self,
                _from_block: Option<u64>,
                sink: mpsc::Sender<RawSwapEvent>,
            ) -> Result<LiveSubscription> {
                let cancel = CancellationToken::new();
                let stop = cancel.clone();
                let handle = tokio::spawn(async move {
                    stop.cancelled().await;
                    drop(sink);
                    SubscriptionEnd::Stopped
                });
                Ok(LiveSubscription::new(cancel, handle))
            }
            async fn query_range(&self, _from: u64, _to: u64) -> Result<Vec<FetchedLog>> {
                Ok(Vec::new())
            }
        }

        let (monitor, _store, _notifier) = monitor(Arc::new(IdleSource), 0);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        monitor.run(shutdown).await.unwrap();
    }
}
