use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::notification::NotificationDispatcher;
use super::pipeline::{PipelineOutcome, SwapPipeline};
use crate::config::{BackfillConfig, ChainConfig};
use crate::event_listener::{EventSource, FetchedLog};
use crate::types::{
    BackfillOutcome, BackfillProgress, BackfillRequest, BackfillState, BackfillStatus, BlockRange,
    PricingMode, RawSwapEvent,
};

/// 处理阶段每隔多少个事件检查一次取消、上报一次进度
const PROCESS_CHECK_EVERY: usize = 10;

pub type ProgressFn = dyn Fn(&BackfillProgress) + Send + Sync;

/// 把 [from, to] 切成首尾相接、互不重叠的固定大小分块
pub fn plan_chunks(from: u64, to: u64, chunk_size: u64) -> Vec<BlockRange> {
    let size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        chunks.push(BlockRange::new(start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// 运行中的回填被中途丢弃（任务被中止）时，把状态收尾为失败
struct RunGuard<'a> {
    coordinator: &'a BackfillCoordinator,
    finished: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("⚠️ [{}] 回填任务被中断", self.coordinator.chain.name);
        self.coordinator.finish(BackfillOutcome {
            status: BackfillStatus::Failed,
            swaps_processed: 0,
            events_found: 0,
            swaps_skipped: 0,
            failed_ranges: Vec::new(),
            error: Some("interrupted".to_string()),
        });
    }
}

enum ChunkFetch {
    Fetched(Vec<FetchedLog>),
    Split(BlockRange, BlockRange),
    Failed(String),
    Cancelled,
}

/// 单链历史回填：分块拉取、限速、单飞、可取消
pub struct BackfillCoordinator {
    chain: Arc<ChainConfig>,
    source: Arc<dyn EventSource>,
    pipeline: Arc<SwapPipeline>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
    settings: BackfillConfig,
    state: Mutex<BackfillState>,
    cancel: Mutex<CancellationToken>,
}

impl BackfillCoordinator {
    pub fn new(
        chain: Arc<ChainConfig>,
        source: Arc<dyn EventSource>,
        pipeline: Arc<SwapPipeline>,
        settings: BackfillConfig,
    ) -> Self {
        Self {
            chain,
            source,
            pipeline,
            dispatcher: None,
            settings,
            state: Mutex::new(BackfillState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// 请求 `notify` 时用于推送回填出来的交易
    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn chain(&self) -> &Arc<ChainConfig> {
        &self.chain
    }

    pub fn state(&self) -> BackfillState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// 请求取消正在运行的回填；没有运行中的回填时返回 false
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
        info!("🛑 [{}] 已请求取消回填", self.chain.name);
        true
    }

    pub async fn run(&self, request: BackfillRequest, on_progress: &ProgressFn) -> BackfillOutcome {
        let cancel = match self.begin(request) {
            Ok(token) => token,
            Err(e) => {
                warn!("⚠️ [{}] {}", self.chain.name, e);
                return BackfillOutcome::rejected(&e.to_string());
            }
        };
        let mut guard = RunGuard {
            coordinator: self,
            finished: false,
        };

        let outcome = match self.execute(request, &cancel, on_progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ [{}] 回填失败: {}", self.chain.name, e);
                BackfillOutcome {
                    status: BackfillStatus::Failed,
                    swaps_processed: 0,
                    events_found: 0,
                    swaps_skipped: 0,
                    failed_ranges: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        guard.finished = true;
        self.finish(outcome.clone());
        outcome
    }

    fn begin(&self, request: BackfillRequest) -> Result<CancellationToken> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("回填状态锁已损坏"))?;
        if state.is_running() {
            return Err(anyhow!("回填已在运行中"));
        }

        let token = CancellationToken::new();
        let mut current = self
            .cancel
            .lock()
            .map_err(|_| anyhow!("回填取消锁已损坏"))?;
        *current = token.clone();

        *state = BackfillState::Running {
            request,
            started_at: Utc::now(),
            last_progress: None,
        };
        Ok(token)
    }

    fn finish(&self, outcome: BackfillOutcome) {
        let finished = BackfillState::Finished {
            outcome,
            finished_at: Utc::now(),
        };
        match self.state.lock() {
            Ok(mut state) => *state = finished,
            Err(poisoned) => *poisoned.into_inner() = finished,
        }
    }

    fn report(&self, progress: BackfillProgress, on_progress: &ProgressFn) {
        info!("[{}] {}", self.chain.name, progress);
        if let Ok(mut state) = self.state.lock() {
            if let BackfillState::Running { last_progress, .. } = &mut *state {
                *last_progress = Some(progress.clone());
            }
        }
        on_progress(&progress);
    }

    fn cancelled(
        &self,
        swaps_processed: u64,
        events_found: u64,
        skipped: u64,
        failed: Vec<BlockRange>,
        on_progress: &ProgressFn,
    ) -> BackfillOutcome {
        self.report(BackfillProgress::Cancelled { swaps_processed }, on_progress);
        BackfillOutcome {
            status: BackfillStatus::Cancelled,
            swaps_processed,
            events_found,
            swaps_skipped: skipped,
            failed_ranges: failed,
            error: Some("Cancelled by user".to_string()),
        }
    }

    async fn execute(
        &self,
        request: BackfillRequest,
        cancel: &CancellationToken,
        on_progress: &ProgressFn,
    ) -> Result<BackfillOutcome> {
        let current_block = self.source.current_block().await?;
        let span = self.chain.blocks_per_day().saturating_mul(request.days);
        let range = BlockRange::new(current_block.saturating_sub(span), current_block);
        self.report(
            BackfillProgress::Started {
                chain: self.chain.name.clone(),
                days: request.days,
                range,
            },
            on_progress,
        );

        let mut queue: VecDeque<BlockRange> =
            plan_chunks(range.from, range.to, self.settings.chunk_size).into();
        let mut events: Vec<RawSwapEvent> = Vec::new();
        let mut failed_ranges = Vec::new();
        let mut skipped = 0u64;
        let mut covered = 0u64;

        while let Some(chunk) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(0, events.len() as u64, skipped, failed_ranges, on_progress));
            }

            match self.fetch_chunk(chunk, cancel, on_progress).await {
                ChunkFetch::Fetched(logs) => {
                    for log in logs {
                        match log {
                            Ok(event) => events.push(event),
                            Err(malformed) => {
                                warn!("⚠️ [{}] 跳过无法解析的日志: {}", self.chain.name, malformed);
                                skipped += 1;
                            }
                        }
                    }
                    covered += chunk.len();
                    self.report(
                        BackfillProgress::ChunkFetched {
                            range: chunk,
                            events_found: events.len() as u64,
                            percent: covered as f64 / range.len() as f64 * 100.0,
                        },
                        on_progress,
                    );
                }
                ChunkFetch::Split(left, right) => {
                    self.report(BackfillProgress::ChunkSplit { range: chunk }, on_progress);
                    queue.push_front(right);
                    queue.push_front(left);
                    continue;
                }
                ChunkFetch::Failed(error) => {
                    covered += chunk.len();
                    failed_ranges.push(chunk);
                    self.report(BackfillProgress::ChunkFailed { range: chunk, error }, on_progress);
                }
                ChunkFetch::Cancelled => {
                    return Ok(self.cancelled(0, events.len() as u64, skipped, failed_ranges, on_progress));
                }
            }

            if !queue.is_empty() {
                self.pause(self.settings.chunk_delay_ms, cancel).await;
            }
        }

        info!("✅ [{}] 共找到 {} 笔历史交易", self.chain.name, events.len());
        let events_found = events.len() as u64;
        let total = events.len() as u64;
        let mut processed = 0u64;
        let notify = request.notify && self.dispatcher.is_some();

        for (i, raw) in events.iter().enumerate() {
            if i % PROCESS_CHECK_EVERY == 0 && cancel.is_cancelled() {
                return Ok(self.cancelled(processed, events_found, skipped, failed_ranges, on_progress));
            }

            match self.pipeline.process(raw, PricingMode::Historical).await {
                Ok(PipelineOutcome::Saved { swap, stats, .. }) => {
                    processed += 1;
                    if notify {
                        if let Some(dispatcher) = &self.dispatcher {
                            if let Err(e) = dispatcher.notify_swap(&swap, &stats).await {
                                warn!("⚠️ [{}] 回填通知发送失败: {}", self.chain.name, e);
                            }
                        }
                    }
                }
                Ok(PipelineOutcome::Duplicate(_)) | Ok(PipelineOutcome::OutOfScope) => skipped += 1,
                Err(e) => {
                    warn!(
                        "⚠️ [{}] 处理交易 0x{:x} 失败: {}",
                        self.chain.name, raw.transaction_hash, e
                    );
                    skipped += 1;
                }
            }

            if (i + 1) % PROCESS_CHECK_EVERY == 0 || i + 1 == events.len() {
                self.report(
                    BackfillProgress::Processing {
                        processed: i as u64 + 1,
                        total,
                        saved: processed,
                        skipped,
                    },
                    on_progress,
                );
            }
        }

        self.report(
            BackfillProgress::Finished {
                swaps_processed: processed,
                swaps_skipped: skipped,
            },
            on_progress,
        );
        if !failed_ranges.is_empty() {
            warn!(
                "⚠️ [{}] 回填完成，但有 {} 个区块范围未能获取",
                self.chain.name,
                failed_ranges.len()
            );
        }

        Ok(BackfillOutcome {
            status: BackfillStatus::Completed,
            swaps_processed: processed,
            events_found,
            swaps_skipped: skipped,
            failed_ranges,
            error: None,
        })
    }

    /// 重试（线性退避）→ 拆分 → 记录失败范围
    async fn fetch_chunk(
        &self,
        chunk: BlockRange,
        cancel: &CancellationToken,
        on_progress: &ProgressFn,
    ) -> ChunkFetch {
        let mut attempt = 0u32;
        loop {
            let error = match self.source.query_range(chunk.from, chunk.to).await {
                Ok(logs) => return ChunkFetch::Fetched(logs),
                Err(e) => e.to_string(),
            };

            if attempt < self.settings.max_retries {
                attempt += 1;
                self.report(
                    BackfillProgress::ChunkRetry {
                        range: chunk,
                        attempt,
                        error,
                    },
                    on_progress,
                );
                if !self
                    .pause(self.settings.chunk_delay_ms * attempt as u64, cancel)
                    .await
                {
                    return ChunkFetch::Cancelled;
                }
                continue;
            }

            if chunk.len() > self.settings.min_chunk_size {
                if let Some((left, right)) = chunk.split() {
                    return ChunkFetch::Split(left, right);
                }
            }
            return ChunkFetch::Failed(error);
        }
    }

    /// 可被取消打断的等待；被取消时返回 false
    async fn pause(&self, millis: u64, cancel: &CancellationToken) -> bool {
        if millis == 0 {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_millis(millis)) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemorySwapStore, SwapStore};
    use crate::event_listener::{LiveSubscription, MalformedLog};
    use crate::services::classifier::tests::{chain_config, classifier_with, native_pool, oracle_at, raw_swap};
    use crate::types::AlertSettings;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const ETH: i128 = 1_000_000_000_000_000_000;

    /// 内存中的事件集合；可以让某些区间查询失败
    struct FakeEventSource {
        head: u64,
        events: Vec<RawSwapEvent>,
        /// 宽度大于该值的查询失败
        max_query_width: Option<u64>,
        /// 包含该区块的查询总是失败
        poisoned_block: Option<u64>,
        queries: Mutex<Vec<BlockRange>>,
        calls: AtomicUsize,
    }

    impl FakeEventSource {
        fn new(head: u64, events: Vec<RawSwapEvent>) -> Self {
            Self {
                head,
                events,
                max_query_width: None,
                poisoned_block: None,
                queries: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn queries(&self) -> Vec<BlockRange> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSource for FakeEventSource {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn current_block(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn subscribe_live(
            &self,
            _from_block: Option<u64>,
            _sink: mpsc::Sender<RawSwapEvent>,
        ) -> Result<LiveSubscription> {
            Err(anyhow!("live feed not supported"))
        }

        async fn query_range(&self, from_block: u64, to_block: u64) -> Result<Vec<FetchedLog>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let range = BlockRange::new(from_block, to_block);
            if let Some(width) = self.max_query_width {
                if range.len() > width {
                    return Err(anyhow!("query returned more than 10000 results"));
                }
            }
            if let Some(block) = self.poisoned_block {
                if from_block <= block && block <= to_block {
                    return Err(anyhow!("header not found"));
                }
            }
            self.queries.lock().unwrap().push(range);
            Ok(self
                .events
                .iter()
                .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                .cloned()
                .map(Ok)
                .collect())
        }
    }

    fn settings(chunk_size: u64) -> BackfillConfig {
        BackfillConfig {
            chunk_size,
            chunk_delay_ms: 0,
            max_retries: 1,
            min_chunk_size: 10,
        }
    }

    fn coordinator(
        source: Arc<FakeEventSource>,
        chunk_size: u64,
    ) -> (Arc<BackfillCoordinator>, Arc<MemorySwapStore>) {
        coordinator_with(source, settings(chunk_size))
    }

    /// 一天 = 100 个区块，方便控制回填范围
    fn coordinator_with(
        source: Arc<FakeEventSource>,
        settings: BackfillConfig,
    ) -> (Arc<BackfillCoordinator>, Arc<MemorySwapStore>) {
        let mut chain = chain_config();
        chain.block_time_secs = 864.0;
        let store = Arc::new(MemorySwapStore::new(AlertSettings::default()));
        let pipeline = Arc::new(SwapPipeline::new(
            Arc::new(classifier_with(oracle_at(2_500.0))),
            store.clone(),
        ));
        let coordinator = BackfillCoordinator::new(Arc::new(chain), source, pipeline, settings);
        (Arc::new(coordinator), store)
    }

    /// 每个区块一笔交易
    fn one_swap_per_block(from: u64, to: u64) -> Vec<RawSwapEvent> {
        (from..=to)
            .map(|block| raw_swap(native_pool(), ETH / 10, -(block as i128) * ETH, block, 0))
            .collect()
    }

    fn silent(_: &BackfillProgress) {}

    #[test]
    fn test_plan_chunks_is_contiguous() {
        let chunks = plan_chunks(100, 1_099, 300);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], BlockRange::new(100, 399));
        assert_eq!(chunks[3], BlockRange::new(1_000, 1_099));
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].to + 1, pair[1].from);
        }
        assert_eq!(plan_chunks(5, 5, 2_000), vec![BlockRange::new(5, 5)]);
        assert!(plan_chunks(6, 5, 10).is_empty());
    }

    #[tokio::test]
    async fn test_chunked_query_equals_full_range_query() {
        let mut events = one_swap_per_block(1_000, 1_100);
        // 同一区块多笔，落在分块边界上
        events.push(raw_swap(native_pool(), ETH, -ETH, 1_029, 1));
        events.push(raw_swap(native_pool(), ETH, -ETH, 1_030, 1));
        let source = FakeEventSource::new(1_100, events);

        let full: Vec<_> = source
            .query_range(1_000, 1_100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.unwrap().dedup_key())
            .collect();

        let mut chunked = Vec::new();
        for chunk in plan_chunks(1_000, 1_100, 30) {
            for event in source.query_range(chunk.from, chunk.to).await.unwrap() {
                chunked.push(event.unwrap().dedup_key());
            }
        }

        let mut full_sorted = full.clone();
        full_sorted.sort_by_key(|k| (k.transaction_hash, k.log_index));
        let mut chunked_sorted = chunked.clone();
        chunked_sorted.sort_by_key(|k| (k.transaction_hash, k.log_index));
        assert_eq!(full_sorted, chunked_sorted);
        assert_eq!(chunked.iter().collect::<HashSet<_>>().len(), chunked.len());
    }

    #[tokio::test]
    async fn test_backfill_persists_every_swap_once() {
        let source = Arc::new(FakeEventSource::new(1_000, one_swap_per_block(900, 1_000)));
        let (coordinator, store) = coordinator(source.clone(), 25);

        let outcome = coordinator.run(BackfillRequest { days: 1, notify: false }, &silent).await;
        assert_eq!(outcome.status, BackfillStatus::Completed);
        assert_eq!(outcome.events_found, 101);
        assert_eq!(outcome.swaps_processed, 101);
        assert_eq!(store.swap_count().await.unwrap(), 101);
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert!(matches!(coordinator.state(), BackfillState::Finished { .. }));
    }

    #[tokio::test]
    async fn test_replay_leaves_wallet_stats_unchanged() {
        let source = Arc::new(FakeEventSource::new(1_000, one_swap_per_block(950, 1_000)));
        let (coordinator, store) = coordinator(source.clone(), 20);
        let trader = raw_swap(native_pool(), 0, 0, 0, 0).trader;

        let first = coordinator.run(BackfillRequest::default(), &silent).await;
        assert_eq!(first.swaps_processed, 51);
        let before = store.get_wallet(trader).await.unwrap().unwrap();

        let replay = coordinator.run(BackfillRequest::default(), &silent).await;
        assert!(replay.success());
        assert_eq!(replay.swaps_processed, 0);
        assert_eq!(replay.swaps_skipped, 51);

        let after = store.get_wallet(trader).await.unwrap().unwrap();
        assert_eq!(after.total_swaps, before.total_swaps);
        assert_eq!(after.total_volume_usd, before.total_volume_usd);
    }

    #[tokio::test]
    async fn test_cancel_after_first_chunk_stops_fetching() {
        let source = Arc::new(FakeEventSource::new(10_000, one_swap_per_block(9_000, 10_000)));
        let (coordinator, store) = coordinator(source.clone(), 100);

        let handle = coordinator.clone();
        let on_progress = move |progress: &BackfillProgress| {
            if let BackfillProgress::ChunkFetched { .. } = progress {
                handle.cancel();
            }
        };
        let outcome = coordinator
            .run(BackfillRequest { days: 100, notify: false }, &on_progress)
            .await;

        assert!(outcome.cancelled());
        assert_eq!(outcome.swaps_processed, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.swap_count().await.unwrap(), 0);
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_cancel_while_processing_matches_persisted_count() {
        let source = Arc::new(FakeEventSource::new(1_000, one_swap_per_block(960, 1_000)));
        let (coordinator, store) = coordinator(source.clone(), 2_000);

        let handle = coordinator.clone();
        let on_progress = move |progress: &BackfillProgress| {
            if let BackfillProgress::Processing { processed: 20, .. } = progress {
                handle.cancel();
            }
        };
        let outcome = coordinator.run(BackfillRequest::default(), &on_progress).await;

        assert!(outcome.cancelled());
        assert_eq!(outcome.swaps_processed, 20);
        assert_eq!(store.swap_count().await.unwrap(), outcome.swaps_processed);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_running() {
        let source = Arc::new(FakeEventSource::new(1_000, one_swap_per_block(990, 1_000)));
        let (coordinator, _store) = coordinator(source, 5);

        let nested = Arc::new(Mutex::new(None));
        let handle = coordinator.clone();
        let slot = nested.clone();
        let on_progress = move |progress: &BackfillProgress| {
            if let BackfillProgress::Started { .. } = progress {
                // 在运行中再次启动：begin() 同步拒绝，不会等待
                let outcome = futures_util::FutureExt::now_or_never(
                    handle.run(BackfillRequest::default(), &silent),
                );
                *slot.lock().unwrap() = outcome;
            }
        };
        let outcome = coordinator.run(BackfillRequest::default(), &on_progress).await;
        assert!(outcome.success());

        let rejected = nested.lock().unwrap().clone().expect("nested run should resolve immediately");
        assert_eq!(rejected.status, BackfillStatus::Rejected);
        assert!(!coordinator.cancel());
    }

    #[tokio::test]
    async fn test_failed_record_is_retried_on_rerun() {
        use crate::services::pipeline::tests::FlakyStore;

        let source = Arc::new(FakeEventSource::new(1_000, one_swap_per_block(1_000, 1_000)));
        let store = FlakyStore::failing_once();
        let pipeline = Arc::new(SwapPipeline::new(
            Arc::new(classifier_with(oracle_at(2_500.0))),
            store.clone(),
        ));
        let mut chain = chain_config();
        chain.block_time_secs = 864.0;
        let coordinator = BackfillCoordinator::new(Arc::new(chain), source, pipeline, settings(50));
        let request = BackfillRequest { days: 1, notify: false };
        let trader = raw_swap(native_pool(), 0, 0, 0, 0).trader;

        let first = coordinator.run(request, &silent).await;
        assert_eq!(first.swaps_processed, 0);
        assert_eq!(first.swaps_skipped, 1);
        assert_eq!(store.swap_count().await.unwrap(), first.swaps_processed);
        assert!(store.get_wallet(trader).await.unwrap().is_none());

        let second = coordinator.run(request, &silent).await;
        assert_eq!(second.swaps_processed, 1);
        assert_eq!(store.swap_count().await.unwrap(), 1);
        assert_eq!(store.get_wallet(trader).await.unwrap().unwrap().total_swaps, 1);
    }

    #[tokio::test]
    async fn test_dropped_run_is_finished_as_interrupted() {
        let source = Arc::new(FakeEventSource::new(1_000, one_swap_per_block(990, 1_000)));
        let settings = BackfillConfig {
            chunk_delay_ms: 60_000,
            ..settings(5)
        };
        let (coordinator, _store) = coordinator_with(source, settings);

        // 第一块取完后停在限速等待上
        let mut run = Box::pin(coordinator.run(BackfillRequest::default(), &silent));
        assert!(futures_util::FutureExt::now_or_never(&mut run).is_none());
        assert!(coordinator.is_running());

        drop(run);
        assert!(!coordinator.is_running());
        match coordinator.state() {
            BackfillState::Finished { outcome, .. } => {
                assert_eq!(outcome.status, BackfillStatus::Failed);
                assert_eq!(outcome.error.as_deref(), Some("interrupted"));
            }
            other => panic!("expected finished state, got {:?}", other),
        }
        assert!(!coordinator.cancel());
    }

    #[tokio::test]
    async fn test_failing_chunk_is_split_then_recorded() {
        let mut source = FakeEventSource::new(1_000, one_swap_per_block(900, 1_000));
        source.poisoned_block = Some(950);
        let source = Arc::new(source);
        let (coordinator, store) = coordinator(source.clone(), 40);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let on_progress = move |p: &BackfillProgress| seen.lock().unwrap().push(p.clone());
        let outcome = coordinator.run(BackfillRequest { days: 1, notify: false }, &on_progress).await;

        assert_eq!(outcome.status, BackfillStatus::Completed);
        assert_eq!(outcome.failed_ranges.len(), 1);
        let failed = outcome.failed_ranges[0];
        assert!(failed.from <= 950 && 950 <= failed.to);
        assert!(failed.len() <= 10);
        assert_eq!(outcome.swaps_processed, 101 - failed.len());
        assert_eq!(store.swap_count().await.unwrap(), outcome.swaps_processed);

        let progress = progress.lock().unwrap();
        assert!(progress.iter().any(|p| matches!(p, BackfillProgress::ChunkSplit { .. })));
        assert!(progress.iter().any(|p| matches!(p, BackfillProgress::ChunkRetry { attempt: 1, .. })));

        // 拆分后仍按区块升序查询
        let queries = source.queries();
        for pair in queries.windows(2) {
            assert!(pair[0].to < pair[1].from);
        }
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_resegmented() {
        let mut source = FakeEventSource::new(1_000, one_swap_per_block(900, 1_000));
        source.max_query_width = Some(30);
        let source = Arc::new(source);
        let (coordinator, store) = coordinator(source.clone(), 101);

        let outcome = coordinator.run(BackfillRequest { days: 1, notify: false }, &silent).await;
        assert!(outcome.success());
        assert!(outcome.failed_ranges.is_empty());
        assert_eq!(store.swap_count().await.unwrap(), 101);
        assert!(source.queries().iter().all(|r| r.len() <= 30));
    }

    #[tokio::test]
    async fn test_malformed_logs_are_skipped_and_counted() {
        struct Malformed;

        #[async_trait]
        impl EventSource for Malformed {
            fn chain_id(&self) -> u64 {
                1
            }
            async fn current_block(&self) -> Result<u64> {
                Ok(100)
            }
            async fn subscribe_live(
                &self,
                _from_block: Option<u64>,
                _sink: mpsc::Sender<RawSwapEvent>,
            ) -> Result<LiveSubscription> {
                Err(anyhow!("unsupported"))
            }
            async fn query_range(&self, _from: u64, _to: u64) -> Result<Vec<FetchedLog>> {
                Ok(vec![
                    Ok(raw_swap(native_pool(), ETH, -ETH, 50, 0)),
                    Err(MalformedLog {
                        block_number: Some(51),
                        transaction_hash: None,
                        log_index: None,
                        reason: "data too short".to_string(),
                    }),
                ])
            }
        }

        let mut chain = chain_config();
        chain.block_time_secs = 864.0;
        let store = Arc::new(MemorySwapStore::new(AlertSettings::default()));
        let pipeline = Arc::new(SwapPipeline::new(Arc::new(classifier_with(oracle_at(2_500.0))), store));
        let coordinator = BackfillCoordinator::new(Arc::new(chain), Arc::new(Malformed), pipeline, settings(2_000));

        let outcome = coordinator.run(BackfillRequest { days: 1, notify: false }, &silent).await;
        assert_eq!(outcome.swaps_processed, 1);
        assert_eq!(outcome.swaps_skipped, 1);
    }
}
