use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::{
    providers::Middleware,
    types::{Address, BlockNumber, Filter, Log, H256},
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::block_cursor::BlockCursor;
use super::pool_manager::{
    decode_initialize_log, decode_swap_log, initialize_topic, swap_topic, DecodedSwap,
    Erc20Metadata, PoolManager,
};
use super::source::{
    price_from_sqrt_x96, EventSource, FetchedLog, LiveSubscription, PoolState, SubscriptionEnd,
    TokenDirectory,
};
use crate::config::ChainConfig;
use crate::types::{PoolTokens, RawSwapEvent, TokenInfo, TokenMetadata, NATIVE_ADDRESS};

/// 连续失败多少次后认为订阅已掉线
pub const LIVE_MAX_FAILURES: u32 = 5;
/// 实时轮询每次最多查询的区块数
const LIVE_BATCH_SIZE: u64 = 500;
/// 单次 RPC 调用的上限
pub const RPC_TIMEOUT: Duration = Duration::from_secs(20);
const FAILURE_BACKOFF: Duration = Duration::from_secs(5);
const BLOCK_TIME_CACHE_LIMIT: usize = 10_000;

/// 基于 ethers Middleware 的链访问实现，HTTP 与 WebSocket 传输行为一致
pub struct EthersChain<M: Middleware> {
    provider: Arc<M>,
    config: Arc<ChainConfig>,
    pool_manager: PoolManager<M>,
    pool_tokens: Arc<RwLock<HashMap<H256, PoolTokens>>>,
    token_cache: Arc<RwLock<HashMap<Address, TokenInfo>>>,
    block_times: Arc<RwLock<HashMap<u64, DateTime<Utc>>>>,
}

impl<M: Middleware> Clone for EthersChain<M> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            config: Arc::clone(&self.config),
            pool_manager: self.pool_manager.clone(),
            pool_tokens: Arc::clone(&self.pool_tokens),
            token_cache: Arc::clone(&self.token_cache),
            block_times: Arc::clone(&self.block_times),
        }
    }
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(provider: Arc<M>, config: ChainConfig) -> Self {
        let pool_manager = PoolManager::new(config.pool_manager, Arc::clone(&provider));
        let mut pool_tokens = HashMap::new();
        if let Some(tokens) = config.pool_currencies {
            for pool_id in &config.monitored_pools {
                pool_tokens.insert(*pool_id, tokens);
            }
        }

        Self {
            provider,
            config: Arc::new(config),
            pool_manager,
            pool_tokens: Arc::new(RwLock::new(pool_tokens)),
            token_cache: Arc::new(RwLock::new(HashMap::new())),
            block_times: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<M> {
        Arc::clone(&self.provider)
    }

    /// Swap + Initialize，限定在被监控的池子
    fn pool_filter(&self, from_block: u64, to_block: u64) -> Filter {
        Filter::new()
            .address(self.config.pool_manager)
            .topic0(vec![swap_topic(), initialize_topic()])
            .topic1(self.config.monitored_pools.clone())
            .from_block(BlockNumber::Number(from_block.into()))
            .to_block(BlockNumber::Number(to_block.into()))
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, M::Error>>,
    {
        match timeout(RPC_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow::anyhow!("{}失败: {}", what, e)),
            Err(_) => Err(anyhow::anyhow!("{}超时 ({}s)", what, RPC_TIMEOUT.as_secs())),
        }
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        if let Some(ts) = self.block_times.read().await.get(&block_number) {
            return Ok(*ts);
        }

        let block = self
            .with_timeout("获取区块", self.provider.get_block(block_number))
            .await?
            .ok_or_else(|| anyhow::anyhow!("区块 {} 不存在", block_number))?;
        let timestamp = DateTime::<Utc>::from_timestamp(block.timestamp.as_u64() as i64, 0)
            .ok_or_else(|| anyhow::anyhow!("区块 {} 时间戳无效", block_number))?;

        let mut cache = self.block_times.write().await;
        if cache.len() >= BLOCK_TIME_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(block_number, timestamp);
        Ok(timestamp)
    }

    async fn transaction_sender(
        &self,
        tx_hash: H256,
        seen: &mut HashMap<H256, Address>,
    ) -> Result<Address> {
        if let Some(from) = seen.get(&tx_hash) {
            return Ok(*from);
        }
        let tx = self
            .with_timeout("获取交易", self.provider.get_transaction(tx_hash))
            .await?
            .ok_or_else(|| anyhow::anyhow!("交易 0x{:x} 不存在", tx_hash))?;
        seen.insert(tx_hash, tx.from);
        Ok(tx.from)
    }

    async fn enrich(
        &self,
        decoded: DecodedSwap,
        senders: &mut HashMap<H256, Address>,
    ) -> Result<RawSwapEvent> {
        let timestamp = self.block_timestamp(decoded.block_number).await?;
        let trader = self.transaction_sender(decoded.transaction_hash, senders).await?;
        Ok(decoded.into_event(self.config.chain_id, timestamp, trader))
    }

    async fn remember_initialize(&self, log: &Log) {
        if let Some((pool_id, currency0, currency1)) = decode_initialize_log(log) {
            info!(
                "🆕 链 {}: 池子初始化 0x{:x} (token0: 0x{:x}, token1: 0x{:x})",
                self.config.name, pool_id, currency0, currency1
            );
            self.pool_tokens
                .write()
                .await
                .insert(pool_id, PoolTokens::new(currency0, currency1));
        }
    }

    /// 拉取一段区块内的日志，补全时间戳与交易发起人，按 (区块, 日志序号) 排序
    async fn fetch_range(&self, from_block: u64, to_block: u64) -> Result<Vec<FetchedLog>> {
        let filter = self.pool_filter(from_block, to_block);
        let mut logs = self
            .with_timeout("查询日志", self.provider.get_logs(&filter))
            .await?;
        logs.sort_by_key(|log| {
            (
                log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
                log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
            )
        });

        let init_topic = initialize_topic();
        let mut senders = HashMap::new();
        let mut fetched = Vec::with_capacity(logs.len());
        for log in logs {
            if log.topics.first() == Some(&init_topic) {
                self.remember_initialize(&log).await;
                continue;
            }
            match decode_swap_log(&log) {
                Ok(decoded) => fetched.push(Ok(self.enrich(decoded, &mut senders).await?)),
                Err(malformed) => {
                    warn!("⚠️ 链 {}: 跳过无法解析的日志 {}", self.config.name, malformed);
                    fetched.push(Err(malformed));
                }
            }
        }

        Ok(fetched)
    }

    async fn run_live(
        self,
        mut cursor: BlockCursor,
        sink: mpsc::Sender<RawSwapEvent>,
        cancel: CancellationToken,
    ) -> SubscriptionEnd {
        let chain = self.config.name.clone();
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                info!("🛑 链 {}: 实时监听已停止", chain);
                return SubscriptionEnd::Stopped;
            }

            let range = self.current_block().await.map(|latest| cursor.next_range(latest));
            let polled = match range {
                Ok(None) => Ok(0usize),
                Ok(Some((from_block, to_block))) => match self.fetch_range(from_block, to_block).await {
                    Ok(events) => {
                        let mut delivered = 0usize;
                        for fetched in events {
                            let event = match fetched {
                                Ok(event) => event,
                                Err(malformed) => {
                                    warn!("⚠️ 链 {}: 跳过无法解析的日志: {}", chain, malformed);
                                    continue;
                                }
                            };
                            if sink.send(event).await.is_err() {
                                info!("🛑 链 {}: 事件接收端已关闭，停止监听", chain);
                                return SubscriptionEnd::Stopped;
                            }
                            delivered += 1;
                        }
                        cursor.advance_to(to_block);
                        debug!(
                            "📦 链 {}: 区块 {}-{} 推送 {} 个 Swap",
                            chain, from_block, to_block, delivered
                        );
                        Ok(delivered)
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            let wait = match polled {
                Ok(_) => {
                    failures = 0;
                    cursor.poll_interval
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        "❌ 链 {}: 轮询 Swap 事件失败 ({}/{}): {}",
                        chain, failures, LIVE_MAX_FAILURES, e
                    );
                    if failures >= LIVE_MAX_FAILURES {
                        return SubscriptionEnd::Dropped {
                            resume_from: cursor.next_block(),
                            error: e.to_string(),
                        };
                    }
                    FAILURE_BACKOFF
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 链 {}: 实时监听已停止", chain);
                    return SubscriptionEnd::Stopped;
                }
                _ = sleep(wait) => {}
            }
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> EventSource for EthersChain<M> {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn current_block(&self) -> Result<u64> {
        Ok(self
            .with_timeout("获取最新区块", self.provider.get_block_number())
            .await?
            .as_u64())
    }

    async fn subscribe_live(
        &self,
        from_block: Option<u64>,
        sink: mpsc::Sender<RawSwapEvent>,
    ) -> Result<LiveSubscription> {
        let last_processed = match from_block {
            Some(block) => block.saturating_sub(1),
            None => self.current_block().await?,
        };
        info!(
            "🚀 链 {}: 启动实时 Swap 监听，从区块 {} 开始 ({} 个池子)",
            self.config.name,
            last_processed + 1,
            self.config.monitored_pools.len()
        );

        let cursor = BlockCursor::new(last_processed, LIVE_BATCH_SIZE, self.config.poll_interval());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run_live(cursor, sink, cancel.clone()));
        Ok(LiveSubscription::new(cancel, handle))
    }

    async fn query_range(&self, from_block: u64, to_block: u64) -> Result<Vec<FetchedLog>> {
        if to_block < from_block {
            return Ok(Vec::new());
        }
        self.fetch_range(from_block, to_block).await
    }
}

#[async_trait]
impl<M: Middleware + 'static> TokenDirectory for EthersChain<M> {
    async fn pool_tokens(&self, pool_id: H256) -> Result<PoolTokens> {
        if let Some(tokens) = self.pool_tokens.read().await.get(&pool_id) {
            return Ok(*tokens);
        }

        info!("🔍 链 {}: 查询池子 0x{:x} 的 Initialize 事件", self.config.name, pool_id);
        let filter = Filter::new()
            .address(self.config.pool_manager)
            .topic0(initialize_topic())
            .topic1(pool_id)
            .from_block(BlockNumber::Number(self.config.pool_manager_deploy_block.into()))
            .to_block(BlockNumber::Latest);
        let logs = self
            .with_timeout("查询 Initialize 事件", self.provider.get_logs(&filter))
            .await?;

        let (_, token0, token1) = logs
            .iter()
            .find_map(decode_initialize_log)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "池子 0x{:x} 未找到 Initialize 事件，可以通过 *_POOL_CURRENCIES 指定",
                    pool_id
                )
            })?;

        let tokens = PoolTokens::new(token0, token1);
        self.pool_tokens.write().await.insert(pool_id, tokens);
        Ok(tokens)
    }

    async fn token_metadata(&self, token: Address) -> TokenMetadata {
        if token == NATIVE_ADDRESS {
            return TokenMetadata::Resolved(TokenInfo::native(&self.config.native_symbol, "Ethereum"));
        }
        if let Some(info) = self.token_cache.read().await.get(&token) {
            return TokenMetadata::Resolved(info.clone());
        }

        let contract = Erc20Metadata::new(token, Arc::clone(&self.provider));
        let symbol_call = contract.symbol();
        let name_call = contract.name();
        let decimals_call = contract.decimals();
        let (symbol, name, decimals) = tokio::join!(
            timeout(RPC_TIMEOUT, symbol_call.call()),
            timeout(RPC_TIMEOUT, name_call.call()),
            timeout(RPC_TIMEOUT, decimals_call.call()),
        );

        match (symbol, name, decimals) {
            (Ok(Ok(symbol)), Ok(Ok(name)), Ok(Ok(decimals))) => {
                let info = TokenInfo { address: token, symbol, name, decimals };
                self.token_cache.write().await.insert(token, info.clone());
                TokenMetadata::Resolved(info)
            }
            _ => {
                warn!(
                    "⚠️ 链 {}: 代币 0x{:x} 元数据获取失败，使用占位信息",
                    self.config.name, token
                );
                TokenMetadata::unknown(token)
            }
        }
    }

    async fn pool_state(&self, pool_id: H256) -> Result<PoolState> {
        let pool_call = self.pool_manager.get_pool(pool_id.0);
        let liquidity_call = self.pool_manager.get_liquidity(pool_id.0);
        let (slot0, liquidity) = timeout(RPC_TIMEOUT, async {
            tokio::join!(pool_call.call(), liquidity_call.call())
        })
        .await
        .map_err(|_| anyhow::anyhow!("读取池子状态超时 ({}s)", RPC_TIMEOUT.as_secs()))?;

        let (sqrt_price_x96, tick, protocol_fee, lp_fee) =
            slot0.map_err(|e| anyhow::anyhow!("getPool 调用失败: {}", e))?;
        let liquidity = liquidity.map_err(|e| anyhow::anyhow!("getLiquidity 调用失败: {}", e))?;

        Ok(PoolState {
            pool_id,
            sqrt_price_x96,
            tick,
            protocol_fee,
            lp_fee,
            liquidity,
            price: price_from_sqrt_x96(sqrt_price_x96),
        })
    }
}
