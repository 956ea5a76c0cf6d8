use anyhow::{anyhow, Result};
use ethers::providers::Middleware;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::backfill::BackfillCoordinator;
use super::classifier::SwapClassifier;
use super::notification::{
    LogNotifier, MessageRenderer, MessageTheme, NotificationDispatcher, Notifier, TelegramNotifier,
};
use super::pipeline::SwapPipeline;
use super::price::{
    ChainlinkSource, CoinGeckoSource, DexScreenerSource, EtherscanSource, PriceCache, PriceOracle,
    PriceSource,
};
use crate::config::{ChainConfig, Config};
use crate::database::{Database, MemorySwapStore, SwapStore};
use crate::event_listener::{connect_provider, ChainProvider, EthersChain, EventSource, TokenDirectory};
use crate::types::AlertSettings;

/// 单链上组装好的全部组件
pub struct ChainRuntime {
    pub config: Arc<ChainConfig>,
    pub source: Arc<dyn EventSource>,
    pub directory: Arc<dyn TokenDirectory>,
    pub oracle: Arc<PriceOracle>,
    pub pipeline: Arc<SwapPipeline>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub backfill: Arc<BackfillCoordinator>,
}

/// 事件服务与 API 服务共享的运行时上下文
pub struct ServiceContext {
    pub config: Config,
    pub store: Arc<dyn SwapStore>,
    pub chains: HashMap<u64, Arc<ChainRuntime>>,
}

impl ServiceContext {
    pub async fn build(config: Config) -> Result<Self> {
        let store = open_store(&config).await?;
        let notifier = build_notifier(&config)?;
        let theme = MessageTheme::parse(&config.notification.theme)
            .ok_or_else(|| anyhow!("MESSAGE_THEME 无效: {}", config.notification.theme))?;

        let mut chains = HashMap::new();
        for chain in config.enabled_chains() {
            info!("🔗 初始化链 {} ({})", chain.name, chain.chain_id);
            let runtime = match connect_provider(chain).await? {
                ChainProvider::Ws(provider) => {
                    build_chain(provider, chain, &config, store.clone(), notifier.clone(), theme)?
                }
                ChainProvider::Http(provider) => {
                    build_chain(provider, chain, &config, store.clone(), notifier.clone(), theme)?
                }
            };
            chains.insert(chain.chain_id, Arc::new(runtime));
        }

        if chains.is_empty() {
            return Err(anyhow!("没有启用的区块链"));
        }

        Ok(Self {
            config,
            store,
            chains,
        })
    }

    pub fn chain(&self, chain_id: u64) -> Option<&Arc<ChainRuntime>> {
        self.chains.get(&chain_id)
    }

    /// 按链 ID 排序，第一个作为默认链（钱包卡片等跨链展示）
    pub fn primary_chain(&self) -> Option<&Arc<ChainRuntime>> {
        self.chains.keys().min().and_then(|id| self.chains.get(id))
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn SwapStore>> {
    let defaults = AlertSettings::with_min_threshold(config.min_buy_amount_usd);
    match &config.database.url {
        Some(url) => {
            let database = Database::connect(url, config.database.max_connections, defaults).await?;
            database.create_tables().await?;
            info!("🗄️ 已连接 Postgres 存储");
            Ok(Arc::new(database))
        }
        None => {
            warn!("⚠️ 未配置 DATABASE_URL，使用内存存储（重启后数据丢失）");
            Ok(Arc::new(MemorySwapStore::new(defaults)))
        }
    }
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    let telegram = &config.notification;
    match (&telegram.telegram_bot_token, &telegram.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            info!("📨 通知通道: Telegram");
            Ok(Arc::new(TelegramNotifier::new(token, chat_id)?))
        }
        _ => {
            info!("📝 未配置 Telegram，通知只写入日志");
            Ok(Arc::new(LogNotifier))
        }
    }
}

fn build_chain<M: Middleware + 'static>(
    provider: Arc<M>,
    chain: &ChainConfig,
    config: &Config,
    store: Arc<dyn SwapStore>,
    notifier: Arc<dyn Notifier>,
    theme: MessageTheme,
) -> Result<ChainRuntime> {
    let chain_config = Arc::new(chain.clone());
    let ethers_chain = Arc::new(EthersChain::new(provider.clone(), chain.clone()));

    let chainlink = Arc::new(ChainlinkSource::new(chain.price_feed, provider));
    let dexscreener = DexScreenerSource::new(chain.wrapped_native, &chain.dex_chain_slug)?;
    let etherscan = EtherscanSource::new(chain.chain_id, config.price.etherscan_api_key.clone())?;
    let coingecko = CoinGeckoSource::new(config.price.coingecko_api_key.clone())?;
    // 顺序即优先级：链上喂价 → DEX 聚合 → 区块浏览器 → 行情 API
    let sources: Vec<Arc<dyn PriceSource>> = vec![
        chainlink.clone() as Arc<dyn PriceSource>,
        Arc::new(dexscreener) as Arc<dyn PriceSource>,
        Arc::new(etherscan) as Arc<dyn PriceSource>,
        Arc::new(coingecko) as Arc<dyn PriceSource>,
    ];
    let oracle = Arc::new(
        PriceOracle::new(sources, Arc::new(PriceCache::new()))
            .with_historical(chainlink, chain.recency_window_blocks())
            .with_emergency_price(config.price.emergency_price_usd)
            .with_stale_after(config.price.stale_after_secs),
    );

    let source: Arc<dyn EventSource> = ethers_chain.clone();
    let directory: Arc<dyn TokenDirectory> = ethers_chain;
    let classifier = Arc::new(SwapClassifier::new(
        chain_config.clone(),
        directory.clone(),
        oracle.clone(),
    ));
    let pipeline = Arc::new(SwapPipeline::new(classifier, store.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        MessageRenderer::new(theme, chain_config.clone()),
        notifier,
        store,
    ));
    let backfill = Arc::new(
        BackfillCoordinator::new(
            chain_config.clone(),
            source.clone(),
            pipeline.clone(),
            config.backfill.clone(),
        )
        .with_dispatcher(dispatcher.clone()),
    );

    Ok(ChainRuntime {
        config: chain_config,
        source,
        directory,
        oracle,
        pipeline,
        dispatcher,
        backfill,
    })
}
