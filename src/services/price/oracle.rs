use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::cache::{block_key, PriceCache};
use super::{HistoricalPriceSource, PriceSource};
use crate::types::{PriceFallback, PriceQuote, ResolvedPrice};

pub const DEFAULT_EMERGENCY_PRICE_USD: f64 = 3_400.0;
pub const DEFAULT_STALE_AFTER_SECS: i64 = 2 * 60 * 60;
/// 单个价格源一次调用的上限，超时按失败处理并尝试下一个来源
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// 供监控接口展示的价格状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceStatus {
    pub price: f64,
    pub source: String,
    pub fallback: PriceFallback,
    pub stale: bool,
    pub sources: Vec<String>,
}

/// 原生资产 USD 价格：按顺序尝试各个来源，然后是过期缓存，最后是应急常量
pub struct PriceOracle {
    sources: Vec<Arc<dyn PriceSource>>,
    historical: Option<Arc<dyn HistoricalPriceSource>>,
    cache: Arc<PriceCache>,
    emergency_price: Option<f64>,
    recency_window_blocks: u64,
    stale_after_secs: i64,
    source_timeout: Duration,
}

/// 给价格源调用加超时，超时与错误同样处理
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("{} 超时 ({}ms)", what, limit.as_millis())),
    }
}

impl PriceOracle {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, cache: Arc<PriceCache>) -> Self {
        Self {
            sources,
            historical: None,
            cache,
            emergency_price: Some(DEFAULT_EMERGENCY_PRICE_USD),
            recency_window_blocks: 50,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }

    pub fn with_historical(
        mut self,
        historical: Arc<dyn HistoricalPriceSource>,
        recency_window_blocks: u64,
    ) -> Self {
        self.historical = Some(historical);
        self.recency_window_blocks = recency_window_blocks;
        self
    }

    pub fn with_emergency_price(mut self, price: Option<f64>) -> Self {
        self.emergency_price = price;
        self
    }

    pub fn with_stale_after(mut self, secs: i64) -> Self {
        self.stale_after_secs = secs;
        self
    }

    pub fn with_source_timeout(mut self, limit: Duration) -> Self {
        self.source_timeout = limit;
        self
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub async fn current_price(&self) -> Result<ResolvedPrice> {
        let now = Utc::now();

        for source in &self.sources {
            let name = source.name();
            if let Some(quote) = self.cache.get_fresh(name, source.cache_ttl(), now) {
                debug!("💾 使用 {} 缓存价格: ${:.2}", name, quote.price);
                return Ok(live(quote));
            }

            match bounded(self.source_timeout, name, source.fetch_current()).await {
                Ok(quote) if quote.price.is_finite() && quote.price > 0.0 => {
                    debug!("📊 {} 价格: ${:.2}", name, quote.price);
                    self.cache.insert(name, quote.clone());
                    return Ok(live(quote));
                }
                Ok(quote) => warn!("⚠️ {} 返回无效价格: {}", name, quote.price),
                Err(e) => warn!("⚠️ 价格源 {} 失败，尝试下一个: {}", name, e),
            }
        }

        if let Some(quote) = self.cache.latest_current() {
            warn!(
                "⚠️ 所有价格源失败，使用过期缓存 {} (${:.2}, {}s 前)",
                quote.source,
                quote.price,
                quote.cache_age_secs(now)
            );
            return Ok(ResolvedPrice {
                price: quote.price,
                source: quote.source,
                fallback: PriceFallback::ExpiredCache,
            });
        }

        match self.emergency_price {
            Some(price) => {
                warn!("🚨 所有价格源失败且无缓存，使用应急价格 ${:.2}", price);
                Ok(ResolvedPrice {
                    price,
                    source: "emergency".to_string(),
                    fallback: PriceFallback::Emergency,
                })
            }
            None => Err(anyhow::anyhow!("所有价格源均不可用")),
        }
    }

    /// 近期区块直接用当前价格；更早的区块尝试链上按区块读取，失败则回退到当前价格
    pub async fn price_at_block(&self, block_number: u64) -> Result<ResolvedPrice> {
        let historical = match &self.historical {
            Some(historical) => historical,
            None => return self.current_price().await,
        };

        let latest = match bounded(self.source_timeout, "最新区块", historical.latest_block()).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!("⚠️ 获取最新区块失败，区块 {} 使用当前价格: {}", block_number, e);
                return self.current_price().await;
            }
        };
        if latest.saturating_sub(block_number) < self.recency_window_blocks {
            return self.current_price().await;
        }

        let key = block_key(block_number);
        if let Some(quote) = self.cache.get(&key) {
            return Ok(live(quote));
        }

        match bounded(self.source_timeout, "历史价格", historical.quote_at_block(block_number)).await {
            Ok(quote) if quote.price.is_finite() && quote.price > 0.0 => {
                debug!("📊 区块 {} 价格: ${:.2}", block_number, quote.price);
                self.cache.insert(&key, quote.clone());
                Ok(live(quote))
            }
            Ok(quote) => {
                warn!("⚠️ 区块 {} 历史价格无效 ({})，使用当前价格", block_number, quote.price);
                self.current_price().await
            }
            Err(e) => {
                warn!("⚠️ 无法获取区块 {} 的历史价格，使用当前价格: {}", block_number, e);
                self.current_price().await
            }
        }
    }

    /// 最可信来源（第一个来源）报告的更新时间是否超过阈值；只作监控信号
    pub async fn is_price_stale(&self) -> bool {
        let trusted = match self.sources.first() {
            Some(source) => source,
            None => return true,
        };

        let now = Utc::now();
        let quote: PriceQuote = match self.cache.get_fresh(trusted.name(), trusted.cache_ttl(), now) {
            Some(quote) => quote,
            None => match bounded(self.source_timeout, trusted.name(), trusted.fetch_current()).await {
                Ok(quote) => {
                    self.cache.insert(trusted.name(), quote.clone());
                    quote
                }
                Err(e) => {
                    warn!("⚠️ 检查 {} 价格时效失败: {}", trusted.name(), e);
                    return true;
                }
            },
        };

        let age = quote.update_age_secs(now);
        if age > self.stale_after_secs {
            warn!("⚠️ {} 价格已过时 ({} 分钟前更新)", trusted.name(), age / 60);
            return true;
        }
        false
    }

    pub async fn status(&self) -> Result<PriceStatus> {
        let resolved = self.current_price().await?;
        let stale = self.is_price_stale().await;
        if stale {
            info!("📉 当前价格来源 {} 置信度下降", resolved.source);
        }
        Ok(PriceStatus {
            price: resolved.price,
            source: resolved.source,
            fallback: resolved.fallback,
            stale,
            sources: self.source_names(),
        })
    }
}

fn live(quote: PriceQuote) -> ResolvedPrice {
    ResolvedPrice {
        price: quote.price,
        source: quote.source,
        fallback: PriceFallback::Live,
    }
}
