use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

use super::PriceSource;
use crate::types::PriceQuote;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const OFFCHAIN_CACHE_TTL: Duration = Duration::from_secs(60);
/// DexScreener 只采信流动性高于这个值的交易对
const MIN_DEX_LIQUIDITY_USD: f64 = 100_000.0;

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent("SwapMonitor/1.0")
        .build()
        .map_err(|e| anyhow!("创建 HTTP 客户端失败: {}", e))
}

async fn get_json(request: reqwest::RequestBuilder, source: &str) -> Result<JsonValue> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("{} 请求失败: {}", source, response.status()));
    }
    Ok(response.json().await?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexScreenerResponse {
    #[serde(default)]
    pub pairs: Option<Vec<DexScreenerPair>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexScreenerPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    pub liquidity: Option<DexScreenerLiquidity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexScreenerLiquidity {
    pub usd: Option<f64>,
}

/// 只看目标链上流动性足够的交易对，取流动性最高的那个
pub fn select_dexscreener_price(response: &DexScreenerResponse, chain_slug: &str) -> Result<f64> {
    response
        .pairs
        .iter()
        .flatten()
        .filter(|pair| pair.chain_id == chain_slug)
        .filter_map(|pair| {
            let liquidity = pair.liquidity.as_ref()?.usd?;
            let price = pair.price_usd.as_deref()?.parse::<f64>().ok()?;
            (liquidity > MIN_DEX_LIQUIDITY_USD && price > 0.0).then_some((liquidity, price))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, price)| price)
        .ok_or_else(|| anyhow!("DexScreener 没有找到高流动性的 {} 交易对", chain_slug))
}

/// DEX 聚合价格（包装原生代币的最高流动性交易对）
pub struct DexScreenerSource {
    client: reqwest::Client,
    wrapped_native: Address,
    chain_slug: String,
}

impl DexScreenerSource {
    pub fn new(wrapped_native: Address, chain_slug: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            wrapped_native,
            chain_slug: chain_slug.to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for DexScreenerSource {
    fn name(&self) -> &str {
        "dexscreener"
    }

    fn cache_ttl(&self) -> Duration {
        OFFCHAIN_CACHE_TTL
    }

    async fn fetch_current(&self) -> Result<PriceQuote> {
        let url = format!(
            "https://api.dexscreener.com/latest/dex/tokens/0x{:x}",
            self.wrapped_native
        );
        let body = get_json(self.client.get(&url), self.name()).await?;
        let response: DexScreenerResponse = serde_json::from_value(body)?;
        let price = select_dexscreener_price(&response, &self.chain_slug)?;
        debug!("📊 DexScreener ETH/USD: ${:.2}", price);
        Ok(PriceQuote::new(self.name(), price, 18, Utc::now()))
    }
}

/// 解析 Etherscan `stats/ethprice` 响应：(价格, 源更新时间)
pub fn parse_etherscan_price(body: &JsonValue) -> Result<(f64, Option<DateTime<Utc>>)> {
    let result = body
        .get("result")
        .filter(|r| r.is_object())
        .ok_or_else(|| {
            let message = body.get("result").and_then(|r| r.as_str()).unwrap_or("无结果");
            anyhow!("Etherscan 返回错误: {}", message)
        })?;

    let price = result
        .get("ethusd")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|p| *p > 0.0)
        .ok_or_else(|| anyhow!("Etherscan 价格无效"))?;

    let updated_at = result
        .get("ethusd_timestamp")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

    Ok((price, updated_at))
}

/// 区块浏览器的当前价格（不支持历史价格）
pub struct EtherscanSource {
    client: reqwest::Client,
    chain_id: u64,
    api_key: Option<String>,
}

impl EtherscanSource {
    pub fn new(chain_id: u64, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            chain_id,
            api_key,
        })
    }
}

#[async_trait]
impl PriceSource for EtherscanSource {
    fn name(&self) -> &str {
        "etherscan"
    }

    fn cache_ttl(&self) -> Duration {
        OFFCHAIN_CACHE_TTL
    }

    async fn fetch_current(&self) -> Result<PriceQuote> {
        let chain_id = self.chain_id.to_string();
        let mut params = vec![
            ("chainid", chain_id.as_str()),
            ("module", "stats"),
            ("action", "ethprice"),
        ];
        if let Some(key) = self.api_key.as_deref() {
            params.push(("apikey", key));
        }

        let request = self.client.get("https://api.etherscan.io/v2/api").query(&params);
        let body = get_json(request, self.name()).await?;
        let (price, updated_at) = parse_etherscan_price(&body)?;
        Ok(PriceQuote::new(
            self.name(),
            price,
            18,
            updated_at.unwrap_or_else(Utc::now),
        ))
    }
}

/// 解析 CoinGecko `simple/price` 响应
pub fn parse_coingecko_price(body: &JsonValue, coin_id: &str) -> Result<(f64, Option<DateTime<Utc>>)> {
    let entry = body
        .get(coin_id)
        .ok_or_else(|| anyhow!("CoinGecko 响应缺少 {}", coin_id))?;
    let price = entry
        .get("usd")
        .and_then(|v| v.as_f64())
        .filter(|p| *p > 0.0)
        .ok_or_else(|| anyhow!("CoinGecko 价格无效"))?;
    let updated_at = entry
        .get("last_updated_at")
        .and_then(|v| v.as_i64())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
    Ok((price, updated_at))
}

/// 通用行情 API；配置了 key 时走 pro 接口
pub struct CoinGeckoSource {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl CoinGeckoSource {
    const COIN_ID: &'static str = "ethereum";

    pub fn new(api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
        })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn cache_ttl(&self) -> Duration {
        OFFCHAIN_CACHE_TTL
    }

    async fn fetch_current(&self) -> Result<PriceQuote> {
        let base = if self.api_key.is_some() {
            "https://pro-api.coingecko.com/api/v3/simple/price"
        } else {
            "https://api.coingecko.com/api/v3/simple/price"
        };
        let mut request = self.client.get(base).query(&[
            ("ids", Self::COIN_ID),
            ("vs_currencies", "usd"),
            ("include_last_updated_at", "true"),
        ]);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("x-cg-pro-api-key", key);
        }

        let body = get_json(request, self.name()).await?;
        let (price, updated_at) = parse_coingecko_price(&body, Self::COIN_ID)?;
        Ok(PriceQuote::new(
            self.name(),
            price,
            18,
            updated_at.unwrap_or_else(Utc::now),
        ))
    }
}
