use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次价格报价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub source: String,
    /// 源数据的小数精度（链上喂价通常是 8）
    pub decimals: u8,
    /// 链上喂价的 round id，其他源为空
    pub round_id: Option<u128>,
    /// 源自身报告的更新时间
    pub updated_at: DateTime<Utc>,
    /// 写入缓存的时间
    pub cached_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(source: &str, price: f64, decimals: u8, updated_at: DateTime<Utc>) -> Self {
        Self {
            price,
            source: source.to_string(),
            decimals,
            round_id: None,
            updated_at,
            cached_at: Utc::now(),
        }
    }

    pub fn with_round_id(mut self, round_id: u128) -> Self {
        self.round_id = Some(round_id);
        self
    }

    /// 报价在缓存中的年龄（秒）
    pub fn cache_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_seconds()
    }

    /// 源报告的更新时间距今多久（秒）
    pub fn update_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }
}

/// 价格解析所走到的回退层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceFallback {
    /// 某个实时源（或其未过期缓存）
    Live,
    /// 过期缓存
    ExpiredCache,
    /// 硬编码应急价格
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub price: f64,
    pub source: String,
    pub fallback: PriceFallback,
}
