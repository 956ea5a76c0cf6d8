use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::types::PriceQuote;

/// 历史价格的缓存键前缀
pub const BLOCK_KEY_PREFIX: &str = "block:";

pub fn block_key(block_number: u64) -> String {
    format!("{}{}", BLOCK_KEY_PREFIX, block_number)
}

/// 历史区块价格最多保留的条目数，超出后按写入顺序淘汰
pub const BLOCK_ENTRY_LIMIT: usize = 4_096;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, PriceQuote>,
    /// 区块价格键的写入顺序
    block_order: VecDeque<String>,
}

/// 价格缓存：来源键 → 报价；每次读取时检查 TTL
pub struct PriceCache {
    state: Mutex<CacheState>,
    block_limit: usize,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::with_block_limit(BLOCK_ENTRY_LIMIT)
    }
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_limit(block_limit: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            block_limit: block_limit.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<PriceQuote> {
        self.state().entries.get(key).cloned()
    }

    /// 只返回写入时间在 `ttl` 之内的报价
    pub fn get_fresh(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<PriceQuote> {
        let ttl_secs = ttl.as_secs() as i64;
        self.state()
            .entries
            .get(key)
            .filter(|quote| quote.cache_age_secs(now) < ttl_secs)
            .cloned()
    }

    pub fn insert(&self, key: &str, quote: PriceQuote) {
        let mut state = self.state();
        let previous = state.entries.insert(key.to_string(), quote);
        if previous.is_some() || !key.starts_with(BLOCK_KEY_PREFIX) {
            return;
        }

        state.block_order.push_back(key.to_string());
        while state.block_order.len() > self.block_limit {
            if let Some(oldest) = state.block_order.pop_front() {
                state.entries.remove(&oldest);
            }
        }
    }

    /// 历史区块价格的条目数
    pub fn block_entries(&self) -> usize {
        self.state().block_order.len()
    }

    /// 最近写入的"当前价格"报价（不论是否过期，不含历史区块价格）
    pub fn latest_current(&self) -> Option<PriceQuote> {
        self.state()
            .entries
            .iter()
            .filter(|(key, _)| !key.starts_with(BLOCK_KEY_PREFIX))
            .map(|(_, quote)| quote)
            .max_by_key(|quote| quote.cached_at)
            .cloned()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.block_order.clear();
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
