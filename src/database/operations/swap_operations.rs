use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::WalletOperations;
use crate::types::{PricingState, ProcessedSwap, SavedSwap, WalletStats};

pub struct SwapOperations;

impl SwapOperations {
    /// 入库与钱包统计在同一个事务里提交；重复或失败时都不会留下半条记录
    pub async fn record_swap(pool: &PgPool, swap: &ProcessedSwap) -> Result<Option<(SavedSwap, WalletStats)>> {
        let mut tx = pool.begin().await?;
        let Some(saved) = Self::insert_swap(&mut tx, swap).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let stats = WalletOperations::apply_swap(&mut tx, swap.trader(), swap).await?;
        tx.commit().await?;
        Ok(Some((saved, stats)))
    }

    pub async fn save_swap(pool: &PgPool, swap: &ProcessedSwap) -> Result<Option<SavedSwap>> {
        let mut tx = pool.begin().await?;
        let saved = Self::insert_swap(&mut tx, swap).await?;
        tx.commit().await?;
        Ok(saved)
    }

    /// 冲突即视为重复，由唯一约束保证并发下只成功一次
    pub async fn insert_swap(
        tx: &mut Transaction<'_, Postgres>,
        swap: &ProcessedSwap,
    ) -> Result<Option<SavedSwap>> {
        let mut saved = SavedSwap::from_processed(swap);
        let (pricing_state, price_source, native_price_usd) = match &swap.pricing {
            PricingState::Priced { source, native_price_usd } => {
                ("priced", Some(source.clone()), Some(*native_price_usd))
            }
            PricingState::Unpriced { .. } => ("unpriced", None, None),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO swaps (
                id, chain_id, tx_hash, log_index, pool_id, sender, trader, is_buy,
                buy_token, buy_amount, sell_token, sell_amount, value_usd,
                pricing_state, price_source, native_price_usd, tier, block_number, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            RETURNING id, created_at
            "#,
        )
        .bind(saved.id)
        .bind(saved.chain_id as i64)
        .bind(format!("0x{:x}", saved.transaction_hash))
        .bind(saved.log_index as i64)
        .bind(format!("0x{:x}", saved.pool_id))
        .bind(format!("0x{:x}", swap.event.sender))
        .bind(format!("0x{:x}", saved.trader))
        .bind(saved.is_buy)
        .bind(&swap.buy_token)
        .bind(&swap.buy_amount)
        .bind(&swap.sell_token)
        .bind(&swap.sell_amount)
        .bind(saved.value_usd)
        .bind(pricing_state)
        .bind(price_source)
        .bind(native_price_usd)
        .bind(saved.tier.as_str())
        .bind(saved.block_number as i64)
        .bind(saved.timestamp)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(match row {
            Some(row) => {
                saved.id = row.get::<Uuid, _>("id");
                saved.created_at = row.get::<DateTime<Utc>, _>("created_at");
                Some(saved)
            }
            None => None,
        })
    }

    pub async fn count_swaps(pool: &PgPool) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM swaps")
            .fetch_one(pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
