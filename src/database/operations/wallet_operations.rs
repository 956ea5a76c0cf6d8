use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::types::{ProcessedSwap, WalletStats, WalletTier};

const WALLET_COLUMNS: &str = r#"
    address, first_seen, last_seen, total_swaps, buy_count, sell_count,
    total_volume_usd, priced_buy_count, avg_buy_size, largest_buy,
    profitable_tokens, classification, is_tracked, is_muted, label
"#;

pub struct WalletOperations;

impl WalletOperations {
    /// 在调用方的事务内锁定钱包行并增量更新，由调用方提交
    pub async fn apply_swap(
        tx: &mut Transaction<'_, Postgres>,
        trader: Address,
        swap: &ProcessedSwap,
    ) -> Result<WalletStats> {
        let address = format!("0x{:x}", trader);

        Self::ensure_wallet(tx, &address, swap.event.timestamp).await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE address = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(&address)
        .fetch_one(&mut **tx)
        .await?;

        let mut stats = wallet_from_row(&row)?;
        stats.record_swap(swap);

        sqlx::query(
            r#"
            UPDATE wallets SET
                first_seen = $2,
                last_seen = $3,
                total_swaps = $4,
                buy_count = $5,
                sell_count = $6,
                total_volume_usd = $7,
                priced_buy_count = $8,
                avg_buy_size = $9,
                largest_buy = $10,
                profitable_tokens = $11,
                classification = $12
            WHERE address = $1
            "#,
        )
        .bind(&address)
        .bind(stats.first_seen)
        .bind(stats.last_seen)
        .bind(stats.total_swaps as i64)
        .bind(stats.buy_count as i64)
        .bind(stats.sell_count as i64)
        .bind(stats.total_volume_usd)
        .bind(stats.priced_buy_count as i64)
        .bind(stats.avg_buy_size)
        .bind(stats.largest_buy)
        .bind(stats.profitable_tokens as i64)
        .bind(stats.classification.label())
        .execute(&mut **tx)
        .await?;

        Ok(stats)
    }

    async fn ensure_wallet(
        tx: &mut Transaction<'_, Postgres>,
        address: &str,
        seen: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (address, first_seen, last_seen)
            VALUES ($1, $2, $2)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(address)
        .bind(seen)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_wallet(pool: &PgPool, address: Address) -> Result<Option<WalletStats>> {
        let row = sqlx::query(&format!("SELECT {} FROM wallets WHERE address = $1", WALLET_COLUMNS))
            .bind(format!("0x{:x}", address))
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    pub async fn get_top_wallets(pool: &PgPool, limit: i64) -> Result<Vec<WalletStats>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallets ORDER BY total_volume_usd DESC, total_swaps DESC LIMIT $1",
            WALLET_COLUMNS
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;
        rows.iter().map(wallet_from_row).collect()
    }

    pub async fn get_tracked_wallets(pool: &PgPool) -> Result<Vec<WalletStats>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE is_tracked = TRUE ORDER BY total_volume_usd DESC",
            WALLET_COLUMNS
        ))
        .fetch_all(pool)
        .await?;
        rows.iter().map(wallet_from_row).collect()
    }

    pub async fn set_tracked(pool: &PgPool, address: Address, label: Option<String>) -> Result<WalletStats> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wallets (address, first_seen, last_seen, is_tracked, label)
            VALUES ($1, NOW(), NOW(), TRUE, $2)
            ON CONFLICT (address) DO UPDATE
                SET is_tracked = TRUE, label = COALESCE($2, wallets.label)
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(format!("0x{:x}", address))
        .bind(label)
        .fetch_one(pool)
        .await?;
        wallet_from_row(&row)
    }

    pub async fn set_muted(pool: &PgPool, address: Address, muted: bool) -> Result<WalletStats> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wallets (address, first_seen, last_seen, is_muted)
            VALUES ($1, NOW(), NOW(), $2)
            ON CONFLICT (address) DO UPDATE SET is_muted = $2
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(format!("0x{:x}", address))
        .bind(muted)
        .fetch_one(pool)
        .await?;
        wallet_from_row(&row)
    }
}

fn wallet_from_row(row: &PgRow) -> Result<WalletStats> {
    let address: String = row.try_get("address")?;
    let classification: String = row.try_get("classification")?;
    let count = |column: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(column)?.max(0) as u64) };

    Ok(WalletStats {
        address: address
            .parse::<Address>()
            .map_err(|e| anyhow::anyhow!("钱包地址 {} 无效: {}", address, e))?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        total_swaps: count("total_swaps")?,
        buy_count: count("buy_count")?,
        sell_count: count("sell_count")?,
        total_volume_usd: row.try_get::<Decimal, _>("total_volume_usd")?,
        priced_buy_count: count("priced_buy_count")?,
        avg_buy_size: row.try_get::<Decimal, _>("avg_buy_size")?,
        largest_buy: row.try_get::<Decimal, _>("largest_buy")?,
        profitable_tokens: count("profitable_tokens")?,
        classification: WalletTier::from_label(&classification),
        is_tracked: row.try_get("is_tracked")?,
        is_muted: row.try_get("is_muted")?,
        label: row.try_get("label")?,
    })
}
