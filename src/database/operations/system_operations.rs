use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

pub struct SystemOperations;

impl SystemOperations {
    pub async fn create_tables(pool: &PgPool) -> Result<()> {
        // 每条链上事件只记录一次：(tx_hash, log_index) 唯一
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id UUID PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                tx_hash VARCHAR(66) NOT NULL,
                log_index BIGINT NOT NULL,
                pool_id VARCHAR(66) NOT NULL,
                sender VARCHAR(42) NOT NULL,
                trader VARCHAR(42) NOT NULL,
                is_buy BOOLEAN NOT NULL,
                buy_token VARCHAR(64) NOT NULL,
                buy_amount TEXT NOT NULL,
                sell_token VARCHAR(64) NOT NULL,
                sell_amount TEXT NOT NULL,
                value_usd DECIMAL(36, 18),
                pricing_state VARCHAR(20) NOT NULL,
                price_source VARCHAR(40),
                native_price_usd DOUBLE PRECISION,
                tier VARCHAR(20) NOT NULL,
                block_number BIGINT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (tx_hash, log_index)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_swaps_trader ON swaps (trader)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_swaps_block ON swaps (chain_id, block_number)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                address VARCHAR(42) PRIMARY KEY,
                first_seen TIMESTAMPTZ NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                total_swaps BIGINT NOT NULL DEFAULT 0,
                buy_count BIGINT NOT NULL DEFAULT 0,
                sell_count BIGINT NOT NULL DEFAULT 0,
                total_volume_usd DECIMAL(36, 18) NOT NULL DEFAULT 0,
                priced_buy_count BIGINT NOT NULL DEFAULT 0,
                avg_buy_size DECIMAL(36, 18) NOT NULL DEFAULT 0,
                largest_buy DECIMAL(36, 18) NOT NULL DEFAULT 0,
                profitable_tokens BIGINT NOT NULL DEFAULT 0,
                classification VARCHAR(32) NOT NULL DEFAULT 'Small Trader',
                is_tracked BOOLEAN NOT NULL DEFAULT FALSE,
                is_muted BOOLEAN NOT NULL DEFAULT FALSE,
                label TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_wallets_volume ON wallets (total_volume_usd DESC)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                min_threshold_usd DECIMAL(36, 18) NOT NULL,
                max_threshold_usd DECIMAL(36, 18),
                show_small_trades BOOLEAN NOT NULL,
                enable_whale_alerts BOOLEAN NOT NULL,
                enable_smart_money_alerts BOOLEAN NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        info!("✅ 数据库表检查完成 (swaps, wallets, alert_settings)");
        Ok(())
    }
}
