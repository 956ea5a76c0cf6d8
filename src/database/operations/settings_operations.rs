use anyhow::Result;
use sqlx::{PgPool, Row};

use crate::types::AlertSettings;

pub struct SettingsOperations;

impl SettingsOperations {
    /// 单例设置行，不存在时按默认值写入
    pub async fn get_or_create(pool: &PgPool, defaults: &AlertSettings) -> Result<AlertSettings> {
        sqlx::query(
            r#"
            INSERT INTO alert_settings (
                id, min_threshold_usd, max_threshold_usd, show_small_trades,
                enable_whale_alerts, enable_smart_money_alerts
            )
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(defaults.min_threshold_usd)
        .bind(defaults.max_threshold_usd)
        .bind(defaults.show_small_trades)
        .bind(defaults.enable_whale_alerts)
        .bind(defaults.enable_smart_money_alerts)
        .execute(pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT min_threshold_usd, max_threshold_usd, show_small_trades,
                   enable_whale_alerts, enable_smart_money_alerts
            FROM alert_settings WHERE id = 1
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(AlertSettings {
            min_threshold_usd: row.try_get("min_threshold_usd")?,
            max_threshold_usd: row.try_get("max_threshold_usd")?,
            show_small_trades: row.try_get("show_small_trades")?,
            enable_whale_alerts: row.try_get("enable_whale_alerts")?,
            enable_smart_money_alerts: row.try_get("enable_smart_money_alerts")?,
        })
    }

    pub async fn update(pool: &PgPool, settings: &AlertSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_settings (
                id, min_threshold_usd, max_threshold_usd, show_small_trades,
                enable_whale_alerts, enable_smart_money_alerts
            )
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                min_threshold_usd = EXCLUDED.min_threshold_usd,
                max_threshold_usd = EXCLUDED.max_threshold_usd,
                show_small_trades = EXCLUDED.show_small_trades,
                enable_whale_alerts = EXCLUDED.enable_whale_alerts,
                enable_smart_money_alerts = EXCLUDED.enable_smart_money_alerts
            "#,
        )
        .bind(settings.min_threshold_usd)
        .bind(settings.max_threshold_usd)
        .bind(settings.show_small_trades)
        .bind(settings.enable_whale_alerts)
        .bind(settings.enable_smart_money_alerts)
        .execute(pool)
        .await?;
        Ok(())
    }
}
