pub mod renderer;
pub mod telegram;

pub use renderer::{
    alert_banner, escape_html, format_number, format_usd, MessageAction, MessageRenderer, MessageTheme,
    RenderedMessage,
};
pub use telegram::TelegramNotifier;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::SwapStore;
use crate::types::{ProcessedSwap, WalletStats};

/// 外部消息通道
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &RenderedMessage) -> Result<()>;
}

/// 未配置 Telegram 时只写日志
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &RenderedMessage) -> Result<()> {
        info!("📣 通知:\n{}", message.text);
        Ok(())
    }
}

/// 一笔已入库交易的通知结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertDecision {
    Dispatched,
    /// 被告警设置的 USD 过滤挡掉
    Filtered,
    Muted,
}

/// 过滤、渲染并发送；发送是本组件唯一的外部副作用
pub struct NotificationDispatcher {
    renderer: MessageRenderer,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn SwapStore>,
}

impl NotificationDispatcher {
    pub fn new(renderer: MessageRenderer, notifier: Arc<dyn Notifier>, store: Arc<dyn SwapStore>) -> Self {
        Self {
            renderer,
            notifier,
            store,
        }
    }

    pub fn renderer(&self) -> &MessageRenderer {
        &self.renderer
    }

    pub async fn dispatch(&self, message: &RenderedMessage) -> Result<()> {
        self.notifier.send(message).await
    }

    pub async fn notify_swap(&self, swap: &ProcessedSwap, stats: &WalletStats) -> Result<AlertDecision> {
        if stats.is_muted {
            debug!("🔇 [{}] 钱包 0x{:x} 已静音", swap.chain_name, swap.trader());
            return Ok(AlertDecision::Muted);
        }

        let settings = self.store.get_alert_settings().await?;
        if !settings.allows(swap) {
            debug!(
                "⏭️ [{}] 交易 {} 未达到告警条件",
                swap.chain_name,
                swap.dedup_key()
            );
            return Ok(AlertDecision::Filtered);
        }

        let mut message = self.renderer.render(swap, Some(stats));
        if let Some(banner) = alert_banner(swap, Some(stats), &settings) {
            message.text = format!("{}\n\n{}", banner, message.text);
        }

        self.dispatch(&message).await?;
        info!(
            "📨 [{}] 已通过 {} 推送交易 {}",
            swap.chain_name,
            self.notifier.name(),
            swap.dedup_key()
        );
        Ok(AlertDecision::Dispatched)
    }
}
