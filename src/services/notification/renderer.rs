use ethers::types::{Address, H256};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::services::classifier::format_token_amount;
use crate::types::{
    AlertSettings, ProcessedSwap, TradeTier, WalletStats, WalletTier, NATIVE_ADDRESS,
};

const DIVIDER: &str = "────────────────────────";
const COMPACT_DIVIDER: &str = "─────────────";

/// 交易卡片的排版风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTheme {
    Minimal,
    Compact,
    Rich,
}

impl MessageTheme {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minimal" => Some(MessageTheme::Minimal),
            "compact" => Some(MessageTheme::Compact),
            "rich" => Some(MessageTheme::Rich),
            _ => None,
        }
    }
}

/// 消息附带的外链按钮
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAction {
    pub label: String,
    pub url: String,
}

impl MessageAction {
    fn new(label: &str, url: String) -> Self {
        Self {
            label: label.to_string(),
            url,
        }
    }
}

/// 渲染结果：HTML 文本 + 按行排列的按钮
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub text: String,
    pub actions: Vec<Vec<MessageAction>>,
}

impl RenderedMessage {
    pub fn text(text: String) -> Self {
        Self {
            text,
            actions: Vec::new(),
        }
    }
}

/// 数字格式化：M / K 后缀，小数按量级增加精度，极小值展开成普通小数
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "—".to_string();
    }
    if value < 0.0 {
        return format!("-{}", format_number(-value));
    }

    if value >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.2}K", value / 1_000.0)
    } else if value >= 1.0 {
        format!("{:.2}", value)
    } else if value >= 0.01 {
        format!("{:.4}", value)
    } else if value >= 0.0001 {
        format!("{:.6}", value)
    } else if value == 0.0 {
        "0".to_string()
    } else {
        // 保留 3 位有效数字
        let leading_zeros = (-value.log10()).floor() as usize;
        let precision = (leading_zeros + 3).min(30);
        format!("{:.*}", precision, value)
    }
}

pub fn format_usd(value: Option<Decimal>) -> String {
    match value.and_then(|v| v.to_f64()) {
        Some(v) => format!("${}", format_number(v)),
        None => "—".to_string(),
    }
}

/// Telegram HTML 模式下转义链上和用户提供的文本
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn short_address(address: Address) -> String {
    let hex = format!("0x{:x}", address);
    format!("{}...{}", &hex[..8], &hex[hex.len() - 6..])
}

fn amount_value(raw: i128, decimals: u8) -> f64 {
    format_token_amount(raw, decimals).parse::<f64>().unwrap_or(f64::NAN)
}

fn percent(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{:.0}%", rate * 100.0),
        None => "—".to_string(),
    }
}

/// 各个外部站点使用的网络标识：(DEXTools, Uniswap, GeckoTerminal)
fn network_slugs(chain_id: u64) -> (&'static str, &'static str, &'static str) {
    match chain_id {
        8453 => ("base", "base", "base"),
        42161 => ("arbitrum", "arbitrum", "arbitrum"),
        _ => ("ether", "mainnet", "eth"),
    }
}

/// 纯渲染：不做任何 I/O
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    theme: MessageTheme,
    chain: Arc<ChainConfig>,
}

impl MessageRenderer {
    pub fn new(theme: MessageTheme, chain: Arc<ChainConfig>) -> Self {
        Self { theme, chain }
    }

    pub fn theme(&self) -> MessageTheme {
        self.theme
    }

    fn address_url(&self, address: Address) -> String {
        format!("{}/address/0x{:x}", self.chain.explorer_url, address)
    }

    fn tx_url(&self, hash: H256) -> String {
        format!("{}/tx/0x{:x}", self.chain.explorer_url, hash)
    }

    /// 交易卡片
    pub fn render(&self, swap: &ProcessedSwap, stats: Option<&WalletStats>) -> RenderedMessage {
        let monitored = swap.monitored_token();
        let counter = swap.counter_token();
        let monitored_amount = amount_value(swap.event.delta(swap.monitored_slot), monitored.decimals);
        let counter_amount = amount_value(swap.event.delta(swap.monitored_slot.other()), counter.decimals);

        let token_out = escape_html(&monitored.symbol);
        let card = TradeCard {
            direction: if swap.is_buy { "BUY" } else { "SELL" },
            arrow: if swap.is_buy { "▲" } else { "▼" },
            token_in: escape_html(&counter.symbol),
            token_amount: format_number(monitored_amount),
            native_amount: format_number(counter_amount),
            value_usd: format_usd(swap.value_usd),
            price_per_token: match swap.value_usd.and_then(|v| v.to_f64()) {
                Some(value) if value > 0.0 && monitored_amount > 0.0 => Some(format!(
                    "${}/{}",
                    format_number(value / monitored_amount),
                    token_out
                )),
                _ => None,
            },
            time: swap.event.timestamp.format("%I:%M %p").to_string(),
            chain: escape_html(&swap.chain_name),
            token_out,
        };

        let text = match self.theme {
            MessageTheme::Minimal => self.render_minimal(swap, &card),
            MessageTheme::Compact => self.render_compact(swap, stats, &card),
            MessageTheme::Rich => self.render_rich(swap, stats, &card),
        };

        RenderedMessage {
            text,
            actions: self.trade_actions(swap),
        }
    }

    fn render_minimal(&self, swap: &ProcessedSwap, card: &TradeCard) -> String {
        let trader_label = if swap.is_buy { "Buyer" } else { "Seller" };
        let tier = swap.tier();
        format!(
            "<b>{} {}!</b>\n\n💵 {} {} ({})\n\n🪙 {} {}\n\n👤 <a href=\"{}\">{}</a> | <a href=\"{}\">Txn</a>\n\n{} {} ▪ {}",
            card.token_out,
            card.direction,
            card.native_amount,
            card.token_in,
            card.value_usd,
            card.token_amount,
            card.token_out,
            self.address_url(swap.trader()),
            trader_label,
            self.tx_url(swap.event.transaction_hash),
            tier.emoji(),
            tier.as_str(),
            card.chain,
        )
    }

    fn render_compact(&self, swap: &ProcessedSwap, stats: Option<&WalletStats>, card: &TradeCard) -> String {
        let tier_icon = stats
            .map(|s| s.classification.indicator())
            .unwrap_or("▪");
        let price = card
            .price_per_token
            .as_ref()
            .map(|p| format!(" ▪ {}", p))
            .unwrap_or_default();
        format!(
            "{} {} {} {} ≈ {} {}\n{}\n{}{}\n<code>{}</code> {}\n{} ▪ #{}",
            card.direction,
            card.arrow,
            card.token_amount,
            card.token_out,
            card.native_amount,
            card.token_in,
            COMPACT_DIVIDER,
            card.value_usd,
            price,
            short_address(swap.trader()),
            tier_icon,
            card.time,
            swap.event.block_number,
        )
    }

    fn render_rich(&self, swap: &ProcessedSwap, stats: Option<&WalletStats>, card: &TradeCard) -> String {
        let tier = stats.map(|s| s.classification).unwrap_or(WalletTier::SmallTrader);
        let win_rate = percent(stats.and_then(|s| s.win_rate()));
        let swap_count = stats.map(|s| s.total_swaps).unwrap_or(1);
        let avg_buy = match stats {
            Some(s) if s.avg_buy_size > Decimal::ZERO => format_usd(Some(s.avg_buy_size)),
            _ => "—".to_string(),
        };
        let price = card
            .price_per_token
            .as_ref()
            .map(|p| format!("  ({})", p))
            .unwrap_or_default();

        format!(
            "{dir} {arrow} {out}\n{div}\n\n<b>{amount} {out}</b>  ≈  {native} {inp}\nEst. Value:  <b>{value}</b>{price}\n\nTrader: <code>{trader}</code>\nTier: {tier} {icon} Win Rate: {win}\nHistory: {count} swaps ▪ Avg: {avg}\n\n{div}\nPool: <code>{pool}</code> ({chain})\nTime: {time} ▪ Block: {block}\n{div}",
            dir = card.direction,
            arrow = card.arrow,
            out = card.token_out,
            div = DIVIDER,
            amount = card.token_amount,
            native = card.native_amount,
            inp = card.token_in,
            value = card.value_usd,
            price = price,
            trader = short_address(swap.trader()),
            tier = tier.label(),
            icon = tier.indicator(),
            win = win_rate,
            count = swap_count,
            avg = avg_buy,
            pool = short_pool(swap.event.pool_id),
            chain = card.chain,
            time = card.time,
            block = swap.event.block_number,
        )
    }

    /// 交易按钮：图表 / 买入 / 热度，以及区块浏览器
    pub fn trade_actions(&self, swap: &ProcessedSwap) -> Vec<Vec<MessageAction>> {
        let (dextools, uniswap, gecko) = network_slugs(self.chain.chain_id);
        let currency = |address: Address| {
            if address == NATIVE_ADDRESS {
                "ETH".to_string()
            } else {
                format!("0x{:x}", address)
            }
        };

        vec![
            vec![
                MessageAction::new(
                    "📈 Chart",
                    format!(
                        "https://www.dextools.io/app/en/{}/pair-explorer/0x{:x}",
                        dextools,
                        swap.monitored_token().address
                    ),
                ),
                MessageAction::new(
                    "🔄 Buy",
                    format!(
                        "https://app.uniswap.org/#/swap?chain={}&inputCurrency={}&outputCurrency={}",
                        uniswap,
                        currency(swap.counter_token().address),
                        currency(swap.monitored_token().address)
                    ),
                ),
                MessageAction::new(
                    "🟦 Trending",
                    format!(
                        "https://www.geckoterminal.com/{}/pools/0x{:x}",
                        gecko, swap.event.pool_id
                    ),
                ),
            ],
            vec![MessageAction::new(
                "🔍 Explorer",
                self.tx_url(swap.event.transaction_hash),
            )],
        ]
    }

    /// 钱包分析卡片
    pub fn render_wallet_summary(&self, address: Address, stats: Option<&WalletStats>) -> RenderedMessage {
        let wallet = match stats {
            Some(wallet) => wallet,
            None => {
                return RenderedMessage::text(format!(
                    "Wallet <code>0x{:x}</code> not found in database.",
                    address
                ))
            }
        };

        let tier = wallet.classification;
        let largest_buy = if wallet.largest_buy > Decimal::ZERO {
            format_usd(Some(wallet.largest_buy))
        } else {
            "—".to_string()
        };
        let avg_buy = if wallet.avg_buy_size > Decimal::ZERO {
            format_usd(Some(wallet.avg_buy_size))
        } else {
            "—".to_string()
        };
        let label = wallet
            .label
            .as_ref()
            .map(|l| format!(" ({})", escape_html(l)))
            .unwrap_or_default();

        let text = format!(
            "<b>WALLET ANALYTICS</b>\n{div}\n\n<code>{short}</code>{label}\n\nClassification: {tier} {icon}\nWin Rate: {win} ({profitable}/{sells} sells)\n\n{div}\n<b>Trading Stats</b>\n\nTotal Volume: {volume}\nBuys: {buys} ▪ Sells: {sells}\nAvg Buy: {avg}\nLargest Buy: {largest}\n\n{div}\nFirst Seen: {first}\nLast Active: {last}\n{div}",
            div = DIVIDER,
            short = short_address(address),
            label = label,
            tier = tier.label(),
            icon = tier.indicator(),
            win = percent(wallet.win_rate()),
            profitable = wallet.profitable_tokens,
            sells = wallet.sell_count,
            volume = format_usd(Some(wallet.total_volume_usd)),
            buys = wallet.buy_count,
            avg = avg_buy,
            largest = largest_buy,
            first = wallet.first_seen.format("%Y-%m-%d"),
            last = wallet.last_seen.format("%Y-%m-%d %H:%M UTC"),
        );

        RenderedMessage {
            text,
            actions: vec![vec![
                MessageAction::new("Explorer", self.address_url(address)),
                MessageAction::new("DeBank", format!("https://debank.com/profile/0x{:x}", address)),
            ]],
        }
    }

    /// 统计面板：告警配置、跟踪数量、成交额前几名
    pub fn render_stats_dashboard(
        &self,
        settings: &AlertSettings,
        tracked_count: usize,
        top_wallets: &[WalletStats],
    ) -> String {
        let top = if top_wallets.is_empty() {
            "No data yet".to_string()
        } else {
            top_wallets
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let hex = format!("0x{:x}", w.address);
                    format!(
                        "{}. <code>{}...</code> {}",
                        i + 1,
                        &hex[..8],
                        format_usd(Some(w.total_volume_usd))
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "<b>📊 BOT STATISTICS</b>\n{div}\n\n<b>Configuration</b>\nMin Threshold: ${min}\nTracked Wallets: {tracked}\nSmart Money: {smart}\nWhale Alerts: {whale}\n\n{div}\n<b>Top Traders (Volume)</b>\n\n{top}\n\n{div}\nStatus: <b>🟢 ACTIVE</b>\nNetwork: {network}\n{div}",
            div = DIVIDER,
            min = settings.min_threshold_usd.normalize(),
            tracked = tracked_count,
            smart = check(settings.enable_smart_money_alerts),
            whale = check(settings.enable_whale_alerts),
            top = top,
            network = self.chain.name,
        )
    }

    /// 告警设置卡片
    pub fn render_settings(&self, settings: &AlertSettings) -> String {
        let max = settings
            .max_threshold_usd
            .map(|m| m.normalize().to_string())
            .unwrap_or_else(|| "∞".to_string());
        format!(
            "<b>⚙️ ALERT SETTINGS</b>\n{div}\n\n<b>Thresholds</b>\nMin: ${min}\nMax: ${max}\n\n<b>Filters</b>\nSmall Trades: {small}\n\n<b>Priority Alerts</b>\nWhale Alerts ($100K+): {whale}\nSmart Money: {smart}\n{div}",
            div = DIVIDER,
            min = settings.min_threshold_usd.normalize(),
            max = max,
            small = if settings.show_small_trades { "✓ Enabled" } else { "✗ Disabled" },
            whale = if settings.enable_whale_alerts { "✓ ON" } else { "✗ OFF" },
            smart = if settings.enable_smart_money_alerts { "✓ ON" } else { "✗ OFF" },
        )
    }
}

/// 巨鲸 / 聪明钱交易的标题横幅
pub fn alert_banner(
    swap: &ProcessedSwap,
    stats: Option<&WalletStats>,
    settings: &AlertSettings,
) -> Option<&'static str> {
    if settings.enable_whale_alerts && swap.tier() >= TradeTier::Whale {
        return Some("🐳 <b>WHALE ALERT</b>");
    }
    if settings.enable_smart_money_alerts
        && stats.map(|s| s.classification) == Some(WalletTier::SmartMoney)
    {
        return Some("⚡ <b>SMART MONEY</b>");
    }
    None
}

fn check(enabled: bool) -> &'static str {
    if enabled {
        "✓"
    } else {
        "✗"
    }
}

fn short_pool(pool_id: H256) -> String {
    let hex = format!("0x{:x}", pool_id);
    format!("{}...{}", &hex[..10], &hex[hex.len() - 4..])
}

struct TradeCard {
    direction: &'static str,
    arrow: &'static str,
    token_out: String,
    token_in: String,
    token_amount: String,
    native_amount: String,
    value_usd: String,
    price_per_token: Option<String>,
    time: String,
    chain: String,
}
