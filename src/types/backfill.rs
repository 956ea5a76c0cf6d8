use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 一次回填请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub days: u64,
    /// 回填出来的交易默认只入库，不推送通知
    #[serde(default)]
    pub notify: bool,
}

impl Default for BackfillRequest {
    fn default() -> Self {
        Self { days: 7, notify: false }
    }
}

/// 闭区间 [from, to]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }

    /// 对半拆分，左半边包含中点
    pub fn split(&self) -> Option<(BlockRange, BlockRange)> {
        if self.len() < 2 {
            return None;
        }
        let mid = self.from + (self.len() / 2) - 1;
        Some((BlockRange::new(self.from, mid), BlockRange::new(mid + 1, self.to)))
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// 回填进度，通过回调实时上报
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum BackfillProgress {
    Started { chain: String, days: u64, range: BlockRange },
    ChunkFetched { range: BlockRange, events_found: u64, percent: f64 },
    ChunkRetry { range: BlockRange, attempt: u32, error: String },
    ChunkSplit { range: BlockRange },
    ChunkFailed { range: BlockRange, error: String },
    Processing { processed: u64, total: u64, saved: u64, skipped: u64 },
    Cancelled { swaps_processed: u64 },
    Finished { swaps_processed: u64, swaps_skipped: u64 },
}

impl fmt::Display for BackfillProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackfillProgress::Started { chain, days, range } => write!(
                f,
                "🔄 Starting backfill for last {} days on {}: blocks {} ({} blocks)",
                days,
                chain,
                range,
                range.len()
            ),
            BackfillProgress::ChunkFetched { range, events_found, percent } => write!(
                f,
                "⏳ Progress: {:.1}% (blocks {}, {} swaps found so far)",
                percent, range, events_found
            ),
            BackfillProgress::ChunkRetry { range, attempt, error } => {
                write!(f, "🔁 Retrying blocks {} (attempt {}): {}", range, attempt, error)
            }
            BackfillProgress::ChunkSplit { range } => {
                write!(f, "✂️ Splitting blocks {} into smaller chunks", range)
            }
            BackfillProgress::ChunkFailed { range, error } => {
                write!(f, "⚠️ Error fetching blocks {}: {}", range, error)
            }
            BackfillProgress::Processing { processed, total, saved, skipped } => {
                let percent = if *total == 0 {
                    100.0
                } else {
                    *processed as f64 / *total as f64 * 100.0
                };
                write!(
                    f,
                    "💾 Processed: {:.1}% ({} saved, {} skipped)",
                    percent, saved, skipped
                )
            }
            BackfillProgress::Cancelled { swaps_processed } => write!(
                f,
                "⚠️ Backfill cancelled after processing {} swaps",
                swaps_processed
            ),
            BackfillProgress::Finished { swaps_processed, swaps_skipped } => write!(
                f,
                "✅ Backfill complete: {} swaps processed, {} skipped (duplicates/errors)",
                swaps_processed, swaps_skipped
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Completed,
    Cancelled,
    Failed,
    /// 已有回填在运行，本次请求被拒绝
    Rejected,
}

/// 回填结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillOutcome {
    pub status: BackfillStatus,
    pub swaps_processed: u64,
    pub events_found: u64,
    pub swaps_skipped: u64,
    pub failed_ranges: Vec<BlockRange>,
    pub error: Option<String>,
}

impl BackfillOutcome {
    pub fn rejected(reason: &str) -> Self {
        Self {
            status: BackfillStatus::Rejected,
            swaps_processed: 0,
            events_found: 0,
            swaps_skipped: 0,
            failed_ranges: Vec::new(),
            error: Some(reason.to_string()),
        }
    }

    pub fn success(&self) -> bool {
        self.status == BackfillStatus::Completed
    }

    pub fn cancelled(&self) -> bool {
        self.status == BackfillStatus::Cancelled
    }
}

/// 回填状态机：Idle → Running → {Completed, Cancelled, Failed}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackfillState {
    Idle,
    Running {
        request: BackfillRequest,
        started_at: DateTime<Utc>,
        last_progress: Option<BackfillProgress>,
    },
    Finished {
        outcome: BackfillOutcome,
        finished_at: DateTime<Utc>,
    },
}

impl BackfillState {
    pub fn is_running(&self) -> bool {
        matches!(self, BackfillState::Running { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range_split_covers_range() {
        let range = BlockRange::new(100, 199);
        let (left, right) = range.split().unwrap();
        assert_eq!(left, BlockRange::new(100, 149));
        assert_eq!(right, BlockRange::new(150, 199));
        assert_eq!(left.len() + right.len(), range.len());

        let odd = BlockRange::new(10, 12);
        let (left, right) = odd.split().unwrap();
        assert_eq!((left.to + 1), right.from);
        assert!(BlockRange::new(5, 5).split().is_none());
    }

    #[test]
    fn test_progress_messages() {
        let msg = BackfillProgress::Processing { processed: 5, total: 10, saved: 4, skipped: 1 };
        assert_eq!(msg.to_string(), "💾 Processed: 50.0% (4 saved, 1 skipped)");
    }
}
