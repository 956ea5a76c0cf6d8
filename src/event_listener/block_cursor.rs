use tokio::time::Duration;

/// 实时轮询的区块游标：记录最后处理的区块，给出下一段待查询范围
#[derive(Debug, Clone)]
pub struct BlockCursor {
    pub last_processed_block: u64,
    pub batch_size: u64,
    pub poll_interval: Duration,
}

impl BlockCursor {
    pub fn new(last_processed_block: u64, batch_size: u64, poll_interval: Duration) -> Self {
        Self {
            last_processed_block,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// 下一个待处理的起始区块
    pub fn next_block(&self) -> u64 {
        self.last_processed_block + 1
    }

    pub fn next_range(&self, latest_block: u64) -> Option<(u64, u64)> {
        if latest_block <= self.last_processed_block {
            return None;
        }

        let from_block = self.last_processed_block + 1;
        let to_block = std::cmp::min(from_block + self.batch_size - 1, latest_block);

        Some((from_block, to_block))
    }

    pub fn advance_to(&mut self, block_number: u64) {
        if block_number > self.last_processed_block {
            self.last_processed_block = block_number;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_range_is_bounded_by_batch() {
        let mut cursor = BlockCursor::new(100, 10, Duration::from_secs(1));
        assert_eq!(cursor.next_range(100), None);
        assert_eq!(cursor.next_range(105), Some((101, 105)));
        assert_eq!(cursor.next_range(500), Some((101, 110)));

        cursor.advance_to(110);
        assert_eq!(cursor.next_block(), 111);
        cursor.advance_to(50);
        assert_eq!(cursor.last_processed_block, 110);
    }
}
