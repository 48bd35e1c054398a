//! Per-chain crawl cursor: the last indexed block and the adaptive chunk size.
//!
//! The durable checkpoint lives in [crate::store::IndexStateStore]. The loop keeps one cursor for
//! its lifetime so chunk shrinking survives across ticks, and re-syncs the block from the store at
//! every tick (a reindex may have moved it back).

/// Successful fetches needed before a shrunk chunk is restored.
pub const RESTORE_AFTER: u32 = 3;

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub last_indexed_block: u64,
    chunk_size: u64,
    configured_chunk: u64,
    successes: u32,
}

impl Cursor {
    pub fn new(last_indexed_block: u64, chunk_size: u64) -> Self {
        let chunk = chunk_size.max(1);
        Self {
            last_indexed_block,
            chunk_size: chunk,
            configured_chunk: chunk,
            successes: 0,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Next range to crawl, or `None` when caught up with `head`.
    pub fn next_range(&self, head: u64) -> Option<BlockRange> {
        if self.last_indexed_block >= head {
            return None;
        }
        let from = self.last_indexed_block + 1;
        let to = self
            .last_indexed_block
            .saturating_add(self.chunk_size)
            .min(head);
        Some(BlockRange { from, to })
    }

    /// Replace the position with the stored checkpoint.
    pub fn sync(&mut self, checkpoint: u64) {
        self.last_indexed_block = checkpoint;
    }

    pub fn advance(&mut self, to: u64) {
        self.last_indexed_block = self.last_indexed_block.max(to);
    }

    /// Halve the chunk after a failed fetch (minimum 1).
    pub fn shrink(&mut self) {
        self.chunk_size = (self.chunk_size / 2).max(1);
        self.successes = 0;
    }

    /// Count a successful fetch; restores the configured chunk after [RESTORE_AFTER] in a row.
    pub fn record_success(&mut self) {
        if self.chunk_size == self.configured_chunk {
            return;
        }
        self.successes += 1;
        if self.successes >= RESTORE_AFTER {
            self.chunk_size = self.configured_chunk;
            self.successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_chunked_and_capped_at_head() {
        let c = Cursor::new(99, 10);
        assert_eq!(c.next_range(1000), Some(BlockRange { from: 100, to: 109 }));
        assert_eq!(c.next_range(104), Some(BlockRange { from: 100, to: 104 }));
        assert_eq!(c.next_range(99), None);
        assert_eq!(c.next_range(50), None);
    }

    #[test]
    fn advance_never_moves_back() {
        let mut c = Cursor::new(10, 5);
        c.advance(20);
        c.advance(15);
        assert_eq!(c.last_indexed_block, 20);
    }

    #[test]
    fn shrink_and_restore() {
        let mut c = Cursor::new(0, 8);
        c.shrink();
        c.shrink();
        assert_eq!(c.chunk_size(), 2);
        c.record_success();
        c.record_success();
        assert_eq!(c.chunk_size(), 2);
        c.shrink();
        assert_eq!(c.chunk_size(), 1);
        c.shrink();
        assert_eq!(c.chunk_size(), 1);
        for _ in 0..RESTORE_AFTER {
            c.record_success();
        }
        assert_eq!(c.chunk_size(), 8);
    }

    #[test]
    fn zero_chunk_is_clamped() {
        let c = Cursor::new(0, 0);
        assert_eq!(c.next_range(5), Some(BlockRange { from: 1, to: 1 }));
    }
}
