//! Fixed-capacity sample ring used for wait-time percentiles.

use std::collections::VecDeque;

/// Ring buffer that evicts the oldest sample once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Iterate over items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl RingBuffer<u64> {
    /// Nearest-rank percentile over the retained samples, `0` when empty.
    pub fn percentile(&self, pct: f64) -> u64 {
        if self.buf.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.buf.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((pct.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}
