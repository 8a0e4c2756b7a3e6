//! Size-bounded batching of range deletion tasks.
//!
//! A shard rejects any single insert larger than its document limit, so
//! tasks are grouped into consecutive slices whose encoded size stays under
//! `max_batch_bytes - headroom_bytes`.

use mitosis_catalog::RangeDeletionTask;

use crate::config::{DEFAULT_BATCH_HEADROOM_BYTES, DEFAULT_MAX_BATCH_BYTES};

/// Size budget of one insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_batch_bytes: usize,
    pub headroom_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            headroom_bytes: DEFAULT_BATCH_HEADROOM_BYTES,
        }
    }
}

impl BatchLimits {
    /// Bytes of task payload one batch may carry.
    pub fn budget(&self) -> usize {
        self.max_batch_bytes.saturating_sub(self.headroom_bytes)
    }
}

/// Lazy iterator of consecutive task slices, each within the budget.
///
/// A task that alone exceeds the budget is yielded as a batch of one.
/// Cloning the iterator, or calling [`restart`](Self::restart), replays
/// the same batches from the beginning.
#[derive(Debug, Clone)]
pub struct RangeDeletionBatches<'a> {
    tasks: &'a [RangeDeletionTask],
    next: usize,
    budget: usize,
}

impl<'a> RangeDeletionBatches<'a> {
    pub fn new(tasks: &'a [RangeDeletionTask], limits: BatchLimits) -> Self {
        Self {
            tasks,
            next: 0,
            budget: limits.budget(),
        }
    }

    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl<'a> Iterator for RangeDeletionBatches<'a> {
    type Item = &'a [RangeDeletionTask];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next;
        if start >= self.tasks.len() {
            return None;
        }

        let mut end = start;
        let mut size = 0;
        while end < self.tasks.len() {
            let task_size = encoded_len(&self.tasks[end]);
            if end > start && size + task_size > self.budget {
                break;
            }
            size += task_size;
            end += 1;
        }

        self.next = end;
        Some(&self.tasks[start..end])
    }
}

/// Encoded size of a task as an array element (payload plus separator).
fn encoded_len(task: &RangeDeletionTask) -> usize {
    // Plain data with string keys; encoding cannot fail.
    serde_json::to_vec(task).map_or(0, |bytes| bytes.len()) + 1
}
