//! Threshold-triggered ingestion buffer

use crate::types::BufferRecord;

/// Records detached from the buffer in one flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushBatch {
    /// Monotonic per-process flush number, starting at 1
    pub sequence: u64,
    pub records: Vec<BufferRecord>,
}

impl FlushBatch {
    /// Number of detached records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch carries no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// In-memory buffer of observed records.
///
/// Not synchronized itself; the owner wraps it in a mutex so that
/// push, threshold check and detach form one critical section.
#[derive(Debug)]
pub struct IngestionBuffer {
    records: Vec<BufferRecord>,
    threshold: usize,
    next_sequence: u64,
}

impl IngestionBuffer {
    /// Create a new buffer flushing at `threshold` records (at least 1)
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            records: Vec::with_capacity(threshold),
            threshold,
            next_sequence: 1,
        }
    }

    /// Append a record; detach everything once the threshold is reached.
    pub fn push(&mut self, record: BufferRecord) -> Option<FlushBatch> {
        self.records.push(record);
        if self.records.len() >= self.threshold {
            self.detach()
        } else {
            None
        }
    }

    /// Detach whatever is buffered, if anything.
    pub fn detach(&mut self) -> Option<FlushBatch> {
        if self.records.is_empty() {
            return None;
        }
        let records = std::mem::replace(&mut self.records, Vec::with_capacity(self.threshold));
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(FlushBatch { sequence, records })
    }

    /// Records currently buffered
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record count that triggers a detach
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
