//! Latency compensation buffer
//!
//! Answers "what did the signal look like `output_latency` ago" so the drawn
//! waveform does not lead the audible sound.

use std::collections::VecDeque;
use std::sync::Arc;

/// One captured signal window and the playback position it was captured at
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    timestamp: f64,
    samples: Arc<[f32]>,
}

impl Snapshot {
    pub fn new(timestamp: f64, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            timestamp,
            samples: samples.into(),
        }
    }

    /// Playback position in seconds
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Bounded history of snapshots with drop-oldest eviction
#[derive(Debug, Clone)]
pub struct LatencyCompensationBuffer {
    entries: VecDeque<Snapshot>,
    capacity: usize,
}

impl LatencyCompensationBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, snapshot: Snapshot) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// Newest snapshot at or before `target`, falling back to the oldest one.
    ///
    /// Timestamps are not assumed monotonic (seeks reorder them), so this is a
    /// backward scan rather than a binary search. Equal timestamps resolve to the
    /// most recently recorded snapshot. `None` only when the buffer is empty.
    pub fn lookup(&self, target: f64) -> Option<&Snapshot> {
        self.entries
            .iter()
            .rev()
            .find(|snapshot| snapshot.timestamp <= target)
            .or_else(|| self.entries.front())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }
}
