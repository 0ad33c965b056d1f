//! Bounded, in-memory classification history: newest first, merge-on-recency
//! for repeated labels, oldest entry evicted at capacity. Not internally
//! synchronized; the service serializes access behind a mutex.

use serde::Serialize;
use std::collections::VecDeque;

/// A single history entry. Mutated in place when a grouping merge occurs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub label: String,
    pub confidence: f32,
    pub timestamp_ms: u64,
}

/// What `record` did with an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// A new entry was inserted at the head.
    Inserted(HistoryEntry),
    /// The head entry was updated in place (higher confidence within the window).
    Merged(HistoryEntry),
    /// Same label within the window but no better confidence; nothing changed.
    Unchanged,
}

pub struct BoundedHistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl BoundedHistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Record an observation. If the head entry carries the same label
    /// (case-insensitively) and is younger than `grouping_window_ms`, the
    /// observation merges into it: confidence and timestamp update in place
    /// only when the new confidence is strictly higher, and the entry stays
    /// at the head. Otherwise a new entry is inserted at the head, evicting
    /// the tail at capacity.
    pub fn record(
        &mut self,
        label: &str,
        confidence: f32,
        now_ms: u64,
        grouping_window_ms: u64,
    ) -> RecordOutcome {
        if let Some(head) = self.entries.front_mut() {
            if head.label.trim().eq_ignore_ascii_case(label.trim())
                && now_ms.saturating_sub(head.timestamp_ms) < grouping_window_ms
            {
                if confidence > head.confidence {
                    head.confidence = confidence;
                    head.timestamp_ms = now_ms;
                    return RecordOutcome::Merged(head.clone());
                }
                return RecordOutcome::Unchanged;
            }
        }

        let entry = HistoryEntry {
            label: label.to_string(),
            confidence,
            timestamp_ms: now_ms,
        };
        self.entries.push_front(entry.clone());
        if self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
        RecordOutcome::Inserted(entry)
    }

    /// Ordered snapshot, newest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
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
}
