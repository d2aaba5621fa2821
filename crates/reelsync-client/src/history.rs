//! Bounded undo/redo stacks.
//!
//! An entry remembers the confirmed snapshot before an edit and the one the
//! edit produced. Undo does not restore `snapshot` verbatim: the session
//! replays the edit's inverse (`diff(applied, snapshot)`) onto whatever is
//! confirmed now, so remote work merged since the edit survives. Redo replays
//! the forward direction the same way.
//!
//! Snapshots are persistent structures; storing one never copies the
//! document and later edits never alter a stored entry.

use std::collections::VecDeque;

use tracing::debug;

use reelsync_types::{TimelineSnapshot, now_millis};

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// Confirmed state before the edit.
    pub snapshot: TimelineSnapshot,
    /// Confirmed state right after the edit.
    pub applied: TimelineSnapshot,
    pub label: String,
    pub timestamp_ms: u64,
}

impl HistoryEntry {
    pub fn new(snapshot: TimelineSnapshot, applied: TimelineSnapshot, label: impl Into<String>) -> Self {
        Self {
            snapshot,
            applied,
            label: label.into(),
            timestamp_ms: now_millis(),
        }
    }
}

/// Past and future stacks, newest at the back.
#[derive(Debug)]
pub struct HistoryManager {
    past: VecDeque<HistoryEntry>,
    future: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a new local edit. Clears the redo stack.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.future.clear();
        Self::push_bounded(&mut self.past, entry, self.capacity);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.past.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.future.pop_back()
    }

    /// Put an entry back on the undo stack without touching redo.
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        Self::push_bounded(&mut self.past, entry, self.capacity);
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        Self::push_bounded(&mut self.future, entry, self.capacity);
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.past.len()
    }

    pub fn redo_len(&self) -> usize {
        self.future.len()
    }

    /// Labels of undoable edits, most recent first.
    pub fn undo_labels(&self) -> Vec<&str> {
        self.past.iter().rev().map(|e| e.label.as_str()).collect()
    }

    pub fn redo_labels(&self) -> Vec<&str> {
        self.future.iter().rev().map(|e| e.label.as_str()).collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, capacity: usize) {
        stack.push_back(entry);
        while stack.len() > capacity {
            if let Some(dropped) = stack.pop_front() {
                debug!("history full, dropping '{}'", dropped.label);
            }
        }
    }
}
