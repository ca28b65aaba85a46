//! Ordered record of what scenario tasks did.
//!
//! The mutex and semaphore scenarios append entries while the recording
//! task still holds the guard, so there the journal order matches the order
//! in which the guard admitted the writes and reads. The wait-queue and
//! button scenarios record after the fact.

use parking_lot::Mutex;
use serde::Serialize;

use crate::cell::CellSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    /// A producer published this value.
    Wrote(i64),
    /// A consumer observed this cell state.
    Read(CellSnapshot),
    /// A sampled input line was seen high and the channel raised.
    Edge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub task: String,
    pub event: JournalEvent,
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task: &str, event: JournalEvent) {
        self.entries.lock().push(JournalEntry {
            task: task.to_string(),
            event,
        });
    }

    /// Copy of every entry so far.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values written, in order.
    pub fn writes(&self) -> Vec<i64> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e.event {
                JournalEvent::Wrote(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Cell states observed by `task`, in order.
    pub fn reads_by(&self, task: &str) -> Vec<CellSnapshot> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.task == task)
            .filter_map(|e| match e.event {
                JournalEvent::Read(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    /// Number of entries recorded by `task`.
    pub fn count_by(&self, task: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.task == task).count()
    }
}
