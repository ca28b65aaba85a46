//! The shared value protected by a [`Guard`](crate::guard::Guard).
//!
//! `SharedCell` stores a single integer payload and a flag saying whether it
//! holds unread data. It performs no admission control of its own: the only
//! supported way to reach it is through a held guard permit, which is what
//! lets one cell type sit behind either an exclusive or a counting guard.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// A point-in-time copy of the cell contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    /// Last published payload.
    pub value: i64,
    /// True when `value` holds data nobody has consumed yet.
    pub ready: bool,
}

/// Single published value plus an availability flag.
///
/// A counting guard admits several holders at once, so the storage is
/// atomic; `ready` is published with release ordering after `value`.
#[derive(Debug, Default)]
pub struct SharedCell {
    value: AtomicI64,
    ready: AtomicBool,
}

impl SharedCell {
    /// Create an empty cell (`value = 0`, `ready = false`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value and ready flag.
    pub fn read(&self) -> CellSnapshot {
        let ready = self.ready.load(Ordering::Acquire);
        CellSnapshot {
            value: self.value.load(Ordering::Acquire),
            ready,
        }
    }

    /// Publish a new value and mark it ready.
    pub fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Consume the value if it is unread.
    ///
    /// The ready flag is swapped off in one step, so of several holders
    /// racing for the same write exactly one gets `Some`.
    pub fn take(&self) -> Option<i64> {
        self.ready
            .swap(false, Ordering::AcqRel)
            .then(|| self.value.load(Ordering::Acquire))
    }

    /// Mark the current value as consumed.
    pub fn clear_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }
}
