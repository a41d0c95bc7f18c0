//! The shared change accumulator.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Change;

/// Changes recorded since the last flush.
///
/// Cloning gives another handle to the same accumulator. World mutation
/// code appends; the periodic flush drains. A drain swaps the whole batch
/// out under the lock, so a concurrent push lands either in the batch
/// being drained or in the next one, never in both and never in neither.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    pending: Arc<Mutex<Vec<Change>>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, change: Change) {
        self.pending.lock().push(change);
    }

    pub fn extend(&self, changes: impl IntoIterator<Item = Change>) {
        self.pending.lock().extend(changes);
    }

    /// Takes every pending change, leaving the log empty.
    pub fn drain(&self) -> Vec<Change> {
        mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
