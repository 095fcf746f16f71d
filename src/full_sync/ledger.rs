//! Cross-sweep memory of unconfirmed CO/SMS asymmetries.

use std::collections::{HashMap, HashSet};

/// Volume handles observed on only one side of the CO/SMS mapping.
///
/// An asymmetry seen for the first time is parked here instead of acted on;
/// only a handle that is still asymmetric on the following sweep is
/// confirmed. The maps are rebuilt wholesale at each sweep boundary and never
/// touched mid-sweep. Purely in-memory: a restart means no confirmations.
#[derive(Debug, Default)]
pub struct FullSyncLedger {
    pending_create: HashMap<String, bool>,
    pending_delete: HashMap<String, bool>,
}

impl FullSyncLedger {
    /// Parks a handle present in the CO but missing from the SMS.
    pub fn mark_pending_create(&mut self, volume_handle: &str) {
        self.pending_create.insert(volume_handle.to_owned(), true);
    }

    /// Parks a handle the SMS carries with no CO volume behind it.
    pub fn mark_pending_delete(&mut self, volume_handle: &str) {
        self.pending_delete.insert(volume_handle.to_owned(), true);
    }

    /// Current contents as owned `(create, delete)` sets.
    pub fn snapshot(&self) -> (HashSet<String>, HashSet<String>) {
        (
            self.pending_create.keys().cloned().collect(),
            self.pending_delete.keys().cloned().collect(),
        )
    }

    pub fn clear(&mut self) {
        self.pending_create.clear();
        self.pending_delete.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending_create.is_empty() && self.pending_delete.is_empty()
    }
}
