//! Deduplicated list of peripherals seen during the current scan window.

use crate::domain::models::{PeripheralId, PeripheralIdentity};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Entries {
    ordered: Vec<PeripheralIdentity>,
    seen: HashSet<PeripheralId>,
}

/// Discovery-ordered, unique-by-id collection shared between the scan task
/// (writer) and the controller (reader).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Mutex<Entries>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        let mut entries = self.lock();
        entries.ordered.clear();
        entries.seen.clear();
    }

    /// Returns true iff the identity was not present yet.
    pub fn insert(&self, identity: PeripheralIdentity) -> bool {
        let mut entries = self.lock();
        if !entries.seen.insert(identity.id.clone()) {
            return false;
        }
        entries.ordered.push(identity);
        true
    }

    pub fn snapshot(&self) -> Vec<PeripheralIdentity> {
        self.lock().ordered.clone()
    }

    pub fn get(&self, id: &PeripheralId) -> Option<PeripheralIdentity> {
        self.lock().ordered.iter().find(|d| &d.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
