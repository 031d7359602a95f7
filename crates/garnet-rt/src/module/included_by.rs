//! The set of records that include or prepend a module.
//!
//! Entries are weak and keyed by [`ModuleId`]: a dependent that is dropped
//! elsewhere is not kept alive here, and its entry is pruned lazily the next
//! time the set is walked. Walking works on a snapshot, so insertions made
//! during a fan-out (an include triggering further includes) never disturb
//! the walk in progress.

use std::sync::Weak;

use parking_lot::RwLock;

use super::{ModuleId, ModuleRecord, ModuleRef};

#[derive(Default)]
pub struct IncludedBySet {
    entries: RwLock<Vec<(ModuleId, Weak<ModuleRecord>)>>,
}

impl IncludedBySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dependent`. Adding the same record twice is a no-op.
    pub fn add(&self, dependent: &ModuleRecord) {
        let id = dependent.id();
        let mut entries = self.entries.write();
        if entries.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        entries.retain(|(_, weak)| weak.strong_count() > 0);
        entries.push((id, dependent.downgrade()));
    }

    /// Live dependents, in registration order.
    pub fn snapshot(&self) -> Vec<ModuleRef> {
        let (live, stale) = {
            let entries = self.entries.read();
            let live: Vec<ModuleRef> = entries.iter().filter_map(|(_, w)| w.upgrade()).collect();
            let stale = live.len() != entries.len();
            (live, stale)
        };
        if stale {
            self.entries.write().retain(|(_, weak)| weak.strong_count() > 0);
        }
        live
    }

    pub fn contains(&self, module: &ModuleRecord) -> bool {
        let id = module.id();
        self.entries
            .read()
            .iter()
            .any(|(existing, weak)| *existing == id && weak.strong_count() > 0)
    }

    /// Registered entries, dead ones included until the next prune.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IncludedBySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.read().iter().map(|(id, _)| id))
            .finish()
    }
}
