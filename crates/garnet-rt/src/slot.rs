//! Versioned slots: the cells method and constant tables are built from.
//!
//! A [`VersionedSlot`] is an immutable (value, token) pair. Changing a
//! binding never mutates a slot in place; it installs a new slot in the
//! [`SlotTable`] and invalidates the token of the one it replaced. A reader
//! therefore gets the value and the token that guards it from a single
//! load of one `Arc`.
//!
//! The token is materialized lazily, on the first request by a consumer.
//! Retiring a slot whose token was never requested still leaves it invalid,
//! so a reader holding a stale slot can never obtain a valid token for it.

use std::fmt;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use crossbeam_utils::Backoff;
use garnet_common::Symbol;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::assumption::{Assumption, InvalidationToken};

/// One version of a named binding.
pub struct VersionedSlot<V> {
    value: Option<V>,
    token: OnceLock<InvalidationToken>,
    kind: &'static str,
}

impl<V> VersionedSlot<V> {
    /// A slot holding `value` (or nothing) whose token is created on demand.
    pub fn new(value: Option<V>, kind: &'static str) -> Self {
        VersionedSlot {
            value,
            token: OnceLock::new(),
            kind,
        }
    }

    /// A slot whose token is supplied up front (used for builtins whose
    /// inlined fast paths already hold the token).
    pub fn with_token(value: Option<V>, token: InvalidationToken, kind: &'static str) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(token);
        VersionedSlot {
            value,
            token: cell,
            kind,
        }
    }

    /// The bound value, or `None` for a placeholder created by a cache miss.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Token guarding this version, created on first request.
    pub fn token(&self) -> InvalidationToken {
        Arc::clone(self.token.get_or_init(|| Assumption::new(self.kind)))
    }

    /// Whether a consumer ever asked for the token.
    pub fn has_token(&self) -> bool {
        self.token.get().is_some()
    }

    /// Retire this version.
    pub fn invalidate(&self, reason: &str) {
        self.token
            .get_or_init(|| Assumption::new(self.kind))
            .invalidate(reason);
    }
}

impl<V: Clone> VersionedSlot<V> {
    /// Same value, fresh (not yet materialized) token.
    pub fn new_version(&self) -> Self {
        VersionedSlot::new(self.value.clone(), self.kind)
    }
}

impl<V: fmt::Debug> fmt::Debug for VersionedSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedSlot")
            .field("value", &self.value)
            .field("token", &self.token.get())
            .finish()
    }
}

/// Outcome of a successful [`SlotTable::update`].
pub struct Replaced<V> {
    pub previous: Option<Arc<VersionedSlot<V>>>,
    pub current: Arc<VersionedSlot<V>>,
}

/// What an update closure wants done with the slot it was shown.
pub enum SlotUpdate<V> {
    /// Leave the table untouched and stop retrying.
    Keep,
    /// Try to install this slot in place of the one shown.
    Replace(VersionedSlot<V>),
}

fn same_slot<V>(a: Option<&Arc<VersionedSlot<V>>>, b: Option<&Arc<VersionedSlot<V>>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

type SlotMap<V> = FxHashMap<Symbol, Arc<VersionedSlot<V>>>;

/// A name -> [`VersionedSlot`] map with compare-and-swap replacement.
///
/// The map is published through an [`ArcSwap`]: readers load the current
/// snapshot without taking a lock and are never held up by a writer.
/// Writers copy the snapshot, edit the copy and publish it; the `writer`
/// mutex only orders writers against each other.
pub struct SlotTable<V> {
    slots: ArcSwap<SlotMap<V>>,
    writer: Mutex<()>,
    kind: &'static str,
}

impl<V> SlotTable<V> {
    /// `kind` names the assumptions created for this table's tokens.
    pub fn new(kind: &'static str) -> Self {
        SlotTable {
            slots: ArcSwap::from_pointee(FxHashMap::default()),
            writer: Mutex::new(()),
            kind,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Current version of `name`. Lock-free.
    pub fn get(&self, name: Symbol) -> Option<Arc<VersionedSlot<V>>> {
        self.slots.load().get(&name).cloned()
    }

    /// Current version of `name`, inserting an empty placeholder so that a
    /// cache can depend on the name staying unbound.
    pub fn get_or_create(&self, name: Symbol) -> Arc<VersionedSlot<V>> {
        if let Some(slot) = self.get(name) {
            return slot;
        }
        let kind = self.kind;
        self.edit(|slots| {
            Arc::clone(
                slots
                    .entry(name)
                    .or_insert_with(|| Arc::new(VersionedSlot::new(None, kind))),
            )
        })
    }

    /// Unconditional write. Returns the version it displaced.
    pub fn put(&self, name: Symbol, slot: VersionedSlot<V>) -> Option<Arc<VersionedSlot<V>>> {
        let slot = Arc::new(slot);
        self.edit(|slots| slots.insert(name, slot))
    }

    /// Install `new` only if `expected` is still the current version.
    pub fn compare_and_swap(
        &self,
        name: Symbol,
        expected: Option<&Arc<VersionedSlot<V>>>,
        new: Arc<VersionedSlot<V>>,
    ) -> bool {
        let _writer = self.writer.lock();
        let current = self.slots.load_full();
        if !same_slot(current.get(&name), expected) {
            return false;
        }
        let mut next: SlotMap<V> = (*current).clone();
        next.insert(name, new);
        self.slots.store(Arc::new(next));
        true
    }

    /// Remove `name` only if `expected` is still the current version.
    pub fn remove_if(&self, name: Symbol, expected: &Arc<VersionedSlot<V>>) -> bool {
        let _writer = self.writer.lock();
        let current = self.slots.load_full();
        if !same_slot(current.get(&name), Some(expected)) {
            return false;
        }
        let mut next: SlotMap<V> = (*current).clone();
        next.remove(&name);
        self.slots.store(Arc::new(next));
        true
    }

    /// Unconditional removal.
    pub fn remove(&self, name: Symbol) -> Option<Arc<VersionedSlot<V>>> {
        let _writer = self.writer.lock();
        let current = self.slots.load_full();
        if !current.contains_key(&name) {
            return None;
        }
        let mut next: SlotMap<V> = (*current).clone();
        let removed = next.remove(&name);
        self.slots.store(Arc::new(next));
        removed
    }

    /// Copy, edit and publish the map under the writer lock.
    fn edit<R>(&self, f: impl FnOnce(&mut SlotMap<V>) -> R) -> R {
        let _writer = self.writer.lock();
        let mut next: SlotMap<V> = (**self.slots.load()).clone();
        let result = f(&mut next);
        self.slots.store(Arc::new(next));
        result
    }

    /// Optimistic read-modify-write.
    ///
    /// `f` sees the current version and decides what to install; if another
    /// writer got there first the closure runs again on the newer version.
    /// The displaced version is returned, not invalidated: the caller knows
    /// the right reason.
    pub fn update<E>(
        &self,
        name: Symbol,
        mut f: impl FnMut(Option<&Arc<VersionedSlot<V>>>) -> Result<SlotUpdate<V>, E>,
    ) -> Result<Option<Replaced<V>>, E> {
        let backoff = Backoff::new();
        loop {
            let previous = self.get(name);
            let next = match f(previous.as_ref())? {
                SlotUpdate::Keep => return Ok(None),
                SlotUpdate::Replace(slot) => Arc::new(slot),
            };
            if self.compare_and_swap(name, previous.as_ref(), Arc::clone(&next)) {
                return Ok(Some(Replaced {
                    previous,
                    current: next,
                }));
            }
            backoff.spin();
        }
    }

    /// Names whose current version holds a value.
    pub fn bound_names(&self) -> Vec<Symbol> {
        self.slots
            .load()
            .iter()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Snapshot of every (name, current version) pair, placeholders included.
    pub fn entries(&self) -> Vec<(Symbol, Arc<VersionedSlot<V>>)> {
        self.slots
            .load()
            .iter()
            .map(|(name, slot)| (*name, Arc::clone(slot)))
            .collect()
    }

    pub fn any_bound(&self) -> bool {
        self.slots.load().values().any(|slot| slot.value.is_some())
    }
}

impl<V: Clone> SlotTable<V> {
    /// Values of every bound slot.
    pub fn values(&self) -> Vec<V> {
        self.slots
            .load()
            .values()
            .filter_map(|slot| slot.value.clone())
            .collect()
    }

    /// Re-issue `name`'s token without changing its value.
    ///
    /// Returns `false` when there is no slot for `name` (nobody can depend on
    /// it then).
    pub fn bump_version(&self, name: Symbol, reason: &str) -> bool {
        let replaced = self.update::<std::convert::Infallible>(name, |current| {
            Ok(match current {
                None => SlotUpdate::Keep,
                Some(slot) => SlotUpdate::Replace(slot.new_version()),
            })
        });
        match replaced {
            Ok(Some(Replaced {
                previous: Some(previous),
                ..
            })) => {
                previous.invalidate(reason);
                true
            }
            _ => false,
        }
    }
}

impl<V> fmt::Debug for SlotTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("kind", &self.kind)
            .field("len", &self.slots.load().len())
            .finish()
    }
}
