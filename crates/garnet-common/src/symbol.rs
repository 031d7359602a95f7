//! Symbol interning.
//!
//! Method and constant tables are keyed by [`Symbol`], a small copyable
//! handle. The [`SymbolTable`] maps names to symbols and back; it is safe to
//! share between threads and never forgets a symbol once interned.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// An interned name.
///
/// Two symbols from the same [`SymbolTable`] are equal iff their names are
/// equal. Symbols from different tables must not be mixed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol(u32);

impl Symbol {
    /// Return the raw index into the owning table.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

#[derive(Default)]
struct Interner {
    ids: FxHashMap<Arc<str>, Symbol>,
    names: Vec<Arc<str>>,
}

/// Thread-safe name <-> [`Symbol`] table.
///
/// Reads take a shared lock; interning a new name takes the exclusive lock
/// only when the name is not yet known.
#[derive(Default)]
pub struct SymbolTable {
    inner: RwLock<Interner>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing symbol if already present.
    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(&sym) = self.inner.read().ids.get(name) {
            return sym;
        }

        let mut inner = self.inner.write();
        // Another thread may have interned it between the two locks.
        if let Some(&sym) = inner.ids.get(name) {
            return sym;
        }
        let sym = Symbol(inner.names.len() as u32);
        let name: Arc<str> = Arc::from(name);
        inner.names.push(Arc::clone(&name));
        inner.ids.insert(name, sym);
        sym
    }

    /// Look up a name without interning it.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.inner.read().ids.get(name).copied()
    }

    /// Return the name of `sym`.
    ///
    /// Symbols are only ever produced by [`SymbolTable::intern`], so a symbol
    /// from this table always resolves. A foreign symbol resolves to `"?"`.
    pub fn resolve(&self, sym: Symbol) -> Arc<str> {
        self.inner
            .read()
            .names
            .get(sym.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from("?"))
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("len", &self.len())
            .finish()
    }
}
