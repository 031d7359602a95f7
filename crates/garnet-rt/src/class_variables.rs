//! Class-variable storage.
//!
//! Single reads and writes are atomic. A read-modify-write sequence
//! (`@@count += 1`) is not: callers must hold [`ClassVariableStorage::update_lock`]
//! across the whole sequence. The storage never takes that lock itself.

use garnet_common::Symbol;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;

use crate::value::Value;

#[derive(Default)]
pub struct ClassVariableStorage {
    vars: RwLock<FxHashMap<Symbol, Value>>,
    update_lock: Mutex<()>,
}

impl ClassVariableStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, name: Symbol) -> Option<Value> {
        self.vars.read().get(&name).cloned()
    }

    /// Returns the previous value.
    pub fn put(&self, name: Symbol, value: Value) -> Option<Value> {
        self.vars.write().insert(name, value)
    }

    pub fn remove(&self, name: Symbol) -> Option<Value> {
        self.vars.write().remove(&name)
    }

    pub fn names(&self) -> Vec<Symbol> {
        self.vars.read().keys().copied().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.vars.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Caller-held scope for read-modify-write sequences.
    pub fn update_lock(&self) -> MutexGuard<'_, ()> {
        self.update_lock.lock()
    }
}

impl std::fmt::Debug for ClassVariableStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassVariableStorage")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_common::SymbolTable;

    #[test]
    fn put_read_remove() {
        let symbols = SymbolTable::new();
        let count = symbols.intern("@@count");
        let storage = ClassVariableStorage::new();

        assert_eq!(storage.put(count, Value::Integer(1)), None);
        assert_eq!(storage.read(count), Some(Value::Integer(1)));
        assert_eq!(storage.put(count, Value::Integer(2)), Some(Value::Integer(1)));
        assert_eq!(storage.remove(count), Some(Value::Integer(2)));
        assert!(storage.is_empty());
    }

    #[test]
    fn update_lock_serializes_increments() {
        let symbols = SymbolTable::new();
        let count = symbols.intern("@@count");
        let storage = ClassVariableStorage::new();
        storage.put(count, Value::Integer(0));

        crossbeam_utils::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|_| {
                    for _ in 0..100 {
                        let _guard = storage.update_lock();
                        let n = match storage.read(count) {
                            Some(Value::Integer(n)) => n,
                            _ => 0,
                        };
                        storage.put(count, Value::Integer(n + 1));
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(storage.read(count), Some(Value::Integer(400)));
    }
}
