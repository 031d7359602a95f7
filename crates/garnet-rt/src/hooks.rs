//! Callbacks into the collaborators around the hierarchy core.
//!
//! Every method has a default so embedders only override what they use.
//! Hooks are invoked on the mutating thread, after the mutation has been
//! published, and must not call back into a mutation of the same module.

use std::sync::Arc;

use garnet_common::Symbol;

use crate::constant::Constant;
use crate::module::ModuleRecord;
use crate::value::Value;

pub trait RuntimeHooks: Send + Sync {
    /// Frozen predicate consulted before every mutation.
    fn is_frozen(&self, module: &ModuleRecord) -> bool {
        module.is_frozen()
    }

    /// Called for every value entering the tables of a module that is
    /// already shared between threads, so the value can be shared too.
    fn write_barrier(&self, _value: &Value) {}

    /// A new method body was bound (not fired for visibility-only changes).
    fn method_added(&self, _module: &ModuleRecord, _name: Symbol) {}

    /// `undef_method` installed a tombstone.
    fn method_undefined(&self, _module: &ModuleRecord, _name: Symbol) {}

    /// A constant was (re)bound.
    fn const_added(&self, _module: &ModuleRecord, _name: Symbol) {}

    /// An autoload constant was registered and should be handed to the
    /// feature loader.
    fn autoload_registered(&self, _module: &ModuleRecord, _constant: &Arc<Constant>) {}

    /// An optimization assumption was dropped; correctness is unaffected.
    fn optimization_caution(&self, _module: &ModuleRecord, _name: Symbol, _message: &str) {}
}

/// Hooks that do nothing beyond the defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl RuntimeHooks for DefaultHooks {}
