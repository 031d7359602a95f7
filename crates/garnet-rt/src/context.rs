//! The runtime context threaded through every mutation.
//!
//! Holds what would otherwise be process-wide state: options, the symbol
//! table, collaborator hooks, the core-library lifecycle and the root
//! `Object` class. Separate contexts are fully isolated, which is what the
//! tests rely on.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use garnet_common::{HierarchyError, Symbol, SymbolTable};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::RuntimeOptions;
use crate::hooks::{DefaultHooks, RuntimeHooks};
use crate::module::{ModuleKind, ModuleRecord, ModuleRef};
use crate::value::Value;

// ---------------------------------------------------------------------------
// CoreState
// ---------------------------------------------------------------------------

/// Lifecycle of the core library. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CoreState {
    /// Core classes exist; builtins may register inlinable assumptions.
    Created = 0,
    /// Builtins are being defined; slots are seeded without invalidation.
    Initializing = 1,
    /// User code may run; definition events are emitted.
    Loaded = 2,
}

impl CoreState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CoreState::Created,
            1 => CoreState::Initializing,
            _ => CoreState::Loaded,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct Context {
    options: RuntimeOptions,
    symbols: SymbolTable,
    hooks: Arc<dyn RuntimeHooks>,
    core_state: AtomicU8,
    object_class: ModuleRef,
}

impl Context {
    /// A context whose core library is already loaded, with default hooks.
    pub fn new(options: RuntimeOptions) -> Self {
        Self::build(options, Arc::new(DefaultHooks), CoreState::Loaded)
    }

    pub fn with_hooks(options: RuntimeOptions, hooks: Arc<dyn RuntimeHooks>) -> Self {
        Self::build(options, hooks, CoreState::Loaded)
    }

    /// A context in [`CoreState::Created`], for defining builtins.
    pub fn bootstrapping(options: RuntimeOptions, hooks: Arc<dyn RuntimeHooks>) -> Self {
        Self::build(options, hooks, CoreState::Created)
    }

    fn build(options: RuntimeOptions, hooks: Arc<dyn RuntimeHooks>, state: CoreState) -> Self {
        let object_class =
            ModuleRecord::new(ModuleKind::Class { attached: None }, None, Some("Object"), true);
        Context {
            options,
            symbols: SymbolTable::new(),
            hooks,
            core_state: AtomicU8::new(state as u8),
            object_class,
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn hooks(&self) -> &dyn RuntimeHooks {
        &*self.hooks
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    pub fn resolve(&self, symbol: Symbol) -> Arc<str> {
        self.symbols.resolve(symbol)
    }

    /// The root namespace.
    pub fn object_class(&self) -> &ModuleRef {
        &self.object_class
    }

    // -- lifecycle ------------------------------------------------------------

    pub fn core_state(&self) -> CoreState {
        CoreState::from_u8(self.core_state.load(Ordering::Acquire))
    }

    pub fn is_initializing(&self) -> bool {
        self.core_state() == CoreState::Initializing
    }

    pub fn is_loaded(&self) -> bool {
        self.core_state() == CoreState::Loaded
    }

    /// Advance to `state`. Moving backwards is ignored; returns whether the
    /// state changed.
    pub fn advance(&self, state: CoreState) -> bool {
        let previous = self.core_state.fetch_max(state as u8, Ordering::AcqRel);
        let changed = previous < state as u8;
        if changed {
            debug!(from = ?CoreState::from_u8(previous), to = ?state, "core library state");
        }
        changed
    }

    // -- factories ------------------------------------------------------------

    /// `Module.new`
    pub fn new_module(&self) -> ModuleRef {
        ModuleRecord::new(ModuleKind::Module, None, None, false)
    }

    /// `Class.new(superclass)`
    pub fn new_class(&self, superclass: &ModuleRef) -> Result<ModuleRef, HierarchyError> {
        let class = ModuleRecord::new(ModuleKind::Class { attached: None }, None, None, false);
        class.set_superclass(superclass)?;
        Ok(class)
    }

    /// `module Parent::Name`: reopens an existing module of that name.
    pub fn define_module(
        &self,
        parent: &ModuleRef,
        name: &str,
    ) -> Result<ModuleRef, HierarchyError> {
        let symbol = self.intern(name);
        if let Some(existing) = self.existing_module(parent, symbol) {
            if existing.is_class() {
                return Err(HierarchyError::NotAModule {
                    receiver: existing.display_name().to_string(),
                });
            }
            return Ok(existing);
        }

        let module = ModuleRecord::new(ModuleKind::Module, Some(parent), Some(name), false);
        parent.set_constant(self, symbol, Value::Module(Arc::clone(&module)))?;
        Ok(module)
    }

    /// `class Parent::Name < superclass`: reopens an existing class of that
    /// name.
    pub fn define_class(
        &self,
        parent: &ModuleRef,
        name: &str,
        superclass: &ModuleRef,
    ) -> Result<ModuleRef, HierarchyError> {
        let symbol = self.intern(name);
        if let Some(existing) = self.existing_module(parent, symbol) {
            if !existing.is_class() {
                return Err(HierarchyError::WrongArgumentType {
                    expected: "Class",
                    found: "Module",
                });
            }
            return Ok(existing);
        }

        let class = ModuleRecord::new(
            ModuleKind::Class { attached: None },
            Some(parent),
            Some(name),
            false,
        );
        class.set_superclass(superclass)?;
        parent.set_constant(self, symbol, Value::Module(Arc::clone(&class)))?;
        Ok(class)
    }

    /// Singleton class of `attached`, inheriting from `superclass`.
    pub fn singleton_class(
        &self,
        attached: Value,
        superclass: &ModuleRef,
    ) -> Result<ModuleRef, HierarchyError> {
        let class = ModuleRecord::new(
            ModuleKind::Class {
                attached: Some(attached),
            },
            None,
            None,
            false,
        );
        class.set_superclass(superclass)?;
        Ok(class)
    }

    /// `from.dup`: an anonymous copy of `from`. A class copy gets `from`'s
    /// superclass; singleton classes copy as plain classes.
    pub fn copy_module(&self, from: &ModuleRecord) -> Result<ModuleRef, HierarchyError> {
        let kind = if from.is_class() {
            ModuleKind::Class { attached: None }
        } else {
            ModuleKind::Module
        };
        let copy = ModuleRecord::new(kind, None, None, false);
        copy.init_copy(self, from)?;
        Ok(copy)
    }

    /// `refine refined do ... end` inside `namespace`: the refinement module,
    /// created on first use.
    pub fn refine(
        &self,
        namespace: &ModuleRef,
        refined: &ModuleRef,
    ) -> Result<ModuleRef, HierarchyError> {
        if let Some(existing) = namespace.refinement_for(refined) {
            return Ok(existing);
        }
        let refinement = ModuleRecord::new(ModuleKind::Module, None, None, false);
        namespace.register_refinement(self, refined, &refinement)
    }

    fn existing_module(&self, parent: &ModuleRef, name: Symbol) -> Option<ModuleRef> {
        parent
            .get_constant(name)
            .and_then(|c| c.plain_value().and_then(Value::as_module).cloned())
    }
}

/// Unbinds every constant reachable from `Object`, releasing records that
/// reference each other through constants.
impl Drop for Context {
    fn drop(&mut self) {
        let mut seen = FxHashSet::default();
        let mut pending = vec![Arc::clone(&self.object_class)];
        let mut modules = Vec::new();

        while let Some(module) = pending.pop() {
            if !seen.insert(module.id()) {
                continue;
            }
            for constant in module.constants() {
                if let Some(Value::Module(child)) = constant.plain_value() {
                    pending.push(Arc::clone(child));
                }
            }
            modules.push(module);
        }

        for module in &modules {
            module.clear_constants();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.options)
            .field("core_state", &self.core_state())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}
