//! Module and class records.
//!
//! A [`ModuleRecord`] is the per-module/per-class metadata the execution
//! engine resolves against: the ancestor chain, the method and constant
//! tables, class variables, refinement bookkeeping and naming state.
//!
//! The record itself is split over several files by concern:
//!
//! - [`chain`]: ancestor chain, `include`, `prepend`
//! - `methods`: method table mutations
//! - `constants`: constant table mutations, autoload
//! - [`lookup`]: ancestor-walking lookups, cached lookups
//! - [`naming`]: name state machine
//! - [`refinement`]: refinement registry
//! - [`included_by`]: dependents to fan invalidations out to
//!
//! ## Ownership
//!
//! Records are shared as [`ModuleRef`] (`Arc<ModuleRecord>`). Strong edges
//! point "up" the hierarchy: chain links to included modules, a class to
//! its superclass, a refinement to the refined module, a namespace to its
//! refinements, constants to their values. Back edges (lexical parent,
//! method owners, the includedBy set, refinement namespace) are weak.

pub mod chain;
mod constants;
pub mod included_by;
pub mod lookup;
mod methods;
pub mod naming;
pub mod refinement;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use arc_swap::ArcSwap;
use garnet_common::{HierarchyError, Symbol};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::assumption::{HierarchyGeneration, InvalidationToken};
use crate::class_variables::ClassVariableStorage;
use crate::constant::Constant;
use crate::context::{Context, CoreState};
use crate::method::InternalMethod;
use crate::slot::SlotTable;
use crate::value::Value;

use self::chain::ChainLink;
use self::included_by::IncludedBySet;
use self::naming::Naming;
use self::refinement::{RefinementOrigin, RefinementRegistry};

pub use self::lookup::{CachedLookup, MethodLookup};
pub use self::naming::NameState;

/// Shared handle to a module record.
pub type ModuleRef = Arc<ModuleRecord>;

pub(crate) const METHOD_ASSUMPTION: &str = "method is not redefined";
pub(crate) const CONSTANT_ASSUMPTION: &str = "constant is not redefined";

// ---------------------------------------------------------------------------
// ModuleId
// ---------------------------------------------------------------------------

/// Identity of a module record, unique for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

impl ModuleId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ModuleId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ModuleKind
// ---------------------------------------------------------------------------

/// Whether a record is a module or a class.
#[derive(Debug, Clone)]
pub enum ModuleKind {
    Module,
    /// `attached` is set for singleton classes.
    Class { attached: Option<Value> },
}

// ---------------------------------------------------------------------------
// ModuleRecord
// ---------------------------------------------------------------------------

pub struct ModuleRecord {
    id: ModuleId,
    this: Weak<ModuleRecord>,
    kind: ModuleKind,
    lexical_parent: Option<Weak<ModuleRecord>>,
    given_base_name: Option<Arc<str>>,
    /// Set only for the root namespace (`Object`); children of the root are
    /// named by their base name alone.
    root_namespace: bool,

    /// Prepend marker: first link of the chain.
    start: Arc<ChainLink>,
    /// This record's own position in its chain.
    own: Arc<ChainLink>,
    superclass: OnceLock<ModuleRef>,

    naming: ArcSwap<Naming>,

    methods: SlotTable<Arc<InternalMethod>>,
    constants: SlotTable<Arc<Constant>>,
    class_variables: ClassVariableStorage,

    refinement: OnceLock<RefinementOrigin>,
    refinements: RefinementRegistry,

    /// Modules only: classes are never included anywhere.
    included_by: Option<IncludedBySet>,
    /// Modules only: classes invalidate per name instead.
    hierarchy: Option<HierarchyGeneration>,

    /// Tokens guarding inlined builtins, registered before the core library
    /// initializes.
    inlined_builtins: RwLock<FxHashMap<Symbol, InvalidationToken>>,

    frozen: AtomicBool,
    shared: AtomicBool,
}

impl ModuleRecord {
    pub(crate) fn new(
        kind: ModuleKind,
        lexical_parent: Option<&ModuleRef>,
        given_base_name: Option<&str>,
        root_namespace: bool,
    ) -> ModuleRef {
        let is_class = matches!(kind, ModuleKind::Class { .. });
        let given_base_name: Option<Arc<str>> = given_base_name.map(Arc::from);

        // A top-level core module is fully named from the start.
        let naming = match (&given_base_name, lexical_parent) {
            (Some(base), None) => Naming::full(Arc::clone(base)),
            _ => Naming::default(),
        };

        Arc::new_cyclic(|this: &Weak<ModuleRecord>| {
            let own = ChainLink::own(this.clone());
            let start = ChainLink::prepend_marker(Arc::clone(&own));
            ModuleRecord {
                id: ModuleId::next(),
                this: this.clone(),
                kind,
                lexical_parent: lexical_parent.map(Arc::downgrade),
                given_base_name,
                root_namespace,
                start,
                own,
                superclass: OnceLock::new(),
                naming: ArcSwap::from_pointee(naming),
                methods: SlotTable::new(METHOD_ASSUMPTION),
                constants: SlotTable::new(CONSTANT_ASSUMPTION),
                class_variables: ClassVariableStorage::new(),
                refinement: OnceLock::new(),
                refinements: RefinementRegistry::new(),
                included_by: (!is_class).then(IncludedBySet::new),
                hierarchy: (!is_class).then(HierarchyGeneration::new),
                inlined_builtins: RwLock::new(FxHashMap::default()),
                frozen: AtomicBool::new(false),
                shared: AtomicBool::new(false),
            }
        })
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    pub fn is_class(&self) -> bool {
        matches!(self.kind, ModuleKind::Class { .. })
    }

    pub fn is_singleton_class(&self) -> bool {
        matches!(self.kind, ModuleKind::Class { attached: Some(_) })
    }

    /// The object a singleton class is attached to.
    pub fn attached(&self) -> Option<&Value> {
        match &self.kind {
            ModuleKind::Class { attached } => attached.as_ref(),
            ModuleKind::Module => None,
        }
    }

    /// A singleton class attached to a module or class.
    pub fn is_metaclass(&self) -> bool {
        matches!(self.attached(), Some(Value::Module(_)))
    }

    pub fn is_root_namespace(&self) -> bool {
        self.root_namespace
    }

    pub fn lexical_parent(&self) -> Option<ModuleRef> {
        self.lexical_parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn given_base_name(&self) -> Option<&str> {
        self.given_base_name.as_deref()
    }

    pub fn superclass(&self) -> Option<&ModuleRef> {
        self.superclass.get()
    }

    /// A strong handle to this record.
    ///
    /// Always succeeds while the caller holds a reference obtained through a
    /// [`ModuleRef`].
    pub fn to_ref(&self) -> Option<ModuleRef> {
        self.this.upgrade()
    }

    pub(crate) fn downgrade(&self) -> Weak<ModuleRecord> {
        self.this.clone()
    }

    pub fn class_variables(&self) -> &ClassVariableStorage {
        &self.class_variables
    }

    // -- freezing / sharing ---------------------------------------------------

    /// Freeze the record. One-way.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Mark the record as reachable from more than one thread. One-way.
    pub fn mark_shared(&self) {
        self.shared.store(true, Ordering::Release);
    }

    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    pub(crate) fn propagate_shared(&self, ctx: &Context, value: &Value) {
        if self.is_shared() {
            ctx.hooks().write_barrier(value);
        }
    }

    /// Fail with a frozen-modification error if the frozen predicate holds.
    pub fn check_frozen(&self, ctx: &Context) -> Result<(), HierarchyError> {
        if !ctx.hooks().is_frozen(self) {
            return Ok(());
        }

        let (kind, receiver) = match &self.kind {
            ModuleKind::Module => ("module", self.display_name().to_string()),
            ModuleKind::Class { attached: None } => ("class", self.display_name().to_string()),
            ModuleKind::Class {
                attached: Some(attached),
            } => {
                let kind = match attached {
                    Value::Module(m) if m.is_class() => "Class",
                    Value::Module(_) => "Module",
                    _ => "object",
                };
                (kind, attached.basic_to_s())
            }
        };
        Err(HierarchyError::FrozenModification { kind, receiver })
    }

    // -- superclass -----------------------------------------------------------

    /// Link this class to its superclass. Only legal once, while the class
    /// is being constructed.
    pub fn set_superclass(&self, superclass: &ModuleRef) -> Result<(), HierarchyError> {
        if !self.is_class() {
            return Err(HierarchyError::WrongArgumentType {
                expected: "Class",
                found: "Module",
            });
        }
        if !superclass.is_class() {
            return Err(HierarchyError::WrongArgumentType {
                expected: "Class",
                found: "Module",
            });
        }
        self.superclass
            .set(Arc::clone(superclass))
            .map_err(|_| HierarchyError::SuperclassAlreadySet {
                module: self.display_name().to_string(),
            })?;
        self.own.set_parent(Some(Arc::clone(&superclass.start)));
        Ok(())
    }

    // -- hierarchy generation -------------------------------------------------

    /// Token invalidated whenever this module's ancestor chain changes.
    /// Classes do not have one.
    pub fn hierarchy_generation_token(&self) -> Result<InvalidationToken, HierarchyError> {
        match &self.hierarchy {
            Some(h) => Ok(h.current()),
            None => Err(HierarchyError::NotAModule {
                receiver: self.display_name().to_string(),
            }),
        }
    }

    /// Number of structural changes seen so far (always 0 for classes).
    pub fn hierarchy_generation(&self) -> u64 {
        self.hierarchy.as_ref().map_or(0, HierarchyGeneration::generation)
    }

    pub(crate) fn new_hierarchy_version(&self) {
        if let Some(h) = &self.hierarchy {
            let name = self.display_name();
            tracing::debug!(module = %name, generation = h.generation() + 1, "hierarchy changed");
            h.bump(&name);
        }
    }

    pub fn included_by(&self) -> Option<&IncludedBySet> {
        self.included_by.as_ref()
    }

    // -- invalidation ---------------------------------------------------------

    /// Re-issue the token of `name`'s method slot without changing it.
    pub fn new_method_version(&self, ctx: &Context, name: Symbol) {
        let reason = self.qualified_name(ctx, name);
        self.methods.bump_version(name, &reason);
    }

    pub fn new_methods_version(&self, ctx: &Context, names: &[Symbol]) {
        for &name in names {
            self.new_method_version(ctx, name);
        }
    }

    /// Re-issue the token of `name`'s constant slot without changing it.
    pub fn new_constant_version(&self, ctx: &Context, name: Symbol) {
        let reason = format!("{}::{}", self.display_name(), ctx.resolve(name));
        self.constants.bump_version(name, &reason);
    }

    pub fn new_constants_version(&self, ctx: &Context, names: &[Symbol]) {
        for &name in names {
            self.new_constant_version(ctx, name);
        }
    }

    fn invalidate_method_included_by(&self, ctx: &Context, name: Symbol) {
        if let Some(included_by) = &self.included_by {
            for dependent in included_by.snapshot() {
                dependent.new_method_version(ctx, name);
            }
        }
    }

    fn invalidate_constant_included_by(&self, ctx: &Context, name: Symbol) {
        if let Some(included_by) = &self.included_by {
            for dependent in included_by.snapshot() {
                dependent.new_constant_version(ctx, name);
            }
        }
    }

    /// `Module#name` for diagnostics and invalidation reasons.
    pub(crate) fn qualified_name(&self, ctx: &Context, name: Symbol) -> String {
        format!("{}#{}", self.display_name(), ctx.resolve(name))
    }

    // -- copying --------------------------------------------------------------

    /// Make this fresh record a copy of `from`: methods (rebound here),
    /// constants, class variables, and `from`'s ancestors. The name is not
    /// copied.
    ///
    /// A class copy takes `from`'s superclass. If this record already has a
    /// different one the copy is rejected before anything is written; use
    /// [`Context::copy_module`] to start from a record without a superclass.
    pub fn init_copy(&self, ctx: &Context, from: &ModuleRecord) -> Result<(), HierarchyError> {
        self.check_frozen(ctx)?;
        if self.is_class() {
            let conflicting = match (self.superclass(), from.superclass()) {
                (Some(own), Some(theirs)) => own.id() != theirs.id(),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if conflicting {
                return Err(HierarchyError::SuperclassAlreadySet {
                    module: self.display_name().to_string(),
                });
            }
        }

        for (name, slot) in from.methods.entries() {
            if let Some(method) = slot.value() {
                let rebound = method.with_declaring_module(self).with_owner(self);
                self.methods.put(
                    name,
                    crate::slot::VersionedSlot::new(Some(Arc::new(rebound)), METHOD_ASSUMPTION),
                );
            }
        }

        for (name, slot) in from.constants.entries() {
            if let Some(constant) = slot.value() {
                self.constants.put(
                    name,
                    crate::slot::VersionedSlot::new(
                        Some(Arc::clone(constant)),
                        CONSTANT_ASSUMPTION,
                    ),
                );
            }
        }

        for name in from.class_variables.names() {
            // Skip entries removed concurrently.
            if let Some(value) = from.class_variables.read(name) {
                self.class_variables.put(name, value);
            }
        }

        // The copy continues where `from`'s own chain continues: its first
        // prepended module if any, otherwise whatever follows `from` itself.
        let tail = if from.has_prepended_modules() {
            from.start.parent()
        } else {
            from.own.parent()
        };
        self.own.set_parent(tail);
        if let Some(superclass) = from.superclass() {
            // Already equal when set: checked above.
            if self.is_class() && self.superclass().is_none() {
                self.superclass.set(Arc::clone(superclass)).map_err(|_| {
                    HierarchyError::SuperclassAlreadySet {
                        module: self.display_name().to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }

    // -- class variables ------------------------------------------------------

    pub fn class_variable_get(&self, name: Symbol) -> Option<Value> {
        self.class_variables.read(name)
    }

    pub fn class_variable_set(
        &self,
        ctx: &Context,
        name: Symbol,
        value: Value,
    ) -> Result<Option<Value>, HierarchyError> {
        self.check_frozen(ctx)?;
        self.propagate_shared(ctx, &value);
        Ok(self.class_variables.put(name, value))
    }

    pub fn class_variable_remove(
        &self,
        ctx: &Context,
        name: Symbol,
    ) -> Result<Option<Value>, HierarchyError> {
        self.check_frozen(ctx)?;
        Ok(self.class_variables.remove(name))
    }

    // -- builtins -------------------------------------------------------------

    /// Register the token guarding an inlined builtin `name` of this module.
    ///
    /// Only accepted before the core library starts initializing; the token
    /// is then installed into the method slot when the builtin is defined.
    /// Returns whether the token was registered.
    pub fn register_inlinable_assumption(
        &self,
        ctx: &Context,
        name: Symbol,
        token: InvalidationToken,
    ) -> bool {
        if ctx.core_state() != CoreState::Created {
            tracing::warn!(
                module = %self.display_name(),
                method = %ctx.resolve(name),
                "inlinable assumption registered after core library creation; ignored"
            );
            return false;
        }
        self.inlined_builtins.write().entry(name).or_insert(token);
        true
    }

    pub fn inlinable_assumption(&self, name: Symbol) -> Option<InvalidationToken> {
        self.inlined_builtins.read().get(&name).cloned()
    }

    // -- clearing -------------------------------------------------------------

    /// Drop every constant binding. Used when tearing a context down to break
    /// constant -> module -> superclass reference cycles.
    pub(crate) fn clear_constants(&self) {
        for (name, _) in self.constants.entries() {
            if let Some(slot) = self.constants.remove(name) {
                slot.invalidate("teardown");
            }
        }
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_class() { "Class" } else { "Module" };
        write!(f, "{}({})", kind, self.display_name())
    }
}
