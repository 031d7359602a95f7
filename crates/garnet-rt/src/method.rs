//! Method bindings stored in method tables.
//!
//! Compiling and running method bodies is the execution engine's job; this
//! crate only sees an [`InternalMethod`], which pairs a [`SharedMethodInfo`]
//! (the identity of the underlying body) with its binding in a particular
//! module: visibility, declaring module, owner, and the "explicitly
//! undefined" flag.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use garnet_common::Symbol;

use crate::module::{ModuleRecord, ModuleRef};

/// Method visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

/// Identity of a method body, shared by every binding of that body.
///
/// Rebinding a method (visibility change, aliasing into another module,
/// tombstoning) keeps the same `SharedMethodInfo`; defining a new body
/// creates a new one.
#[derive(Debug)]
pub struct SharedMethodInfo {
    id: u64,
    name: Arc<str>,
    arity: i32,
}

impl SharedMethodInfo {
    pub fn new(name: &str, arity: i32) -> Arc<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Arc::new(SharedMethodInfo {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            arity,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> i32 {
        self.arity
    }
}

/// A method as bound in one module's method table.
#[derive(Clone)]
pub struct InternalMethod {
    name: Symbol,
    shared: Arc<SharedMethodInfo>,
    visibility: Visibility,
    declaring_module: Weak<ModuleRecord>,
    owner: Weak<ModuleRecord>,
    undefined: bool,
}

impl InternalMethod {
    /// A public, not yet bound method.
    pub fn new(name: Symbol, shared: Arc<SharedMethodInfo>) -> Self {
        InternalMethod {
            name,
            shared,
            visibility: Visibility::Public,
            declaring_module: Weak::new(),
            owner: Weak::new(),
            undefined: false,
        }
    }

    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn shared_info(&self) -> &Arc<SharedMethodInfo> {
        &self.shared
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Module whose body text defined the method.
    pub fn declaring_module(&self) -> Option<ModuleRef> {
        self.declaring_module.upgrade()
    }

    /// Module whose method table holds this binding.
    pub fn owner(&self) -> Option<ModuleRef> {
        self.owner.upgrade()
    }

    /// Whether this is the tombstone left by `undef_method`.
    pub fn is_undefined(&self) -> bool {
        self.undefined
    }

    /// Whether both bindings wrap the same body.
    pub fn shares_body_with(&self, other: &InternalMethod) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn with_visibility(&self, visibility: Visibility) -> Self {
        InternalMethod {
            visibility,
            ..self.clone()
        }
    }

    pub fn with_declaring_module(&self, module: &ModuleRecord) -> Self {
        InternalMethod {
            declaring_module: module.downgrade(),
            ..self.clone()
        }
    }

    /// Rebind into `module`'s table. A method that was never declared
    /// anywhere is declared by its first owner.
    pub fn with_owner(&self, module: &ModuleRecord) -> Self {
        let declaring_module = if self.declaring_module.strong_count() == 0 {
            module.downgrade()
        } else {
            self.declaring_module.clone()
        };
        InternalMethod {
            owner: module.downgrade(),
            declaring_module,
            ..self.clone()
        }
    }

    /// The tombstone for this method.
    pub fn undefined(&self) -> Self {
        InternalMethod {
            undefined: true,
            ..self.clone()
        }
    }
}

impl fmt::Debug for InternalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalMethod")
            .field("name", &self.shared.name)
            .field("visibility", &self.visibility)
            .field("undefined", &self.undefined)
            .finish()
    }
}
