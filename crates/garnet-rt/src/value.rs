//! Values stored in constant and class-variable tables.
//!
//! The runtime core only needs to distinguish modules (which get named and
//! traversed) and methods from everything else; other objects are opaque
//! handles owned by the object layer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use garnet_common::Symbol;

use crate::method::InternalMethod;
use crate::module::ModuleRef;

// ---------------------------------------------------------------------------
// ObjectRef
// ---------------------------------------------------------------------------

/// Opaque handle to an object managed outside this crate.
#[derive(Clone, Debug)]
pub struct ObjectRef {
    id: u64,
    class_name: Arc<str>,
}

impl ObjectRef {
    /// Allocate a handle with a fresh identity.
    pub fn new(class_name: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ObjectRef {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            class_name: Arc::from(class_name),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// `#<ClassName:0x...>`, the representation used before any user
    /// `to_s` is consulted.
    pub fn basic_to_s(&self) -> String {
        format!("#<{}:0x{:016x}>", self.class_name, self.id)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A runtime value as seen by module tables.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    String(Arc<str>),
    Symbol(Symbol),
    Module(ModuleRef),
    Method(Arc<InternalMethod>),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn as_module(&self) -> Option<&ModuleRef> {
        match self {
            Value::Module(m) => Some(m),
            _ => None,
        }
    }

    /// Text used where an object is shown relative to something else, e.g.
    /// the attached object of a singleton class.
    pub fn basic_to_s(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::String(s) => format!("{:?}", s),
            Value::Symbol(sym) => format!(":{}", sym.as_u32()),
            Value::Module(m) => m.display_name().to_string(),
            Value::Method(m) => format!("#<Method: {}>", m.shared_info().name()),
            Value::Object(o) => o.basic_to_s(),
        }
    }
}

/// Identity for modules, methods and objects; structural for immediates.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.basic_to_s())
    }
}
