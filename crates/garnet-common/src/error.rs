use std::fmt;

use serde::Serialize;

/// Which structural mutation detected a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CyclicOperation {
    Include,
    Prepend,
}

impl fmt::Display for CyclicOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => write!(f, "include"),
            Self::Prepend => write!(f, "prepend"),
        }
    }
}

/// An error raised by a module/class mutation.
///
/// Lookups never fail; only mutations return these. Every check runs before
/// the first write, including the frozen check on each record an include
/// fans out to. A dependent frozen concurrently with the fan-out is the one
/// exception: the remaining dependents are still updated and the error is
/// returned at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HierarchyError {
    /// A mutation was attempted on a frozen module or class.
    ///
    /// `kind` is `"module"`, `"class"`, or for a singleton class the kind of
    /// the attached object (`"object"`, `"Class"`, `"Module"`).
    FrozenModification { kind: &'static str, receiver: String },
    /// An include/prepend would make the ancestor chain cyclic.
    CyclicHierarchy { operation: CyclicOperation },
    /// `undef_method` named a method that does not resolve.
    UndefinedMethod { name: String, module: String },
    /// A visibility/deprecation change named a constant that does not exist.
    UninitializedConstant { module: String, name: String },
    /// A class was given where a module was expected, or vice versa.
    WrongArgumentType {
        expected: &'static str,
        found: &'static str,
    },
    /// A temporary name was assigned to a module that already has a
    /// permanent one.
    PermanentName { module: String },
    /// The superclass link was assigned a second time.
    SuperclassAlreadySet { module: String },
    /// A module-only facility was requested from a class.
    NotAModule { receiver: String },
}

impl fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrozenModification { kind, receiver } => {
                write!(f, "can't modify frozen {kind}: {receiver}")
            }
            Self::CyclicHierarchy { operation } => write!(f, "cyclic {operation} detected"),
            Self::UndefinedMethod { name, module } => {
                write!(f, "undefined method '{name}' for '{module}'")
            }
            Self::UninitializedConstant { module, name } => {
                write!(f, "uninitialized constant {module}::{name}")
            }
            Self::WrongArgumentType { expected, found } => {
                write!(f, "wrong argument type {found} (expected {expected})")
            }
            Self::PermanentName { module } => {
                write!(f, "can't change permanent name of {module}")
            }
            Self::SuperclassAlreadySet { module } => {
                write!(f, "superclass of {module} is already set")
            }
            Self::NotAModule { receiver } => write!(f, "{receiver} is not a module"),
        }
    }
}

impl std::error::Error for HierarchyError {}
