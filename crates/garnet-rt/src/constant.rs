//! Constant bindings stored in constant tables.

use std::fmt;
use std::sync::{Arc, Weak};

use garnet_common::Symbol;

use crate::module::{ModuleRecord, ModuleRef};
use crate::value::Value;

/// What a constant slot is bound to.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantValue {
    /// An ordinary value.
    Value(Value),
    /// Load this resource on first read.
    Autoload(Arc<str>),
    /// An autoload whose resource did not define the constant.
    Undefined,
}

/// A constant as bound in one module's constant table.
///
/// Immutable: visibility and deprecation changes build a modified copy.
#[derive(Clone)]
pub struct Constant {
    declaring_module: Weak<ModuleRecord>,
    name: Symbol,
    value: ConstantValue,
    private: bool,
    deprecated: bool,
}

impl Constant {
    pub(crate) fn new(
        declaring_module: Weak<ModuleRecord>,
        name: Symbol,
        value: ConstantValue,
        private: bool,
        deprecated: bool,
    ) -> Self {
        Constant {
            declaring_module,
            name,
            value,
            private,
            deprecated,
        }
    }

    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn declaring_module(&self) -> Option<ModuleRef> {
        self.declaring_module.upgrade()
    }

    pub fn value(&self) -> &ConstantValue {
        &self.value
    }

    /// The bound value if this is an ordinary constant.
    pub fn plain_value(&self) -> Option<&Value> {
        match &self.value {
            ConstantValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Bound to a real value (not an autoload marker or an undefined one).
    pub fn has_value(&self) -> bool {
        matches!(self.value, ConstantValue::Value(_))
    }

    pub fn is_autoload(&self) -> bool {
        matches!(self.value, ConstantValue::Autoload(_))
    }

    pub fn autoload_path(&self) -> Option<&str> {
        match &self.value {
            ConstantValue::Autoload(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.value, ConstantValue::Undefined)
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    pub fn with_private(&self, private: bool) -> Self {
        Constant {
            private,
            ..self.clone()
        }
    }

    pub fn with_deprecated(&self) -> Self {
        Constant {
            deprecated: true,
            ..self.clone()
        }
    }

    pub fn undefined(&self) -> Self {
        Constant {
            value: ConstantValue::Undefined,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constant")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("private", &self.private)
            .field("deprecated", &self.deprecated)
            .finish()
    }
}
