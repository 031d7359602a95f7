//! Module names.
//!
//! A module starts [`Anonymous`](NameState::Anonymous) (or
//! [`NestedAnonymous`](NameState::NestedAnonymous) when it was given a base
//! name under an unnamed parent) and becomes [`Full`](NameState::Full) once
//! it is reachable through named constants. A temporary name may be
//! assigned at any point before that. `Full` is terminal.
//!
//! The display name is computed lazily and memoized; anonymous names are
//! never computed unless somebody asks. The naming state is an immutable
//! snapshot swapped in with compare-and-swap, so name queries never lock.

use std::sync::Arc;

use garnet_common::{HierarchyError, Symbol};
use serde::Serialize;

use crate::context::Context;
use crate::value::Value;

use super::ModuleRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NameState {
    Anonymous,
    NestedAnonymous,
    Temporary,
    Full,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Naming {
    has_full_name: bool,
    /// Memoized display name.
    name: Option<Arc<str>>,
    temporary_name: Option<Arc<str>>,
    temporary_name_assigned: bool,
}

impl Naming {
    pub(crate) fn full(name: Arc<str>) -> Self {
        Naming {
            has_full_name: true,
            name: Some(name),
            ..Naming::default()
        }
    }
}

impl ModuleRecord {
    pub fn name_state(&self) -> NameState {
        let naming = self.naming.load();
        if naming.has_full_name {
            NameState::Full
        } else if naming.temporary_name_assigned {
            NameState::Temporary
        } else if self.given_base_name.is_some() {
            NameState::NestedAnonymous
        } else {
            NameState::Anonymous
        }
    }

    pub fn has_full_name(&self) -> bool {
        self.naming.load().has_full_name
    }

    /// Whether `name` reports anything: a full name, a non-nil temporary
    /// name, or a base name under an anonymous parent.
    pub fn has_partial_name(&self) -> bool {
        let naming = self.naming.load();
        if naming.temporary_name_assigned {
            return naming.temporary_name.is_some();
        }
        naming.has_full_name || self.given_base_name.is_some()
    }

    /// The name as reported to user code: `None` for anonymous modules.
    pub fn name(&self) -> Option<Arc<str>> {
        self.has_partial_name().then(|| self.display_name())
    }

    /// The name used in messages and inspection. Always available; falls
    /// back to a synthetic name for anonymous modules.
    pub fn display_name(&self) -> Arc<str> {
        let temporary = {
            let naming = self.naming.load();
            if let Some(name) = &naming.name {
                return Arc::clone(name);
            }
            naming.temporary_name.clone()
        };

        let computed = temporary.unwrap_or_else(|| Arc::from(self.anonymous_name()));

        // Keep a name installed concurrently while we were computing.
        let previous = self.naming.rcu(|naming| {
            let mut next = Naming::clone(naming);
            next.name.get_or_insert_with(|| Arc::clone(&computed));
            next
        });
        previous.name.clone().unwrap_or(computed)
    }

    /// Last `::` segment of the display name.
    pub fn simple_name(&self) -> Arc<str> {
        let name = self.display_name();
        match name.rfind("::") {
            Some(i) => Arc::from(&name[i + 2..]),
            None => name,
        }
    }

    /// Give this module its permanent name and name every still-anonymous
    /// module reachable through its constants.
    pub fn set_full_name(&self, ctx: &Context, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.naming.store(Arc::new(Naming::full(name)));
        self.name_children(ctx);
    }

    /// Assign (or with `None`, explicitly clear) a temporary name.
    pub fn set_temporary_name(&self, name: Option<&str>) -> Result<(), HierarchyError> {
        let name: Option<Arc<str>> = name.map(Arc::from);
        let previous = self.naming.rcu(|naming| {
            if naming.has_full_name {
                return Naming::clone(naming);
            }
            Naming {
                has_full_name: false,
                name: name.clone(),
                temporary_name: name.clone(),
                temporary_name_assigned: true,
            }
        });
        if previous.has_full_name {
            return Err(HierarchyError::PermanentName {
                module: previous.name.as_deref().unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }

    /// Called when this module is bound to constant `name` of `parent`.
    pub(crate) fn name_module(&self, ctx: &Context, parent: &ModuleRecord, name: Symbol) {
        if self.has_full_name() {
            return;
        }
        let base = ctx.resolve(name);
        if parent.is_root_namespace() {
            self.set_full_name(ctx, &base);
        } else if parent.has_full_name() {
            self.set_full_name(ctx, &format!("{}::{}", parent.display_name(), base));
        }
        // Otherwise the parent names us once it is named itself.
    }

    fn name_children(&self, ctx: &Context) {
        for constant in self.constants() {
            if let Some(Value::Module(child)) = constant.plain_value() {
                child.name_module(ctx, self, constant.name());
            }
        }
    }

    fn anonymous_name(&self) -> String {
        if let Some(base) = &self.given_base_name {
            return match self.lexical_parent() {
                Some(parent) if !parent.is_root_namespace() => {
                    format!("{}::{}", parent.display_name(), base)
                }
                _ => base.to_string(),
            };
        }
        if let Some(attached) = self.attached() {
            let attached = match attached {
                Value::Module(m) => m.display_name().to_string(),
                other => other.basic_to_s(),
            };
            return format!("#<Class:{}>", attached);
        }
        if let Some(refinement) = self.refinement.get() {
            let namespace = refinement
                .namespace()
                .map(|ns| ns.display_name().to_string())
                .unwrap_or_default();
            return format!("#<refinement:{}@{}>", refinement.refined().display_name(), namespace);
        }
        let kind = if self.is_class() { "Class" } else { "Module" };
        format!("#<{}:0x{:016x}>", kind, self.id().0)
    }
}
