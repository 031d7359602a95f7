//! Method table mutations and direct (non-inherited) queries.

use std::sync::Arc;

use crossbeam_utils::Backoff;
use garnet_common::{HierarchyError, Symbol};

use crate::context::Context;
use crate::method::InternalMethod;
use crate::slot::VersionedSlot;
use crate::value::Value;

use super::lookup::MethodLookup;
use super::{ModuleRecord, METHOD_ASSUMPTION};

impl ModuleRecord {
    /// Bind `method` in this module, replacing any previous binding of its
    /// name.
    ///
    /// The displaced version is invalidated, every module that includes or
    /// prepends this one gets a version bump for the name, and
    /// `method_added` fires unless the new binding wraps the same body as
    /// the old one (a visibility change).
    pub fn define_method(
        &self,
        ctx: &Context,
        method: InternalMethod,
    ) -> Result<(), HierarchyError> {
        self.check_frozen(ctx)?;

        let name = method.name();
        let method = Arc::new(method.with_owner(self));
        if self.is_shared() {
            ctx.hooks().write_barrier(&Value::Method(Arc::clone(&method)));
        }

        let initializing = ctx.is_initializing();
        let slot = match self.inlinable_assumption(name) {
            Some(token) if initializing => {
                VersionedSlot::with_token(Some(Arc::clone(&method)), token, METHOD_ASSUMPTION)
            }
            _ => VersionedSlot::new(Some(Arc::clone(&method)), METHOD_ASSUMPTION),
        };

        let previous = self.methods.put(name, slot);

        if !initializing {
            if let Some(previous) = &previous {
                previous.invalidate(&self.qualified_name(ctx, name));
            }
            self.invalidate_method_included_by(ctx, name);
            if let Some(refined) = self.refined_module() {
                refined.refined_method(ctx, name);
            }
        }

        if ctx.is_loaded() && !method.is_undefined() {
            let same_body = previous
                .as_ref()
                .and_then(|slot| slot.value())
                .is_some_and(|old| old.shares_body_with(&method));
            if !same_body {
                ctx.hooks().method_added(self, name);
            }
        }
        Ok(())
    }

    /// Hide `name` from this module and everything after it in lookup order
    /// by installing a tombstone.
    pub fn undef_method(&self, ctx: &Context, name: Symbol) -> Result<(), HierarchyError> {
        self.check_frozen(ctx)?;

        let method = match self.lookup_method(name) {
            MethodLookup::Found(method) => method,
            MethodLookup::Undefined | MethodLookup::Absent => {
                // `undef_method` on a metaclass reports the attached module.
                let module = match self.attached() {
                    Some(Value::Module(attached)) => attached.display_name().to_string(),
                    _ => self.display_name().to_string(),
                };
                return Err(HierarchyError::UndefinedMethod {
                    name: ctx.resolve(name).to_string(),
                    module,
                });
            }
        };

        self.define_method(ctx, method.undefined())?;
        if ctx.is_loaded() {
            ctx.hooks().method_undefined(self, name);
        }
        Ok(())
    }

    /// Remove the binding of `name` defined directly in this module
    /// (tombstones included). Returns whether anything was removed.
    pub fn remove_method(&self, ctx: &Context, name: Symbol) -> Result<bool, HierarchyError> {
        self.check_frozen(ctx)?;

        let backoff = Backoff::new();
        loop {
            let slot = match self.methods.get(name) {
                Some(slot) if slot.value().is_some() => slot,
                _ => return Ok(false),
            };
            if self.methods.remove_if(name, &slot) {
                slot.invalidate(&self.qualified_name(ctx, name));
                return Ok(true);
            }
            backoff.spin();
        }
    }

    // -- direct queries -------------------------------------------------------

    /// The binding defined directly in this module, tombstones included.
    pub fn get_method(&self, name: Symbol) -> Option<Arc<InternalMethod>> {
        self.methods.get(name).and_then(|slot| slot.value().cloned())
    }

    /// Names bound directly in this module, tombstones included.
    pub fn method_names(&self) -> Vec<Symbol> {
        let mut names = self.methods.bound_names();
        names.sort();
        names
    }

    pub fn methods(&self) -> Vec<Arc<InternalMethod>> {
        self.methods.values()
    }

    pub fn any_method_defined(&self) -> bool {
        self.methods.any_bound()
    }

    /// Token guarding the current binding of `name` in this module alone.
    pub fn method_token(&self, name: Symbol) -> crate::assumption::InvalidationToken {
        self.methods.get_or_create(name).token()
    }
}
