//! Constant table mutations and direct queries.
//!
//! Every write goes through [`SlotTable::update`](crate::slot::SlotTable::update):
//! read the current version, build a modified copy, compare-and-swap, retry
//! on contention.

use std::convert::Infallible;
use std::sync::Arc;

use garnet_common::{HierarchyError, Symbol};
use tracing::info;

use crate::assumption::InvalidationToken;
use crate::constant::{Constant, ConstantValue};
use crate::context::Context;
use crate::slot::{Replaced, SlotUpdate, VersionedSlot};
use crate::value::Value;

use super::{ModuleRecord, CONSTANT_ASSUMPTION};

impl ModuleRecord {
    /// Bind `name` to `value`, returning the constant it replaced.
    ///
    /// An anonymous module assigned to a constant of a named module takes
    /// its permanent name from here.
    pub fn set_constant(
        &self,
        ctx: &Context,
        name: Symbol,
        value: Value,
    ) -> Result<Option<Arc<Constant>>, HierarchyError> {
        self.check_frozen(ctx)?;
        if let Value::Module(child) = &value {
            child.name_module(ctx, self, name);
        }
        let replaced = self.set_constant_internal(ctx, name, ConstantValue::Value(value))?;
        Ok(replaced
            .and_then(|r| r.previous)
            .and_then(|slot| slot.value().cloned()))
    }

    /// Register `name` to be loaded from `path` on first read.
    ///
    /// A no-op (returning `None`) when `name` already has a real value or is
    /// already an autoload for the same path; replacing the latter would
    /// drop the lock of a load that may be in progress.
    pub fn set_autoload_constant(
        &self,
        ctx: &Context,
        name: Symbol,
        path: &str,
    ) -> Result<Option<Arc<Constant>>, HierarchyError> {
        let replaced =
            self.set_constant_internal(ctx, name, ConstantValue::Autoload(Arc::from(path)))?;
        let Some(constant) = replaced.and_then(|r| r.current.value().cloned()) else {
            return Ok(None);
        };

        if ctx.options().log_autoload {
            info!(
                module = %self.display_name(),
                constant = %ctx.resolve(name),
                path,
                "setting up autoload"
            );
        }
        ctx.hooks().autoload_registered(self, &constant);
        Ok(Some(constant))
    }

    fn set_constant_internal(
        &self,
        ctx: &Context,
        name: Symbol,
        value: ConstantValue,
    ) -> Result<Option<Replaced<Arc<Constant>>>, HierarchyError> {
        self.check_frozen(ctx)?;
        if let ConstantValue::Value(v) = &value {
            self.propagate_shared(ctx, v);
        }

        let autoload_path = match &value {
            ConstantValue::Autoload(path) => Some(Arc::clone(path)),
            _ => None,
        };
        let this = self.downgrade();
        let replaced = self
            .constants
            .update::<Infallible>(name, |current| {
                let previous = current.and_then(|slot| slot.value());
                if let (Some(path), Some(previous)) = (&autoload_path, previous) {
                    if previous.has_value() || previous.autoload_path() == Some(&**path) {
                        return Ok(SlotUpdate::Keep);
                    }
                }
                let (private, deprecated) =
                    previous.map_or((false, false), |c| (c.is_private(), c.is_deprecated()));
                let constant =
                    Constant::new(this.clone(), name, value.clone(), private, deprecated);
                Ok(SlotUpdate::Replace(VersionedSlot::new(
                    Some(Arc::new(constant)),
                    CONSTANT_ASSUMPTION,
                )))
            })
            .unwrap_or_else(|never| match never {});

        if let Some(replaced) = &replaced {
            if let Some(previous) = &replaced.previous {
                previous.invalidate(&self.constant_reason(ctx, name, "set"));
            }
            self.invalidate_constant_included_by(ctx, name);
            if ctx.is_loaded() {
                ctx.hooks().const_added(self, name);
            }
        }
        Ok(replaced)
    }

    /// Unbind `name`, returning the removed constant.
    pub fn remove_constant(
        &self,
        ctx: &Context,
        name: Symbol,
    ) -> Result<Option<Arc<Constant>>, HierarchyError> {
        self.check_frozen(ctx)?;
        let Some(removed) = self.constants.remove(name) else {
            return Ok(None);
        };
        removed.invalidate(&self.constant_reason(ctx, name, "remove"));
        self.invalidate_constant_included_by(ctx, name);
        Ok(removed.value().cloned())
    }

    pub fn change_constant_visibility(
        &self,
        ctx: &Context,
        name: Symbol,
        private: bool,
    ) -> Result<(), HierarchyError> {
        self.check_frozen(ctx)?;
        self.modify_constant(ctx, name, "change visibility", |c| c.with_private(private))
    }

    pub fn deprecate_constant(&self, ctx: &Context, name: Symbol) -> Result<(), HierarchyError> {
        self.check_frozen(ctx)?;
        self.modify_constant(ctx, name, "deprecate", Constant::with_deprecated)
    }

    fn modify_constant(
        &self,
        ctx: &Context,
        name: Symbol,
        what: &str,
        modify: impl Fn(&Constant) -> Constant,
    ) -> Result<(), HierarchyError> {
        let replaced = self.constants.update(name, |current| {
            match current.and_then(|slot| slot.value()) {
                Some(constant) => Ok(SlotUpdate::Replace(VersionedSlot::new(
                    Some(Arc::new(modify(&**constant))),
                    CONSTANT_ASSUMPTION,
                ))),
                None => Err(HierarchyError::UninitializedConstant {
                    module: self.display_name().to_string(),
                    name: ctx.resolve(name).to_string(),
                }),
            }
        })?;
        if let Some(previous) = replaced.and_then(|r| r.previous) {
            previous.invalidate(&self.constant_reason(ctx, name, what));
        }
        Ok(())
    }

    /// Mark `autoload` as undefined if it is still the current binding of its
    /// name, i.e. loading its file did not define the constant.
    pub fn undefine_constant_if_still_autoload(
        &self,
        ctx: &Context,
        autoload: &Arc<Constant>,
    ) -> bool {
        let name = autoload.name();
        let Some(slot) = self.constants.get(name) else {
            return false;
        };
        let still_current = slot.value().is_some_and(|c| Arc::ptr_eq(c, autoload));
        if !still_current {
            return false;
        }
        let undefined =
            VersionedSlot::new(Some(Arc::new(autoload.undefined())), CONSTANT_ASSUMPTION);
        if !self.constants.compare_and_swap(name, Some(&slot), Arc::new(undefined)) {
            return false;
        }
        slot.invalidate(&self.constant_reason(ctx, name, "undefine if still autoload"));
        true
    }

    // -- direct queries -------------------------------------------------------

    /// The constant bound directly in this module.
    pub fn get_constant(&self, name: Symbol) -> Option<Arc<Constant>> {
        self.constants.get(name).and_then(|slot| slot.value().cloned())
    }

    pub fn constant_names(&self) -> Vec<Symbol> {
        let mut names = self.constants.bound_names();
        names.sort();
        names
    }

    pub fn constants(&self) -> Vec<Arc<Constant>> {
        self.constants.values()
    }

    /// Token guarding the current binding of `name` in this module alone.
    pub fn constant_token(&self, name: Symbol) -> InvalidationToken {
        self.constants.get_or_create(name).token()
    }

    fn constant_reason(&self, ctx: &Context, name: Symbol, what: &str) -> String {
        format!("{} {}::{}", what, self.display_name(), ctx.resolve(name))
    }
}
