//! Ancestor chains.
//!
//! Every record owns two links: a prepend marker (`start`) and its own
//! link. Prepended modules are spliced between the two, included modules
//! after the own link. A class's own link continues into its superclass's
//! marker, so walking from `start` yields the whole ancestry:
//!
//! ```text
//! C.start -> [P2] -> [P1] -> C -> [M2] -> [M1] -> S.start -> S -> ... -> None
//! ```
//!
//! Links are only ever inserted, never removed, and a link's parent pointer
//! is an [`ArcSwapOption`] replaced atomically, so a concurrent walk takes no
//! lock and sees either the chain before a splice or after it.

use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use garnet_common::{CyclicOperation, HierarchyError};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::context::Context;
use crate::value::Value;

use super::{ModuleRecord, ModuleRef};

// ---------------------------------------------------------------------------
// ChainLink
// ---------------------------------------------------------------------------

pub(crate) enum LinkKind {
    /// The insertion point for prepends.
    PrependMarker,
    /// A record's own position. Weak: the record owns this link.
    Own(Weak<ModuleRecord>),
    /// A module spliced in by include or prepend.
    Included(ModuleRef),
}

pub struct ChainLink {
    kind: LinkKind,
    parent: ArcSwapOption<ChainLink>,
}

impl ChainLink {
    pub(crate) fn own(module: Weak<ModuleRecord>) -> Arc<ChainLink> {
        Arc::new(ChainLink {
            kind: LinkKind::Own(module),
            parent: ArcSwapOption::empty(),
        })
    }

    pub(crate) fn prepend_marker(own: Arc<ChainLink>) -> Arc<ChainLink> {
        Arc::new(ChainLink {
            kind: LinkKind::PrependMarker,
            parent: ArcSwapOption::new(Some(own)),
        })
    }

    pub fn parent(&self) -> Option<Arc<ChainLink>> {
        self.parent.load_full()
    }

    pub(crate) fn set_parent(&self, parent: Option<Arc<ChainLink>>) {
        self.parent.store(parent);
    }

    /// The record this link stands for; `None` for markers.
    pub fn actual_module(&self) -> Option<ModuleRef> {
        match &self.kind {
            LinkKind::PrependMarker => None,
            LinkKind::Own(module) => module.upgrade(),
            LinkKind::Included(module) => Some(Arc::clone(module)),
        }
    }

    pub fn is_prepend_marker(&self) -> bool {
        matches!(self.kind, LinkKind::PrependMarker)
    }

    pub fn is_included(&self) -> bool {
        matches!(self.kind, LinkKind::Included(_))
    }

    /// Whether this is the own link of a class.
    pub(crate) fn is_class_own(&self) -> bool {
        match &self.kind {
            LinkKind::Own(module) => module.upgrade().is_some_and(|m| m.is_class()),
            _ => false,
        }
    }

    /// Splice `module` in directly behind this link.
    pub(crate) fn insert_after(&self, module: ModuleRef) {
        self.parent.rcu(|parent| {
            Some(Arc::new(ChainLink {
                kind: LinkKind::Included(Arc::clone(&module)),
                parent: ArcSwapOption::new(parent.clone()),
            }))
        });
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LinkKind::PrependMarker => f.write_str("PrependMarker"),
            LinkKind::Own(module) => match module.upgrade() {
                Some(m) => write!(f, "Own({})", m.display_name()),
                None => f.write_str("Own(<dropped>)"),
            },
            LinkKind::Included(m) => write!(f, "Included({})", m.display_name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Lazy walk over a chain, skipping markers. Restartable by calling
/// [`ModuleRecord::ancestors`] again.
pub struct Ancestors {
    next: Option<Arc<ChainLink>>,
}

impl Iterator for Ancestors {
    type Item = ModuleRef;

    fn next(&mut self) -> Option<ModuleRef> {
        while let Some(link) = self.next.take() {
            self.next = link.parent();
            if let Some(module) = link.actual_module() {
                return Some(module);
            }
        }
        None
    }
}

/// Prepended and included modules of one record, stopping at its
/// superclass.
pub struct IncludedModules {
    next: Option<Arc<ChainLink>>,
}

impl Iterator for IncludedModules {
    type Item = ModuleRef;

    fn next(&mut self) -> Option<ModuleRef> {
        while let Some(link) = self.next.take() {
            match &link.kind {
                // A marker past our own start belongs to the superclass.
                LinkKind::PrependMarker => return None,
                LinkKind::Own(_) => self.next = link.parent(),
                LinkKind::Included(module) => {
                    self.next = link.parent();
                    return Some(Arc::clone(module));
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// ModuleRecord: chain queries and mutations
// ---------------------------------------------------------------------------

impl ModuleRecord {
    /// Self, prepended modules (most recent first), included modules (most
    /// recent first), then the superclass's ancestors.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: Some(Arc::clone(&self.start)),
        }
    }

    pub fn prepended_and_included_modules(&self) -> IncludedModules {
        IncludedModules {
            next: self.start.parent(),
        }
    }

    /// Whether `other` is anywhere in this record's ancestry (self included).
    pub fn includes_module(&self, other: &ModuleRecord) -> bool {
        self.ancestors().any(|a| a.id() == other.id())
    }

    pub fn has_prepended_modules(&self) -> bool {
        !matches!(self.start.parent(), Some(first) if Arc::ptr_eq(&first, &self.own))
    }

    /// Every prepended module followed by this record itself.
    pub fn prepended_modules_and_self(&self) -> Vec<ModuleRef> {
        let mut modules = Vec::new();
        let mut link = self.start.parent();
        while let Some(current) = link {
            if Arc::ptr_eq(&current, &self.own) {
                break;
            }
            modules.extend(current.actual_module());
            link = current.parent();
        }
        modules.extend(self.to_ref());
        modules
    }

    /// Whether `module` is spliced in between this record and its superclass.
    fn is_included_before_superclass(&self, module: &ModuleRecord) -> bool {
        let mut link = self.own.parent();
        while let Some(current) = link {
            match &current.kind {
                LinkKind::Included(m) if m.id() == module.id() => return true,
                LinkKind::Included(_) => link = current.parent(),
                _ => return false,
            }
        }
        false
    }

    fn check_includable(
        &self,
        ctx: &Context,
        module: &ModuleRecord,
        operation: CyclicOperation,
    ) -> Result<(), HierarchyError> {
        self.check_frozen(ctx)?;
        if module.is_class() {
            return Err(HierarchyError::WrongArgumentType {
                expected: "Module",
                found: "Class",
            });
        }
        if module.includes_module(self) {
            return Err(HierarchyError::CyclicHierarchy { operation });
        }
        Ok(())
    }

    /// Frozen check over every record an include into this module fans out
    /// to, transitively.
    fn check_dependents_mutable(&self, ctx: &Context) -> Result<(), HierarchyError> {
        let Some(included_by) = &self.included_by else {
            return Ok(());
        };
        let mut seen = FxHashSet::default();
        let mut pending = included_by.snapshot();
        while let Some(dependent) = pending.pop() {
            if !seen.insert(dependent.id()) {
                continue;
            }
            dependent.check_frozen(ctx)?;
            if let Some(included_by) = dependent.included_by() {
                pending.extend(included_by.snapshot());
            }
        }
        Ok(())
    }

    /// Merge `module`'s ancestors into this record's chain behind it.
    ///
    /// For a module the include is repeated on every record that includes or
    /// prepends it. All of them are checked for frozenness before anything is
    /// spliced.
    pub fn include(&self, ctx: &Context, module: &ModuleRef) -> Result<(), HierarchyError> {
        self.check_includable(ctx, module, CyclicOperation::Include)?;
        self.check_dependents_mutable(ctx)?;
        self.propagate_shared(ctx, &Value::Module(Arc::clone(module)));

        let mut inclusion_point = Arc::clone(&self.own);
        let mut pending: Vec<ModuleRef> = Vec::new();

        for ancestor in module.ancestors() {
            if !self.includes_module(&ancestor) {
                pending.push(ancestor);
                continue;
            }
            if !self.is_included_before_superclass(&ancestor) {
                // Already inherited through the superclass.
                continue;
            }

            self.perform_includes(ctx, &inclusion_point, &pending);
            pending.clear();

            // Continue behind the ancestor's existing position.
            let mut link = self.own.parent();
            while let Some(current) = link {
                let found = current
                    .actual_module()
                    .is_some_and(|m| m.id() == ancestor.id());
                if found {
                    inclusion_point = Arc::clone(&current);
                    break;
                }
                link = current.parent();
            }
        }

        self.perform_includes(ctx, &inclusion_point, &pending);

        // A dependent that fails (frozen since the check) must not stop the
        // others or the generation bump; its error is reported afterwards.
        let mut first_error = None;
        if !self.is_class() {
            if let (Some(included_by), Some(this)) = (&self.included_by, self.to_ref()) {
                for dependent in included_by.snapshot() {
                    if let Err(err) = dependent.include(ctx, &this) {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        self.new_hierarchy_version();
        first_error.map_or(Ok(()), Err)
    }

    fn perform_includes(&self, ctx: &Context, target: &Arc<ChainLink>, modules: &[ModuleRef]) {
        // Inserting each at the same point reverses them; go backwards so
        // the first ancestor ends up closest.
        for module in modules.iter().rev() {
            debug!(
                module = %self.display_name(),
                included = %module.display_name(),
                "include"
            );
            target.insert_after(Arc::clone(module));

            if let Some(included_by) = module.included_by() {
                included_by.add(self);
            }
            self.new_constants_version(ctx, &module.constant_names());
            // Module-into-module includes only register the dependency;
            // method caches are keyed on classes.
            if self.is_class() {
                self.new_methods_version(ctx, &module.method_names());
            }
        }
    }

    /// Splice `module` (with its own prepends and includes) in front of this
    /// record.
    pub fn prepend(&self, ctx: &Context, module: &ModuleRef) -> Result<(), HierarchyError> {
        self.check_includable(ctx, module, CyclicOperation::Prepend)?;
        self.propagate_shared(ctx, &Value::Module(Arc::clone(module)));

        // Caches that resolved a name through self or an earlier prepend
        // only checked that module, so all of them need a bump.
        let prepended_and_self = self.prepended_modules_and_self();
        let is_class = self.is_class();

        let mut source = Some(Arc::clone(&module.start));
        let mut cursor = Arc::clone(&self.start);
        while let Some(link) = source {
            if link.is_class_own() {
                break;
            }
            if let Some(to_prepend) = link.actual_module() {
                if !self.includes_module(&to_prepend) {
                    debug!(
                        module = %self.display_name(),
                        prepended = %to_prepend.display_name(),
                        "prepend"
                    );
                    cursor.insert_after(Arc::clone(&to_prepend));

                    let constants = to_prepend.constant_names();
                    let methods = if is_class {
                        to_prepend.method_names()
                    } else {
                        Vec::new()
                    };
                    for dependent in &prepended_and_self {
                        if let Some(included_by) = to_prepend.included_by() {
                            included_by.add(dependent);
                        }
                        dependent.new_constants_version(ctx, &constants);
                        if is_class {
                            dependent.new_methods_version(ctx, &methods);
                        }
                    }

                    if let Some(next) = cursor.parent() {
                        cursor = next;
                    }
                }
            }
            source = link.parent();
        }

        self.new_hierarchy_version();
        Ok(())
    }
}
