//! Refinements.
//!
//! A namespace module holds a registry mapping each module it refines to
//! the refinement module. The refinement's own link continues into the
//! refined module's chain, so its methods sit in front of the refined
//! module's when the refinement is active.

use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use garnet_common::{HierarchyError, Symbol};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::context::Context;

use super::{ModuleId, ModuleRecord, ModuleRef};

/// What a refinement module refines, and where.
pub(crate) struct RefinementOrigin {
    refined: ModuleRef,
    namespace: Weak<ModuleRecord>,
}

impl RefinementOrigin {
    pub(crate) fn refined(&self) -> &ModuleRef {
        &self.refined
    }

    pub(crate) fn namespace(&self) -> Option<ModuleRef> {
        self.namespace.upgrade()
    }
}

type RefinementMap = FxHashMap<ModuleId, (ModuleRef, ModuleRef)>;

/// Refinements declared in one namespace, keyed by the refined module.
///
/// Lookups read a published snapshot; registrations copy it under `writer`.
pub struct RefinementRegistry {
    entries: ArcSwap<RefinementMap>,
    writer: Mutex<()>,
}

impl Default for RefinementRegistry {
    fn default() -> Self {
        RefinementRegistry {
            entries: ArcSwap::from_pointee(FxHashMap::default()),
            writer: Mutex::new(()),
        }
    }
}

impl RefinementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, refined: &ModuleRecord) -> Option<ModuleRef> {
        self.entries
            .load()
            .get(&refined.id())
            .map(|(_, refinement)| Arc::clone(refinement))
    }

    /// (refined, refinement) pairs in refined-module creation order.
    pub fn snapshot(&self) -> Vec<(ModuleRef, ModuleRef)> {
        let mut entries: Vec<_> = self
            .entries
            .load()
            .values()
            .map(|(refined, refinement)| (Arc::clone(refined), Arc::clone(refinement)))
            .collect();
        entries.sort_by_key(|(refined, _)| refined.id());
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RefinementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl ModuleRecord {
    /// Record `refinement` as refining `refined` within this namespace.
    ///
    /// Returns the refinement that ends up active: an earlier registration
    /// for the same refined module wins and `refinement` is left untouched.
    pub fn register_refinement(
        &self,
        ctx: &Context,
        refined: &ModuleRef,
        refinement: &ModuleRef,
    ) -> Result<ModuleRef, HierarchyError> {
        self.check_frozen(ctx)?;
        if refinement.is_class() {
            return Err(HierarchyError::WrongArgumentType {
                expected: "Module",
                found: "Class",
            });
        }

        let registry = &self.refinements;
        let _writer = registry.writer.lock();
        let current = registry.entries.load_full();
        if let Some((_, existing)) = current.get(&refined.id()) {
            return Ok(Arc::clone(existing));
        }

        let origin = RefinementOrigin {
            refined: Arc::clone(refined),
            namespace: self.downgrade(),
        };
        if refinement.refinement.set(origin).is_err() {
            return Err(HierarchyError::WrongArgumentType {
                expected: "Module",
                found: "Refinement",
            });
        }
        refinement.own.set_parent(Some(Arc::clone(&refined.start)));
        let mut next: RefinementMap = (*current).clone();
        next.insert(refined.id(), (Arc::clone(refined), Arc::clone(refinement)));
        registry.entries.store(Arc::new(next));
        Ok(Arc::clone(refinement))
    }

    /// The refinement of `refined` declared in this namespace.
    pub fn refinement_for(&self, refined: &ModuleRecord) -> Option<ModuleRef> {
        self.refinements.get(refined)
    }

    /// Every refinement declared in this namespace as (refined, refinement).
    pub fn refinements(&self) -> Vec<(ModuleRef, ModuleRef)> {
        self.refinements.snapshot()
    }

    pub fn is_refinement(&self) -> bool {
        self.refinement.get().is_some()
    }

    pub fn refined_module(&self) -> Option<ModuleRef> {
        self.refinement.get().map(|r| Arc::clone(&r.refined))
    }

    pub fn refinement_namespace(&self) -> Option<ModuleRef> {
        self.refinement.get().and_then(RefinementOrigin::namespace)
    }

    /// `name` of this module was refined: drop any inlined fast path for it.
    pub(crate) fn refined_method(&self, ctx: &Context, name: Symbol) {
        let Some(token) = self.inlinable_assumption(name) else {
            return;
        };
        let qualified = self.qualified_name(ctx, name);
        token.invalidate(format!("method is refined: {}", qualified));

        let message = format!(
            "Refining '{}' disables interpreter and JIT optimizations",
            qualified
        );
        if ctx.options().performance_warnings {
            warn!(module = %self.display_name(), "{}", message);
        }
        ctx.hooks().optimization_caution(self, name, &message);
    }
}
