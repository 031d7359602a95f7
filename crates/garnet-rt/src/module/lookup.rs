//! Lookups over the ancestor chain.
//!
//! Plain lookups only read: each visited table costs one map lookup and an
//! `Arc` clone. Cached lookups additionally materialize a (possibly empty)
//! slot in every visited module and hand back the tokens of all of them, so
//! an inline cache stays valid exactly until something it skipped over or
//! stopped at changes.

use std::sync::Arc;

use garnet_common::Symbol;
use rustc_hash::FxHashSet;

use crate::assumption::InvalidationToken;
use crate::constant::Constant;
use crate::context::Context;
use crate::method::InternalMethod;

use super::{ModuleRecord, ModuleRef};

/// Result of resolving a method name.
#[derive(Debug, Clone)]
pub enum MethodLookup {
    Found(Arc<InternalMethod>),
    /// A tombstone stopped the search.
    Undefined,
    /// Nothing in the ancestry binds the name.
    Absent,
}

impl MethodLookup {
    pub fn method(&self) -> Option<&Arc<InternalMethod>> {
        match self {
            MethodLookup::Found(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MethodLookup::Found(_))
    }

    fn from_binding(method: &Arc<InternalMethod>) -> Self {
        if method.is_undefined() {
            MethodLookup::Undefined
        } else {
            MethodLookup::Found(Arc::clone(method))
        }
    }
}

/// A lookup result together with the tokens that keep it valid.
#[derive(Debug, Clone)]
pub struct CachedLookup<T> {
    pub result: T,
    pub assumptions: Vec<InvalidationToken>,
}

impl<T> CachedLookup<T> {
    /// The inline-cache guard: whether every collected token still holds.
    pub fn is_valid(&self) -> bool {
        self.assumptions.iter().all(|token| token.is_valid())
    }
}

impl ModuleRecord {
    pub fn lookup_method(&self, name: Symbol) -> MethodLookup {
        for ancestor in self.ancestors() {
            if let Some(method) = ancestor.get_method(name) {
                return MethodLookup::from_binding(&method);
            }
        }
        MethodLookup::Absent
    }

    pub fn lookup_method_cached(&self, name: Symbol) -> CachedLookup<MethodLookup> {
        let mut assumptions = Vec::new();
        for ancestor in self.ancestors() {
            if let Some(h) = &ancestor.hierarchy {
                assumptions.push(h.current());
            }
            let slot = ancestor.methods.get_or_create(name);
            assumptions.push(slot.token());
            if let Some(method) = slot.value() {
                return CachedLookup {
                    result: MethodLookup::from_binding(method),
                    assumptions,
                };
            }
        }
        CachedLookup {
            result: MethodLookup::Absent,
            assumptions,
        }
    }

    /// Like [`lookup_method`](Self::lookup_method), but for every ancestor
    /// the refinements of it activated by `namespaces` are searched first.
    pub fn lookup_method_with_refinements(
        &self,
        name: Symbol,
        namespaces: &[ModuleRef],
    ) -> MethodLookup {
        for ancestor in self.ancestors() {
            for namespace in namespaces {
                let Some(refinement) = namespace.refinement_for(&ancestor) else {
                    continue;
                };
                // The refinement chain runs into the refined module; stop there.
                for module in refinement.ancestors() {
                    if module.id() == ancestor.id() {
                        break;
                    }
                    if let Some(method) = module.get_method(name) {
                        return MethodLookup::from_binding(&method);
                    }
                }
            }
            if let Some(method) = ancestor.get_method(name) {
                return MethodLookup::from_binding(&method);
            }
        }
        MethodLookup::Absent
    }

    /// Lookup used by `method_missing`-style reflection: skips tombstones,
    /// falls back to `Object` for modules and to the refined module for
    /// refinements.
    pub fn deep_method_search(&self, ctx: &Context, name: Symbol) -> Option<Arc<InternalMethod>> {
        if let MethodLookup::Found(method) = self.lookup_method(name) {
            return Some(method);
        }
        if !self.is_class() {
            if let MethodLookup::Found(method) = ctx.object_class().lookup_method(name) {
                return Some(method);
            }
        }
        if let Some(refined) = self.refined_module() {
            if let MethodLookup::Found(method) = refined.lookup_method(name) {
                return Some(method);
            }
        }
        None
    }

    /// Names of visible methods matching `filter`. With `include_ancestors`
    /// the closest binding of each name wins, so a tombstone hides every
    /// inherited binding behind it.
    pub fn filter_methods(
        &self,
        include_ancestors: bool,
        filter: impl Fn(&InternalMethod) -> bool,
    ) -> Vec<Symbol> {
        let mut seen = FxHashSet::default();
        let mut names = Vec::new();

        let mut visit = |module: &ModuleRecord| {
            let mut methods = module.methods();
            methods.sort_by_key(|m| m.name());
            for method in methods {
                if seen.insert(method.name()) && !method.is_undefined() && filter(&*method) {
                    names.push(method.name());
                }
            }
        };

        if include_ancestors {
            for ancestor in self.ancestors() {
                visit(&*ancestor);
            }
        } else {
            visit(self);
        }
        names
    }

    /// First constant named `name` in the ancestry. Autoload markers are
    /// returned (the caller triggers the load), undefined ones are skipped.
    pub fn lookup_constant(&self, name: Symbol) -> Option<Arc<Constant>> {
        self.ancestors()
            .filter_map(|ancestor| ancestor.get_constant(name))
            .find(|constant| !constant.is_undefined())
    }

    pub fn lookup_constant_cached(&self, name: Symbol) -> CachedLookup<Option<Arc<Constant>>> {
        let mut assumptions = Vec::new();
        for ancestor in self.ancestors() {
            if let Some(h) = &ancestor.hierarchy {
                assumptions.push(h.current());
            }
            let slot = ancestor.constants.get_or_create(name);
            assumptions.push(slot.token());
            if let Some(constant) = slot.value().filter(|c| !c.is_undefined()) {
                return CachedLookup {
                    result: Some(Arc::clone(constant)),
                    assumptions,
                };
            }
        }
        CachedLookup {
            result: None,
            assumptions,
        }
    }
}
