//! One-way validity tokens consumed by inline caches.
//!
//! An [`Assumption`] starts valid and can be invalidated exactly once; it is
//! never revalidated. Caches hold [`InvalidationToken`]s (shared handles to
//! an assumption) and check [`Assumption::is_valid`] on every hit.
//!
//! [`HierarchyGeneration`] is the cyclic flavour: it always exposes a valid
//! current token and replaces it with a fresh one on every bump.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use tracing::trace;

/// Shared handle to an [`Assumption`].
pub type InvalidationToken = Arc<Assumption>;

/// A cheap-to-check validity flag with a single valid -> invalid transition.
pub struct Assumption {
    name: &'static str,
    valid: AtomicBool,
    reason: OnceLock<String>,
}

impl Assumption {
    /// Create a fresh, valid assumption.
    pub fn new(name: &'static str) -> InvalidationToken {
        Arc::new(Assumption {
            name,
            valid: AtomicBool::new(true),
            reason: OnceLock::new(),
        })
    }

    /// The static description given at creation.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether no invalidating event has happened yet.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidate the assumption.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// assumption was already invalid. Only the first reason is kept.
    pub fn invalidate(&self, reason: impl Into<String>) -> bool {
        if self
            .valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let reason = reason.into();
        trace!(assumption = self.name, reason = %reason, "assumption invalidated");
        let _ = self.reason.set(reason);
        true
    }

    /// Why the assumption was invalidated, if it was.
    pub fn invalidation_reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

impl fmt::Debug for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assumption")
            .field("name", &self.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HierarchyGeneration
// ---------------------------------------------------------------------------

/// Monotonic, cyclic assumption guarding a module's ancestor chain.
///
/// `current()` hands out the token for the current generation without
/// locking. `bump()` installs a new token first and invalidates the old one
/// afterwards, so a reader never sees an invalid token as "current".
pub struct HierarchyGeneration {
    current: ArcSwap<Assumption>,
    generation: AtomicU64,
}

impl HierarchyGeneration {
    const NAME: &'static str = "hierarchy is unmodified";

    pub fn new() -> Self {
        HierarchyGeneration {
            current: ArcSwap::new(Assumption::new(Self::NAME)),
            generation: AtomicU64::new(0),
        }
    }

    /// The token for the current generation.
    pub fn current(&self) -> InvalidationToken {
        self.current.load_full()
    }

    /// Number of bumps so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new generation, invalidating every token handed out so far.
    pub fn bump(&self, reason: &str) {
        let old = self.current.swap(Assumption::new(Self::NAME));
        self.generation.fetch_add(1, Ordering::AcqRel);
        old.invalidate(reason);
    }
}

impl Default for HierarchyGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HierarchyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchyGeneration")
            .field("generation", &self.generation())
            .finish()
    }
}
