//! Garnet runtime core: the type hierarchy and symbol resolution.
//!
//! For every module and class this crate tracks the ancestor chain, the
//! method table, the constant table and the module's name, and hands the
//! execution engine cheap validity tokens for everything it caches.
//!
//! ## Modules
//!
//! - [`assumption`]: one-way invalidation tokens and hierarchy generations
//! - [`slot`]: versioned (value, token) cells and the CAS-updated tables
//!   built from them
//! - [`module`]: module records, ancestor chains, include/prepend, method
//!   and constant tables, naming, refinements
//! - [`context`]: the injected runtime context and module factories
//! - [`hooks`]: callbacks into surrounding collaborators
//! - [`object_graph`]: outward references for reachability analysis
//!
//! ## Concurrency
//!
//! Lookups run from any number of threads and never take a lock: tables,
//! ancestor links and naming state are published as `arc_swap` snapshots.
//! Each table read is a single map lookup returning one `Arc` that holds
//! both the value and its token, so a reader never sees a torn binding.
//! Structural mutations of one module are expected to be serialized by the
//! caller; slot updates still use compare-and-swap retry loops.

pub mod assumption;
pub mod class_variables;
pub mod config;
pub mod constant;
pub mod context;
pub mod hooks;
pub mod method;
pub mod module;
pub mod object_graph;
pub mod slot;
pub mod value;

pub use assumption::{Assumption, HierarchyGeneration, InvalidationToken};
pub use config::RuntimeOptions;
pub use constant::{Constant, ConstantValue};
pub use context::{Context, CoreState};
pub use hooks::{DefaultHooks, RuntimeHooks};
pub use method::{InternalMethod, SharedMethodInfo, Visibility};
pub use module::{
    CachedLookup, MethodLookup, ModuleId, ModuleKind, ModuleRecord, ModuleRef, NameState,
};
pub use object_graph::{reachable_objects, ObjectGraphNode};
pub use value::{ObjectRef, Value};

pub use garnet_common::{CyclicOperation, HierarchyError, Symbol, SymbolTable};
