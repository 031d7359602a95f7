//! Method tables: definition, tombstones, removal, tokens, cached lookups,
//! events and concurrent readers.

use std::sync::Arc;

use garnet_rt::{
    Assumption, Context, CoreState, HierarchyError, InternalMethod, MethodLookup, ModuleRecord,
    ModuleRef, RuntimeHooks, RuntimeOptions, SharedMethodInfo, Symbol, Value, Visibility,
};
use parking_lot::Mutex;

// ── Helpers ────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<(&'static str, String, Symbol)>>,
    barriers: Mutex<usize>,
}

impl RecordingHooks {
    fn events(&self) -> Vec<(&'static str, String, Symbol)> {
        self.events.lock().clone()
    }

    fn record(&self, event: &'static str, module: &ModuleRecord, name: Symbol) {
        self.events
            .lock()
            .push((event, module.display_name().to_string(), name));
    }
}

impl RuntimeHooks for RecordingHooks {
    fn write_barrier(&self, _value: &Value) {
        *self.barriers.lock() += 1;
    }

    fn method_added(&self, module: &ModuleRecord, name: Symbol) {
        self.record("method_added", module, name);
    }

    fn method_undefined(&self, module: &ModuleRecord, name: Symbol) {
        self.record("method_undefined", module, name);
    }

    fn optimization_caution(&self, module: &ModuleRecord, name: Symbol, _message: &str) {
        self.record("optimization_caution", module, name);
    }
}

fn context() -> Context {
    Context::new(RuntimeOptions::default())
}

fn recording_context() -> (Context, Arc<RecordingHooks>) {
    let hooks = Arc::new(RecordingHooks::default());
    let ctx = Context::with_hooks(RuntimeOptions::default(), hooks.clone());
    (ctx, hooks)
}

fn module(ctx: &Context, name: &str) -> ModuleRef {
    ctx.define_module(ctx.object_class(), name).unwrap()
}

fn class(ctx: &Context, name: &str, superclass: &ModuleRef) -> ModuleRef {
    ctx.define_class(ctx.object_class(), name, superclass).unwrap()
}

fn body(ctx: &Context, name: &str) -> InternalMethod {
    InternalMethod::new(ctx.intern(name), SharedMethodInfo::new(name, 0))
}

fn found(lookup: MethodLookup) -> Arc<InternalMethod> {
    match lookup {
        MethodLookup::Found(method) => method,
        other => panic!("expected a method, got {:?}", other),
    }
}

// ── Definition and lookup ──────────────────────────────────────────────

#[test]
fn method_defined_after_include_is_visible() {
    let ctx = context();
    let m = module(&ctx, "M");
    let d = class(&ctx, "D", ctx.object_class());
    d.include(&ctx, &m).unwrap();

    let foo = ctx.intern("foo");
    let info = SharedMethodInfo::new("foo", 0);
    m.define_method(&ctx, InternalMethod::new(foo, Arc::clone(&info)))
        .unwrap();

    let method = found(d.lookup_method(foo));
    assert!(Arc::ptr_eq(method.shared_info(), &info));
    assert_eq!(method.owner().unwrap().id(), m.id());
    assert_eq!(method.declaring_module().unwrap().id(), m.id());
}

#[test]
fn unknown_method_is_absent() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    assert!(matches!(c.lookup_method(ctx.intern("nope")), MethodLookup::Absent));
}

#[test]
fn redefinition_invalidates_old_token_only() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    let foo = ctx.intern("foo");

    c.define_method(&ctx, body(&ctx, "foo")).unwrap();
    let before = c.method_token(foo);
    assert!(before.is_valid());

    c.define_method(&ctx, body(&ctx, "foo")).unwrap();
    assert!(!before.is_valid());
    assert_eq!(before.invalidation_reason(), Some("C#foo"));

    let after = c.method_token(foo);
    assert!(after.is_valid());
    c.define_method(&ctx, body(&ctx, "foo")).unwrap();
    assert!(!after.is_valid());
}

#[test]
fn definition_in_included_module_bumps_dependents() {
    let ctx = context();
    let m = module(&ctx, "M");
    let d = class(&ctx, "D", ctx.object_class());
    d.include(&ctx, &m).unwrap();
    let foo = ctx.intern("foo");

    // A cached miss on D depends on D's own (empty) slot for `foo`.
    let token = d.method_token(foo);
    m.define_method(&ctx, body(&ctx, "foo")).unwrap();
    assert!(!token.is_valid());
}

#[test]
fn frozen_module_rejects_definitions() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    c.freeze();
    let err = c.define_method(&ctx, body(&ctx, "foo")).unwrap_err();
    assert_eq!(
        err,
        HierarchyError::FrozenModification {
            kind: "class",
            receiver: "C".to_string()
        }
    );
}

#[test]
fn frozen_singleton_class_reports_attached_object() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    let meta = ctx
        .singleton_class(Value::Module(Arc::clone(&c)), ctx.object_class())
        .unwrap();
    meta.freeze();
    let err = meta.define_method(&ctx, body(&ctx, "foo")).unwrap_err();
    assert_eq!(err.to_string(), "can't modify frozen Class: C");
}

// ── Tombstones and removal ─────────────────────────────────────────────

#[test]
fn undef_hides_superclass_method() {
    let ctx = context();
    let base = class(&ctx, "Base", ctx.object_class());
    let derived = class(&ctx, "Derived", &base);
    let foo = ctx.intern("foo");
    base.define_method(&ctx, body(&ctx, "foo")).unwrap();

    derived.undef_method(&ctx, foo).unwrap();

    assert!(matches!(derived.lookup_method(foo), MethodLookup::Undefined));
    assert!(base.lookup_method(foo).is_found());
    assert!(derived.get_method(foo).unwrap().is_undefined());
}

#[test]
fn undef_of_unknown_method_fails() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    let err = c.undef_method(&ctx, ctx.intern("foo")).unwrap_err();
    assert_eq!(err.to_string(), "undefined method 'foo' for 'C'");
}

#[test]
fn undef_twice_fails() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    let foo = ctx.intern("foo");
    c.define_method(&ctx, body(&ctx, "foo")).unwrap();
    c.undef_method(&ctx, foo).unwrap();
    assert!(matches!(
        c.undef_method(&ctx, foo),
        Err(HierarchyError::UndefinedMethod { .. })
    ));
}

#[test]
fn remove_exposes_superclass_method() {
    let ctx = context();
    let base = class(&ctx, "Base", ctx.object_class());
    let derived = class(&ctx, "Derived", &base);
    let foo = ctx.intern("foo");
    let base_info = SharedMethodInfo::new("foo", 0);
    base.define_method(&ctx, InternalMethod::new(foo, Arc::clone(&base_info)))
        .unwrap();
    derived.define_method(&ctx, body(&ctx, "foo")).unwrap();

    let token = derived.method_token(foo);
    assert!(derived.remove_method(&ctx, foo).unwrap());
    assert!(!token.is_valid());

    let method = found(derived.lookup_method(foo));
    assert!(Arc::ptr_eq(method.shared_info(), &base_info));
}

#[test]
fn remove_of_inherited_method_removes_nothing() {
    let ctx = context();
    let base = class(&ctx, "Base", ctx.object_class());
    let derived = class(&ctx, "Derived", &base);
    let foo = ctx.intern("foo");
    base.define_method(&ctx, body(&ctx, "foo")).unwrap();

    assert!(!derived.remove_method(&ctx, foo).unwrap());
    assert!(derived.lookup_method(foo).is_found());
}

#[test]
fn remove_does_not_treat_cache_placeholder_as_definition() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    let foo = ctx.intern("foo");
    let _ = c.lookup_method_cached(foo);
    assert!(!c.remove_method(&ctx, foo).unwrap());
    assert!(c.method_names().is_empty());
}

// ── Cached lookups ─────────────────────────────────────────────────────

#[test]
fn cached_miss_is_invalidated_by_later_superclass_definition() {
    let ctx = context();
    let base = class(&ctx, "Base", ctx.object_class());
    let derived = class(&ctx, "Derived", &base);
    let foo = ctx.intern("foo");

    let cached = derived.lookup_method_cached(foo);
    assert!(matches!(cached.result, MethodLookup::Absent));
    assert!(cached.is_valid());

    base.define_method(&ctx, body(&ctx, "foo")).unwrap();
    assert!(!cached.is_valid());

    let refreshed = derived.lookup_method_cached(foo);
    assert!(refreshed.result.is_found());
    assert!(refreshed.is_valid());
}

#[test]
fn cached_hit_is_invalidated_by_include_of_shadowing_module() {
    let ctx = context();
    let base = class(&ctx, "Base", ctx.object_class());
    let derived = class(&ctx, "Derived", &base);
    let m = module(&ctx, "M");
    let foo = ctx.intern("foo");
    base.define_method(&ctx, body(&ctx, "foo")).unwrap();
    m.define_method(&ctx, body(&ctx, "foo")).unwrap();

    let cached = derived.lookup_method_cached(foo);
    assert!(cached.is_valid());

    derived.include(&ctx, &m).unwrap();
    assert!(!cached.is_valid());
    let method = found(derived.lookup_method(foo));
    assert_eq!(method.owner().unwrap().id(), m.id());
}

#[test]
fn cached_hit_is_invalidated_by_prepend() {
    let ctx = context();
    let c = class(&ctx, "C", ctx.object_class());
    let p = module(&ctx, "P");
    let foo = ctx.intern("foo");
    c.define_method(&ctx, body(&ctx, "foo")).unwrap();
    p.define_method(&ctx, body(&ctx, "foo")).unwrap();

    let cached = c.lookup_method_cached(foo);
    c.prepend(&ctx, &p).unwrap();

    assert!(!cached.is_valid());
    assert_eq!(found(c.lookup_method(foo)).owner().unwrap().id(), p.id());
}

// ── Filtering ──────────────────────────────────────────────────────────

#[test]
fn filter_methods_respects_tombstones_and_visibility() {
    let ctx = context();
    let base = class(&ctx, "Base", ctx.object_class());
    let derived = class(&ctx, "Derived", &base);
    for name in ["a", "b", "c"] {
        base.define_method(&ctx, body(&ctx, name)).unwrap();
    }
    derived
        .define_method(&ctx, body(&ctx, "d").with_visibility(Visibility::Private))
        .unwrap();
    derived.undef_method(&ctx, ctx.intern("b")).unwrap();

    let names = |syms: Vec<Symbol>| -> Vec<String> {
        syms.into_iter().map(|s| ctx.resolve(s).to_string()).collect()
    };

    let public = derived.filter_methods(true, |m| m.visibility() == Visibility::Public);
    assert_eq!(names(public), ["a", "c"]);

    let own = derived.filter_methods(false, |_| true);
    assert_eq!(names(own), ["d"]);
    assert_eq!(derived.method_names().len(), 2);
}

#[test]
fn deep_method_search_falls_back_to_object_for_modules() {
    let ctx = context();
    let m = module(&ctx, "M");
    let inspect = ctx.intern("inspect");
    ctx.object_class()
        .define_method(&ctx, body(&ctx, "inspect"))
        .unwrap();

    assert!(matches!(m.lookup_method(inspect), MethodLookup::Absent));
    let method = m.deep_method_search(&ctx, inspect).unwrap();
    assert_eq!(method.owner().unwrap().id(), ctx.object_class().id());
}

// ── Events ─────────────────────────────────────────────────────────────

#[test]
fn method_added_skips_visibility_changes() {
    let (ctx, hooks) = recording_context();
    let c = class(&ctx, "C", ctx.object_class());
    let foo = ctx.intern("foo");

    let method = body(&ctx, "foo");
    c.define_method(&ctx, method.clone()).unwrap();
    c.define_method(&ctx, method.with_visibility(Visibility::Private))
        .unwrap();
    c.define_method(&ctx, body(&ctx, "foo")).unwrap();

    let added: Vec<_> = hooks
        .events()
        .into_iter()
        .filter(|(event, _, _)| *event == "method_added")
        .collect();
    assert_eq!(added.len(), 2);
    assert!(added.iter().all(|(_, module, name)| module == "C" && *name == foo));
}

#[test]
fn undef_emits_method_undefined_not_method_added() {
    let (ctx, hooks) = recording_context();
    let c = class(&ctx, "C", ctx.object_class());
    let foo = ctx.intern("foo");
    c.define_method(&ctx, body(&ctx, "foo")).unwrap();
    c.undef_method(&ctx, foo).unwrap();

    let events: Vec<_> = hooks.events().into_iter().map(|(e, _, _)| e).collect();
    assert_eq!(events, ["method_added", "method_undefined"]);
}

#[test]
fn shared_module_routes_new_methods_through_write_barrier() {
    let (ctx, hooks) = recording_context();
    let c = class(&ctx, "C", ctx.object_class());
    c.define_method(&ctx, body(&ctx, "before")).unwrap();
    assert_eq!(*hooks.barriers.lock(), 0);

    c.mark_shared();
    c.define_method(&ctx, body(&ctx, "after")).unwrap();
    assert_eq!(*hooks.barriers.lock(), 1);
}

// ── Builtins ───────────────────────────────────────────────────────────

#[test]
fn builtin_slot_is_seeded_with_registered_token() {
    let hooks = Arc::new(RecordingHooks::default());
    let ctx = Context::bootstrapping(RuntimeOptions::default(), hooks.clone());
    let integer = class(&ctx, "Integer", ctx.object_class());
    let plus = ctx.intern("+");

    let token = Assumption::new("inlined Integer#+");
    assert!(integer.register_inlinable_assumption(&ctx, plus, Arc::clone(&token)));

    ctx.advance(CoreState::Initializing);
    integer.define_method(&ctx, body(&ctx, "+")).unwrap();
    assert!(Arc::ptr_eq(&integer.method_token(plus), &token));

    ctx.advance(CoreState::Loaded);
    assert!(!integer.register_inlinable_assumption(&ctx, ctx.intern("-"), Assumption::new("late")));
    // No events while the core library was initializing.
    assert!(hooks.events().is_empty());

    // Redefining a builtin invalidates the inlined fast path.
    integer.define_method(&ctx, body(&ctx, "+")).unwrap();
    assert!(!token.is_valid());
}

#[test]
fn lifecycle_never_moves_backwards() {
    let ctx = Context::bootstrapping(RuntimeOptions::default(), Arc::new(garnet_rt::DefaultHooks));
    assert_eq!(ctx.core_state(), CoreState::Created);
    assert!(ctx.advance(CoreState::Loaded));
    assert!(!ctx.advance(CoreState::Initializing));
    assert!(ctx.is_loaded());
}

// ── Concurrency ────────────────────────────────────────────────────────

#[test]
fn concurrent_lookups_see_old_or_new_body() {
    let ctx = context();
    let d = class(&ctx, "D", ctx.object_class());
    let foo = ctx.intern("foo");
    let old = SharedMethodInfo::new("foo", 0);
    let new = SharedMethodInfo::new("foo", 1);
    d.define_method(&ctx, InternalMethod::new(foo, Arc::clone(&old)))
        .unwrap();

    crossbeam_utils::thread::scope(|scope| {
        scope.spawn(|_| {
            for _ in 0..10_000 {
                let method = found(d.lookup_method(foo));
                let id = method.shared_info().id();
                assert!(id == old.id() || id == new.id());
            }
        });
        scope.spawn(|_| {
            for i in 0..200 {
                let info = if i % 2 == 0 { &new } else { &old };
                d.define_method(&ctx, InternalMethod::new(foo, Arc::clone(info)))
                    .unwrap();
            }
        });
    })
    .unwrap();

    let last = found(d.lookup_method(foo));
    assert_eq!(last.shared_info().id(), old.id());
}
