//! Ancestor chains: include, prepend, cycles, fan-out to dependents and
//! hierarchy generations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use garnet_rt::{
    Context, CyclicOperation, HierarchyError, ModuleRecord, ModuleRef, RuntimeHooks,
    RuntimeOptions,
};

// ── Helpers ────────────────────────────────────────────────────────────

fn context() -> Context {
    Context::new(RuntimeOptions::default())
}

fn ancestors(module: &ModuleRef) -> String {
    module
        .ancestors()
        .map(|m| m.display_name().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reports `D1` frozen from its second frozen check after being armed.
#[derive(Default)]
struct FreezesDuringFanOut {
    armed: AtomicBool,
    checks: AtomicUsize,
}

impl RuntimeHooks for FreezesDuringFanOut {
    fn is_frozen(&self, module: &ModuleRecord) -> bool {
        if !self.armed.load(Ordering::SeqCst) || module.display_name().as_ref() != "D1" {
            return module.is_frozen();
        }
        self.checks.fetch_add(1, Ordering::SeqCst) >= 1
    }
}

fn module(ctx: &Context, name: &str) -> ModuleRef {
    ctx.define_module(ctx.object_class(), name).unwrap()
}

fn class(ctx: &Context, name: &str) -> ModuleRef {
    ctx.define_class(ctx.object_class(), name, ctx.object_class())
        .unwrap()
}

// ── Include ────────────────────────────────────────────────────────────

#[test]
fn include_chain_lists_each_ancestor_once() {
    let ctx = context();
    let a = module(&ctx, "A");
    let b = module(&ctx, "B");
    let c = class(&ctx, "C");

    b.include(&ctx, &a).unwrap();
    c.include(&ctx, &b).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"C, B, A, Object");

    // Including A again directly is a no-op.
    c.include(&ctx, &a).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"C, B, A, Object");
}

#[test]
fn direct_include_then_transitive_include_splits_at_existing_ancestor() {
    let ctx = context();
    let a = module(&ctx, "A");
    let b = module(&ctx, "B");
    let c = class(&ctx, "C");

    b.include(&ctx, &a).unwrap();
    c.include(&ctx, &a).unwrap();
    c.include(&ctx, &b).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"C, B, A, Object");
}

#[test]
fn later_includes_come_first() {
    let ctx = context();
    let m1 = module(&ctx, "M1");
    let m2 = module(&ctx, "M2");
    let c = class(&ctx, "C");

    c.include(&ctx, &m1).unwrap();
    c.include(&ctx, &m2).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"C, M2, M1, Object");
}

#[test]
fn module_already_inherited_through_superclass_is_skipped() {
    let ctx = context();
    let m = module(&ctx, "M");
    let base = class(&ctx, "Base");
    base.include(&ctx, &m).unwrap();
    let derived = ctx
        .define_class(ctx.object_class(), "Derived", &base)
        .unwrap();

    derived.include(&ctx, &m).unwrap();
    insta::assert_snapshot!(ancestors(&derived), @"Derived, Base, M, Object");
}

#[test]
fn cyclic_include_fails_without_touching_the_chain() {
    let ctx = context();
    let a = module(&ctx, "A");
    let b = module(&ctx, "B");
    b.include(&ctx, &a).unwrap();

    let before = ancestors(&a);
    let err = a.include(&ctx, &b).unwrap_err();
    assert_eq!(
        err,
        HierarchyError::CyclicHierarchy {
            operation: CyclicOperation::Include
        }
    );
    assert_eq!(err.to_string(), "cyclic include detected");
    assert_eq!(ancestors(&a), before);
}

#[test]
fn including_self_is_cyclic() {
    let ctx = context();
    let a = module(&ctx, "A");
    assert!(matches!(
        a.include(&ctx, &a),
        Err(HierarchyError::CyclicHierarchy { .. })
    ));
    assert!(matches!(
        a.prepend(&ctx, &a),
        Err(HierarchyError::CyclicHierarchy {
            operation: CyclicOperation::Prepend
        })
    ));
}

#[test]
fn including_a_class_is_rejected() {
    let ctx = context();
    let c = class(&ctx, "C");
    let d = class(&ctx, "D");
    let err = c.include(&ctx, &d).unwrap_err();
    assert_eq!(err.to_string(), "wrong argument type Class (expected Module)");
}

#[test]
fn frozen_class_rejects_include() {
    let ctx = context();
    let m = module(&ctx, "M");
    let c = class(&ctx, "C");
    c.freeze();

    let err = c.include(&ctx, &m).unwrap_err();
    assert_eq!(err.to_string(), "can't modify frozen class: C");
    insta::assert_snapshot!(ancestors(&c), @"C, Object");
}

#[test]
fn frozen_module_reports_module_kind() {
    let ctx = context();
    let m = module(&ctx, "M");
    let n = module(&ctx, "N");
    m.freeze();
    let err = m.include(&ctx, &n).unwrap_err();
    assert_eq!(err.to_string(), "can't modify frozen module: M");
}

// ── Prepend ────────────────────────────────────────────────────────────

#[test]
fn prepends_come_before_the_class_most_recent_first() {
    let ctx = context();
    let p1 = module(&ctx, "P1");
    let p2 = module(&ctx, "P2");
    let m = module(&ctx, "M");
    let c = class(&ctx, "C");

    c.include(&ctx, &m).unwrap();
    c.prepend(&ctx, &p1).unwrap();
    c.prepend(&ctx, &p2).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"P2, P1, C, M, Object");
    assert!(c.has_prepended_modules());

    let listed: Vec<_> = c
        .prepended_and_included_modules()
        .map(|m| m.display_name().to_string())
        .collect();
    assert_eq!(listed, ["P2", "P1", "M"]);
}

#[test]
fn prepending_a_module_brings_its_includes_along() {
    let ctx = context();
    let n = module(&ctx, "N");
    let m = module(&ctx, "M");
    let c = class(&ctx, "C");
    m.include(&ctx, &n).unwrap();

    c.prepend(&ctx, &m).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"M, N, C, Object");
}

#[test]
fn prepending_an_existing_ancestor_is_skipped() {
    let ctx = context();
    let m = module(&ctx, "M");
    let c = class(&ctx, "C");
    c.include(&ctx, &m).unwrap();

    c.prepend(&ctx, &m).unwrap();
    insta::assert_snapshot!(ancestors(&c), @"C, M, Object");
}

#[test]
fn prepended_modules_and_self_stops_at_own_link() {
    let ctx = context();
    let p = module(&ctx, "P");
    let m = module(&ctx, "M");
    let c = class(&ctx, "C");
    c.prepend(&ctx, &p).unwrap();
    c.include(&ctx, &m).unwrap();

    let names: Vec<_> = c
        .prepended_modules_and_self()
        .iter()
        .map(|m| m.display_name().to_string())
        .collect();
    assert_eq!(names, ["P", "C"]);
}

#[test]
fn prepend_registers_dependents() {
    let ctx = context();
    let p = module(&ctx, "P");
    let c = class(&ctx, "C");
    c.prepend(&ctx, &p).unwrap();

    let included_by = p.included_by().unwrap();
    assert!(included_by.contains(&c));
}

// ── Fan-out ────────────────────────────────────────────────────────────

#[test]
fn include_into_included_module_reaches_dependents() {
    let ctx = context();
    let m = module(&ctx, "M");
    let n = module(&ctx, "N");
    let d = class(&ctx, "D");

    d.include(&ctx, &m).unwrap();
    m.include(&ctx, &n).unwrap();

    insta::assert_snapshot!(ancestors(&m), @"M, N");
    insta::assert_snapshot!(ancestors(&d), @"D, M, N, Object");
}

#[test]
fn dropped_dependents_are_pruned_lazily() {
    let ctx = context();
    let m = module(&ctx, "M");
    {
        let transient = ctx.new_class(ctx.object_class()).unwrap();
        transient.include(&ctx, &m).unwrap();
        assert_eq!(m.included_by().unwrap().snapshot().len(), 1);
    }
    let included_by = m.included_by().unwrap();
    assert!(included_by.snapshot().is_empty());
    assert!(included_by.is_empty());
}

#[test]
fn frozen_dependent_rejects_include_before_any_splice() {
    let ctx = context();
    let m = module(&ctx, "M");
    let n = module(&ctx, "N");
    let d1 = class(&ctx, "D1");
    let d2 = class(&ctx, "D2");
    d1.include(&ctx, &m).unwrap();
    d2.include(&ctx, &m).unwrap();
    d1.freeze();

    let token = m.hierarchy_generation_token().unwrap();
    let err = m.include(&ctx, &n).unwrap_err();
    assert_eq!(
        err,
        HierarchyError::FrozenModification {
            kind: "class",
            receiver: "D1".to_string()
        }
    );

    insta::assert_snapshot!(ancestors(&m), @"M");
    insta::assert_snapshot!(ancestors(&d1), @"D1, M, Object");
    insta::assert_snapshot!(ancestors(&d2), @"D2, M, Object");
    assert!(token.is_valid());
    assert!(n.included_by().unwrap().is_empty());
}

#[test]
fn frozen_transitive_dependent_rejects_include() {
    let ctx = context();
    let m = module(&ctx, "M");
    let k = module(&ctx, "K");
    let n = module(&ctx, "N");
    let c = class(&ctx, "C");
    k.include(&ctx, &m).unwrap();
    c.include(&ctx, &k).unwrap();
    c.freeze();

    assert!(matches!(
        m.include(&ctx, &n),
        Err(HierarchyError::FrozenModification { kind: "class", .. })
    ));
    insta::assert_snapshot!(ancestors(&m), @"M");
    insta::assert_snapshot!(ancestors(&k), @"K, M");
}

#[test]
fn dependent_frozen_mid_fan_out_does_not_stop_the_rest() {
    let hooks = Arc::new(FreezesDuringFanOut::default());
    let ctx = Context::with_hooks(RuntimeOptions::default(), hooks.clone());
    let m = module(&ctx, "M");
    let n = module(&ctx, "N");
    let d1 = class(&ctx, "D1");
    let d2 = class(&ctx, "D2");
    d1.include(&ctx, &m).unwrap();
    d2.include(&ctx, &m).unwrap();

    let token = m.hierarchy_generation_token().unwrap();
    hooks.armed.store(true, Ordering::SeqCst);
    let err = m.include(&ctx, &n).unwrap_err();
    assert!(matches!(err, HierarchyError::FrozenModification { .. }));

    insta::assert_snapshot!(ancestors(&m), @"M, N");
    insta::assert_snapshot!(ancestors(&d2), @"D2, M, N, Object");
    assert!(!token.is_valid());
}

// ── Hierarchy generation ───────────────────────────────────────────────

#[test]
fn include_bumps_module_hierarchy_generation() {
    let ctx = context();
    let m = module(&ctx, "M");
    let n = module(&ctx, "N");

    let token = m.hierarchy_generation_token().unwrap();
    assert!(token.is_valid());
    m.include(&ctx, &n).unwrap();

    assert!(!token.is_valid());
    assert_eq!(token.invalidation_reason(), Some("M"));
    assert!(m.hierarchy_generation_token().unwrap().is_valid());
    assert_eq!(m.hierarchy_generation(), 1);
}

#[test]
fn classes_have_no_hierarchy_generation() {
    let ctx = context();
    let c = class(&ctx, "C");
    let err = c.hierarchy_generation_token().unwrap_err();
    assert_eq!(err.to_string(), "C is not a module");
    assert!(c.included_by().is_none());
}

#[test]
fn failed_include_leaves_generation_alone() {
    let ctx = context();
    let a = module(&ctx, "A");
    let b = module(&ctx, "B");
    b.include(&ctx, &a).unwrap();

    let token = a.hierarchy_generation_token().unwrap();
    assert!(a.include(&ctx, &b).is_err());
    assert!(token.is_valid());
}

// ── Superclass ─────────────────────────────────────────────────────────

#[test]
fn superclass_is_set_once() {
    let ctx = context();
    let base = class(&ctx, "Base");
    let c = class(&ctx, "C");

    assert!(Arc::ptr_eq(c.superclass().unwrap(), ctx.object_class()));
    let err = c.set_superclass(&base).unwrap_err();
    assert_eq!(err.to_string(), "superclass of C is already set");
    insta::assert_snapshot!(ancestors(&c), @"C, Object");
}

#[test]
fn superclass_must_be_a_class() {
    let ctx = context();
    let m = module(&ctx, "M");
    assert!(matches!(
        ctx.new_class(&m),
        Err(HierarchyError::WrongArgumentType { .. })
    ));
}

#[test]
fn ancestors_is_restartable() {
    let ctx = context();
    let m = module(&ctx, "M");
    let c = class(&ctx, "C");
    c.include(&ctx, &m).unwrap();

    let first: Vec<_> = c.ancestors().map(|m| m.id()).collect();
    let second: Vec<_> = c.ancestors().map(|m| m.id()).collect();
    assert_eq!(first, second);
    assert!(c.includes_module(&m));
    assert!(!m.includes_module(&c));
}
