//! Outward references for reachability analysis.
//!
//! The collector and the shared-object propagation both need to know what
//! a module record points at; this module only reports the edges; walking
//! them is the caller's business ([`reachable_objects`] is provided for
//! tests and tooling).

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::method::InternalMethod;
use crate::module::ModuleRecord;
use crate::value::Value;

pub trait ObjectGraphNode {
    /// Objects directly referenced by this node.
    fn adjacent_objects(&self) -> Vec<Value>;
}

impl ObjectGraphNode for ModuleRecord {
    fn adjacent_objects(&self) -> Vec<Value> {
        let mut adjacent = Vec::new();

        if let Some(parent) = self.lexical_parent() {
            adjacent.push(Value::Module(parent));
        }
        adjacent.extend(self.prepended_and_included_modules().map(Value::Module));
        if let Some(superclass) = self.superclass() {
            adjacent.push(Value::Module(Arc::clone(superclass)));
        }
        if let Some(attached) = self.attached() {
            adjacent.push(attached.clone());
        }
        if let Some(refined) = self.refined_module() {
            adjacent.push(Value::Module(refined));
        }

        for constant in self.constants() {
            if let Some(value) = constant.plain_value() {
                adjacent.push(value.clone());
            }
        }
        adjacent.extend(self.methods().into_iter().map(Value::Method));
        adjacent.extend(self.class_variables().values());
        adjacent
    }
}

impl ObjectGraphNode for InternalMethod {
    fn adjacent_objects(&self) -> Vec<Value> {
        self.declaring_module()
            .into_iter()
            .chain(self.owner())
            .map(Value::Module)
            .collect()
    }
}

impl ObjectGraphNode for Value {
    fn adjacent_objects(&self) -> Vec<Value> {
        match self {
            Value::Module(module) => module.adjacent_objects(),
            Value::Method(method) => method.adjacent_objects(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Identity {
    Module(u64),
    Method(usize),
    Object(u64),
}

fn identity(value: &Value) -> Option<Identity> {
    match value {
        Value::Module(m) => Some(Identity::Module(m.id().0)),
        Value::Method(m) => Some(Identity::Method(Arc::as_ptr(m) as usize)),
        Value::Object(o) => Some(Identity::Object(o.id())),
        _ => None,
    }
}

/// Every heap value reachable from `root` (root included), breadth first.
/// Immediates are not reported.
pub fn reachable_objects(root: &Value) -> Vec<Value> {
    let mut seen = FxHashSet::default();
    let mut queue = VecDeque::new();
    let mut reachable = Vec::new();

    queue.push_back(root.clone());
    while let Some(value) = queue.pop_front() {
        let Some(id) = identity(&value) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        queue.extend(value.adjacent_objects());
        reachable.push(value);
    }
    reachable
}
