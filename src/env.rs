//! Lexical environments: nested name-to-value mappings.
//!
//! Environments are not collector-managed, but the values they store
//! are; the runtime context keeps a weak registry of every scope so a
//! collection cycle can mark all reachable environment values.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::rt::Rt;
use crate::rt::value::Value;

pub struct ScopeData {
    vars: FxHashMap<String, Value>,
    parent: Option<Env>,
}

#[derive(Clone)]
pub struct Env(Rc<RefCell<ScopeData>>);

impl Env {
    fn alloc(rt: &mut Rt, parent: Option<Env>) -> Env {
        let env = Env(Rc::new(RefCell::new(ScopeData {
            vars: FxHashMap::default(),
            parent,
        })));
        rt.register_scope(Rc::downgrade(&env.0));
        env
    }

    /// Fresh top-level scope.
    pub fn root(rt: &mut Rt) -> Env {
        Self::alloc(rt, None)
    }

    /// Push a child scope with `self` as its parent.
    pub fn child(&self, rt: &mut Rt) -> Env {
        Self::alloc(rt, Some(self.clone()))
    }

    /// Create `name` in this innermost scope. Fails if the name is
    /// already present at this scope.
    pub fn define(&self, name: &str, value: Value) -> Result<(), Redefinition> {
        let mut scope = self.0.borrow_mut();
        if scope.vars.contains_key(name) {
            return Err(Redefinition);
        }
        scope.vars.insert(name.to_owned(), value);
        Ok(())
    }

    /// Walk outward to the nearest scope holding `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        if let Some(value) = scope.vars.get(name) {
            return Some(*value);
        }
        scope.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Walk outward to the defining scope and update in place.
    /// Returns `false` if `name` is unbound.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut scope = self.0.borrow_mut();
        if let Some(slot) = scope.vars.get_mut(name) {
            *slot = value;
            return true;
        }
        match &scope.parent {
            Some(parent) => parent.set(name, value),
            None => false,
        }
    }

    /// Bind `name` in this scope: define on first use, reassign on
    /// re-entry. Used for catch variables and loop variables.
    pub fn bind(&self, name: &str, value: Value) {
        self.0
            .borrow_mut()
            .vars
            .insert(name.to_owned(), value);
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<RefCell<ScopeData>> {
        Rc::downgrade(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Redefinition;

pub(crate) fn scope_values(scope: &Rc<RefCell<ScopeData>>, out: &mut Vec<Value>) {
    out.extend(scope.borrow().vars.values().copied());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_get_set() {
        let rt = &mut Rt::new();
        let root = Env::root(rt);

        root.define("a", Value::Int(1)).unwrap();
        assert!(matches!(root.get("a"), Some(Value::Int(1))));
        assert!(root.define("a", Value::Int(2)).is_err());

        let child = root.child(rt);
        child.define("a", Value::Int(10)).unwrap();
        assert!(matches!(child.get("a"), Some(Value::Int(10))));

        // set walks to the defining scope
        assert!(child.set("a", Value::Int(11)));
        assert!(matches!(root.get("a"), Some(Value::Int(1))));

        let grandchild = child.child(rt);
        assert!(grandchild.set("a", Value::Int(12)));
        assert!(matches!(child.get("a"), Some(Value::Int(12))));

        assert!(!root.set("missing", Value::Null));
        assert!(root.get("missing").is_none());
    }

    #[test]
    fn shadowing_in_children_is_allowed() {
        let rt = &mut Rt::new();
        let root = Env::root(rt);
        root.define("x", Value::Int(1)).unwrap();

        let child = root.child(rt);
        child.define("x", Value::Bool(true)).unwrap();
        assert!(matches!(child.get("x"), Some(Value::Bool(true))));
        assert!(matches!(root.get("x"), Some(Value::Int(1))));
    }
}
