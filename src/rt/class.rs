//! Runtime layout of classes and instances.

use std::rc::Rc;

use crate::ast::{self, ClassDecl, Func};
use crate::env::Env;

use super::value::ObjRef;

/// A class object: the declaration (field initializers and method
/// bodies) plus the environment captured at the declaration site.
/// Classes have no GC children; capture-environment values are marked
/// through the runtime's scope registry.
pub struct ClassObj {
    pub decl: Rc<ClassDecl>,
    pub capture: Env,
}

impl ClassObj {
    pub fn method(&self, name: &str) -> Option<&Rc<Func>> {
        self.decl.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&ast::Field> {
        self.decl.fields.iter().find(|f| f.name == name)
    }

    /// A member name is private when it starts with an underscore.
    pub fn is_private_member(&self, name: &str) -> bool {
        ast::is_private(name)
            && (self.field(name).is_some() || self.method(name).is_some())
    }
}

/// An instance: the defining class plus a dict of field values.
pub struct InstanceObj {
    pub class: ObjRef,
    /// Always a dict object.
    pub fields: ObjRef,
}
