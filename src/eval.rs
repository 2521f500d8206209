//! Tree-walking evaluator.
//!
//! Statements execute against an [`Env`]; expressions produce values.
//! `return`/`break`/`continue`/`raise` travel as [`Flow`] on the `Err`
//! side and are absorbed by the construct that owns them. Transient
//! values held across allocating calls are pinned on the collector's
//! explicit root stack.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{
    BinOp, ClassDecl, Expr, ExprKind, Func, Loc, Program, Stmt, StmtKind, UnOp,
};
use crate::env::Env;
use crate::rt::class::{ClassObj, InstanceObj};
use crate::rt::heap::{Dict, Object};
use crate::rt::value::{self, Value, truthy};
use crate::rt::{ErrorKind, Exec, Flow, Rt, builtins, ops};

#[derive(Clone)]
struct FuncEntry {
    func: Rc<Func>,
    capture: Env,
}

pub struct Interp {
    pub rt: Rt,
    funcs: FxHashMap<String, FuncEntry>,
}

impl Interp {
    pub fn new(rt: Rt) -> Interp {
        Interp {
            rt,
            funcs: FxHashMap::default(),
        }
    }

    /// Execute a whole program. An uncaught exception surfaces as the
    /// error string.
    pub fn run(&mut self, program: &Program) -> Result<(), String> {
        let env = Env::root(&mut self.rt);
        match self.exec_block(&program.body, &env) {
            Ok(()) | Err(Flow::Return(_)) => Ok(()),
            Err(Flow::Raise(exc)) => Err(value::to_string(&self.rt.heap, exc)),
            // the parser rejects stray break/continue
            Err(Flow::Break | Flow::Continue) => Ok(()),
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> Exec<()> {
        for stmt in stmts {
            self.exec_stmt(stmt, env)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> Exec<()> {
        let loc = &stmt.loc;
        match &stmt.kind {
            StmtKind::Var { name, value } => {
                let value = self.eval(value, env)?;
                self.define(env, name, value, loc)
            }
            StmtKind::VarMulti { names, values } => {
                let values = self.eval_rooted(values, env)?;
                let n = values.len();
                let mut result = Ok(());
                for (name, value) in names.iter().zip(&values) {
                    result = self.define(env, name, *value, loc);
                    if result.is_err() {
                        break;
                    }
                }
                self.rt.heap.pop_roots(n);
                result
            }
            StmtKind::Assign { target, value } => self.assign(target, value, env, loc),
            StmtKind::Func(func) => {
                // the same declaration may execute again (a nested fn
                // on a later call) and rebinds its capture; only a
                // different declaration under the same name collides
                let same_site = self
                    .funcs
                    .get(&func.name)
                    .is_some_and(|entry| Rc::ptr_eq(&entry.func, func));
                if !same_site && self.funcs.contains_key(&func.name) {
                    return Err(self.rt.raise_kind(
                        ErrorKind::Redefinition,
                        loc,
                        format!("function {:?} is already defined", func.name),
                    ));
                }
                self.funcs.insert(
                    func.name.clone(),
                    FuncEntry {
                        func: func.clone(),
                        capture: env.clone(),
                    },
                );
                Ok(())
            }
            StmtKind::Class(decl) => self.declare_class(decl, env, loc),
            StmtKind::If { cond, then, orelse } => {
                let cond = self.eval(cond, env)?;
                let branch = if truthy(&self.rt.heap, cond) { then } else { orelse };
                let scope = env.child(&mut self.rt);
                self.exec_block(branch, &scope)
            }
            StmtKind::While { cond, body } => loop {
                let cond = self.eval(cond, env)?;
                if !truthy(&self.rt.heap, cond) {
                    return Ok(());
                }
                let scope = env.child(&mut self.rt);
                match self.exec_block(body, &scope) {
                    Ok(()) | Err(Flow::Continue) => {}
                    Err(Flow::Break) => return Ok(()),
                    Err(flow) => return Err(flow),
                }
            },
            StmtKind::For {
                var,
                start,
                end,
                body,
            } => self.exec_for(var, start, end, body, env),
            StmtKind::Foreach {
                first,
                second,
                subject,
                body,
            } => self.exec_foreach(first, second.as_deref(), subject, body, env, loc),
            StmtKind::Break => Err(Flow::Break),
            StmtKind::Continue => Err(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                Err(Flow::Return(value))
            }
            StmtKind::Try { body, var, catch } => self.exec_try(body, var, catch, env, loc),
            StmtKind::Raise(expr) => {
                let value = self.eval(expr, env)?;
                let text = value::to_string(&self.rt.heap, value);
                Err(self.rt.raise(loc, text))
            }
            StmtKind::Assert { cond, msg } => {
                let value = self.eval(cond, env)?;
                if truthy(&self.rt.heap, value) {
                    return Ok(());
                }
                match msg {
                    Some(expr) => {
                        let msg = self.eval(expr, env)?;
                        let text = value::to_string(&self.rt.heap, msg);
                        Err(self.rt.raise_kind(ErrorKind::Assert, loc, text))
                    }
                    None => Err(self.rt.raise(loc, "assertion failed")),
                }
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(())
            }
        }
    }

    fn define(&mut self, env: &Env, name: &str, value: Value, loc: &Loc) -> Exec<()> {
        env.define(name, value).map_err(|_| {
            self.rt.raise_kind(
                ErrorKind::Redefinition,
                loc,
                format!("{name:?} is already defined in this scope"),
            )
        })
    }

    fn assign(&mut self, target: &Expr, value: &Expr, env: &Env, loc: &Loc) -> Exec<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let value = self.eval(value, env)?;
                if !env.set(name, value) {
                    return Err(self.rt.raise_kind(
                        ErrorKind::Undefined,
                        loc,
                        format!("assignment to undefined variable {name:?}"),
                    ));
                }
                Ok(())
            }
            ExprKind::Member { target, name } => {
                let object = self.eval(target, env)?;
                self.rt.heap.push_root(object);
                let result = self
                    .eval(value, env)
                    .and_then(|value| ops::member_set(&mut self.rt, object, name, value, loc));
                self.rt.heap.pop_roots(1);
                result
            }
            ExprKind::Index { target, index } => {
                let object = self.eval(target, env)?;
                self.rt.heap.push_root(object);
                let result = (|| {
                    let index = self.eval(index, env)?;
                    self.rt.heap.push_root(index);
                    let result = self
                        .eval(value, env)
                        .and_then(|value| ops::index_set(&mut self.rt, object, index, value, loc));
                    self.rt.heap.pop_roots(1);
                    result
                })();
                self.rt.heap.pop_roots(1);
                result
            }
            _ => Err(self.rt.raise_kind(
                ErrorKind::Type,
                loc,
                "invalid assignment target",
            )),
        }
    }

    fn declare_class(&mut self, decl: &Rc<ClassDecl>, env: &Env, loc: &Loc) -> Exec<()> {
        // as with functions, re-executing the same declaration is a
        // rebind, not a collision
        if let Some(Value::Class(r)) = self.rt.lookup_class(&decl.name) {
            if !Rc::ptr_eq(&self.rt.heap.class(r).decl, decl) {
                return Err(self.rt.raise_kind(
                    ErrorKind::Redefinition,
                    loc,
                    format!("class {:?} is already defined", decl.name),
                ));
            }
        }
        let class = self.rt.alloc(Object::Class(ClassObj {
            decl: decl.clone(),
            capture: env.clone(),
        }));
        self.rt.register_class(&decl.name, Value::Class(class));
        Ok(())
    }

    /// Inclusive numeric range; counts down when `start > end`.
    fn exec_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        body: &[Stmt],
        env: &Env,
    ) -> Exec<()> {
        let start = self.want_int(start, env, "for range start")?;
        let end = self.want_int(end, env, "for range end")?;
        let step: i64 = if start <= end { 1 } else { -1 };

        let scope = env.child(&mut self.rt);
        let mut i = start;
        loop {
            scope.bind(var, Value::Int(i));
            let inner = scope.child(&mut self.rt);
            match self.exec_block(body, &inner) {
                Ok(()) | Err(Flow::Continue) => {}
                Err(Flow::Break) => return Ok(()),
                Err(flow) => return Err(flow),
            }
            if i == end {
                return Ok(());
            }
            i += step;
        }
    }

    fn want_int(&mut self, expr: &Expr, env: &Env, what: &str) -> Exec<i64> {
        let value = self.eval(expr, env)?;
        match value {
            Value::Int(v) => Ok(v),
            _ => Err(self.rt.raise_kind(
                ErrorKind::Type,
                &expr.loc,
                format!("{what} must be an int, got {}", value.tag().name()),
            )),
        }
    }

    /// Arrays yield `(index, element)`; dicts yield `(key, value)` in
    /// bucket order. With one name, arrays bind the element and dicts
    /// bind the value.
    fn exec_foreach(
        &mut self,
        first: &str,
        second: Option<&str>,
        subject: &Expr,
        body: &[Stmt],
        env: &Env,
        loc: &Loc,
    ) -> Exec<()> {
        let subject = self.eval(subject, env)?;
        self.rt.heap.push_root(subject);
        let result = self.foreach_rooted(first, second, subject, body, env, loc);
        self.rt.heap.pop_roots(1);
        result
    }

    fn foreach_rooted(
        &mut self,
        first: &str,
        second: Option<&str>,
        subject: Value,
        body: &[Stmt],
        env: &Env,
        loc: &Loc,
    ) -> Exec<()> {
        let scope = env.child(&mut self.rt);
        match subject {
            Value::Array(r) => {
                let len = self.rt.heap.array(r).len();
                for i in 0..len {
                    let Some(element) = self.rt.heap.array(r).get(i).copied() else {
                        // the loop body shrank the array
                        break;
                    };
                    match second {
                        Some(second) => {
                            scope.bind(first, Value::Int(i as i64));
                            scope.bind(second, element);
                        }
                        None => scope.bind(first, element),
                    }
                    let inner = scope.child(&mut self.rt);
                    match self.exec_block(body, &inner) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => return Ok(()),
                        Err(flow) => return Err(flow),
                    }
                }
                Ok(())
            }
            Value::Dict(r) => {
                let keys: Vec<String> = self.rt.heap.dict(r).keys().cloned().collect();
                for key in keys {
                    // skip keys the loop body removed
                    let Some(value) = self.rt.heap.dict(r).get(&key).copied() else {
                        continue;
                    };
                    match second {
                        Some(second) => {
                            let key = self.rt.alloc_str(key);
                            scope.bind(first, key);
                            scope.bind(second, value);
                        }
                        None => scope.bind(first, value),
                    }
                    let inner = scope.child(&mut self.rt);
                    match self.exec_block(body, &inner) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => return Ok(()),
                        Err(flow) => return Err(flow),
                    }
                }
                Ok(())
            }
            _ => Err(self.rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("foreach over {}", subject.tag().name()),
            )),
        }
    }

    /// The try body shares the enclosing scope. A raise anywhere below,
    /// whether from user code or a built-in, lands here; the caught
    /// value is prefixed with the catch site and bound to `var`.
    fn exec_try(
        &mut self,
        body: &[Stmt],
        var: &str,
        catch: &[Stmt],
        env: &Env,
        loc: &Loc,
    ) -> Exec<()> {
        match self.exec_block(body, env) {
            Ok(()) => Ok(()),
            Err(Flow::Raise(exc)) => {
                self.rt.heap.push_root(exc);
                let mut text = format!("[caught in {loc}] ");
                text.push_str(&value::to_string(&self.rt.heap, exc));
                let caught = self.rt.alloc_str(text);
                self.rt.heap.pop_roots(1);
                env.bind(var, caught);
                self.exec_block(catch, env)
            }
            Err(flow) => Err(flow),
        }
    }

    // -- expressions ---------------------------------------------------

    fn eval(&mut self, expr: &Expr, env: &Env) -> Exec<Value> {
        let loc = &expr.loc;
        match &expr.kind {
            ExprKind::Int(v) => Ok(Value::Int(*v)),
            ExprKind::Float(v) => Ok(Value::Float(*v)),
            ExprKind::Bool(v) => Ok(Value::Bool(*v)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Str(s) => Ok(self.rt.alloc_str(s.as_str())),
            ExprKind::Ident(name) => env.get(name).ok_or_else(|| {
                self.rt.raise_kind(
                    ErrorKind::Undefined,
                    loc,
                    format!("undefined variable {name:?}"),
                )
            }),
            ExprKind::This => env.get("this").ok_or_else(|| {
                self.rt
                    .raise_kind(ErrorKind::Undefined, loc, "`this` outside of a method")
            }),
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, env, loc),
            ExprKind::In { lhs, rhs, negated } => {
                let lhs_v = self.eval(lhs, env)?;
                self.rt.heap.push_root(lhs_v);
                let result = self
                    .eval(rhs, env)
                    .and_then(|rhs_v| ops::in_operator(&mut self.rt, lhs_v, rhs_v, loc));
                self.rt.heap.pop_roots(1);
                Ok(Value::Bool(result? != *negated))
            }
            ExprKind::Unary { op, expr } => {
                let value = self.eval(expr, env)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!truthy(&self.rt.heap, value))),
                    UnOp::Neg => match value {
                        Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        _ => Err(self.rt.raise_kind(
                            ErrorKind::Type,
                            loc,
                            format!("cannot negate {}", value.tag().name()),
                        )),
                    },
                }
            }
            ExprKind::Array(items) => {
                let values = self.eval_rooted(items, env)?;
                let n = values.len();
                let array = self.rt.alloc_array(values);
                self.rt.heap.pop_roots(n);
                Ok(array)
            }
            ExprKind::Dict(pairs) => {
                let mut map = Dict::default();
                let mut rooted = 0;
                let mut fail = None;
                for (key, value) in pairs {
                    let result = self.eval(key, env).and_then(|key| {
                        let key = ops::dict_key(&mut self.rt, key, loc)?;
                        let value = self.eval(value, env)?;
                        self.rt.heap.push_root(value);
                        Ok((key, value))
                    });
                    match result {
                        Ok((key, value)) => {
                            rooted += 1;
                            map.insert(key, value);
                        }
                        Err(flow) => {
                            fail = Some(flow);
                            break;
                        }
                    }
                }
                let result = match fail {
                    None => Ok(self.rt.alloc_dict(map)),
                    Some(flow) => Err(flow),
                };
                self.rt.heap.pop_roots(rooted);
                result
            }
            ExprKind::Index { target, index } => {
                let target_v = self.eval(target, env)?;
                self.rt.heap.push_root(target_v);
                let result = self
                    .eval(index, env)
                    .and_then(|index_v| ops::index_get(&mut self.rt, target_v, index_v, loc));
                self.rt.heap.pop_roots(1);
                result
            }
            ExprKind::Slice { target, start, end } => {
                let target_v = self.eval(target, env)?;
                self.rt.heap.push_root(target_v);
                let result = (|| {
                    let start = match start {
                        Some(expr) => Some(self.eval(expr, env)?),
                        None => None,
                    };
                    let end = match end {
                        Some(expr) => Some(self.eval(expr, env)?),
                        None => None,
                    };
                    ops::slice(&mut self.rt, target_v, start, end, loc)
                })();
                self.rt.heap.pop_roots(1);
                result
            }
            ExprKind::Member { target, name } => {
                let target = self.eval(target, env)?;
                ops::member_get(&mut self.rt, target, name, loc)
            }
            ExprKind::Call { name, args } => {
                let args = self.eval_rooted(args, env)?;
                let n = args.len();
                let result = self.call_function(name, &args, loc);
                self.rt.heap.pop_roots(n);
                result
            }
            ExprKind::MethodCall { target, name, args } => {
                let target_v = self.eval(target, env)?;
                self.rt.heap.push_root(target_v);
                let result = match self.eval_rooted(args, env) {
                    Ok(args) => {
                        let n = args.len();
                        let result = self.call_method(target_v, name, &args, loc);
                        self.rt.heap.pop_roots(n);
                        result
                    }
                    Err(flow) => Err(flow),
                };
                self.rt.heap.pop_roots(1);
                result
            }
            ExprKind::New { class, args } => {
                let args = self.eval_rooted(args, env)?;
                let n = args.len();
                let result = self.instantiate(class, &args, loc);
                self.rt.heap.pop_roots(n);
                result
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Env,
        loc: &Loc,
    ) -> Exec<Value> {
        // short-circuit before dispatching
        match op {
            BinOp::And => {
                let lhs = self.eval(lhs, env)?;
                if !truthy(&self.rt.heap, lhs) {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval(rhs, env)?;
                return Ok(Value::Bool(truthy(&self.rt.heap, rhs)));
            }
            BinOp::Or => {
                let lhs = self.eval(lhs, env)?;
                if truthy(&self.rt.heap, lhs) {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval(rhs, env)?;
                return Ok(Value::Bool(truthy(&self.rt.heap, rhs)));
            }
            _ => {}
        }

        let lhs_v = self.eval(lhs, env)?;
        self.rt.heap.push_root(lhs_v);
        let result = self
            .eval(rhs, env)
            .and_then(|rhs_v| ops::binary_op(&mut self.rt, lhs_v, op, rhs_v, loc));
        self.rt.heap.pop_roots(1);
        result
    }

    /// Evaluate expressions left-to-right, pinning each result. The
    /// caller pops `exprs.len()` roots; on failure everything pinned so
    /// far is popped here.
    fn eval_rooted(&mut self, exprs: &[Expr], env: &Env) -> Exec<Vec<Value>> {
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.eval(expr, env) {
                Ok(value) => {
                    self.rt.heap.push_root(value);
                    out.push(value);
                }
                Err(flow) => {
                    self.rt.heap.pop_roots(out.len());
                    return Err(flow);
                }
            }
        }
        Ok(out)
    }

    // -- calls -----------------------------------------------------------

    fn call_function(&mut self, name: &str, args: &[Value], loc: &Loc) -> Exec<Value> {
        if let Some(entry) = self.funcs.get(name).cloned() {
            return self.invoke(&entry.func, &entry.capture, None, args, loc);
        }
        if let Some(builtin) = builtins::resolve(name) {
            return builtins::call(&mut self.rt, builtin, args, loc);
        }
        Err(self.rt.raise_kind(
            ErrorKind::Undefined,
            loc,
            format!("undefined function {name:?}"),
        ))
    }

    /// Bind parameters positionally in a child of the capture
    /// environment and run the body. `this` is pre-bound for methods.
    fn invoke(
        &mut self,
        func: &Func,
        capture: &Env,
        this: Option<Value>,
        args: &[Value],
        loc: &Loc,
    ) -> Exec<Value> {
        if args.len() != func.params.len() {
            return Err(self.rt.raise_kind(
                ErrorKind::Arity,
                loc,
                format!(
                    "{:?} expects {} arguments, got {}",
                    func.name,
                    func.params.len(),
                    args.len()
                ),
            ));
        }

        let scope = capture.child(&mut self.rt);
        if let Some(this) = this {
            scope.bind("this", this);
        }
        for (param, arg) in func.params.iter().zip(args) {
            self.define(&scope, param, *arg, loc)?;
        }

        match self.exec_block(&func.body, &scope) {
            Ok(()) => Ok(Value::Null),
            Err(Flow::Return(value)) => Ok(value),
            Err(flow) => Err(flow),
        }
    }

    fn call_method(&mut self, target: Value, name: &str, args: &[Value], loc: &Loc) -> Exec<Value> {
        let Value::Instance(r) = target else {
            return Err(self.rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("cannot call method {name:?} on {}", target.tag().name()),
            ));
        };
        let class_ref = self.rt.heap.instance(r).class;
        let class = self.rt.heap.class(class_ref);
        let Some(method) = class.method(name).cloned() else {
            let class_name = class.decl.name.clone();
            return Err(self.rt.raise_kind(
                ErrorKind::Undefined,
                loc,
                format!("class {class_name} has no method {name:?}"),
            ));
        };
        let capture = class.capture.clone();
        self.invoke(&method, &capture, Some(target), args, loc)
    }

    /// `new C(args)`: allocate the instance, run field initializers
    /// with `this` bound, then dispatch `init` if the class has one.
    fn instantiate(&mut self, class_name: &str, args: &[Value], loc: &Loc) -> Exec<Value> {
        let Some(Value::Class(class_ref)) = self.rt.lookup_class(class_name) else {
            return Err(self.rt.raise_kind(
                ErrorKind::Undefined,
                loc,
                format!("undefined class {class_name:?}"),
            ));
        };

        let fields = self.rt.alloc(Object::Dict(Dict::default()));
        self.rt.heap.push_root(Value::Dict(fields));
        let instance = Value::Instance(self.rt.alloc(Object::Instance(InstanceObj {
            class: class_ref,
            fields,
        })));
        self.rt.heap.pop_roots(1);

        self.rt.heap.push_root(instance);
        let result = self.init_instance(class_ref, fields, instance, args, loc);
        self.rt.heap.pop_roots(1);
        result.map(|()| instance)
    }

    fn init_instance(
        &mut self,
        class_ref: crate::rt::value::ObjRef,
        fields: crate::rt::value::ObjRef,
        instance: Value,
        args: &[Value],
        loc: &Loc,
    ) -> Exec<()> {
        let class = self.rt.heap.class(class_ref);
        let decl = class.decl.clone();
        let capture = class.capture.clone();

        for field in &decl.fields {
            let scope = capture.child(&mut self.rt);
            scope.bind("this", instance);
            let value = self.eval(&field.init, &scope)?;
            self.rt.heap.dict_mut(fields).insert(field.name.clone(), value);
        }

        match decl.methods.iter().find(|m| m.name == "init") {
            Some(init) => {
                let init = init.clone();
                self.invoke(&init, &capture, Some(instance), args, loc)?;
            }
            None if !args.is_empty() => {
                return Err(self.rt.raise_kind(
                    ErrorKind::Arity,
                    loc,
                    format!(
                        "class {} has no init method, got {} constructor arguments",
                        decl.name,
                        args.len()
                    ),
                ));
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
