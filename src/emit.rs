//! Single-pass lowering to a flat, register-style textual IR.
//!
//! Everything dynamic is delegated to the runtime ABI (`@rt_*`
//! symbols). The emitter's own responsibilities are scope-unique
//! renaming, string-literal interning, function/class pre-declaration
//! with arity checking, and the root discipline of emitted `main`.
//!
//! Two pre-passes run before lowering: one collects every string
//! literal and source file path into the intern table, the other
//! collects function arities and class names so calls and `new`
//! expressions can be checked at compile time.

use std::rc::Rc;

use bumpalo::Bump;
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use rustc_hash::FxHashMap;

use crate::ast::{
    self, BinOp, ClassDecl, Expr, ExprKind, Func, Loc, Program, Stmt, StmtKind, UnOp,
};
use crate::error::{Error, Result, error};
use crate::rt::builtins;
use crate::span::Span;

pub fn emit(program: &Program) -> Result<String> {
    let bump = Bump::new();
    let mut emitter = Emitter::new(&bump);
    emitter.collect_strings(program);
    emitter.predeclare(program)?;
    emitter.emit_program(program)?;
    Ok(emitter.finish())
}

/// String-literal intern table; every interned string becomes a
/// module-level `@str.N` constant.
struct Literals<'b> {
    bump: &'b Bump,
    table: HashMap<&'b str, usize, FxBuildHasher>,
    order: Vec<&'b str>,
}

impl<'b> Literals<'b> {
    fn new(bump: &'b Bump) -> Literals<'b> {
        Literals {
            bump,
            table: HashMap::default(),
            order: Vec::new(),
        }
    }

    fn intern(&mut self, s: &str) -> usize {
        if let Some(&index) = self.table.get(s) {
            return index;
        }
        let s = self.bump.alloc_str(s);
        let index = self.order.len();
        self.table.insert(s, index);
        self.order.push(s);
        index
    }
}

/// One renamed declaration. Lookup walks the table backwards; a
/// collision at the same depth is a redefinition error.
struct Binding {
    original: String,
    /// `%name.K` for locals, `@g.name.K` for globals.
    unique: String,
    is_global: bool,
    depth: u32,
    /// Globals are pre-registered before lowering starts; this flips
    /// when their declaration site is reached.
    declared: bool,
}

struct Emitter<'b> {
    lits: Literals<'b>,

    bindings: Vec<Binding>,
    depth: u32,
    unique: u32,
    temps: u32,
    labels: u32,

    break_labels: Vec<u32>,
    continue_labels: Vec<u32>,

    funcs: FxHashMap<String, usize>,
    classes: FxHashMap<String, Rc<ClassDecl>>,
    func_decls: Vec<Rc<Func>>,
    class_decls: Vec<Rc<ClassDecl>>,

    /// Global cell symbols, pushed as roots by emitted `main`.
    globals: Vec<String>,

    /// Instructions of the function currently being lowered.
    code: String,
    /// Finished `define`s.
    defines: String,
    in_function: bool,
}

fn fail(loc: &Loc, msg: impl std::fmt::Display) -> Error {
    error(format!("{loc}: {msg}"), Span::empty())
}

impl<'b> Emitter<'b> {
    fn new(bump: &'b Bump) -> Emitter<'b> {
        Emitter {
            lits: Literals::new(bump),
            bindings: Vec::new(),
            depth: 0,
            unique: 0,
            temps: 0,
            labels: 0,
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            funcs: FxHashMap::default(),
            classes: FxHashMap::default(),
            func_decls: Vec::new(),
            class_decls: Vec::new(),
            globals: Vec::new(),
            code: String::new(),
            defines: String::new(),
            in_function: false,
        }
    }

    // -- pre-passes --------------------------------------------------

    /// Intern every string literal and every source file path.
    fn collect_strings(&mut self, program: &Program) {
        fn walk_expr(e: &mut Emitter, expr: &Expr) {
            e.lits.intern(&expr.loc.file);
            match &expr.kind {
                ExprKind::Str(s) => {
                    e.lits.intern(s);
                }
                ExprKind::Binary { lhs, rhs, .. } | ExprKind::In { lhs, rhs, .. } => {
                    walk_expr(e, lhs);
                    walk_expr(e, rhs);
                }
                ExprKind::Unary { expr, .. } => walk_expr(e, expr),
                ExprKind::Array(items) => items.iter().for_each(|i| walk_expr(e, i)),
                ExprKind::Dict(pairs) => {
                    for (k, v) in pairs {
                        walk_expr(e, k);
                        walk_expr(e, v);
                    }
                }
                ExprKind::Index { target, index } => {
                    walk_expr(e, target);
                    walk_expr(e, index);
                }
                ExprKind::Slice { target, start, end } => {
                    walk_expr(e, target);
                    if let Some(start) = start {
                        walk_expr(e, start);
                    }
                    if let Some(end) = end {
                        walk_expr(e, end);
                    }
                }
                ExprKind::Member { target, .. } => walk_expr(e, target),
                ExprKind::Call { args, .. } | ExprKind::New { args, .. } => {
                    args.iter().for_each(|a| walk_expr(e, a));
                }
                ExprKind::MethodCall { target, args, .. } => {
                    walk_expr(e, target);
                    args.iter().for_each(|a| walk_expr(e, a));
                }
                ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Bool(_)
                | ExprKind::Null
                | ExprKind::Ident(_)
                | ExprKind::This => {}
            }
        }

        fn walk_stmts(e: &mut Emitter, stmts: &[Stmt]) {
            for stmt in stmts {
                e.lits.intern(&stmt.loc.file);
                match &stmt.kind {
                    StmtKind::Var { value, .. } => walk_expr(e, value),
                    StmtKind::VarMulti { values, .. } => {
                        values.iter().for_each(|v| walk_expr(e, v));
                    }
                    StmtKind::Assign { target, value } => {
                        walk_expr(e, target);
                        walk_expr(e, value);
                    }
                    StmtKind::Func(func) => walk_stmts(e, &func.body),
                    StmtKind::Class(decl) => {
                        for field in &decl.fields {
                            walk_expr(e, &field.init);
                        }
                        for method in &decl.methods {
                            walk_stmts(e, &method.body);
                        }
                    }
                    StmtKind::If { cond, then, orelse } => {
                        walk_expr(e, cond);
                        walk_stmts(e, then);
                        walk_stmts(e, orelse);
                    }
                    StmtKind::While { cond, body } => {
                        walk_expr(e, cond);
                        walk_stmts(e, body);
                    }
                    StmtKind::For {
                        start, end, body, ..
                    } => {
                        walk_expr(e, start);
                        walk_expr(e, end);
                        walk_stmts(e, body);
                    }
                    StmtKind::Foreach { subject, body, .. } => {
                        walk_expr(e, subject);
                        walk_stmts(e, body);
                    }
                    StmtKind::Return(value) => {
                        if let Some(value) = value {
                            walk_expr(e, value);
                        }
                    }
                    StmtKind::Try { body, catch, .. } => {
                        walk_stmts(e, body);
                        walk_stmts(e, catch);
                    }
                    StmtKind::Raise(value) => walk_expr(e, value),
                    StmtKind::Assert { cond, msg } => {
                        walk_expr(e, cond);
                        if let Some(msg) = msg {
                            walk_expr(e, msg);
                        }
                    }
                    StmtKind::Expr(expr) => walk_expr(e, expr),
                    StmtKind::Break | StmtKind::Continue => {}
                }
            }
        }

        walk_stmts(self, &program.body);
    }

    /// Register functions (with arity), classes, and global variables
    /// before any body is lowered.
    fn predeclare(&mut self, program: &Program) -> Result<()> {
        fn walk(e: &mut Emitter, stmts: &[Stmt]) -> Result<()> {
            for stmt in stmts {
                match &stmt.kind {
                    StmtKind::Func(func) => {
                        if e.funcs.contains_key(&func.name) {
                            return fail(
                                &stmt.loc,
                                format_args!("function {:?} is already defined", func.name),
                            )
                            .into();
                        }
                        e.funcs.insert(func.name.clone(), func.params.len());
                        e.func_decls.push(func.clone());
                        walk(e, &func.body)?;
                    }
                    StmtKind::Class(decl) => {
                        if e.classes.contains_key(&decl.name) {
                            return fail(
                                &stmt.loc,
                                format_args!("class {:?} is already defined", decl.name),
                            )
                            .into();
                        }
                        e.classes.insert(decl.name.clone(), decl.clone());
                        e.class_decls.push(decl.clone());
                        for method in &decl.methods {
                            walk(e, &method.body)?;
                        }
                    }
                    StmtKind::If { then, orelse, .. } => {
                        walk(e, then)?;
                        walk(e, orelse)?;
                    }
                    StmtKind::While { body, .. }
                    | StmtKind::For { body, .. }
                    | StmtKind::Foreach { body, .. } => walk(e, body)?,
                    StmtKind::Try { body, catch, .. } => {
                        walk(e, body)?;
                        walk(e, catch)?;
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        walk(self, &program.body)?;

        // top-level variables, including those in top-level try/catch,
        // become pre-registered global cells
        fn globals(e: &mut Emitter, stmts: &[Stmt]) -> Result<()> {
            for stmt in stmts {
                match &stmt.kind {
                    StmtKind::Var { name, .. } => e.declare_global(name, &stmt.loc)?,
                    StmtKind::VarMulti { names, .. } => {
                        for name in names {
                            e.declare_global(name, &stmt.loc)?;
                        }
                    }
                    StmtKind::Try { body, catch, .. } => {
                        globals(e, body)?;
                        globals(e, catch)?;
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        globals(self, &program.body)
    }

    fn declare_global(&mut self, name: &str, loc: &Loc) -> Result<()> {
        if self.bindings.iter().any(|b| b.original == name) {
            return fail(loc, format_args!("{name:?} is already defined in this scope")).into();
        }
        let unique = format!("@g.{name}.{}", self.fresh());
        self.globals.push(unique.clone());
        self.bindings.push(Binding {
            original: name.to_owned(),
            unique,
            is_global: true,
            depth: 0,
            declared: false,
        });
        Ok(())
    }

    // -- emission ----------------------------------------------------

    fn emit_program(&mut self, program: &Program) -> Result<()> {
        for decl in std::mem::take(&mut self.class_decls) {
            self.emit_class_defines(&decl)?;
        }
        for func in std::mem::take(&mut self.func_decls) {
            self.emit_function(&func)?;
        }

        // main: init the collector, record the stack bottom, root every
        // global cell, then run top-level code
        self.code.clear();
        let t = self.temp();
        self.ins(format!("{t} = call @rt_gc_init()"));
        let bottom = self.temp();
        self.ins(format!("{bottom} = cell"));
        let t = self.temp();
        self.ins(format!("{t} = call @rt_set_stack_bottom({bottom})"));
        for cell in self.globals.clone() {
            let t = self.temp();
            self.ins(format!("{t} = call @rt_gc_root_push({cell})"));
        }
        let mut class_names: Vec<String> = self.classes.keys().cloned().collect();
        class_names.sort();
        for name in class_names {
            let t = self.temp();
            self.ins(format!("{t} = call @rt_gc_root_push(@cls.{name})"));
        }

        self.emit_block_shared(&program.body)?;

        let t = self.temp();
        self.ins(format!("{t} = int 0"));
        self.ins(format!("ret {t}"));

        let body = std::mem::take(&mut self.code);
        self.defines.push_str("define @main() {\n");
        self.defines.push_str(&body);
        self.defines.push_str("}\n");
        Ok(())
    }

    fn finish(&self) -> String {
        let mut out = String::new();
        for (index, s) in self.lits.order.iter().enumerate() {
            out.push_str(&format!("@str.{index} = const {s:?}\n"));
        }
        for cell in &self.globals {
            out.push_str(&format!("{cell} = global\n"));
        }
        let mut class_names: Vec<&String> = self.classes.keys().collect();
        class_names.sort();
        for name in class_names {
            out.push_str(&format!("@cls.{name} = global\n"));
        }
        out.push('\n');
        out.push_str(&self.defines);
        out
    }

    // -- functions, methods, classes ---------------------------------

    fn emit_function(&mut self, func: &Func) -> Result<()> {
        let params: Vec<String> = func.params.iter().map(|p| format!("%{p}")).collect();
        let header = format!("define @{}({}) {{\n", func.name, params.join(", "));

        let saved = std::mem::take(&mut self.code);
        let was_in_function = std::mem::replace(&mut self.in_function, true);
        self.enter_scope();

        for (param, reg) in func.params.iter().zip(&params) {
            let cell = self.declare_local(param, &func.loc)?;
            self.ins(format!("store {reg} -> {cell}"));
        }
        self.emit_block_shared(&func.body)?;
        let t = self.temp();
        self.ins(format!("{t} = null"));
        self.ins(format!("ret {t}"));

        self.exit_scope();
        self.in_function = was_in_function;
        let body = std::mem::replace(&mut self.code, saved);
        self.defines.push_str(&header);
        self.defines.push_str(&body);
        self.defines.push_str("}\n");
        Ok(())
    }

    /// Methods become `@Class__method(%this, %args, %argc)`; field
    /// initializers become `@__field_init_Class_field(%this)`.
    fn emit_class_defines(&mut self, decl: &ClassDecl) -> Result<()> {
        for field in &decl.fields {
            let header = format!("define @__field_init_{}_{}(%this) {{\n", decl.name, field.name);
            let saved = std::mem::take(&mut self.code);
            let was_in_function = std::mem::replace(&mut self.in_function, true);
            self.enter_scope();

            let cell = self.declare_local("this", &field.loc)?;
            self.ins(format!("store %this -> {cell}"));
            let value = self.expr(&field.init)?;
            self.ins(format!("ret {value}"));

            self.exit_scope();
            self.in_function = was_in_function;
            let body = std::mem::replace(&mut self.code, saved);
            self.defines.push_str(&header);
            self.defines.push_str(&body);
            self.defines.push_str("}\n");
        }

        for method in &decl.methods {
            let header = format!("define @{}__{}(%this, %args, %argc) {{\n", decl.name, method.name);
            let saved = std::mem::take(&mut self.code);
            let was_in_function = std::mem::replace(&mut self.in_function, true);
            self.enter_scope();

            let cell = self.declare_local("this", &method.loc)?;
            self.ins(format!("store %this -> {cell}"));

            // runtime arity check; emitted method calls go by name
            let (line, file) = self.lf(&method.loc);
            let want = self.temp();
            self.ins(format!("{want} = int {}", method.params.len()));
            let eq = self.temp();
            self.ins(format!(
                "{eq} = call @rt_binary_op(%argc, {}, {want}, {line}, {file})",
                BinOp::Eq.code()
            ));
            let ok = self.label();
            let bad = self.label();
            self.ins(format!("brif {eq}, L{ok}, L{bad}"));
            self.place_label(bad);
            let msg = self.lits.intern(&format!(
                "arity error: {:?} expects {} arguments",
                method.name,
                method.params.len()
            ));
            let m = self.temp();
            self.ins(format!("{m} = call @rt_str_new(@str.{msg})"));
            let t = self.temp();
            self.ins(format!("{t} = call @rt_raise({m}, {line}, {file})"));
            self.ins(format!("br L{ok}"));
            self.place_label(ok);

            for (index, param) in method.params.iter().enumerate() {
                let i = self.temp();
                self.ins(format!("{i} = int {index}"));
                let arg = self.temp();
                self.ins(format!("{arg} = call @rt_array_get(%args, {i})"));
                let cell = self.declare_local(param, &method.loc)?;
                self.ins(format!("store {arg} -> {cell}"));
            }
            self.emit_block_shared(&method.body)?;
            let t = self.temp();
            self.ins(format!("{t} = null"));
            self.ins(format!("ret {t}"));

            self.exit_scope();
            self.in_function = was_in_function;
            let body = std::mem::replace(&mut self.code, saved);
            self.defines.push_str(&header);
            self.defines.push_str(&body);
            self.defines.push_str("}\n");
        }
        Ok(())
    }

    /// Materialize a class at its declaration site.
    fn emit_class_site(&mut self, decl: &ClassDecl) -> Result<()> {
        let name = self.lits.intern(&decl.name);
        let class = self.temp();
        self.ins(format!("{class} = call @rt_make_class(@str.{name})"));
        self.ins(format!("store {class} -> @cls.{}", decl.name));

        for field in &decl.fields {
            let fname = self.lits.intern(&field.name);
            let private = ast::is_private(&field.name) as u8;
            let t = self.temp();
            self.ins(format!(
                "{t} = call @rt_class_add_field({class}, @str.{fname}, @__field_init_{}_{}, {private})",
                decl.name, field.name
            ));
        }
        for method in &decl.methods {
            let mname = self.lits.intern(&method.name);
            let private = ast::is_private(&method.name) as u8;
            let t = self.temp();
            self.ins(format!(
                "{t} = call @rt_class_add_method({class}, @str.{mname}, @{}__{}, {}, {private})",
                decl.name,
                method.name,
                method.params.len()
            ));
        }
        Ok(())
    }

    // -- statements --------------------------------------------------

    /// Lower a block in the current scope (function bodies and
    /// try/catch bodies share their enclosing scope).
    fn emit_block_shared(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    /// Lower a block in a fresh child scope.
    fn emit_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        self.enter_scope();
        let result = self.emit_block_shared(stmts);
        self.exit_scope();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        let loc = &stmt.loc;
        match &stmt.kind {
            StmtKind::Var { name, value } => {
                let value = self.expr(value)?;
                let cell = self.declare(name, loc)?;
                self.ins(format!("store {value} -> {cell}"));
                Ok(())
            }
            StmtKind::VarMulti { names, values } => {
                let mut regs = Vec::with_capacity(values.len());
                for value in values {
                    regs.push(self.expr(value)?);
                }
                for (name, reg) in names.iter().zip(regs) {
                    let cell = self.declare(name, loc)?;
                    self.ins(format!("store {reg} -> {cell}"));
                }
                Ok(())
            }
            StmtKind::Assign { target, value } => self.assign(target, value, loc),
            StmtKind::Func(_) => Ok(()), // lowered as a module-level define
            StmtKind::Class(decl) => self.emit_class_site(decl),
            StmtKind::If { cond, then, orelse } => {
                let cond = self.truthy(cond)?;
                let then_l = self.label();
                let else_l = self.label();
                let end = self.label();
                self.ins(format!("brif {cond}, L{then_l}, L{else_l}"));
                self.place_label(then_l);
                self.emit_block(then)?;
                self.ins(format!("br L{end}"));
                self.place_label(else_l);
                self.emit_block(orelse)?;
                self.ins(format!("br L{end}"));
                self.place_label(end);
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let head = self.label();
                let body_l = self.label();
                let end = self.label();
                self.ins(format!("br L{head}"));
                self.place_label(head);
                let cond = self.truthy(cond)?;
                self.ins(format!("brif {cond}, L{body_l}, L{end}"));
                self.place_label(body_l);
                self.break_labels.push(end);
                self.continue_labels.push(head);
                let result = self.emit_block(body);
                self.break_labels.pop();
                self.continue_labels.pop();
                result?;
                self.ins(format!("br L{head}"));
                self.place_label(end);
                Ok(())
            }
            StmtKind::For {
                var,
                start,
                end,
                body,
            } => self.emit_for(var, start, end, body, loc),
            StmtKind::Foreach {
                first,
                second,
                subject,
                body,
            } => self.emit_foreach(first, second.as_deref(), subject, body, loc),
            StmtKind::Break => match self.break_labels.last() {
                Some(label) => {
                    self.ins(format!("br L{label}"));
                    Ok(())
                }
                None => fail(loc, "break outside of a loop").into(),
            },
            StmtKind::Continue => match self.continue_labels.last() {
                Some(label) => {
                    self.ins(format!("br L{label}"));
                    Ok(())
                }
                None => fail(loc, "continue outside of a loop").into(),
            },
            StmtKind::Return(value) => {
                if self.in_function {
                    let value = match value {
                        Some(expr) => self.expr(expr)?,
                        None => {
                            let t = self.temp();
                            self.ins(format!("{t} = null"));
                            t
                        }
                    };
                    self.ins(format!("ret {value}"));
                } else {
                    // top-level return ends the program
                    if let Some(expr) = value {
                        self.expr(expr)?;
                    }
                    let t = self.temp();
                    self.ins(format!("{t} = int 0"));
                    self.ins(format!("ret {t}"));
                }
                Ok(())
            }
            StmtKind::Try { body, var, catch } => self.emit_try(body, var, catch, loc),
            StmtKind::Raise(value) => {
                let value = self.expr(value)?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!("{t} = call @rt_raise({value}, {line}, {file})"));
                Ok(())
            }
            StmtKind::Assert { cond, msg } => {
                let cond = self.truthy(cond)?;
                let ok = self.label();
                let bad = self.label();
                self.ins(format!("brif {cond}, L{ok}, L{bad}"));
                self.place_label(bad);
                let msg = match msg {
                    Some(expr) => self.expr(expr)?,
                    None => {
                        let index = self.lits.intern("assertion failed");
                        let t = self.temp();
                        self.ins(format!("{t} = call @rt_str_new(@str.{index})"));
                        t
                    }
                };
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!("{t} = call @rt_assert_fail({msg}, {line}, {file})"));
                self.ins(format!("br L{ok}"));
                self.place_label(ok);
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.expr(expr)?;
                Ok(())
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: &Expr, loc: &Loc) -> Result<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let value = self.expr(value)?;
                let cell = match self.lookup(name) {
                    Some(binding) => binding.unique.clone(),
                    None => {
                        return fail(loc, format_args!("undefined variable {name:?}")).into();
                    }
                };
                self.ins(format!("store {value} -> {cell}"));
                Ok(())
            }
            ExprKind::Member { target, name } => {
                self.check_private(target, name, loc)?;
                let object = self.expr(target)?;
                let value = self.expr(value)?;
                let member = self.lits.intern(name);
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_member_set({object}, @str.{member}, {value}, {line}, {file})"
                ));
                Ok(())
            }
            ExprKind::Index { target, index } => {
                let object = self.expr(target)?;
                let index = self.expr(index)?;
                let value = self.expr(value)?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_index_set({object}, {index}, {value}, {line}, {file})"
                ));
                Ok(())
            }
            _ => fail(loc, "invalid assignment target").into(),
        }
    }

    fn emit_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        body: &[Stmt],
        loc: &Loc,
    ) -> Result<()> {
        let start = self.expr(start)?;
        let end = self.expr(end)?;
        let (line, file) = self.lf(loc);

        self.enter_scope();
        let cell = self.declare(var, loc)?;
        self.ins(format!("store {start} -> {cell}"));
        let step = self.temp();
        self.ins(format!("{step} = call @rt_for_step({start}, {end}, {line}, {file})"));

        let head = self.label();
        let body_l = self.label();
        let step_l = self.label();
        let end_l = self.label();

        self.ins(format!("br L{head}"));
        self.place_label(head);
        let i = self.temp();
        self.ins(format!("{i} = load {cell}"));
        let keep = self.temp();
        self.ins(format!("{keep} = call @rt_for_keep({i}, {end}, {step})"));
        self.ins(format!("brif {keep}, L{body_l}, L{end_l}"));

        self.place_label(body_l);
        self.break_labels.push(end_l);
        self.continue_labels.push(step_l);
        let result = self.emit_block(body);
        self.break_labels.pop();
        self.continue_labels.pop();
        result?;
        self.ins(format!("br L{step_l}"));

        self.place_label(step_l);
        let i = self.temp();
        self.ins(format!("{i} = load {cell}"));
        let next = self.temp();
        self.ins(format!(
            "{next} = call @rt_binary_op({i}, {}, {step}, {line}, {file})",
            BinOp::Add.code()
        ));
        self.ins(format!("store {next} -> {cell}"));
        self.ins(format!("br L{head}"));

        self.place_label(end_l);
        self.exit_scope();
        Ok(())
    }

    /// The subject's tag is inspected at runtime: arrays run a
    /// counter-based loop, dicts run `keys` then fetch each value.
    fn emit_foreach(
        &mut self,
        first: &str,
        second: Option<&str>,
        subject: &Expr,
        body: &[Stmt],
        loc: &Loc,
    ) -> Result<()> {
        let subject = self.expr(subject)?;
        let (line, file) = self.lf(loc);

        self.enter_scope();
        let first_cell = self.declare(first, loc)?;
        let second_cell = match second {
            Some(second) => Some(self.declare(second, loc)?),
            None => None,
        };

        let counter = self.temp();
        self.ins(format!("{counter} = cell"));
        let zero = self.temp();
        self.ins(format!("{zero} = int 0"));
        self.ins(format!("store {zero} -> {counter}"));

        let arr_l = self.label();
        let dict_l = self.label();
        let end_l = self.label();

        let is_array = self.temp();
        self.ins(format!("{is_array} = call @rt_is_array({subject})"));
        self.ins(format!("brif {is_array}, L{arr_l}, L{dict_l}"));

        // array loop
        self.place_label(arr_l);
        let len = self.temp();
        self.ins(format!("{len} = call @rt_len({subject})"));
        let head = self.label();
        let body_l = self.label();
        let step_l = self.label();
        self.ins(format!("br L{head}"));
        self.place_label(head);
        let i = self.temp();
        self.ins(format!("{i} = load {counter}"));
        let more = self.temp();
        self.ins(format!(
            "{more} = call @rt_binary_op({i}, {}, {len}, {line}, {file})",
            BinOp::Lt.code()
        ));
        self.ins(format!("brif {more}, L{body_l}, L{end_l}"));
        self.place_label(body_l);
        let element = self.temp();
        self.ins(format!("{element} = call @rt_array_get({subject}, {i})"));
        match &second_cell {
            Some(second_cell) => {
                self.ins(format!("store {i} -> {first_cell}"));
                self.ins(format!("store {element} -> {second_cell}"));
            }
            None => self.ins(format!("store {element} -> {first_cell}")),
        }
        self.break_labels.push(end_l);
        self.continue_labels.push(step_l);
        let result = self.emit_block(body);
        self.break_labels.pop();
        self.continue_labels.pop();
        result?;
        self.ins(format!("br L{step_l}"));
        self.place_label(step_l);
        let i = self.temp();
        self.ins(format!("{i} = load {counter}"));
        let one = self.temp();
        self.ins(format!("{one} = int 1"));
        let next = self.temp();
        self.ins(format!(
            "{next} = call @rt_binary_op({i}, {}, {one}, {line}, {file})",
            BinOp::Add.code()
        ));
        self.ins(format!("store {next} -> {counter}"));
        self.ins(format!("br L{head}"));

        // dict loop over keys
        self.place_label(dict_l);
        let keys = self.temp();
        self.ins(format!("{keys} = call @rt_keys({subject})"));
        let len = self.temp();
        self.ins(format!("{len} = call @rt_len({keys})"));
        let head = self.label();
        let body_l = self.label();
        let step_l = self.label();
        self.ins(format!("br L{head}"));
        self.place_label(head);
        let i = self.temp();
        self.ins(format!("{i} = load {counter}"));
        let more = self.temp();
        self.ins(format!(
            "{more} = call @rt_binary_op({i}, {}, {len}, {line}, {file})",
            BinOp::Lt.code()
        ));
        self.ins(format!("brif {more}, L{body_l}, L{end_l}"));
        self.place_label(body_l);
        let key = self.temp();
        self.ins(format!("{key} = call @rt_array_get({keys}, {i})"));
        let value = self.temp();
        self.ins(format!(
            "{value} = call @rt_dict_get({subject}, {key}, {line}, {file})"
        ));
        match &second_cell {
            Some(second_cell) => {
                self.ins(format!("store {key} -> {first_cell}"));
                self.ins(format!("store {value} -> {second_cell}"));
            }
            None => self.ins(format!("store {value} -> {first_cell}")),
        }
        self.break_labels.push(end_l);
        self.continue_labels.push(step_l);
        let result = self.emit_block(body);
        self.break_labels.pop();
        self.continue_labels.pop();
        result?;
        self.ins(format!("br L{step_l}"));
        self.place_label(step_l);
        let i = self.temp();
        self.ins(format!("{i} = load {counter}"));
        let one = self.temp();
        self.ins(format!("{one} = int 1"));
        let next = self.temp();
        self.ins(format!(
            "{next} = call @rt_binary_op({i}, {}, {one}, {line}, {file})",
            BinOp::Add.code()
        ));
        self.ins(format!("store {next} -> {counter}"));
        self.ins(format!("br L{head}"));

        self.place_label(end_l);
        self.exit_scope();
        Ok(())
    }

    /// `try`/`catch`: push a runtime jump buffer, setjmp, branch on the
    /// returned flag. The catch arm fetches the in-flight exception,
    /// prefixes it with the catch site, and binds the catch variable.
    fn emit_try(&mut self, body: &[Stmt], var: &str, catch: &[Stmt], loc: &Loc) -> Result<()> {
        let try_l = self.label();
        let catch_l = self.label();
        let end_l = self.label();

        let buf = self.temp();
        self.ins(format!("{buf} = call @rt_try_push_buf()"));
        let jumped = self.temp();
        self.ins(format!("{jumped} = call @rt_setjmp({buf})"));
        self.ins(format!("brif {jumped}, L{catch_l}, L{try_l}"));

        self.place_label(try_l);
        self.emit_block_shared(body)?;
        let t = self.temp();
        self.ins(format!("{t} = call @rt_try_pop()"));
        self.ins(format!("br L{end_l}"));

        self.place_label(catch_l);
        let exc = self.temp();
        self.ins(format!("{exc} = call @rt_get_exception()"));
        let prefix = self.lits.intern(&format!("[caught in {loc}] "));
        let p = self.temp();
        self.ins(format!("{p} = call @rt_str_new(@str.{prefix})"));
        let (line, file) = self.lf(loc);
        let caught = self.temp();
        self.ins(format!(
            "{caught} = call @rt_binary_op({p}, {}, {exc}, {line}, {file})",
            BinOp::Add.code()
        ));
        let cell = self.declare_or_get(var, loc)?;
        self.ins(format!("store {caught} -> {cell}"));
        self.emit_block_shared(catch)?;
        self.ins(format!("br L{end_l}"));

        self.place_label(end_l);
        Ok(())
    }

    // -- expressions -------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> Result<String> {
        let loc = &expr.loc;
        match &expr.kind {
            ExprKind::Int(v) => {
                let t = self.temp();
                self.ins(format!("{t} = int {v}"));
                Ok(t)
            }
            ExprKind::Float(v) => {
                let t = self.temp();
                self.ins(format!("{t} = float {v:?}"));
                Ok(t)
            }
            ExprKind::Bool(v) => {
                let t = self.temp();
                self.ins(format!("{t} = bool {v}"));
                Ok(t)
            }
            ExprKind::Null => {
                let t = self.temp();
                self.ins(format!("{t} = null"));
                Ok(t)
            }
            ExprKind::Str(s) => {
                let index = self.lits.intern(s);
                let t = self.temp();
                self.ins(format!("{t} = call @rt_str_new(@str.{index})"));
                Ok(t)
            }
            ExprKind::Ident(name) => {
                let cell = match self.lookup(name) {
                    Some(binding) => binding.unique.clone(),
                    None => {
                        return fail(loc, format_args!("undefined variable {name:?}")).into();
                    }
                };
                let t = self.temp();
                self.ins(format!("{t} = load {cell}"));
                Ok(t)
            }
            ExprKind::This => {
                let cell = match self.lookup("this") {
                    Some(binding) => binding.unique.clone(),
                    None => return fail(loc, "`this` outside of a method").into(),
                };
                let t = self.temp();
                self.ins(format!("{t} = load {cell}"));
                Ok(t)
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, loc),
            ExprKind::In { lhs, rhs, negated } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_in_operator({lhs}, {rhs}, {line}, {file})"
                ));
                if *negated { Ok(self.lower_not(&t)) } else { Ok(t) }
            }
            ExprKind::Unary { op, expr } => {
                let value = self.expr(expr)?;
                match op {
                    UnOp::Not => Ok(self.lower_not(&value)),
                    UnOp::Neg => {
                        let zero = self.temp();
                        self.ins(format!("{zero} = int 0"));
                        let (line, file) = self.lf(loc);
                        let t = self.temp();
                        self.ins(format!(
                            "{t} = call @rt_binary_op({zero}, {}, {value}, {line}, {file})",
                            BinOp::Sub.code()
                        ));
                        Ok(t)
                    }
                }
            }
            ExprKind::Array(items) => {
                let arr = self.temp();
                self.ins(format!("{arr} = call @rt_array_new()"));
                for item in items {
                    let value = self.expr(item)?;
                    let t = self.temp();
                    self.ins(format!("{t} = call @rt_array_push({arr}, {value})"));
                }
                Ok(arr)
            }
            ExprKind::Dict(pairs) => {
                let (line, file) = self.lf(loc);
                let dict = self.temp();
                self.ins(format!("{dict} = call @rt_dict_new()"));
                for (key, value) in pairs {
                    let key = self.expr(key)?;
                    let value = self.expr(value)?;
                    let t = self.temp();
                    self.ins(format!(
                        "{t} = call @rt_index_set({dict}, {key}, {value}, {line}, {file})"
                    ));
                }
                Ok(dict)
            }
            ExprKind::Index { target, index } => {
                let target = self.expr(target)?;
                let index = self.expr(index)?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_index_get({target}, {index}, {line}, {file})"
                ));
                Ok(t)
            }
            ExprKind::Slice { target, start, end } => {
                let target = self.expr(target)?;
                let start = self.bound(start)?;
                let end = self.bound(end)?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_slice({target}, {start}, {end}, {line}, {file})"
                ));
                Ok(t)
            }
            ExprKind::Member { target, name } => {
                self.check_private(target, name, loc)?;
                let target = self.expr(target)?;
                let member = self.lits.intern(name);
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_member_get({target}, @str.{member}, {line}, {file})"
                ));
                Ok(t)
            }
            ExprKind::Call { name, args } => self.call(name, args, loc),
            ExprKind::MethodCall { target, name, args } => {
                self.check_private(target, name, loc)?;
                let object = self.expr(target)?;
                let arr = self.args_array(args)?;
                let member = self.lits.intern(name);
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_method_call({object}, @str.{member}, {arr}, {}, {line}, {file})",
                    args.len()
                ));
                Ok(t)
            }
            ExprKind::New { class, args } => {
                if !self.classes.contains_key(class) {
                    return fail(loc, format_args!("undefined class {class:?}")).into();
                }
                let c = self.temp();
                self.ins(format!("{c} = load @cls.{class}"));
                let arr = self.args_array(args)?;
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_instantiate_class({c}, {arr}, {})",
                    args.len()
                ));
                Ok(t)
            }
        }
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, loc: &Loc) -> Result<String> {
        // && and || short-circuit with explicit branches
        if matches!(op, BinOp::And | BinOp::Or) {
            let result = self.temp();
            self.ins(format!("{result} = cell"));
            let rhs_l = self.label();
            let short_l = self.label();
            let end_l = self.label();

            let lhs = self.truthy(lhs)?;
            match op {
                BinOp::And => self.ins(format!("brif {lhs}, L{rhs_l}, L{short_l}")),
                _ => self.ins(format!("brif {lhs}, L{short_l}, L{rhs_l}")),
            }

            self.place_label(short_l);
            let b = self.temp();
            self.ins(format!("{b} = bool {}", matches!(op, BinOp::Or)));
            self.ins(format!("store {b} -> {result}"));
            self.ins(format!("br L{end_l}"));

            self.place_label(rhs_l);
            let rhs = self.truthy(rhs)?;
            self.ins(format!("store {rhs} -> {result}"));
            self.ins(format!("br L{end_l}"));

            self.place_label(end_l);
            let t = self.temp();
            self.ins(format!("{t} = load {result}"));
            return Ok(t);
        }

        let lhs = self.expr(lhs)?;
        let rhs = self.expr(rhs)?;
        let (line, file) = self.lf(loc);
        let t = self.temp();
        self.ins(format!(
            "{t} = call @rt_binary_op({lhs}, {}, {rhs}, {line}, {file})",
            op.code()
        ));
        Ok(t)
    }

    fn call(&mut self, name: &str, args: &[Expr], loc: &Loc) -> Result<String> {
        // user-defined functions shadow built-ins; their arity is
        // checked here at compile time
        if let Some(&arity) = self.funcs.get(name) {
            if args.len() != arity {
                return fail(
                    loc,
                    format_args!("{name:?} expects {arity} arguments, got {}", args.len()),
                )
                .into();
            }
            let mut regs = Vec::with_capacity(args.len());
            for arg in args {
                regs.push(self.expr(arg)?);
            }
            let t = self.temp();
            self.ins(format!("{t} = call @{name}({})", regs.join(", ")));
            return Ok(t);
        }

        if let Some(builtin) = builtins::resolve(name) {
            if !builtin.arity.accepts(args.len()) {
                return fail(
                    loc,
                    format_args!(
                        "{} expects {} arguments, got {}",
                        builtin.name,
                        builtin.arity,
                        args.len()
                    ),
                )
                .into();
            }
            return self.call_builtin(builtin.name, args, loc);
        }

        // unknown names resolve at runtime
        let arr = self.args_array(args)?;
        let index = self.lits.intern(name);
        let (line, file) = self.lf(loc);
        let t = self.temp();
        self.ins(format!(
            "{t} = call @rt_call_named(@str.{index}, {arr}, {}, {line}, {file})",
            args.len()
        ));
        Ok(t)
    }

    /// A handful of built-ins get bespoke lowering; the rest map
    /// straight to their `@rt_*` entry point.
    fn call_builtin(&mut self, name: &str, args: &[Expr], loc: &Loc) -> Result<String> {
        match name {
            // inline print loops
            "print" | "println" => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        let t = self.temp();
                        self.ins(format!("{t} = call @rt_print_sep()"));
                    }
                    let value = self.expr(arg)?;
                    let t = self.temp();
                    self.ins(format!("{t} = call @rt_print_value({value})"));
                }
                if name == "println" {
                    let t = self.temp();
                    self.ins(format!("{t} = call @rt_print_nl()"));
                }
                let t = self.temp();
                self.ins(format!("{t} = null"));
                Ok(t)
            }
            // pad the optional decimal-places argument
            "round" => {
                let x = self.expr(&args[0])?;
                let places = match args.get(1) {
                    Some(expr) => self.expr(expr)?,
                    None => {
                        let t = self.temp();
                        self.ins(format!("{t} = int 0"));
                        t
                    }
                };
                let t = self.temp();
                self.ins(format!("{t} = call @rt_round({x}, {places})"));
                Ok(t)
            }
            // variadic: arguments travel as an array
            "str_format" => {
                let fmt = self.expr(&args[0])?;
                let arr = self.args_array(&args[1..])?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!(
                    "{t} = call @rt_str_format({fmt}, {arr}, {line}, {file})"
                ));
                Ok(t)
            }
            // decode failures need the source position
            "json_decode" => {
                let s = self.expr(&args[0])?;
                let (line, file) = self.lf(loc);
                let t = self.temp();
                self.ins(format!("{t} = call @rt_json_decode({s}, {line}, {file})"));
                Ok(t)
            }
            // zero-argument form has its own entry point
            "random" if args.is_empty() => {
                let t = self.temp();
                self.ins(format!("{t} = call @rt_random_float()"));
                Ok(t)
            }
            _ => {
                let mut regs = Vec::with_capacity(args.len());
                for arg in args {
                    regs.push(self.expr(arg)?);
                }
                let t = self.temp();
                self.ins(format!("{t} = call @rt_{name}({})", regs.join(", ")));
                Ok(t)
            }
        }
    }

    fn args_array(&mut self, args: &[Expr]) -> Result<String> {
        let arr = self.temp();
        self.ins(format!("{arr} = call @rt_array_new()"));
        for arg in args {
            let value = self.expr(arg)?;
            let t = self.temp();
            self.ins(format!("{t} = call @rt_array_push({arr}, {value})"));
        }
        Ok(arr)
    }

    fn bound(&mut self, bound: &Option<Box<Expr>>) -> Result<String> {
        match bound {
            Some(expr) => self.expr(expr),
            None => {
                let t = self.temp();
                self.ins(format!("{t} = null"));
                Ok(t)
            }
        }
    }

    fn truthy(&mut self, cond: &Expr) -> Result<String> {
        let value = self.expr(cond)?;
        let t = self.temp();
        self.ins(format!("{t} = call @rt_truthy({value})"));
        Ok(t)
    }

    fn lower_not(&mut self, value: &str) -> String {
        let result = self.temp();
        self.ins(format!("{result} = cell"));
        let truthy = self.temp();
        self.ins(format!("{truthy} = call @rt_truthy({value})"));
        let yes = self.label();
        let no = self.label();
        let end = self.label();
        self.ins(format!("brif {truthy}, L{yes}, L{no}"));
        self.place_label(yes);
        let f = self.temp();
        self.ins(format!("{f} = bool false"));
        self.ins(format!("store {f} -> {result}"));
        self.ins(format!("br L{end}"));
        self.place_label(no);
        let t = self.temp();
        self.ins(format!("{t} = bool true"));
        self.ins(format!("store {t} -> {result}"));
        self.ins(format!("br L{end}"));
        self.place_label(end);
        let out = self.temp();
        self.ins(format!("{out} = load {result}"));
        out
    }

    /// Private members may only be reached through `this`.
    fn check_private(&self, target: &Expr, name: &str, loc: &Loc) -> Result<()> {
        if ast::is_private(name) && !matches!(target.kind, ExprKind::This) {
            return fail(loc, format_args!("member {name:?} is private")).into();
        }
        Ok(())
    }

    // -- renaming ----------------------------------------------------

    fn enter_scope(&mut self) {
        self.depth += 1;
    }

    fn exit_scope(&mut self) {
        while self
            .bindings
            .last()
            .is_some_and(|binding| binding.depth >= self.depth)
        {
            self.bindings.pop();
        }
        self.depth -= 1;
    }

    fn fresh(&mut self) -> u32 {
        let n = self.unique;
        self.unique += 1;
        n
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().rev().find(|binding| {
            binding.original == name && (binding.declared || (self.in_function && binding.is_global))
        })
    }

    /// Declare a name in the current scope. At top level this marks
    /// the pre-registered global cell declared; elsewhere it allocates
    /// a local cell.
    fn declare(&mut self, name: &str, loc: &Loc) -> Result<String> {
        if self.depth == 0 {
            let binding = self
                .bindings
                .iter_mut()
                .find(|binding| binding.original == name && binding.is_global)
                .ok_or_else(|| fail(loc, format_args!("{name:?} was not pre-registered")))?;
            binding.declared = true;
            return Ok(binding.unique.clone());
        }
        self.declare_local(name, loc)
    }

    fn declare_local(&mut self, name: &str, loc: &Loc) -> Result<String> {
        if self
            .bindings
            .iter()
            .any(|binding| binding.original == name && binding.depth == self.depth)
        {
            return fail(loc, format_args!("{name:?} is already defined in this scope")).into();
        }
        let unique = format!("%{name}.{}", self.fresh());
        self.ins(format!("{unique} = cell"));
        self.bindings.push(Binding {
            original: name.to_owned(),
            unique: unique.clone(),
            is_global: false,
            depth: self.depth,
            declared: true,
        });
        Ok(unique)
    }

    /// Catch variables: define on first use, reuse on re-entry.
    fn declare_or_get(&mut self, name: &str, loc: &Loc) -> Result<String> {
        if let Some(binding) = self
            .bindings
            .iter()
            .rev()
            .find(|binding| binding.original == name && binding.depth == self.depth)
        {
            return Ok(binding.unique.clone());
        }
        if self.depth == 0 {
            // top-level catch variable lives in main's frame
            let unique = format!("%{name}.{}", self.fresh());
            self.ins(format!("{unique} = cell"));
            self.bindings.push(Binding {
                original: name.to_owned(),
                unique: unique.clone(),
                is_global: false,
                depth: 0,
                declared: true,
            });
            return Ok(unique);
        }
        self.declare_local(name, loc)
    }

    // -- writers -----------------------------------------------------

    fn ins(&mut self, line: String) {
        self.code.push_str("  ");
        self.code.push_str(&line);
        self.code.push('\n');
    }

    fn temp(&mut self) -> String {
        let t = format!("%t{}", self.temps);
        self.temps += 1;
        t
    }

    fn label(&mut self) -> u32 {
        let l = self.labels;
        self.labels += 1;
        l
    }

    fn place_label(&mut self, label: u32) {
        self.code.push_str(&format!("L{label}:\n"));
    }

    /// Current line and interned file-path operand.
    fn lf(&mut self, loc: &Loc) -> (u32, String) {
        let file = self.lits.intern(&loc.file);
        (loc.line, format!("@str.{file}"))
    }
}

#[cfg(test)]
mod tests;
