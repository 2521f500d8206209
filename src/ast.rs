//! AST consumed by both the evaluator and the IR emitter.
//!
//! Every node carries a [`Loc`]: the original file and line, resolved
//! through the preprocessor's line map at construction time.

use std::rc::Rc;

/// Original source position of a node.
#[derive(Clone, Debug)]
pub struct Loc {
    pub file: Rc<str>,
    pub line: u32,
}

impl Loc {
    pub fn new(file: impl Into<Rc<str>>, line: u32) -> Loc {
        Loc {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Stable operator code used by the emitted `rt_binary_op` calls.
    pub fn code(self) -> u8 {
        match self {
            BinOp::Add => 0,
            BinOp::Sub => 1,
            BinOp::Mul => 2,
            BinOp::Div => 3,
            BinOp::Rem => 4,
            BinOp::Eq => 5,
            BinOp::Ne => 6,
            BinOp::Lt => 7,
            BinOp::Le => 8,
            BinOp::Gt => 9,
            BinOp::Ge => 10,
            BinOp::And => 11,
            BinOp::Or => 12,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
}

#[derive(Debug)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    This,
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs in rhs`, or `lhs not in rhs` when `negated`.
    In {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        negated: bool,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Array(Vec<Expr>),
    /// Key/value pair nodes, in source order.
    Dict(Vec<(Expr, Expr)>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Member {
        target: Box<Expr>,
        name: String,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    MethodCall {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Clone an lvalue-shaped subtree: identifier, member access, index
    /// access, slice access, and leaf literals. Used by the parser's
    /// compound-assignment desugaring; other shapes are not cloneable.
    pub fn clone_lvalue(&self) -> Option<Expr> {
        let kind = match &self.kind {
            ExprKind::Int(v) => ExprKind::Int(*v),
            ExprKind::Float(v) => ExprKind::Float(*v),
            ExprKind::Str(v) => ExprKind::Str(v.clone()),
            ExprKind::Bool(v) => ExprKind::Bool(*v),
            ExprKind::Null => ExprKind::Null,
            ExprKind::Ident(name) => ExprKind::Ident(name.clone()),
            ExprKind::This => ExprKind::This,
            ExprKind::Member { target, name } => ExprKind::Member {
                target: Box::new(target.clone_lvalue()?),
                name: name.clone(),
            },
            ExprKind::Index { target, index } => ExprKind::Index {
                target: Box::new(target.clone_lvalue()?),
                index: Box::new(index.clone_lvalue()?),
            },
            ExprKind::Slice { target, start, end } => {
                let clone_bound = |b: &Option<Box<Expr>>| match b {
                    Some(e) => e.clone_lvalue().map(|e| Some(Box::new(e))),
                    None => Some(None),
                };
                ExprKind::Slice {
                    target: Box::new(target.clone_lvalue()?),
                    start: clone_bound(start)?,
                    end: clone_bound(end)?,
                }
            }
            _ => return None,
        };

        Some(Expr {
            kind,
            loc: self.loc.clone(),
        })
    }

    /// Whether this expression may appear on the left of `=`.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        )
    }
}

#[derive(Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Loc,
}

#[derive(Debug)]
pub enum StmtKind {
    Var {
        name: String,
        value: Expr,
    },
    /// `var a, b = e1, e2` — names and values pair up positionally.
    VarMulti {
        names: Vec<String>,
        values: Vec<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Func(Rc<Func>),
    Class(Rc<ClassDecl>),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        /// `else if` chains nest as a single `If` inside `orelse`.
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    /// Inclusive numeric range loop.
    For {
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    /// Over arrays: `(index, element)`; over dicts: `(key, value)`.
    /// With a single name, binds the element (or key's value) only.
    Foreach {
        first: String,
        second: Option<String>,
        subject: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Try {
        body: Vec<Stmt>,
        var: String,
        catch: Vec<Stmt>,
    },
    Raise(Expr),
    Assert {
        cond: Expr,
        msg: Option<Expr>,
    },
    Expr(Expr),
}

#[derive(Debug)]
pub struct Func {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct Field {
    pub name: String,
    pub init: Expr,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<Field>,
    pub methods: Vec<Rc<Func>>,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// Members whose name begins with an underscore are private.
#[inline]
pub fn is_private(name: &str) -> bool {
    name.starts_with('_')
}
