use crate::{
    ast::{BinOp, ClassDecl, Expr, ExprKind, Field, Func, Loc, Program, Stmt, StmtKind, UnOp},
    error::{Result, error_span},
    preprocess::Source,
    span::Span,
    token::{Token, TokenCursor, TokenKind, Tokens},
};

use std::rc::Rc;

pub fn parse(tokens: &Tokens<'_>, source: &Source) -> Result<Program> {
    let parser = State::new(tokens, source);
    parse_program(parser)
}

struct State<'t, 'src> {
    cursor: TokenCursor<'src, 't>,
    source: &'t Source,
    loop_depth: u32,
}

impl<'t, 'src> State<'t, 'src> {
    fn new(tokens: &'t Tokens<'src>, source: &'t Source) -> Self {
        Self {
            cursor: tokens.cursor(),
            source,
            loop_depth: 0,
        }
    }

    #[inline]
    fn kind(&self) -> TokenKind {
        let token = self.cursor.current();
        self.cursor.kind(token)
    }

    #[inline]
    fn lexeme(&self) -> &'src str {
        self.cursor.lexeme(self.cursor.current())
    }

    #[inline]
    fn span(&self) -> Span {
        self.cursor.span(self.cursor.current())
    }

    /// Original (file, line) of the current token.
    fn loc(&self) -> Loc {
        let (file, line) = self.source.resolve(self.span());
        Loc { file, line }
    }

    #[inline]
    fn advance(&mut self) {
        self.cursor.advance();
    }

    #[inline]
    fn end(&self) -> bool {
        self.at(t![EOF])
    }

    /// Iff current token is `kind`, returns `true`.
    ///
    /// Does not advance.
    #[inline]
    fn at(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    /// Iff current token is `kind` advances and returns `true`,
    /// otherwise returns `false` without advancing.
    #[inline]
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Iff current token is `kind`, returns `Ok(token)` and advances,
    /// otherwise returns `Err` without advancing.
    #[inline]
    fn must(&mut self, kind: TokenKind) -> Result<Token> {
        let tok = self.cursor.current();
        if self.eat(kind) {
            Ok(tok)
        } else {
            error_span(
                format!(
                    "expected '{}', found '{}'",
                    kind.bare_lexeme(),
                    self.cursor.lexeme(tok)
                ),
                self.cursor.span(tok),
            )
            .into()
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(t![;]) {}
    }
}

fn parse_program(mut p: State) -> Result<Program> {
    let mut body = Vec::new();

    p.skip_semis();
    while !p.end() {
        body.push(parse_stmt(&mut p)?);
        p.skip_semis();
    }

    Ok(Program { body })
}

fn parse_stmt(p: &mut State) -> Result<Stmt> {
    match p.kind() {
        t![var] => parse_stmt_var(p),
        t![fn] => parse_stmt_func(p),
        t![class] => parse_stmt_class(p),
        t![if] => parse_stmt_if(p),
        t![while] => parse_stmt_while(p),
        t![for] => parse_stmt_for(p),
        t![foreach] => parse_stmt_foreach(p),
        t![break] => parse_stmt_break(p),
        t![continue] => parse_stmt_continue(p),
        t![return] => parse_stmt_return(p),
        t![try] => parse_stmt_try(p),
        t![raise] => parse_stmt_raise(p),
        t![assert] => parse_stmt_assert(p),
        _ => parse_stmt_expr(p),
    }
}

/// `"{" stmt* "}"`
fn parse_block(p: &mut State) -> Result<Vec<Stmt>> {
    p.must(t!["{"])?;
    let mut body = Vec::new();
    p.skip_semis();
    while !p.at(t!["}"]) {
        if p.end() {
            return error_span("unterminated block, expected '}'", p.span()).into();
        }
        body.push(parse_stmt(p)?);
        p.skip_semis();
    }
    p.must(t!["}"])?;
    Ok(body)
}

fn parse_ident(p: &mut State) -> Result<String> {
    let name = p.lexeme().to_owned();
    p.must(t![ident])?;
    Ok(name)
}

/// - `"var" name:IDENT "=" value:EXPR`
/// - `"var" name:IDENT,+ "=" value:EXPR,+` (positional pairing)
fn parse_stmt_var(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![var])?;

    let mut names = vec![parse_ident(p)?];
    while p.eat(t![,]) {
        names.push(parse_ident(p)?);
    }

    let eq_span = p.span();
    p.must(t![=])?;

    let mut values = vec![parse_expr(p)?];
    while p.eat(t![,]) {
        values.push(parse_expr(p)?);
    }

    if names.len() != values.len() {
        return error_span(
            format!(
                "declaration of {} names with {} values",
                names.len(),
                values.len()
            ),
            eq_span,
        )
        .into();
    }

    let kind = if names.len() == 1 {
        StmtKind::Var {
            name: names.remove(0),
            value: values.remove(0),
        }
    } else {
        StmtKind::VarMulti { names, values }
    };

    Ok(Stmt { kind, loc })
}

/// `"fn" name:IDENT "(" param:IDENT,* ")" "{" stmt* "}"`
fn parse_stmt_func(p: &mut State) -> Result<Stmt> {
    let func = parse_func(p)?;
    let loc = func.loc.clone();
    Ok(Stmt {
        kind: StmtKind::Func(Rc::new(func)),
        loc,
    })
}

fn parse_func(p: &mut State) -> Result<Func> {
    let loc = p.loc();
    p.must(t![fn])?;
    let name = parse_ident(p)?;

    p.must(t!["("])?;
    let mut params = Vec::new();
    if !p.at(t![")"]) {
        params.push(parse_ident(p)?);
        while p.eat(t![,]) {
            params.push(parse_ident(p)?);
        }
    }
    p.must(t![")"])?;

    // the body is outside any enclosing loop
    let depth = std::mem::replace(&mut p.loop_depth, 0);
    let body = parse_block(p)?;
    p.loop_depth = depth;

    Ok(Func {
        name,
        params,
        body,
        loc,
    })
}

/// `"class" name:IDENT "{" ("var" field "=" EXPR | fn)* "}"`
fn parse_stmt_class(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![class])?;
    let name = parse_ident(p)?;

    p.must(t!["{"])?;
    let mut fields = Vec::new();
    let mut methods = Vec::new();
    p.skip_semis();
    while !p.at(t!["}"]) {
        match p.kind() {
            t![var] => {
                let field_loc = p.loc();
                p.advance();
                let field_name = parse_ident(p)?;
                p.must(t![=])?;
                let init = parse_expr(p)?;
                fields.push(Field {
                    name: field_name,
                    init,
                    loc: field_loc,
                });
            }
            t![fn] => methods.push(Rc::new(parse_func(p)?)),
            _ => {
                return error_span(
                    format!("expected field or method, found '{}'", p.lexeme()),
                    p.span(),
                )
                .into();
            }
        }
        p.skip_semis();
    }
    p.must(t!["}"])?;

    Ok(Stmt {
        kind: StmtKind::Class(Rc::new(ClassDecl {
            name,
            fields,
            methods,
            loc: loc.clone(),
        })),
        loc,
    })
}

/// `"if" cond:EXPR block ("else" (if | block))?`
fn parse_stmt_if(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![if])?;
    let cond = parse_expr(p)?;
    let then = parse_block(p)?;

    let orelse = if p.eat(t![else]) {
        if p.at(t![if]) {
            vec![parse_stmt_if(p)?]
        } else {
            parse_block(p)?
        }
    } else {
        Vec::new()
    };

    Ok(Stmt {
        kind: StmtKind::If { cond, then, orelse },
        loc,
    })
}

fn parse_stmt_while(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![while])?;
    let cond = parse_expr(p)?;

    p.loop_depth += 1;
    let body = parse_block(p)?;
    p.loop_depth -= 1;

    Ok(Stmt {
        kind: StmtKind::While { cond, body },
        loc,
    })
}

/// `"for" var:IDENT "in" start:EXPR ".." end:EXPR block`
fn parse_stmt_for(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![for])?;
    let var = parse_ident(p)?;
    p.must(t![in])?;
    let start = parse_expr(p)?;
    p.must(t![..])?;
    let end = parse_expr(p)?;

    p.loop_depth += 1;
    let body = parse_block(p)?;
    p.loop_depth -= 1;

    Ok(Stmt {
        kind: StmtKind::For {
            var,
            start,
            end,
            body,
        },
        loc,
    })
}

/// `"foreach" first:IDENT ("," second:IDENT)? "in" subject:EXPR block`
fn parse_stmt_foreach(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![foreach])?;
    let first = parse_ident(p)?;
    let second = if p.eat(t![,]) {
        Some(parse_ident(p)?)
    } else {
        None
    };
    p.must(t![in])?;
    let subject = parse_expr(p)?;

    p.loop_depth += 1;
    let body = parse_block(p)?;
    p.loop_depth -= 1;

    Ok(Stmt {
        kind: StmtKind::Foreach {
            first,
            second,
            subject,
            body,
        },
        loc,
    })
}

fn parse_stmt_break(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    let span = p.span();
    p.must(t![break])?;
    if p.loop_depth == 0 {
        return error_span("'break' outside of a loop", span).into();
    }
    Ok(Stmt {
        kind: StmtKind::Break,
        loc,
    })
}

fn parse_stmt_continue(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    let span = p.span();
    p.must(t![continue])?;
    if p.loop_depth == 0 {
        return error_span("'continue' outside of a loop", span).into();
    }
    Ok(Stmt {
        kind: StmtKind::Continue,
        loc,
    })
}

/// `"return" EXPR?` — the value is omitted when the next token closes
/// a block or terminates the statement.
fn parse_stmt_return(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![return])?;
    let value = if p.at(t!["}"]) || p.at(t![;]) || p.end() {
        None
    } else {
        Some(parse_expr(p)?)
    };
    Ok(Stmt {
        kind: StmtKind::Return(value),
        loc,
    })
}

/// `"try" block "catch" var:IDENT block`
///
/// The try body shares the enclosing scope; the scoping rule lives in
/// the evaluator and emitter, not here.
fn parse_stmt_try(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![try])?;
    let body = parse_block(p)?;
    p.must(t![catch])?;
    let var = parse_ident(p)?;
    let catch = parse_block(p)?;

    Ok(Stmt {
        kind: StmtKind::Try { body, var, catch },
        loc,
    })
}

fn parse_stmt_raise(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![raise])?;
    let value = parse_expr(p)?;
    Ok(Stmt {
        kind: StmtKind::Raise(value),
        loc,
    })
}

/// `"assert" cond:EXPR ("," msg:EXPR)?`
fn parse_stmt_assert(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    p.must(t![assert])?;
    let cond = parse_expr(p)?;
    let msg = if p.eat(t![,]) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(Stmt {
        kind: StmtKind::Assert { cond, msg },
        loc,
    })
}

/// Expression statement, plain assignment, or compound assignment.
///
/// Compound assignment desugars by cloning the lvalue subtree:
/// `a[i] += e` becomes `a[i] = a[i] + e`.
fn parse_stmt_expr(p: &mut State) -> Result<Stmt> {
    let loc = p.loc();
    let span = p.span();
    let expr = parse_expr(p)?;

    let compound = match p.kind() {
        t![=] => None,
        t![+=] => Some(BinOp::Add),
        t![-=] => Some(BinOp::Sub),
        t![*=] => Some(BinOp::Mul),
        t![/=] => Some(BinOp::Div),
        t![%=] => Some(BinOp::Rem),
        _ => {
            return Ok(Stmt {
                kind: StmtKind::Expr(expr),
                loc,
            });
        }
    };

    let op_span = p.span();
    p.advance();

    if !expr.is_lvalue() {
        return error_span("invalid assignment target", span).into();
    }

    let rhs = parse_expr(p)?;
    let value = match compound {
        None => rhs,
        Some(op) => {
            let lhs = expr
                .clone_lvalue()
                .ok_or_else(|| error_span("invalid compound assignment target", op_span))?;
            Expr {
                loc: loc.clone(),
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            }
        }
    };

    Ok(Stmt {
        kind: StmtKind::Assign {
            target: expr,
            value,
        },
        loc,
    })
}

fn parse_expr(p: &mut State) -> Result<Expr> {
    parse_expr_or(p)
}

fn parse_expr_or(p: &mut State) -> Result<Expr> {
    let mut lhs = parse_expr_and(p)?;
    while p.at(t![||]) {
        let loc = p.loc();
        p.advance();
        let rhs = parse_expr_and(p)?;
        lhs = Expr {
            kind: ExprKind::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc,
        };
    }
    Ok(lhs)
}

fn parse_expr_and(p: &mut State) -> Result<Expr> {
    let mut lhs = parse_expr_cmp(p)?;
    while p.at(t![&&]) {
        let loc = p.loc();
        p.advance();
        let rhs = parse_expr_cmp(p)?;
        lhs = Expr {
            kind: ExprKind::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc,
        };
    }
    Ok(lhs)
}

/// Comparison and membership: `== != < <= > >= in`, `not in`.
fn parse_expr_cmp(p: &mut State) -> Result<Expr> {
    let mut lhs = parse_expr_add(p)?;
    loop {
        let op = match p.kind() {
            t![==] => Some(BinOp::Eq),
            t![!=] => Some(BinOp::Ne),
            t![<] => Some(BinOp::Lt),
            t![<=] => Some(BinOp::Le),
            t![>] => Some(BinOp::Gt),
            t![>=] => Some(BinOp::Ge),
            _ => None,
        };

        if let Some(op) = op {
            let loc = p.loc();
            p.advance();
            let rhs = parse_expr_add(p)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                loc,
            };
            continue;
        }

        let negated = if p.at(t![in]) {
            false
        } else if p.at(t![not]) {
            true
        } else {
            break;
        };

        let loc = p.loc();
        p.advance();
        if negated {
            p.must(t![in])?;
        }
        let rhs = parse_expr_add(p)?;
        lhs = Expr {
            kind: ExprKind::In {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                negated,
            },
            loc,
        };
    }
    Ok(lhs)
}

fn parse_expr_add(p: &mut State) -> Result<Expr> {
    let mut lhs = parse_expr_mul(p)?;
    loop {
        let op = match p.kind() {
            t![+] => BinOp::Add,
            t![-] => BinOp::Sub,
            _ => break,
        };
        let loc = p.loc();
        p.advance();
        let rhs = parse_expr_mul(p)?;
        lhs = Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc,
        };
    }
    Ok(lhs)
}

fn parse_expr_mul(p: &mut State) -> Result<Expr> {
    let mut lhs = parse_expr_unary(p)?;
    loop {
        let op = match p.kind() {
            t![*] => BinOp::Mul,
            t![/] => BinOp::Div,
            t![%] => BinOp::Rem,
            _ => break,
        };
        let loc = p.loc();
        p.advance();
        let rhs = parse_expr_unary(p)?;
        lhs = Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc,
        };
    }
    Ok(lhs)
}

fn parse_expr_unary(p: &mut State) -> Result<Expr> {
    let op = match p.kind() {
        t![-] => UnOp::Neg,
        t![!] => UnOp::Not,
        _ => return parse_expr_postfix(p),
    };
    let loc = p.loc();
    p.advance();
    let expr = parse_expr_unary(p)?;
    Ok(Expr {
        kind: ExprKind::Unary {
            op,
            expr: Box::new(expr),
        },
        loc,
    })
}

/// Postfix chain: member access, method call, indexing, slicing.
///
/// Plain calls attach to bare identifiers only; functions are
/// name-bound declarations, not values.
fn parse_expr_postfix(p: &mut State) -> Result<Expr> {
    let mut expr = parse_expr_primary(p)?;

    loop {
        if p.at(t![.]) {
            let loc = p.loc();
            p.advance();
            let name = parse_ident(p)?;
            if p.at(t!["("]) {
                let args = parse_args(p)?;
                expr = Expr {
                    kind: ExprKind::MethodCall {
                        target: Box::new(expr),
                        name,
                        args,
                    },
                    loc,
                };
            } else {
                expr = Expr {
                    kind: ExprKind::Member {
                        target: Box::new(expr),
                        name,
                    },
                    loc,
                };
            }
        } else if p.at(t!["["]) {
            let loc = p.loc();
            p.advance();
            expr = parse_index_or_slice(p, expr, loc)?;
        } else if p.at(t!["("]) {
            let loc = p.loc();
            let span = p.span();
            let ExprKind::Ident(name) = expr.kind else {
                return error_span("only named functions can be called", span).into();
            };
            let args = parse_args(p)?;
            expr = Expr {
                kind: ExprKind::Call { name, args },
                loc,
            };
        } else {
            break;
        }
    }

    Ok(expr)
}

/// After the opening `[`: `EXPR "]"` is an index, `EXPR? ":" EXPR? "]"`
/// is a slice with optional bounds.
fn parse_index_or_slice(p: &mut State, target: Expr, loc: Loc) -> Result<Expr> {
    let start = if p.at(t![:]) {
        None
    } else {
        Some(Box::new(parse_expr(p)?))
    };

    if p.eat(t![:]) {
        let end = if p.at(t!["]"]) {
            None
        } else {
            Some(Box::new(parse_expr(p)?))
        };
        p.must(t!["]"])?;
        return Ok(Expr {
            kind: ExprKind::Slice {
                target: Box::new(target),
                start,
                end,
            },
            loc,
        });
    }

    let Some(index) = start else {
        return error_span("expected index or slice", p.span()).into();
    };
    p.must(t!["]"])?;
    Ok(Expr {
        kind: ExprKind::Index {
            target: Box::new(target),
            index,
        },
        loc,
    })
}

/// `"(" EXPR,* ")"`
fn parse_args(p: &mut State) -> Result<Vec<Expr>> {
    p.must(t!["("])?;
    let mut args = Vec::new();
    if !p.at(t![")"]) {
        args.push(parse_expr(p)?);
        while p.eat(t![,]) {
            args.push(parse_expr(p)?);
        }
    }
    p.must(t![")"])?;
    Ok(args)
}

fn parse_expr_primary(p: &mut State) -> Result<Expr> {
    let loc = p.loc();
    let kind = match p.kind() {
        t![int] => {
            let text = p.lexeme();
            let value: i64 = text
                .parse()
                .map_err(|_| error_span("integer literal out of range", p.span()))?;
            p.advance();
            ExprKind::Int(value)
        }
        t![float] => {
            let value: f64 = p
                .lexeme()
                .parse()
                .map_err(|_| error_span("malformed float literal", p.span()))?;
            p.advance();
            ExprKind::Float(value)
        }
        t![str] => {
            let value = unescape(p.lexeme(), p.span())?;
            p.advance();
            ExprKind::Str(value)
        }
        t![true] => {
            p.advance();
            ExprKind::Bool(true)
        }
        t![false] => {
            p.advance();
            ExprKind::Bool(false)
        }
        t![null] => {
            p.advance();
            ExprKind::Null
        }
        t![this] => {
            p.advance();
            ExprKind::This
        }
        t![ident] => {
            let name = p.lexeme().to_owned();
            p.advance();
            ExprKind::Ident(name)
        }
        t![new] => {
            p.advance();
            let class = parse_ident(p)?;
            let args = parse_args(p)?;
            ExprKind::New { class, args }
        }
        t!["("] => {
            p.advance();
            let inner = parse_expr(p)?;
            p.must(t![")"])?;
            return Ok(inner);
        }
        t!["["] => {
            p.advance();
            let mut items = Vec::new();
            if !p.at(t!["]"]) {
                items.push(parse_expr(p)?);
                while p.eat(t![,]) {
                    if p.at(t!["]"]) {
                        break;
                    }
                    items.push(parse_expr(p)?);
                }
            }
            p.must(t!["]"])?;
            ExprKind::Array(items)
        }
        t!["{"] => {
            p.advance();
            let mut pairs = Vec::new();
            if !p.at(t!["}"]) {
                loop {
                    let key = parse_expr(p)?;
                    p.must(t![:])?;
                    let value = parse_expr(p)?;
                    pairs.push((key, value));
                    if !p.eat(t![,]) || p.at(t!["}"]) {
                        break;
                    }
                }
            }
            p.must(t!["}"])?;
            ExprKind::Dict(pairs)
        }
        _ => {
            return error_span(
                format!("expected expression, found '{}'", p.lexeme()),
                p.span(),
            )
            .into();
        }
    };

    Ok(Expr { kind, loc })
}

/// Strip the surrounding quotes and process escapes.
fn unescape(lexeme: &str, span: Span) -> Result<String> {
    let inner = &lexeme[1..lexeme.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(c) => {
                return error_span(format!("unknown escape sequence '\\{c}'"), span).into();
            }
            None => return error_span("dangling escape in string literal", span).into(),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests;
