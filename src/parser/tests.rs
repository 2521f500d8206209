use super::*;
use crate::{preprocess::Source, token::tokenize};

fn parse_src(src: &str) -> Result<Program> {
    let source = Source::from_str("test.tn", src);
    let tokens = tokenize(source.text());
    parse(&tokens, &source)
}

fn ok(src: &str) -> Program {
    parse_src(src).unwrap()
}

fn fails(src: &str) -> String {
    parse_src(src).unwrap_err().message().to_owned()
}

#[test]
fn var_declarations() {
    let program = ok("var a = 1; var x, y = 1, 2");
    assert!(matches!(&program.body[0].kind, StmtKind::Var { name, .. } if name == "a"));
    assert!(
        matches!(&program.body[1].kind, StmtKind::VarMulti { names, values } if names.len() == 2 && values.len() == 2)
    );

    assert!(fails("var a, b = 1").contains("2 names with 1 values"));
}

#[test]
fn locs_track_lines() {
    let program = ok("var a = 1\nvar b = 2\n");
    assert_eq!(program.body[0].loc.line, 1);
    assert_eq!(program.body[1].loc.line, 2);
    assert_eq!(&*program.body[1].loc.file, "test.tn");
}

#[test]
fn precedence() {
    let program = ok("var x = 1 + 2 * 3");
    let StmtKind::Var { value, .. } = &program.body[0].kind else {
        panic!("expected var");
    };
    let ExprKind::Binary { op, rhs, .. } = &value.kind else {
        panic!("expected binary, got {value:?}");
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(
        rhs.kind,
        ExprKind::Binary {
            op: BinOp::Mul,
            ..
        }
    ));
}

#[test]
fn membership() {
    let program = ok(r#"var a = 1 in xs; var b = "k" not in d"#);
    let StmtKind::Var { value, .. } = &program.body[0].kind else {
        panic!();
    };
    assert!(matches!(value.kind, ExprKind::In { negated: false, .. }));
    let StmtKind::Var { value, .. } = &program.body[1].kind else {
        panic!();
    };
    assert!(matches!(value.kind, ExprKind::In { negated: true, .. }));
}

#[test]
fn compound_assignment_desugars() {
    let program = ok("a[0] += 5");
    let StmtKind::Assign { target, value } = &program.body[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(target.kind, ExprKind::Index { .. }));
    let ExprKind::Binary { op, lhs, .. } = &value.kind else {
        panic!("expected desugared binary");
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(lhs.kind, ExprKind::Index { .. }));
}

#[test]
fn call_shapes() {
    let program = ok("f(1, 2); o.m(3); var i = new C()");
    assert!(matches!(
        &program.body[0].kind,
        StmtKind::Expr(Expr { kind: ExprKind::Call { name, args }, .. }) if name == "f" && args.len() == 2
    ));
    assert!(matches!(
        &program.body[1].kind,
        StmtKind::Expr(Expr { kind: ExprKind::MethodCall { name, .. }, .. }) if name == "m"
    ));
    assert!(fails("(1 + 2)(3)").contains("only named functions"));
}

#[test]
fn slices() {
    let program = ok("var a = xs[1:3]; var b = xs[:2]; var c = xs[1:]; var d = xs[i]");
    let kinds: Vec<_> = program
        .body
        .iter()
        .map(|s| {
            let StmtKind::Var { value, .. } = &s.kind else {
                panic!();
            };
            &value.kind
        })
        .collect();
    assert!(
        matches!(kinds[0], ExprKind::Slice { start: Some(_), end: Some(_), .. })
    );
    assert!(matches!(kinds[1], ExprKind::Slice { start: None, end: Some(_), .. }));
    assert!(matches!(kinds[2], ExprKind::Slice { start: Some(_), end: None, .. }));
    assert!(matches!(kinds[3], ExprKind::Index { .. }));
}

#[test]
fn class_declaration() {
    let program = ok(
        r#"
        class Counter {
            var count = 0
            var _secret = 1

            fn bump() {
                this.count += 1
                return this.count
            }
        }
        "#,
    );
    let StmtKind::Class(class) = &program.body[0].kind else {
        panic!("expected class");
    };
    assert_eq!(class.name, "Counter");
    assert_eq!(class.fields.len(), 2);
    assert_eq!(class.methods.len(), 1);
    assert_eq!(class.methods[0].name, "bump");
}

#[test]
fn control_flow() {
    ok("while true { break }");
    ok("for i in 0..10 { continue }");
    ok("foreach k, v in d { }");
    ok("try { raise \"x\" } catch e { }");
    ok("assert 1 == 1, \"math works\"");

    assert!(fails("break").contains("outside of a loop"));
    assert!(fails("fn f() { break }\nwhile true { f() }").contains("outside of a loop"));
}

#[test]
fn string_escapes() {
    let program = ok(r#"var s = "a\nb\"c""#);
    let StmtKind::Var { value, .. } = &program.body[0].kind else {
        panic!();
    };
    let ExprKind::Str(s) = &value.kind else {
        panic!();
    };
    assert_eq!(s, "a\nb\"c");

    assert!(fails(r#"var s = "\q""#).contains("unknown escape"));
}
