use super::*;
use crate::{parser, preprocess::Source, token::tokenize};

fn run_src(src: &str) -> Result<String, String> {
    let source = Source::from_str("test.tn", src);
    let tokens = tokenize(source.text());
    let program = parser::parse(&tokens, &source).map_err(|e| e.message().to_owned())?;

    let mut interp = Interp::new(Rt::new());
    interp.rt.capture_output();
    let result = interp.run(&program);
    let output = interp.rt.take_output();
    result.map(|()| output)
}

fn out(src: &str) -> String {
    run_src(src).unwrap()
}

fn uncaught(src: &str) -> String {
    run_src(src).unwrap_err()
}

#[test]
fn arithmetic() {
    assert_eq!(out("println(1 + 2 * 3)"), "7\n");
    assert_eq!(out("println(7 / 2)"), "3\n");
    assert_eq!(out("println(7.0 / 2)"), "3.5\n");
    assert_eq!(out("println(-3 + 1)"), "-2\n");
    assert_eq!(out("println(10 % 3)"), "1\n");
}

#[test]
fn string_concat_coerces_either_side() {
    assert_eq!(out(r#"println("n = " + 42)"#), "n = 42\n");
    assert_eq!(out(r#"println(1 + "x")"#), "1x\n");
}

#[test]
fn foreach_array() {
    assert_eq!(
        out(r#"var a = [1,2,3] foreach i, x in a { print(x) } println("")"#),
        "123\n"
    );
    assert_eq!(
        out(r#"var a = [1,2,3] foreach x in a { print(x) } println("")"#),
        "123\n"
    );
    // two-name form binds the index first
    assert_eq!(
        out(r#"foreach i, x in [9, 9] { print(i) } println("")"#),
        "01\n"
    );
}

#[test]
fn foreach_dict() {
    assert_eq!(
        out(r#"var d = {"k": 1} foreach k, v in d { print(k) print(" ") print(v) } println("")"#),
        "k 1\n"
    );
}

#[test]
fn dict_update() {
    assert_eq!(
        out(r#"var d = {"k": 1} d["k"] = d["k"] + 1 println(d["k"])"#),
        "2\n"
    );
}

#[test]
fn for_ranges_are_inclusive() {
    assert_eq!(out(r#"for i in 0..2 { print(i) } println("")"#), "012\n");
    assert_eq!(out(r#"for i in 3..1 { print(i) } println("")"#), "321\n");
    assert_eq!(out(r#"for i in 5..5 { print(i) } println("")"#), "5\n");
}

#[test]
fn while_break_continue() {
    assert_eq!(
        out(r#"
            var i = 0
            while true {
                i += 1
                if i == 2 { continue }
                if i > 4 { break }
                print(i)
            }
            println("")
        "#),
        "134\n"
    );
}

#[test]
fn functions() {
    assert_eq!(
        out(r#"
            fn fib(n) {
                if n < 2 { return n }
                return fib(n - 1) + fib(n - 2)
            }
            println(fib(10))
        "#),
        "55\n"
    );

    // no explicit return yields null
    assert_eq!(out("fn f() { } println(f())"), "null\n");

    // functions see later bindings in their defining scope
    assert_eq!(
        out(r#"
            var x = 1
            fn f() { return x }
            x = 2
            println(f())
        "#),
        "2\n"
    );
}

#[test]
fn nested_declarations_rerun_per_call() {
    // each invocation is a fresh scope; the declaration executes again
    assert_eq!(
        out(r#"
            fn outer() {
                fn inner() { return 1 }
                return inner()
            }
            println(outer())
            println(outer())
        "#),
        "1\n1\n"
    );

    assert_eq!(
        out(r#"
            fn make(n) {
                class Box { var v = 0 }
                var b = new Box()
                b.v = n
                return b.v
            }
            println(make(1))
            println(make(2))
        "#),
        "1\n2\n"
    );

    // distinct declarations under one name still collide
    let msg = uncaught("fn f() { } fn f() { }");
    assert!(msg.contains("function \"f\" is already defined"), "{msg}");

    let msg = uncaught("class C { } class C { }");
    assert!(msg.contains("class \"C\" is already defined"), "{msg}");
}

#[test]
fn short_circuit() {
    assert_eq!(
        out(r#"
            fn boom() { raise "should not run" }
            println(false && boom())
            println(true || boom())
        "#),
        "false\ntrue\n"
    );
}

#[test]
fn try_catch_binds_prefixed_message() {
    assert_eq!(
        out(r#"try { raise "boom" } catch e { println(e) }"#),
        "[caught in test.tn:1] test.tn:1: boom\n"
    );
}

#[test]
fn nested_try() {
    assert_eq!(
        out(r#"
            try {
                try {
                    raise "inner"
                } catch e {
                    print("1")
                    raise "again"
                }
            } catch e {
                print("2")
            }
            println("")
        "#),
        "12\n"
    );
}

#[test]
fn builtin_errors_are_catchable() {
    let output = out(r#"
        try {
            var xs = [1]
            println(xs[5])
        } catch e {
            println(e)
        }
    "#);
    assert!(output.contains("index error"), "{output}");

    let output = out(r#"
        fn f(a) { return a }
        try { f(1, 2) } catch e { println(e) }
    "#);
    assert!(output.contains("arity error"), "{output}");
}

#[test]
fn uncaught_exception_reports_position() {
    let msg = uncaught(r#"raise "boom""#);
    assert_eq!(msg, "test.tn:1: boom");

    let msg = uncaught("println(nope)");
    assert!(msg.contains("undefined variable \"nope\""), "{msg}");
}

#[test]
fn assert_statement() {
    assert_eq!(out("assert 1 == 1 println(\"ok\")"), "ok\n");

    let msg = uncaught(r#"assert 1 == 2, "math is broken""#);
    assert!(msg.contains("assertion failed: math is broken"), "{msg}");

    let msg = uncaught("assert false");
    assert!(msg.contains("assertion failed"), "{msg}");
}

#[test]
fn scope_rules() {
    let msg = uncaught("var a = 1 var a = 2");
    assert!(msg.contains("already defined"), "{msg}");

    // shadowing in a child scope is fine
    assert_eq!(
        out(r#"
            var a = 1
            if true {
                var a = 10
                print(a)
            }
            println(a)
        "#),
        "101\n"
    );

    let msg = uncaught("b = 1");
    assert!(msg.contains("undefined variable"), "{msg}");
}

#[test]
fn multi_declaration() {
    assert_eq!(out("var a, b = 1, 2 println(a + b)"), "3\n");
}

#[test]
fn classes() {
    assert_eq!(
        out(r#"
            class C {
                var x = 10
                fn get() { return this.x }
            }
            var c = new C()
            println(c.get())
        "#),
        "10\n"
    );

    assert_eq!(
        out(r#"
            class Counter {
                var count = 0
                fn init(start) { this.count = start }
                fn bump() {
                    this.count += 1
                    return this.count
                }
            }
            var c = new Counter(40)
            c.bump()
            println(c.bump())
        "#),
        "42\n"
    );
}

#[test]
fn field_initializers_see_this() {
    assert_eq!(
        out(r#"
            class P {
                var x = 3
                var y = this.x + 1
            }
            var p = new P()
            println(p.y)
        "#),
        "4\n"
    );
}

#[test]
fn privacy_is_not_enforced_here() {
    // underscore members are an emitter-side check only
    assert_eq!(
        out(r#"
            class S { var _hidden = 7 }
            var s = new S()
            println(s._hidden)
        "#),
        "7\n"
    );
}

#[test]
fn instances_compare_by_identity() {
    assert_eq!(
        out(r#"
            class C { var x = 1 }
            var a = new C()
            var b = new C()
            println(a == a)
            println(a == b)
        "#),
        "true\nfalse\n"
    );
}

#[test]
fn membership_and_slices() {
    assert_eq!(out("println(2 in [1, 2, 3])"), "true\n");
    assert_eq!(out(r#"println("k" in {"k": 1})"#), "true\n");
    assert_eq!(out(r#"println("ell" in "hello")"#), "true\n");
    assert_eq!(out("println(5 not in [1, 2])"), "true\n");
    assert_eq!(out(r#"println("hello"[1:4])"#), "ell\n");
    assert_eq!(out("println([1,2,3,4][1:3])"), "[2, 3]\n");
    assert_eq!(out("println([1,2,3][-2:])"), "[2, 3]\n");
}

#[test]
fn compound_assignment_targets() {
    assert_eq!(out("var a = [1] a[0] += 5 println(a[0])"), "6\n");
    assert_eq!(
        out(r#"
            class C { var x = 1 }
            var c = new C()
            c.x *= 10
            println(c.x)
        "#),
        "10\n"
    );
}

#[test]
fn this_outside_method_is_an_error() {
    let msg = uncaught("println(this)");
    assert!(msg.contains("`this` outside of a method"), "{msg}");
}

#[test]
fn print_renders_containers() {
    assert_eq!(out(r#"println([1, "s", null])"#), "[1, \"s\", null]\n");
    assert_eq!(out(r#"println({"k": "v"})"#), "{\"k\": \"v\"}\n");
    assert_eq!(out(r#"class C { } println(new C())"#), "<instance C>\n");
}

#[test]
fn survives_collection_pressure() {
    // enough garbage to force several cycles; kept values must survive
    assert_eq!(
        out(r#"
            var keep = []
            for i in 0..500 {
                var t = [i, "pad" + i]
                if i % 10 == 0 {
                    append(keep, t)
                }
            }
            gc_run()
            println(len(keep))
            println(keep[50][1])
        "#),
        "51\npad500\n"
    );
}

#[test]
fn try_body_shares_enclosing_scope() {
    assert_eq!(
        out(r#"
            try {
                var x = 1
            } catch e { }
            println(x)
        "#),
        "1\n"
    );
}
