use super::emit;
use crate::{parser, preprocess::Source, token::tokenize};

fn ir(src: &str) -> String {
    let source = Source::from_str("test.tn", src);
    let tokens = tokenize(source.text());
    let program = parser::parse(&tokens, &source).unwrap();
    emit(&program).unwrap()
}

fn ir_err(src: &str) -> String {
    let source = Source::from_str("test.tn", src);
    let tokens = tokenize(source.text());
    let program = parser::parse(&tokens, &source).unwrap();
    emit(&program).unwrap_err().message().to_owned()
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn minimal_program() {
    insta::assert_snapshot!(ir("var a = 1"), @r#"
    @str.0 = const "test.tn"
    @g.a.0 = global

    define @main() {
      %t0 = call @rt_gc_init()
      %t1 = cell
      %t2 = call @rt_set_stack_bottom(%t1)
      %t3 = call @rt_gc_root_push(@g.a.0)
      %t4 = int 1
      store %t4 -> @g.a.0
      %t5 = int 0
      ret %t5
    }
    "#);
}

#[test]
fn globals_are_cells_rooted_by_main() {
    let out = ir("var a = 1 var b = 2");
    assert!(out.contains("@g.a.0 = global"), "{out}");
    assert!(out.contains("@g.b.1 = global"), "{out}");
    assert!(out.contains("call @rt_gc_root_push(@g.a.0)"), "{out}");
    assert!(out.contains("call @rt_gc_root_push(@g.b.1)"), "{out}");
}

#[test]
fn locals_are_renamed_per_scope() {
    let out = ir("fn f() { var a = 1 if true { var a = 2 } }");
    // two distinct cells for the two `a`s
    let cells: Vec<&str> = out
        .lines()
        .filter(|line| line.trim_start().starts_with("%a.") && line.ends_with("= cell"))
        .collect();
    assert_eq!(cells.len(), 2, "{out}");
    assert_ne!(cells[0], cells[1], "{out}");
}

#[test]
fn string_literals_are_deduplicated() {
    let out = ir(r#"var a = "dup" var b = "dup""#);
    assert_eq!(count(&out, r#"= const "dup""#), 1, "{out}");
    // both uses load the same constant through rt_str_new
    assert_eq!(count(&out, "call @rt_str_new(@str.1)"), 2, "{out}");
}

#[test]
fn binary_ops_carry_position_operands() {
    let out = ir("var a = 1 + 2");
    // op code 0 (add), line 1, file constant
    assert!(
        out.contains("call @rt_binary_op(%t4, 0, %t5, 1, @str.0)"),
        "{out}"
    );
}

#[test]
fn logic_ops_short_circuit_with_branches() {
    let out = ir("var a = true && false");
    assert!(!out.contains("@rt_binary_op"), "{out}");
    assert!(out.contains("brif"), "{out}");
    assert_eq!(count(&out, "call @rt_truthy"), 2, "{out}");
}

#[test]
fn user_calls_are_direct_with_compile_time_arity() {
    let out = ir("fn f(a) { return a } var x = f(1)");
    assert!(out.contains("define @f(%a) {"), "{out}");
    assert!(out.contains("call @f(%t"), "{out}");

    let msg = ir_err("fn f(a) { return a } f(1, 2)");
    assert!(msg.contains("\"f\" expects 1 arguments, got 2"), "{msg}");
}

#[test]
fn builtin_calls_map_to_rt_symbols() {
    let out = ir("var n = len([1])");
    assert!(out.contains("call @rt_array_new()"), "{out}");
    assert!(out.contains("call @rt_array_push"), "{out}");
    assert!(out.contains("call @rt_len(%t"), "{out}");

    // aliases resolve to the canonical entry point
    let out = ir(r#"var s = read("f.txt")"#);
    assert!(out.contains("call @rt_file_read"), "{out}");

    let msg = ir_err("len()");
    assert!(msg.contains("len expects 1 arguments, got 0"), "{msg}");
}

#[test]
fn unknown_calls_defer_to_runtime_lookup() {
    let out = ir("nope(1)");
    assert!(out.contains("call @rt_call_named(@str."), "{out}");
}

#[test]
fn print_lowers_to_a_loop() {
    let out = ir("print(1, 2)");
    assert_eq!(count(&out, "call @rt_print_value"), 2, "{out}");
    assert_eq!(count(&out, "call @rt_print_sep"), 1, "{out}");
    assert!(!out.contains("rt_print_nl"), "{out}");

    let out = ir("println(1)");
    assert_eq!(count(&out, "call @rt_print_nl"), 1, "{out}");
}

#[test]
fn variadic_and_optional_builtins() {
    let out = ir(r#"var s = str_format("{} {}", 1, 2)"#);
    assert!(out.contains("call @rt_str_format(%t"), "{out}");

    // one-argument round pads the places operand
    let out = ir("var r = round(1.5)");
    assert!(out.contains("= int 0"), "{out}");
    assert!(out.contains("call @rt_round(%t"), "{out}");

    let out = ir("var r = random()");
    assert!(out.contains("call @rt_random_float()"), "{out}");
    let out = ir("var r = random(1, 6)");
    assert!(out.contains("call @rt_random(%t"), "{out}");
}

#[test]
fn loops_use_runtime_stepping() {
    let out = ir("for i in 0..3 { println(i) }");
    assert!(out.contains("call @rt_for_step"), "{out}");
    assert!(out.contains("call @rt_for_keep"), "{out}");

    let out = ir("foreach k, v in [1] { println(k) }");
    assert!(out.contains("call @rt_is_array"), "{out}");
    assert!(out.contains("call @rt_keys"), "{out}");
    assert!(out.contains("call @rt_array_get"), "{out}");
    assert!(out.contains("call @rt_dict_get"), "{out}");
}

#[test]
fn try_lowers_to_setjmp_protocol() {
    let out = ir(r#"try { raise "x" } catch e { println(e) }"#);
    assert!(out.contains("call @rt_try_push_buf()"), "{out}");
    assert!(out.contains("call @rt_setjmp(%t"), "{out}");
    assert!(out.contains("call @rt_try_pop()"), "{out}");
    assert!(out.contains("call @rt_get_exception()"), "{out}");
    assert!(out.contains("call @rt_raise(%t"), "{out}");
    // catch binds the site-prefixed message
    assert!(out.contains(r#"= const "[caught in test.tn:1] ""#), "{out}");
}

#[test]
fn assert_lowers_to_guarded_fail() {
    let out = ir("assert 1 == 1");
    assert!(out.contains("call @rt_assert_fail(%t"), "{out}");
    assert!(out.contains(r#"= const "assertion failed""#), "{out}");

    let out = ir(r#"assert false, "nope""#);
    assert!(out.contains(r#"= const "nope""#), "{out}");
}

#[test]
fn classes_materialize_at_their_site() {
    let out = ir(r#"
        class C {
            var x = 1
            fn get() { return this.x }
        }
        var c = new C()
    "#);
    assert!(out.contains("@cls.C = global"), "{out}");
    assert!(out.contains("call @rt_gc_root_push(@cls.C)"), "{out}");
    assert!(out.contains("call @rt_make_class(@str."), "{out}");
    assert!(out.contains("@__field_init_C_x, 0)"), "{out}");
    assert!(out.contains("@C__get, 0, 0)"), "{out}");
    assert!(out.contains("define @__field_init_C_x(%this) {"), "{out}");
    assert!(out.contains("define @C__get(%this, %args, %argc) {"), "{out}");
    assert!(out.contains("call @rt_instantiate_class(%t"), "{out}");
    // methods check their arity at runtime
    assert!(out.contains("call @rt_raise"), "{out}");
}

#[test]
fn methods_unpack_their_arguments() {
    let out = ir(r#"
        class C { fn set(v) { this.x = v } }
        var c = new C()
        c.set(1)
    "#);
    assert!(out.contains("call @rt_array_get(%args, %t"), "{out}");
    assert!(out.contains("call @rt_member_set(%t"), "{out}");
    assert!(out.contains("call @rt_method_call(%t"), "{out}");
}

#[test]
fn private_members_require_this() {
    let msg = ir_err(r#"
        class C { var _x = 1 }
        var c = new C()
        println(c._x)
    "#);
    assert!(msg.contains("member \"_x\" is private"), "{msg}");

    // through `this` is fine
    ir(r#"
        class C {
            var _x = 1
            fn get() { return this._x }
        }
    "#);
}

#[test]
fn name_resolution_errors() {
    let msg = ir_err("println(x)");
    assert!(msg.contains("undefined variable \"x\""), "{msg}");

    // top level reads flow in declaration order
    let msg = ir_err("println(x) var x = 1");
    assert!(msg.contains("undefined variable"), "{msg}");

    let msg = ir_err("var a = 1 var a = 2");
    assert!(msg.contains("already defined"), "{msg}");

    let msg = ir_err("fn f() { } fn f() { }");
    assert!(msg.contains("already defined"), "{msg}");

    let msg = ir_err("var x = new Nope()");
    assert!(msg.contains("undefined class"), "{msg}");

    let msg = ir_err("println(this)");
    assert!(msg.contains("`this` outside of a method"), "{msg}");
}

#[test]
fn function_bodies_see_globals_declared_later() {
    let out = ir("fn f() { return x } var x = 1");
    assert!(out.contains("load @g.x."), "{out}");
}
