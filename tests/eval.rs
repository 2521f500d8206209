//! End-to-end tests through the public API: preprocess, parse, then
//! interpret or lower.

use std::fs;

use tarn::{emit::emit, eval::Interp, preprocess, preprocess::Source, rt::Rt};

fn run(src: &str) -> Result<String, String> {
    run_with_args(src, Vec::new())
}

fn run_with_args(src: &str, args: Vec<String>) -> Result<String, String> {
    let source = Source::from_str("main.tn", src);
    let program = tarn::parse(&source).map_err(|err| err.message().to_owned())?;
    let mut interp = Interp::new(Rt::with_args(args));
    interp.rt.capture_output();
    let result = interp.run(&program);
    let output = interp.rt.take_output();
    result.map(|()| output)
}

#[test]
fn a_small_program_end_to_end() {
    let output = run(r#"
        fn fizzbuzz(n) {
            var out = []
            for i in 1..n {
                if i % 15 == 0 { append(out, "fizzbuzz") }
                else if i % 3 == 0 { append(out, "fizz") }
                else if i % 5 == 0 { append(out, "buzz") }
                else { append(out, str(i)) }
            }
            return out
        }
        println(str_join(fizzbuzz(15), " "))
    "#)
    .unwrap();
    assert_eq!(
        output,
        "1 2 fizz 4 buzz fizz 7 8 fizz buzz 11 fizz 13 14 fizzbuzz\n"
    );
}

#[test]
fn classes_and_exceptions_together() {
    let output = run(r#"
        class Stack {
            var items = []
            fn push(v) { append(this.items, v) }
            fn pop() {
                if len(this.items) == 0 {
                    raise "empty stack"
                }
                return remove(this.items, len(this.items) - 1)
            }
        }

        var s = new Stack()
        s.push(1)
        s.push(2)
        println(s.pop())
        println(s.pop())
        try {
            s.pop()
        } catch e {
            println("caught")
        }
    "#)
    .unwrap();
    assert_eq!(output, "2\n1\ncaught\n");
}

#[test]
fn includes_resolve_against_the_including_file() {
    let dir = std::env::temp_dir().join("tarn-include-test");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("lib.tn"), "fn twice(x) { return x * 2 }\n").unwrap();
    fs::write(
        dir.join("main.tn"),
        "include \"lib.tn\"\nprintln(twice(21))\n",
    )
    .unwrap();

    let source = preprocess::preprocess_file(&dir.join("main.tn")).unwrap();
    let program = tarn::parse(&source).unwrap();
    let mut interp = Interp::new(Rt::new());
    interp.rt.capture_output();
    interp.run(&program).unwrap();
    assert_eq!(interp.rt.take_output(), "42\n");
}

#[test]
fn exception_positions_survive_includes() {
    let dir = std::env::temp_dir().join("tarn-include-pos-test");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("boom.tn"), "fn boom() {\n    raise \"oops\"\n}\n").unwrap();
    fs::write(dir.join("main.tn"), "include \"boom.tn\"\nboom()\n").unwrap();

    let source = preprocess::preprocess_file(&dir.join("main.tn")).unwrap();
    let program = tarn::parse(&source).unwrap();
    let mut interp = Interp::new(Rt::new());
    interp.rt.capture_output();
    let err = interp.run(&program).unwrap_err();
    // the raise site is reported in the included file's coordinates
    assert!(err.contains("boom.tn:2: oops"), "{err}");
}

#[test]
fn script_arguments_surface_through_cmd_args() {
    let output = run_with_args(
        r#"foreach a in cmd_args() { println(a) }"#,
        vec!["in.txt".to_owned(), "out.txt".to_owned()],
    )
    .unwrap();
    assert_eq!(output, "in.txt\nout.txt\n");
}

#[test]
fn json_and_regex_round_trips() {
    let output = run(r##"
        var data = json_decode("{\"xs\": [1, 2, 3]}")
        println(len(data["xs"]))
        println(regexp_replace("a1b22c", "[0-9]+", "#"))
    "##)
    .unwrap();
    assert_eq!(output, "3\n#b#c\n");
}

#[test]
fn every_construct_lowers_to_ir() {
    let source = Source::from_str("main.tn", r#"
        var total = 0

        fn weigh(x) {
            if x in [1, 2, 3] { return x * 10 }
            return -x
        }

        class Acc {
            var sum = 0
            fn add(v) { this.sum = this.sum + v }
        }

        var acc = new Acc()
        for i in 1..5 {
            acc.add(weigh(i))
        }
        foreach k, v in {"a": 1} {
            total += v
        }
        while total < 10 {
            total += 1
            if total == 5 { continue }
            if total > 8 { break }
        }
        try {
            raise str_format("total is {}", total)
        } catch e {
            println(e)
        }
        assert acc.sum != 0, "accumulated nothing"
    "#);
    let program = tarn::parse(&source).unwrap();
    let ir = emit(&program).unwrap();

    // module shape: consts, global cells, defines, then main
    assert!(ir.contains("@g.total.0 = global"), "{ir}");
    assert!(ir.contains("@cls.Acc = global"), "{ir}");
    assert!(ir.contains("define @weigh(%x) {"), "{ir}");
    assert!(ir.contains("define @Acc__add(%this, %args, %argc) {"), "{ir}");
    assert!(ir.contains("define @main() {"), "{ir}");
    assert!(ir.ends_with("}\n"), "{ir}");

    // the same program also runs under the evaluator
    let mut interp = Interp::new(Rt::new());
    interp.rt.capture_output();
    interp.run(&program).unwrap();
    let output = interp.rt.take_output();
    assert!(output.contains("total is"), "{output}");
}
