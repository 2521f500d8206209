use std::{fs, io::Read as _, path::Path};

use tarn::{
    emit::emit,
    eval::Interp,
    preprocess::{self, Source},
    rt::Rt,
};

macro_rules! bail {
    ($($tt:tt)*) => {{
        eprintln!($($tt)*);
        ::std::process::exit(1);
    }};
}

/// Tarn CLI.
#[derive(argh::FromArgs)]
struct Args {
    /// evaluate a string instead of a file
    #[argh(option, short = 'e')]
    eval: Option<String>,

    /// parse and pretty-print the AST
    #[argh(switch, short = 'p', long = "print-ast")]
    print_ast: bool,

    /// compile to IR instead of interpreting
    #[argh(switch, short = 'c')]
    compile: bool,

    /// IR output path used with `-c`
    #[argh(option, short = 'o', default = "String::from(\"a.out.ir\")")]
    output: String,

    /// print IR to stdout instead of writing it to a file
    #[argh(switch, long = "emit-ir")]
    emit_ir: bool,

    /// path to a script, or `-` for stdin
    #[argh(positional)]
    path: Option<String>,

    /// arguments surfaced to the script through `cmd_args()`
    #[argh(positional, greedy)]
    script_args: Vec<String>,
}

fn main() {
    let args: Args = argh::from_env();

    let source = load_source(&args);
    let program = match tarn::parse(&source) {
        Ok(program) => program,
        Err(err) => bail!("{}", err.render(source.text())),
    };

    if args.print_ast {
        for stmt in &program.body {
            println!("{stmt:#?}");
        }
        return;
    }

    if args.compile || args.emit_ir {
        let ir = match emit(&program) {
            Ok(ir) => ir,
            Err(err) => bail!("{}", err.message()),
        };
        if args.emit_ir {
            print!("{ir}");
        } else if let Err(err) = fs::write(&args.output, ir) {
            bail!("failed to write {:?}: {err}", args.output);
        }
        return;
    }

    let mut interp = Interp::new(Rt::with_args(args.script_args.clone()));
    if let Err(exception) = interp.run(&program) {
        bail!("Uncaught exception: {exception}");
    }
}

fn load_source(args: &Args) -> Source {
    if let Some(code) = &args.eval {
        return Source::from_str("<eval>", code);
    }
    match args.path.as_deref() {
        Some("-") => {
            let mut text = String::new();
            if let Err(err) = std::io::stdin().read_to_string(&mut text) {
                bail!("failed to read stdin: {err}");
            }
            Source::from_str("<stdin>", &text)
        }
        Some(path) => match preprocess::preprocess_file(Path::new(path)) {
            Ok(source) => source,
            Err(err) => bail!("{}", err.message()),
        },
        None => bail!("no input: pass a script path, `-` for stdin, or `-e CODE`"),
    }
}
