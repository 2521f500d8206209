//! Built-in functions: the ground vocabulary addressed by name.
//!
//! Each entry carries a fixed arity policy checked before dispatch.
//! Aliases (`regex_*`, `read`, `write`) resolve to the same entry.

use std::io::BufRead as _;

use crate::ast::Loc;

use super::heap::Dict;
use super::value::{self, Value};
use super::{ErrorKind, Exec, Rt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Between(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(want) => n == want,
            Arity::Between(lo, hi) => (lo..=hi).contains(&n),
            Arity::AtLeast(lo) => n >= lo,
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::Between(lo, hi) => write!(f, "{lo} to {hi}"),
            Arity::AtLeast(lo) => write!(f, "at least {lo}"),
        }
    }
}

type BuiltinFn = fn(&mut Rt, &[Value], &Loc) -> Exec<Value>;

pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    run: BuiltinFn,
}

impl Builtin {
    /// The runtime ABI symbol emitted programs call.
    pub fn symbol(&self) -> String {
        format!("rt_{}", self.name)
    }
}

macro_rules! table {
    ($($name:ident: $arity:expr => $run:expr;)*) => {
        &[$(Builtin {
            name: stringify!($name),
            arity: $arity,
            run: $run,
        },)*]
    };
}

use Arity::{AtLeast, Between, Exact};

static TABLE: &[Builtin] = table! {
    print: AtLeast(0) => print;
    println: AtLeast(0) => println;
    input: Exact(0) => input;
    file_read: Exact(1) => file_read;
    file_write: Exact(2) => file_write;
    file_append: Exact(2) => file_append;
    file_size: Exact(1) => file_size;
    file_exist: Exact(1) => file_exist;
    int: Exact(1) => to_int;
    float: Exact(1) => to_float;
    str: Exact(1) => to_str;
    type: Exact(1) => type_name;
    len: Exact(1) => len;
    append: Exact(2) => append;
    remove: Exact(2) => remove;
    keys: Exact(1) => keys;
    str_split: Exact(2) => str_split;
    str_join: Exact(2) => str_join;
    str_trim: Between(1, 2) => str_trim;
    str_format: AtLeast(1) => str_format;
    sin: Exact(1) => |rt, args, loc| math1(rt, args, loc, "sin", f64::sin);
    cos: Exact(1) => |rt, args, loc| math1(rt, args, loc, "cos", f64::cos);
    asin: Exact(1) => |rt, args, loc| math1(rt, args, loc, "asin", f64::asin);
    acos: Exact(1) => |rt, args, loc| math1(rt, args, loc, "acos", f64::acos);
    log: Exact(1) => |rt, args, loc| math1(rt, args, loc, "log", f64::ln);
    exp: Exact(1) => |rt, args, loc| math1(rt, args, loc, "exp", f64::exp);
    ceil: Exact(1) => |rt, args, loc| math1(rt, args, loc, "ceil", f64::ceil);
    floor: Exact(1) => |rt, args, loc| math1(rt, args, loc, "floor", f64::floor);
    sqrt: Exact(1) => |rt, args, loc| math1(rt, args, loc, "sqrt", f64::sqrt);
    pow: Exact(2) => pow;
    round: Between(1, 2) => round;
    random: Between(0, 2) => random;
    json_encode: Exact(1) => json_encode;
    json_decode: Exact(1) => json_decode;
    regexp_match: Exact(2) => regexp_match;
    regexp_find: Exact(2) => regexp_find;
    regexp_replace: Exact(3) => regexp_replace;
    gc_run: Exact(0) => gc_run;
    gc_stat: Exact(0) => gc_stat;
    cmd_args: Exact(0) => cmd_args;
};

/// Look up a built-in by name, resolving aliases.
pub fn resolve(name: &str) -> Option<&'static Builtin> {
    let name = match name {
        "read" => "file_read",
        "write" => "file_write",
        "regex_match" => "regexp_match",
        "regex_find" => "regexp_find",
        "regex_replace" => "regexp_replace",
        other => other,
    };
    TABLE.iter().find(|b| b.name == name)
}

/// Arity-check and run a built-in.
pub fn call(rt: &mut Rt, builtin: &Builtin, args: &[Value], loc: &Loc) -> Exec<Value> {
    if !builtin.arity.accepts(args.len()) {
        return Err(rt.raise_kind(
            ErrorKind::Arity,
            loc,
            format!(
                "{} expects {} arguments, got {}",
                builtin.name,
                builtin.arity,
                args.len()
            ),
        ));
    }
    (builtin.run)(rt, args, loc)
}

// -- I/O -------------------------------------------------------------

fn print(rt: &mut Rt, args: &[Value], _loc: &Loc) -> Exec<Value> {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&value::to_string(&rt.heap, *arg));
    }
    rt.write_out(&out);
    Ok(Value::Null)
}

fn println(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    print(rt, args, loc)?;
    rt.write_out("\n");
    Ok(Value::Null)
}

fn input(rt: &mut Rt, _args: &[Value], loc: &Loc) -> Exec<Value> {
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        return Err(rt.raise_kind(ErrorKind::Io, loc, format!("failed to read stdin: {e}")));
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(rt.alloc_str(line))
}

fn file_read(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let path = want_str(rt, args[0], loc, "file_read path")?;
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(rt.alloc_str(text)),
        Err(e) => Err(rt.raise_kind(ErrorKind::Io, loc, format!("cannot read {path:?}: {e}"))),
    }
}

fn file_write(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let path = want_str(rt, args[0], loc, "file_write path")?;
    let text = value::to_string(&rt.heap, args[1]);
    match std::fs::write(&path, text) {
        Ok(()) => Ok(Value::Null),
        Err(e) => Err(rt.raise_kind(ErrorKind::Io, loc, format!("cannot write {path:?}: {e}"))),
    }
}

fn file_append(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    use std::io::Write as _;

    let path = want_str(rt, args[0], loc, "file_append path")?;
    let text = value::to_string(&rt.heap, args[1]);
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| f.write_all(text.as_bytes()));
    match result {
        Ok(()) => Ok(Value::Null),
        Err(e) => Err(rt.raise_kind(ErrorKind::Io, loc, format!("cannot append {path:?}: {e}"))),
    }
}

fn file_size(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let path = want_str(rt, args[0], loc, "file_size path")?;
    match std::fs::metadata(&path) {
        Ok(meta) => Ok(Value::Int(meta.len() as i64)),
        Err(e) => Err(rt.raise_kind(ErrorKind::Io, loc, format!("cannot stat {path:?}: {e}"))),
    }
}

fn file_exist(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let path = want_str(rt, args[0], loc, "file_exist path")?;
    Ok(Value::Bool(std::path::Path::new(&path).exists()))
}

// -- conversion & introspection --------------------------------------

fn to_int(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    match args[0] {
        Value::Int(v) => Ok(Value::Int(v)),
        Value::Float(v) => Ok(Value::Int(v as i64)),
        Value::Bool(v) => Ok(Value::Int(v as i64)),
        Value::Str(r) => {
            let text = rt.heap.str(r).trim().to_owned();
            match text.parse::<i64>() {
                Ok(v) => Ok(Value::Int(v)),
                Err(_) => Err(rt.raise_kind(
                    ErrorKind::Type,
                    loc,
                    format!("cannot convert {text:?} to int"),
                )),
            }
        }
        other => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("cannot convert {} to int", other.tag().name()),
        )),
    }
}

fn to_float(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    match args[0] {
        Value::Int(v) => Ok(Value::Float(v as f64)),
        Value::Float(v) => Ok(Value::Float(v)),
        Value::Str(r) => {
            let text = rt.heap.str(r).trim().to_owned();
            match text.parse::<f64>() {
                Ok(v) => Ok(Value::Float(v)),
                Err(_) => Err(rt.raise_kind(
                    ErrorKind::Type,
                    loc,
                    format!("cannot convert {text:?} to float"),
                )),
            }
        }
        other => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("cannot convert {} to float", other.tag().name()),
        )),
    }
}

fn to_str(rt: &mut Rt, args: &[Value], _loc: &Loc) -> Exec<Value> {
    let text = value::to_string(&rt.heap, args[0]);
    Ok(rt.alloc_str(text))
}

fn type_name(rt: &mut Rt, args: &[Value], _loc: &Loc) -> Exec<Value> {
    Ok(rt.alloc_str(args[0].tag().name()))
}

fn len(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let n = match args[0] {
        Value::Str(r) => rt.heap.str(r).len(),
        Value::Array(r) => rt.heap.array(r).len(),
        Value::Dict(r) => rt.heap.dict(r).len(),
        other => {
            return Err(rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("len of {}", other.tag().name()),
            ));
        }
    };
    Ok(Value::Int(n as i64))
}

// -- array/dict ------------------------------------------------------

fn append(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let Value::Array(r) = args[0] else {
        return Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("append to {}", args[0].tag().name()),
        ));
    };
    rt.heap.array_mut(r).push(args[1]);
    Ok(Value::Null)
}

/// Remove and return: by index from an array, by key from a dict.
fn remove(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    match args[0] {
        Value::Array(r) => {
            let len = rt.heap.array(r).len();
            match args[1] {
                Value::Int(i) if i >= 0 && (i as usize) < len => {
                    Ok(rt.heap.array_mut(r).remove(i as usize))
                }
                Value::Int(i) => Err(rt.raise_kind(
                    ErrorKind::Index,
                    loc,
                    format!("index {i} out of range for length {len}"),
                )),
                other => Err(rt.raise_kind(
                    ErrorKind::Type,
                    loc,
                    format!("array remove index must be an int, got {}", other.tag().name()),
                )),
            }
        }
        Value::Dict(r) => {
            let key = super::ops::dict_key(rt, args[1], loc)?;
            match rt.heap.dict_mut(r).remove(&key) {
                Some(value) => Ok(value),
                None => Err(rt.raise_kind(ErrorKind::Key, loc, format!("no key {key:?}"))),
            }
        }
        other => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("remove from {}", other.tag().name()),
        )),
    }
}

/// Keys in bucket order.
fn keys(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let Value::Dict(r) = args[0] else {
        return Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("keys of {}", args[0].tag().name()),
        ));
    };
    let names: Vec<String> = rt.heap.dict(r).keys().cloned().collect();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let v = rt.alloc_str(name);
        rt.heap.push_root(v);
        out.push(v);
    }
    let n = out.len();
    let array = rt.alloc_array(out);
    rt.heap.pop_roots(n);
    Ok(array)
}

// -- strings ---------------------------------------------------------

fn str_split(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let text = want_str(rt, args[0], loc, "str_split subject")?;
    let sep = want_str(rt, args[1], loc, "str_split separator")?;
    if sep.is_empty() {
        return Err(rt.raise_kind(ErrorKind::Type, loc, "str_split separator is empty"));
    }
    let parts: Vec<&str> = text.split(&sep).collect();
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let v = rt.alloc_str(part);
        rt.heap.push_root(v);
        out.push(v);
    }
    let n = out.len();
    let array = rt.alloc_array(out);
    rt.heap.pop_roots(n);
    Ok(array)
}

fn str_join(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let Value::Array(r) = args[0] else {
        return Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("str_join subject must be an array, got {}", args[0].tag().name()),
        ));
    };
    let sep = want_str(rt, args[1], loc, "str_join separator")?;
    let items = rt.heap.array(r).clone();
    let mut text = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            text.push_str(&sep);
        }
        text.push_str(&value::to_string(&rt.heap, *item));
    }
    Ok(rt.alloc_str(text))
}

fn str_trim(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let text = want_str(rt, args[0], loc, "str_trim subject")?;
    let trimmed = match args.get(1) {
        None => text.trim().to_owned(),
        Some(set) => {
            let set = want_str(rt, *set, loc, "str_trim character set")?;
            let set: Vec<char> = set.chars().collect();
            text.trim_matches(&set[..]).to_owned()
        }
    };
    Ok(rt.alloc_str(trimmed))
}

/// `str_format("a {} b {}", x, y)` substitutes `{}` placeholders in
/// order. Placeholder and argument counts must agree.
fn str_format(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let fmt = want_str(rt, args[0], loc, "str_format template")?;
    let rest = &args[1..];

    let mut out = String::new();
    let mut next = 0;
    let mut tail = fmt.as_str();
    while let Some(pos) = tail.find("{}") {
        out.push_str(&tail[..pos]);
        if next == rest.len() {
            return Err(rt.raise_kind(
                ErrorKind::Arity,
                loc,
                format!("str_format has more placeholders than arguments ({})", rest.len()),
            ));
        }
        out.push_str(&value::to_string(&rt.heap, rest[next]));
        next += 1;
        tail = &tail[pos + 2..];
    }
    out.push_str(tail);

    if next != rest.len() {
        return Err(rt.raise_kind(
            ErrorKind::Arity,
            loc,
            format!("str_format has {next} placeholders but {} arguments", rest.len()),
        ));
    }
    Ok(rt.alloc_str(out))
}

// -- math ------------------------------------------------------------

fn want_num(rt: &mut Rt, v: Value, loc: &Loc, what: &str) -> Exec<f64> {
    v.as_f64().ok_or_else(|| {
        rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("{what} must be numeric, got {}", v.tag().name()),
        )
    })
}

fn math1(rt: &mut Rt, args: &[Value], loc: &Loc, name: &str, f: fn(f64) -> f64) -> Exec<Value> {
    let x = want_num(rt, args[0], loc, name)?;
    Ok(Value::Float(f(x)))
}

fn pow(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let base = want_num(rt, args[0], loc, "pow base")?;
    let exp = want_num(rt, args[1], loc, "pow exponent")?;
    Ok(Value::Float(base.powf(exp)))
}

/// `round(x)` rounds to an integer-valued float; `round(x, n)` rounds
/// to `n` decimal places.
fn round(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let x = want_num(rt, args[0], loc, "round")?;
    let places = match args.get(1) {
        None => 0,
        Some(Value::Int(n)) => *n,
        Some(other) => {
            return Err(rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("round places must be an int, got {}", other.tag().name()),
            ));
        }
    };
    let scale = 10f64.powi(places as i32);
    Ok(Value::Float((x * scale).round() / scale))
}

/// `random()` yields a float in `[0, 1)`; `random(a, b)` yields an int
/// in the inclusive range `a..=b`.
fn random(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    match args {
        [] => Ok(Value::Float(rt.random())),
        [Value::Int(a), Value::Int(b)] if a <= b => {
            let span = (*b - *a) as u64 + 1;
            let offset = (rt.random() * span as f64) as u64;
            Ok(Value::Int(a + offset.min(span - 1) as i64))
        }
        [_, _] => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            "random bounds must be ints with low <= high",
        )),
        _ => Err(rt.raise_kind(ErrorKind::Arity, loc, "random takes 0 or 2 arguments")),
    }
}

// -- structured data -------------------------------------------------

fn json_encode(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let json = value_to_json(rt, args[0], loc)?;
    let text = match serde_json::to_string(&json) {
        Ok(text) => text,
        Err(e) => return Err(rt.raise_kind(ErrorKind::Type, loc, format!("json encode: {e}"))),
    };
    Ok(rt.alloc_str(text))
}

fn value_to_json(rt: &mut Rt, v: Value, loc: &Loc) -> Exec<serde_json::Value> {
    use serde_json::Value as Json;

    Ok(match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(b),
        Value::Int(i) => Json::from(i),
        Value::Float(f) => match serde_json::Number::from_f64(f) {
            Some(n) => Json::Number(n),
            None => {
                return Err(rt.raise_kind(ErrorKind::Type, loc, "json encode: non-finite float"));
            }
        },
        Value::Str(r) => Json::String(rt.heap.str(r).to_owned()),
        Value::Array(r) => {
            let items = rt.heap.array(r).clone();
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_to_json(rt, item, loc)?);
            }
            Json::Array(out)
        }
        Value::Dict(r) => {
            let entries: Vec<(String, Value)> = rt
                .heap
                .dict(r)
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            let mut out = serde_json::Map::new();
            for (key, item) in entries {
                out.insert(key, value_to_json(rt, item, loc)?);
            }
            Json::Object(out)
        }
        Value::Class(_) | Value::Instance(_) => {
            return Err(rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("json encode: cannot encode {}", v.tag().name()),
            ));
        }
    })
}

fn json_decode(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let text = want_str(rt, args[0], loc, "json_decode input")?;
    let json: serde_json::Value = match serde_json::from_str(&text) {
        Ok(json) => json,
        Err(e) => return Err(rt.raise_kind(ErrorKind::Type, loc, format!("json decode: {e}"))),
    };
    Ok(json_to_value(rt, &json))
}

fn json_to_value(rt: &mut Rt, json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => rt.alloc_str(s.as_str()),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let v = json_to_value(rt, item);
                rt.heap.push_root(v);
                out.push(v);
            }
            let n = out.len();
            let array = rt.alloc_array(out);
            rt.heap.pop_roots(n);
            array
        }
        Json::Object(entries) => {
            let mut map = Dict::default();
            let mut rooted = 0;
            for (key, item) in entries {
                let v = json_to_value(rt, item);
                rt.heap.push_root(v);
                rooted += 1;
                map.insert(key.clone(), v);
            }
            let dict = rt.alloc_dict(map);
            rt.heap.pop_roots(rooted);
            dict
        }
    }
}

// -- regex -----------------------------------------------------------

fn compile_regex(rt: &mut Rt, pattern: &str, loc: &Loc) -> Exec<regex::Regex> {
    regex::Regex::new(pattern)
        .map_err(|e| rt.raise_kind(ErrorKind::Type, loc, format!("bad pattern: {e}")))
}

fn regexp_match(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let pattern = want_str(rt, args[0], loc, "regexp_match pattern")?;
    let text = want_str(rt, args[1], loc, "regexp_match subject")?;
    let re = compile_regex(rt, &pattern, loc)?;
    Ok(Value::Bool(re.is_match(&text)))
}

/// All non-overlapping matches, as an array of strings.
fn regexp_find(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let pattern = want_str(rt, args[0], loc, "regexp_find pattern")?;
    let text = want_str(rt, args[1], loc, "regexp_find subject")?;
    let re = compile_regex(rt, &pattern, loc)?;

    let matches: Vec<String> = re.find_iter(&text).map(|m| m.as_str().to_owned()).collect();
    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let v = rt.alloc_str(m);
        rt.heap.push_root(v);
        out.push(v);
    }
    let n = out.len();
    let array = rt.alloc_array(out);
    rt.heap.pop_roots(n);
    Ok(array)
}

fn regexp_replace(rt: &mut Rt, args: &[Value], loc: &Loc) -> Exec<Value> {
    let pattern = want_str(rt, args[0], loc, "regexp_replace pattern")?;
    let text = want_str(rt, args[1], loc, "regexp_replace subject")?;
    let replacement = want_str(rt, args[2], loc, "regexp_replace replacement")?;
    let re = compile_regex(rt, &pattern, loc)?;
    let replaced = re.replace_all(&text, replacement.as_str()).into_owned();
    Ok(rt.alloc_str(replaced))
}

// -- process ---------------------------------------------------------

fn gc_run(rt: &mut Rt, _args: &[Value], _loc: &Loc) -> Exec<Value> {
    rt.collect();
    Ok(Value::Null)
}

fn gc_stat(rt: &mut Rt, _args: &[Value], _loc: &Loc) -> Exec<Value> {
    let stats = rt.stats();
    let mut map = Dict::default();
    map.insert("live".to_owned(), Value::Int(stats.live as i64));
    map.insert("bytes".to_owned(), Value::Int(stats.bytes as i64));
    map.insert("collections".to_owned(), Value::Int(stats.collections as i64));
    map.insert("threshold".to_owned(), Value::Int(stats.threshold as i64));
    Ok(rt.alloc_dict(map))
}

fn cmd_args(rt: &mut Rt, _args: &[Value], _loc: &Loc) -> Exec<Value> {
    let strings: Vec<String> = rt.cmd_args().to_vec();
    let mut out = Vec::with_capacity(strings.len());
    for s in strings {
        let v = rt.alloc_str(s);
        rt.heap.push_root(v);
        out.push(v);
    }
    let n = out.len();
    let array = rt.alloc_array(out);
    rt.heap.pop_roots(n);
    Ok(array)
}

// -- helpers ---------------------------------------------------------

fn want_str(rt: &mut Rt, v: Value, loc: &Loc, what: &str) -> Exec<String> {
    match v {
        Value::Str(r) => Ok(rt.heap.str(r).to_owned()),
        _ => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("{what} must be a string, got {}", v.tag().name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::Flow;

    fn loc() -> Loc {
        Loc::new("builtins.tn", 3)
    }

    fn run(rt: &mut Rt, name: &str, args: &[Value]) -> Exec<Value> {
        let builtin = resolve(name).unwrap();
        call(rt, builtin, args, &loc())
    }

    fn raised(rt: &Rt, flow: Flow) -> String {
        match flow {
            Flow::Raise(Value::Str(r)) => rt.heap.str(r).to_owned(),
            _ => panic!("expected a raised string"),
        }
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(resolve("read").unwrap().name, "file_read");
        assert_eq!(resolve("write").unwrap().name, "file_write");
        assert_eq!(resolve("regex_match").unwrap().name, "regexp_match");
        assert!(resolve("no_such_builtin").is_none());
    }

    #[test]
    fn arity_is_enforced() {
        let rt = &mut Rt::new();
        let err = run(rt, "len", &[]).unwrap_err();
        let msg = raised(rt, err);
        assert!(msg.contains("arity error"), "{msg}");
        assert!(msg.contains("len expects 1 arguments, got 0"), "{msg}");
    }

    #[test]
    fn print_is_space_separated() {
        let rt = &mut Rt::new();
        rt.capture_output();
        let s = rt.alloc_str("x");
        run(rt, "print", &[Value::Int(1), s]).unwrap();
        run(rt, "println", &[Value::Int(2)]).unwrap();
        assert_eq!(rt.take_output(), "1 x2\n");
    }

    #[test]
    fn conversions() {
        let rt = &mut Rt::new();

        let s = rt.alloc_str(" 42 ");
        assert!(matches!(run(rt, "int", &[s]).unwrap(), Value::Int(42)));
        assert!(matches!(run(rt, "int", &[Value::Float(3.9)]).unwrap(), Value::Int(3)));

        let s = rt.alloc_str("2.5");
        assert!(matches!(run(rt, "float", &[s]).unwrap(), Value::Float(f) if f == 2.5));

        let v = run(rt, "str", &[Value::Bool(true)]).unwrap();
        assert_eq!(rt.heap.str(v.heap_ref().unwrap()), "true");

        let v = run(rt, "type", &[Value::Null]).unwrap();
        assert_eq!(rt.heap.str(v.heap_ref().unwrap()), "null");

        let s = rt.alloc_str("nope");
        let err = run(rt, "int", &[s]).unwrap_err();
        assert!(raised(rt, err).contains("cannot convert"));
    }

    #[test]
    fn array_and_dict_builtins() {
        let rt = &mut Rt::new();

        let arr = rt.alloc_array(vec![Value::Int(1)]);
        run(rt, "append", &[arr, Value::Int(2)]).unwrap();
        assert!(matches!(run(rt, "len", &[arr]).unwrap(), Value::Int(2)));

        let removed = run(rt, "remove", &[arr, Value::Int(0)]).unwrap();
        assert!(matches!(removed, Value::Int(1)));
        assert!(matches!(run(rt, "len", &[arr]).unwrap(), Value::Int(1)));

        let mut map = Dict::default();
        map.insert("a".to_owned(), Value::Int(1));
        map.insert("b".to_owned(), Value::Int(2));
        let dict = rt.alloc_dict(map);
        let keys = run(rt, "keys", &[dict]).unwrap();
        let keys = rt.heap.array(keys.heap_ref().unwrap()).clone();
        let mut names: Vec<String> = keys
            .iter()
            .map(|k| rt.heap.str(k.heap_ref().unwrap()).to_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn string_builtins() {
        let rt = &mut Rt::new();

        let s = rt.alloc_str("a,b,c");
        let sep = rt.alloc_str(",");
        let parts = run(rt, "str_split", &[s, sep]).unwrap();
        assert_eq!(rt.heap.array(parts.heap_ref().unwrap()).len(), 3);

        let sep = rt.alloc_str("-");
        let joined = run(rt, "str_join", &[parts, sep]).unwrap();
        assert_eq!(rt.heap.str(joined.heap_ref().unwrap()), "a-b-c");

        let s = rt.alloc_str("  pad  ");
        let trimmed = run(rt, "str_trim", &[s]).unwrap();
        assert_eq!(rt.heap.str(trimmed.heap_ref().unwrap()), "pad");

        let s = rt.alloc_str("xxpadxx");
        let set = rt.alloc_str("x");
        let trimmed = run(rt, "str_trim", &[s, set]).unwrap();
        assert_eq!(rt.heap.str(trimmed.heap_ref().unwrap()), "pad");

        let fmt = rt.alloc_str("{} + {} = {}");
        let s = run(rt, "str_format", &[fmt, Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(rt.heap.str(s.heap_ref().unwrap()), "1 + 2 = 3");

        let fmt = rt.alloc_str("{} {}");
        let err = run(rt, "str_format", &[fmt, Value::Int(1)]).unwrap_err();
        assert!(raised(rt, err).contains("placeholders"));
    }

    #[test]
    fn math_builtins() {
        let rt = &mut Rt::new();

        assert!(matches!(run(rt, "sqrt", &[Value::Int(9)]).unwrap(), Value::Float(f) if f == 3.0));
        assert!(matches!(run(rt, "floor", &[Value::Float(2.7)]).unwrap(), Value::Float(f) if f == 2.0));
        assert!(
            matches!(run(rt, "pow", &[Value::Int(2), Value::Int(10)]).unwrap(), Value::Float(f) if f == 1024.0)
        );
        assert!(
            matches!(run(rt, "round", &[Value::Float(2.567), Value::Int(2)]).unwrap(), Value::Float(f) if f == 2.57)
        );

        for _ in 0..100 {
            let v = run(rt, "random", &[]).unwrap();
            let Value::Float(f) = v else { panic!() };
            assert!((0.0..1.0).contains(&f));

            let v = run(rt, "random", &[Value::Int(3), Value::Int(5)]).unwrap();
            let Value::Int(i) = v else { panic!() };
            assert!((3..=5).contains(&i));
        }
    }

    #[test]
    fn json_round_trip() {
        let rt = &mut Rt::new();

        let text = rt.alloc_str(r#"{"n": 1, "xs": [1, 2.5, "s", true, null]}"#);
        let decoded = run(rt, "json_decode", &[text]).unwrap();
        let Value::Dict(d) = decoded else { panic!() };
        assert!(matches!(rt.heap.dict(d)["n"], Value::Int(1)));
        let Value::Array(xs) = rt.heap.dict(d)["xs"] else {
            panic!()
        };
        assert_eq!(rt.heap.array(xs).len(), 5);

        let encoded = run(rt, "json_encode", &[decoded]).unwrap();
        let text = rt.heap.str(encoded.heap_ref().unwrap()).to_owned();
        let reparsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed["n"], serde_json::json!(1));

        let bad = rt.alloc_str("{nope");
        let err = run(rt, "json_decode", &[bad]).unwrap_err();
        let msg = raised(rt, err);
        assert!(msg.starts_with("builtins.tn:3: "), "{msg}");
    }

    #[test]
    fn regex_builtins() {
        let rt = &mut Rt::new();

        let pat = rt.alloc_str(r"\d+");
        let text = rt.alloc_str("a 12 b 345");
        assert!(matches!(run(rt, "regexp_match", &[pat, text]).unwrap(), Value::Bool(true)));

        let found = run(rt, "regexp_find", &[pat, text]).unwrap();
        let found = rt.heap.array(found.heap_ref().unwrap()).clone();
        assert_eq!(found.len(), 2);
        assert_eq!(rt.heap.str(found[0].heap_ref().unwrap()), "12");

        let repl = rt.alloc_str("N");
        let out = run(rt, "regexp_replace", &[pat, text, repl]).unwrap();
        assert_eq!(rt.heap.str(out.heap_ref().unwrap()), "a N b N");

        let bad = rt.alloc_str("(unclosed");
        let err = run(rt, "regexp_match", &[bad, text]).unwrap_err();
        assert!(raised(rt, err).contains("bad pattern"));
    }

    #[test]
    fn gc_and_process_builtins() {
        let rt = &mut Rt::with_args(vec!["one".to_owned(), "two".to_owned()]);

        let stat = run(rt, "gc_stat", &[]).unwrap();
        let Value::Dict(d) = stat else { panic!() };
        assert!(rt.heap.dict(d).contains_key("live"));

        run(rt, "gc_run", &[]).unwrap();

        let args = run(rt, "cmd_args", &[]).unwrap();
        let args = rt.heap.array(args.heap_ref().unwrap()).clone();
        assert_eq!(args.len(), 2);
        assert_eq!(rt.heap.str(args[0].heap_ref().unwrap()), "one");
    }
}
