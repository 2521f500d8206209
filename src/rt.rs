//! The runtime context: heap, class registry, scope registry, I/O, and
//! the unwinding channel shared by the evaluator and every built-in.

pub mod builtins;
pub mod class;
pub mod heap;
pub mod ops;
pub mod value;

use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Weak;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;

use crate::ast::Loc;
use crate::env::{self, ScopeData};

use heap::{Dict, Heap, Object, Stats};
use value::{ObjRef, Value};

/// Non-local control flow, propagated as the `Err` side of [`Exec`].
///
/// `break`/`continue` are absorbed by the nearest enclosing loop,
/// `Return` by the nearest call frame, and `Raise` by the nearest
/// `try`. Built-ins and the evaluator raise through the same variant,
/// so one `try` catches both.
#[derive(Debug)]
pub enum Flow {
    Break,
    Continue,
    Return(Value),
    Raise(Value),
}

pub type Exec<T> = std::result::Result<T, Flow>;

/// Internal error taxonomy. Users only ever see these as message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Redefinition,
    Undefined,
    Arity,
    Type,
    Index,
    Key,
    Io,
    Assert,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Redefinition => "redefinition error",
            ErrorKind::Undefined => "undefined error",
            ErrorKind::Arity => "arity error",
            ErrorKind::Type => "type error",
            ErrorKind::Index => "index error",
            ErrorKind::Key => "key error",
            ErrorKind::Io => "io error",
            ErrorKind::Assert => "assertion failed",
        }
    }
}

enum Out {
    Stdout,
    Capture(Vec<u8>),
}

pub struct Rt {
    pub heap: Heap,
    /// Weak references to every live scope; their stored values are
    /// part of the collector's root set. Dead entries are pruned at
    /// each collection and whenever the registry outgrows
    /// [`Rt::scope_sweep_at`].
    scopes: Vec<Weak<RefCell<ScopeData>>>,
    /// Registry length that triggers the next dead-entry sweep.
    scope_sweep_at: usize,
    /// Declared classes by name. Registered values are roots.
    classes: FxHashMap<String, Value>,
    out: Out,
    cmd_args: Vec<String>,
    rng: u64,
}

impl Default for Rt {
    fn default() -> Self {
        Self::new()
    }
}

impl Rt {
    pub fn new() -> Rt {
        Rt::with_args(Vec::new())
    }

    pub fn with_args(cmd_args: Vec<String>) -> Rt {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Rt {
            heap: Heap::new(),
            scopes: Vec::new(),
            scope_sweep_at: 64,
            classes: FxHashMap::default(),
            out: Out::Stdout,
            cmd_args,
            rng: seed | 1,
        }
    }

    // -- allocation --------------------------------------------------

    /// Allocate a heap object, running a collection cycle first if the
    /// heap asks for one. The nascent object's children are pinned
    /// across the cycle since nothing else reaches them yet.
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        if self.heap.wants_collect() {
            let mut pinned = Vec::new();
            object.children(&mut pinned);
            let n = pinned.len();
            for child in pinned {
                self.heap.push_root(child);
            }
            self.collect();
            self.heap.pop_roots(n);
        }
        self.heap.alloc(object)
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> Value {
        Value::Str(self.alloc(Object::Str(s.into())))
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> Value {
        Value::Array(self.alloc(Object::Array(items)))
    }

    pub fn alloc_dict(&mut self, map: Dict) -> Value {
        Value::Dict(self.alloc(Object::Dict(map)))
    }

    /// Run a full collection cycle with the complete root set: the
    /// explicit root stack, every value in every live scope, and the
    /// class registry.
    pub fn collect(&mut self) {
        let mut roots: Vec<Value> = self.classes.values().copied().collect();
        self.scopes.retain(|weak| match weak.upgrade() {
            Some(scope) => {
                env::scope_values(&scope, &mut roots);
                true
            }
            None => false,
        });
        self.heap.collect(roots);
    }

    pub fn stats(&self) -> Stats {
        self.heap.stats()
    }

    /// Collections prune the registry too, but a loop that allocates
    /// nothing never reaches one; sweep here once the registry has
    /// doubled since the last sweep.
    pub(crate) fn register_scope(&mut self, scope: Weak<RefCell<ScopeData>>) {
        if self.scopes.len() >= self.scope_sweep_at {
            self.scopes.retain(|weak| weak.strong_count() > 0);
            self.scope_sweep_at = (self.scopes.len() * 2).max(64);
        }
        self.scopes.push(scope);
    }

    // -- classes -----------------------------------------------------

    pub fn register_class(&mut self, name: &str, class: Value) {
        self.classes.insert(name.to_owned(), class);
    }

    pub fn lookup_class(&self, name: &str) -> Option<Value> {
        self.classes.get(name).copied()
    }

    // -- raising -----------------------------------------------------

    /// Raise with the source position prefixed, per the exception
    /// contract: the in-flight value is always `"FILE:LINE: MSG"`.
    pub fn raise(&mut self, loc: &Loc, msg: impl AsRef<str>) -> Flow {
        let text = format!("{loc}: {}", msg.as_ref());
        Flow::Raise(self.alloc_str(text))
    }

    pub fn raise_kind(&mut self, kind: ErrorKind, loc: &Loc, msg: impl AsRef<str>) -> Flow {
        self.raise(loc, format!("{}: {}", kind.label(), msg.as_ref()))
    }

    // -- output ------------------------------------------------------

    /// Redirect `print`/`println` into an internal buffer. Tests use
    /// this to assert on program output.
    pub fn capture_output(&mut self) {
        self.out = Out::Capture(Vec::new());
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.out {
            Out::Stdout => String::new(),
            Out::Capture(buf) => String::from_utf8_lossy(&std::mem::take(buf)).into_owned(),
        }
    }

    pub fn write_out(&mut self, s: &str) {
        match &mut self.out {
            Out::Stdout => {
                let stdout = std::io::stdout();
                let _ = stdout.lock().write_all(s.as_bytes());
            }
            Out::Capture(buf) => buf.extend_from_slice(s.as_bytes()),
        }
    }

    // -- misc --------------------------------------------------------

    pub fn cmd_args(&self) -> &[String] {
        &self.cmd_args
    }

    /// xorshift64, uniform in [0, 1).
    pub fn random(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    #[test]
    fn scope_registry_prunes_dead_entries() {
        let mut rt = Rt::new();
        let root = Env::root(&mut rt);

        // short-lived scopes with no heap allocation in between never
        // trigger a collection, so registration itself must prune
        for _ in 0..10_000 {
            let _scope = root.child(&mut rt);
        }
        assert!(
            rt.scopes.len() < 1_000,
            "registry grew to {}",
            rt.scopes.len()
        );
    }

    #[test]
    fn live_scopes_survive_the_sweep() {
        let mut rt = Rt::new();
        let root = Env::root(&mut rt);
        let kept: Vec<Env> = (0..10).map(|_| root.child(&mut rt)).collect();

        for _ in 0..10_000 {
            let _scope = root.child(&mut rt);
        }
        let live = rt
            .scopes
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count();
        // root + the ten held children
        assert!(live >= 11, "{live}");
        drop(kept);
    }
}
