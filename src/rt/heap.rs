//! Mark-and-sweep collector.
//!
//! Every allocation lives in a slab slot behind a header recording its
//! type tag, mark bit, and byte size. Heap references are index
//! handles; headers never move. Rooting is precise: the root set is
//! the explicit root stack kept here plus whatever value iterator the
//! caller passes to [`Heap::collect`] (live environments and the class
//! registry, gathered by the runtime context).

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::class::{ClassObj, InstanceObj};
use super::value::{ObjRef, Tag, Value};

/// String-keyed mapping; iteration order is bucket order.
pub type Dict = HashMap<String, Value, FxBuildHasher>;

pub enum Object {
    Str(String),
    Array(Vec<Value>),
    Dict(Dict),
    Class(ClassObj),
    Instance(InstanceObj),
}

impl Object {
    fn tag(&self) -> Tag {
        match self {
            Object::Str(_) => Tag::Str,
            Object::Array(_) => Tag::Array,
            Object::Dict(_) => Tag::Dict,
            Object::Class(_) => Tag::Class,
            Object::Instance(_) => Tag::Instance,
        }
    }

    /// Values directly reachable from this object.
    pub(crate) fn children(&self, out: &mut Vec<Value>) {
        match self {
            Object::Str(_) | Object::Class(_) => {}
            Object::Array(items) => out.extend_from_slice(items),
            Object::Dict(map) => out.extend(map.values().copied()),
            Object::Instance(instance) => {
                out.push(Value::Class(instance.class));
                out.push(Value::Dict(instance.fields));
            }
        }
    }

    fn byte_size(&self) -> usize {
        let payload = match self {
            Object::Str(s) => s.capacity(),
            Object::Array(items) => items.capacity() * size_of::<Value>(),
            Object::Dict(map) => map.capacity() * (size_of::<String>() + size_of::<Value>()),
            Object::Class(_) => 0,
            Object::Instance(_) => 0,
        };
        size_of::<Object>() + payload
    }
}

struct Header {
    tag: Tag,
    marked: bool,
    size: usize,
}

struct Slot {
    header: Header,
    body: Option<Object>,
}

const INITIAL_THRESHOLD: usize = 100;
const MAX_ROOTS: usize = 16 * 1024;

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    bytes: usize,
    threshold: usize,
    collections: u64,
    roots: Vec<Value>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            bytes: 0,
            threshold: INITIAL_THRESHOLD,
            collections: 0,
            roots: Vec::new(),
        }
    }

    /// Whether the next allocation should run a collection cycle first.
    #[inline]
    pub fn wants_collect(&self) -> bool {
        self.live >= self.threshold
    }

    /// Allocate without collecting. The caller decides when to collect;
    /// see `Rt::alloc`.
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        let header = Header {
            tag: object.tag(),
            marked: false,
            size: object.byte_size(),
        };
        self.live += 1;
        self.bytes += header.size;

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.body.is_none());
                slot.header = header;
                slot.body = Some(object);
                ObjRef(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    header,
                    body: Some(object),
                });
                ObjRef(index)
            }
        }
    }

    // -- accessors ---------------------------------------------------

    #[inline]
    pub fn object(&self, r: ObjRef) -> &Object {
        self.slots[r.0 as usize]
            .body
            .as_ref()
            .unwrap_or_else(|| panic!("dangling heap reference {}", r.0))
    }

    #[inline]
    pub fn object_mut(&mut self, r: ObjRef) -> &mut Object {
        self.slots[r.0 as usize]
            .body
            .as_mut()
            .unwrap_or_else(|| panic!("dangling heap reference {}", r.0))
    }

    #[inline]
    pub fn str(&self, r: ObjRef) -> &str {
        match self.object(r) {
            Object::Str(s) => s,
            _ => panic!("string reference to non-string object"),
        }
    }

    #[inline]
    pub fn array(&self, r: ObjRef) -> &Vec<Value> {
        match self.object(r) {
            Object::Array(items) => items,
            _ => panic!("array reference to non-array object"),
        }
    }

    #[inline]
    pub fn array_mut(&mut self, r: ObjRef) -> &mut Vec<Value> {
        match self.object_mut(r) {
            Object::Array(items) => items,
            _ => panic!("array reference to non-array object"),
        }
    }

    #[inline]
    pub fn dict(&self, r: ObjRef) -> &Dict {
        match self.object(r) {
            Object::Dict(map) => map,
            _ => panic!("dict reference to non-dict object"),
        }
    }

    #[inline]
    pub fn dict_mut(&mut self, r: ObjRef) -> &mut Dict {
        match self.object_mut(r) {
            Object::Dict(map) => map,
            _ => panic!("dict reference to non-dict object"),
        }
    }

    #[inline]
    pub fn class(&self, r: ObjRef) -> &ClassObj {
        match self.object(r) {
            Object::Class(class) => class,
            _ => panic!("class reference to non-class object"),
        }
    }

    #[inline]
    pub fn instance(&self, r: ObjRef) -> &InstanceObj {
        match self.object(r) {
            Object::Instance(instance) => instance,
            _ => panic!("instance reference to non-instance object"),
        }
    }

    // -- explicit roots ----------------------------------------------

    /// Push an explicit root. Overflow is fatal.
    pub fn push_root(&mut self, value: Value) {
        if self.roots.len() == MAX_ROOTS {
            panic!("GC root stack overflow");
        }
        self.roots.push(value);
    }

    /// Pop `n` explicit roots. Pops must pair with pushes; underflow
    /// is fatal.
    pub fn pop_roots(&mut self, n: usize) {
        if n > self.roots.len() {
            panic!("GC root stack underflow");
        }
        self.roots.truncate(self.roots.len() - n);
    }

    #[inline]
    pub fn roots_len(&self) -> usize {
        self.roots.len()
    }

    // -- collection --------------------------------------------------

    /// Run a full mark/sweep cycle. `extra_roots` is the caller's
    /// precise root set (environments, class registry); the explicit
    /// root stack is always included.
    pub fn collect(&mut self, extra_roots: impl IntoIterator<Item = Value>) {
        let mut worklist: Vec<ObjRef> = Vec::new();

        for value in self.roots.iter().copied() {
            if let Some(r) = value.heap_ref() {
                worklist.push(r);
            }
        }
        for value in extra_roots {
            if let Some(r) = value.heap_ref() {
                worklist.push(r);
            }
        }

        // mark; cycles are fine because marked objects are not revisited
        while let Some(r) = worklist.pop() {
            let slot = &mut self.slots[r.0 as usize];
            if slot.header.marked || slot.body.is_none() {
                continue;
            }
            slot.header.marked = true;

            match slot.body.as_ref().unwrap_or_else(|| unreachable!()) {
                Object::Str(_) | Object::Class(_) => {}
                Object::Array(items) => {
                    for item in items {
                        if let Some(child) = item.heap_ref() {
                            worklist.push(child);
                        }
                    }
                }
                Object::Dict(map) => {
                    for item in map.values() {
                        if let Some(child) = item.heap_ref() {
                            worklist.push(child);
                        }
                    }
                }
                Object::Instance(instance) => {
                    worklist.push(instance.class);
                    worklist.push(instance.fields);
                }
            }
        }

        // sweep
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.body.is_none() {
                continue;
            }
            if slot.header.marked {
                slot.header.marked = false;
            } else {
                slot.body = None;
                self.live -= 1;
                self.bytes -= slot.header.size;
                self.free.push(index as u32);
            }
        }

        self.collections += 1;
        self.threshold = usize::max(INITIAL_THRESHOLD, 2 * self.live);
    }

    pub fn stats(&self) -> Stats {
        Stats {
            live: self.live,
            bytes: self.bytes,
            collections: self.collections,
            threshold: self.threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub live: usize,
    pub bytes: usize,
    pub collections: u64,
    pub threshold: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_value(heap: &mut Heap, s: &str) -> Value {
        Value::Str(heap.alloc(Object::Str(s.to_owned())))
    }

    #[test]
    fn rooted_values_survive() {
        let heap = &mut Heap::new();

        let a = str_value(heap, "a");
        let b = str_value(heap, "b");
        heap.push_root(a);

        heap.collect([]);

        assert_eq!(heap.stats().live, 1);
        assert_eq!(heap.str(a.heap_ref().unwrap()), "a");

        // `b` is dangling now
        let _ = b;

        heap.pop_roots(1);
        heap.collect([]);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn children_are_traced() {
        let heap = &mut Heap::new();

        let s = str_value(heap, "elem");
        let arr = Value::Array(heap.alloc(Object::Array(vec![s])));
        let mut dict = Dict::default();
        dict.insert("k".to_owned(), arr);
        let dict = Value::Dict(heap.alloc(Object::Dict(dict)));

        heap.push_root(dict);
        heap.collect([]);
        assert_eq!(heap.stats().live, 3);

        heap.pop_roots(1);
        heap.collect([]);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn cycles_are_collected() {
        let heap = &mut Heap::new();

        // array containing itself
        let arr = heap.alloc(Object::Array(Vec::new()));
        heap.array_mut(arr).push(Value::Array(arr));

        heap.push_root(Value::Array(arr));
        heap.collect([]);
        assert_eq!(heap.stats().live, 1);

        heap.pop_roots(1);
        heap.collect([]);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn extra_roots_survive() {
        let heap = &mut Heap::new();

        let a = str_value(heap, "held elsewhere");
        heap.collect([a]);
        assert_eq!(heap.stats().live, 1);
    }

    #[test]
    fn collection_is_idempotent() {
        let heap = &mut Heap::new();

        let a = str_value(heap, "a");
        let _dead = str_value(heap, "dead");
        heap.push_root(a);

        heap.collect([]);
        let first = heap.stats();
        heap.collect([]);
        let second = heap.stats();

        assert_eq!(first.live, second.live);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(second.collections, first.collections + 1);
    }

    #[test]
    fn threshold_grows_with_live_set() {
        let heap = &mut Heap::new();

        let values: Vec<Value> = (0..120)
            .map(|i| str_value(heap, &format!("v{i}")))
            .collect();
        for v in &values {
            heap.push_root(*v);
        }

        assert!(heap.wants_collect());
        heap.collect([]);
        assert_eq!(heap.stats().threshold, 240);

        heap.pop_roots(values.len());
        heap.collect([]);
        assert_eq!(heap.stats().threshold, INITIAL_THRESHOLD);
    }

    #[test]
    fn slots_are_reused() {
        let heap = &mut Heap::new();

        let a = str_value(heap, "a");
        let index = a.heap_ref().unwrap();
        heap.collect([]);

        let b = str_value(heap, "b");
        assert_eq!(b.heap_ref().unwrap(), index);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn root_underflow_is_fatal() {
        let mut heap = Heap::new();
        heap.pop_roots(1);
    }
}
