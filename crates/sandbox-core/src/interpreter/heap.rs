//! Values and the per-execution heap.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::errors::StackFrame;
use crate::loader::RuntimeClass;
use crate::natives::SeededRandom;

/// First identity hash handed out; every object gets the next one.
pub const IDENTITY_HASH_BASE: i32 = 0x0fed_c0de;

/// Handle of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u32);

/// A value on the operand stack, in a local or in a field.
///
/// Booleans and chars are ints, as in the class-file format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Ref(ObjectRef),
}

impl Value {
    /// Zero value of a field or array element descriptor.
    pub fn default_for(descriptor: &str) -> Value {
        match descriptor.as_bytes().first() {
            Some(b'I' | b'Z' | b'C' | b'B' | b'S') => Value::Int(0),
            Some(b'J') => Value::Long(0),
            Some(b'D') => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_long(self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(self) -> Option<ObjectRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    /// Identity comparison for references, bitwise for primitives.
    pub fn same_as(self, other: Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Ref(_) => "reference",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Ref(r) => write!(f, "@{}", r.0),
        }
    }
}

/// What a heap object holds.
#[derive(Debug, Clone)]
pub enum ObjectKind {
    /// Instance fields keyed by `declaring_class.name`.
    Plain { fields: BTreeMap<String, Value> },
    Array { element: String, values: Vec<Value> },
    Str(String),
    Builder(String),
    Random(SeededRandom),
    /// Handle of a class, by runtime name.
    ClassHandle(String),
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub class: Arc<RuntimeClass>,
    pub kind: ObjectKind,
    pub identity_hash: Option<i32>,
    /// Stack captured when a throwable is created.
    pub trace: Vec<StackFrame>,
}

impl HeapObject {
    pub fn field(&self, key: &str) -> Option<Value> {
        match &self.kind {
            ObjectKind::Plain { fields } => fields.get(key).copied(),
            _ => None,
        }
    }
}

/// Objects of one execution. Nothing is ever freed; the heap is dropped
/// with the execution.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
    hashes_assigned: i32,
    interned: HashMap<String, ObjectRef>,
    class_handles: HashMap<String, ObjectRef>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_hash(&mut self) -> i32 {
        self.hashes_assigned = self.hashes_assigned.wrapping_add(1);
        IDENTITY_HASH_BASE.wrapping_add(self.hashes_assigned)
    }

    fn push(&mut self, object: HeapObject) -> ObjectRef {
        let index = self.objects.len() as u32;
        self.objects.push(object);
        ObjectRef(index)
    }

    /// Allocate an object. Objects created by `new` get their identity hash
    /// right away, everything else on first request.
    pub fn alloc(&mut self, class: Arc<RuntimeClass>, kind: ObjectKind, hashed: bool) -> ObjectRef {
        let identity_hash = hashed.then(|| self.next_hash());
        self.push(HeapObject {
            class,
            kind,
            identity_hash,
            trace: Vec::new(),
        })
    }

    pub fn get(&self, r: ObjectRef) -> Option<&HeapObject> {
        self.objects.get(r.0 as usize)
    }

    pub fn get_mut(&mut self, r: ObjectRef) -> Option<&mut HeapObject> {
        self.objects.get_mut(r.0 as usize)
    }

    pub fn identity_hash(&mut self, r: ObjectRef) -> Option<i32> {
        let assigned = self.objects.get(r.0 as usize)?.identity_hash;
        if assigned.is_some() {
            return assigned;
        }
        let hash = self.next_hash();
        self.objects.get_mut(r.0 as usize)?.identity_hash = Some(hash);
        Some(hash)
    }

    pub fn interned(&self, text: &str) -> Option<ObjectRef> {
        self.interned.get(text).copied()
    }

    pub fn intern(&mut self, text: String, r: ObjectRef) {
        self.interned.insert(text, r);
    }

    pub fn class_handle(&self, name: &str) -> Option<ObjectRef> {
        self.class_handles.get(name).copied()
    }

    pub fn register_class_handle(&mut self, name: String, r: ObjectRef) {
        self.class_handles.insert(name, r);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
