//! # Interpreter
//!
//! Runs rewritten classes on a frame stack. Calls between bytecode methods
//! push a [`Frame`] instead of recursing on the host stack; only natives that
//! call back into bytecode (and class initializers) nest a new run loop.
//!
//! ## Outcomes of a step
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | [`Unwind::Throw`] | A sandboxed throwable, matched against handler tables |
//! | [`Unwind::Abort`] | Threshold or rule violation, fatal error, loading failure; never catchable |
//!
//! Faults the host detects (division by zero, null dereference, bad array
//! index, failed casts, negative sizes, call depth) are raised as instances
//! of the matching `sandbox/lang/...` throwable.

pub mod heap;

pub use heap::{Heap, HeapObject, ObjectKind, ObjectRef, Value, IDENTITY_HASH_BASE};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use sandbox_types::names::from_sandboxed;
use sandbox_types::{ArithOp, Condition, Constant, FieldRef, Instruction, InvokeKind, MethodRef, NumericType};

use crate::config::{RandomPolicy, SandboxConfiguration};
use crate::costing::{RuntimeCostMeter, ThresholdViolation};
use crate::errors::{HostException, LoadError, StackFrame};
use crate::loader::{RuntimeClass, RuntimeMethod, SandboxClassLoader};
use crate::natives::{DeterministicClock, NativeTable, SeededRandom};
use crate::well_known::{
    is_fatal_error, ARITHMETIC, ARRAY_INDEX_OUT_OF_BOUNDS, CLASS, CLASS_CAST, CLASS_INITIALIZER, CONSTRUCTOR,
    ENTRY_DESCRIPTOR, ENTRY_METHOD, FATAL_ERRORS, NEGATIVE_ARRAY_SIZE, NO_CLASS_DEF_FOUND, NULL_POINTER, OBJECT,
    OUT_OF_MEMORY, RANDOM, STACK_OVERFLOW, STRING, STRING_BUILDER, THROWABLE, THROWABLE_CAUSE, THROWABLE_MESSAGE,
};

/// Largest array the sandbox allocates; longer requests raise
/// `OutOfMemoryError`.
pub const MAX_ARRAY_LENGTH: i32 = 1 << 24;

/// Deepest cause chain carried into a [`HostException`]; later causes are
/// dropped.
pub const MAX_CAUSE_DEPTH: usize = 64;

// =============================================================================
// Unwinding
// =============================================================================

/// Non-throwable termination of an execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Abort {
    Threshold(ThresholdViolation),
    RuleViolation(String),
    /// A fatal error reached a guarded handler.
    Fatal(ObjectRef),
    ClassLoading(LoadError),
    /// Bytecode the interpreter cannot execute, e.g. mismatched operand kinds.
    Malformed(String),
    Internal(String),
}

/// Why a method did not return normally.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwind {
    Throw(ObjectRef),
    Abort(Abort),
}

impl From<ThresholdViolation> for Unwind {
    fn from(violation: ThresholdViolation) -> Self {
        Unwind::Abort(Abort::Threshold(violation))
    }
}

impl From<LoadError> for Unwind {
    fn from(error: LoadError) -> Self {
        Unwind::Abort(Abort::ClassLoading(error))
    }
}

fn malformed(reason: impl Into<String>) -> Unwind {
    Unwind::Abort(Abort::Malformed(reason.into()))
}

fn internal(reason: impl Into<String>) -> Unwind {
    Unwind::Abort(Abort::Internal(reason.into()))
}

// =============================================================================
// Frames
// =============================================================================

#[derive(Debug)]
struct Frame {
    method: Arc<RuntimeMethod>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
}

impl Frame {
    fn new(method: Arc<RuntimeMethod>, args: Vec<Value>) -> Result<Self, Unwind> {
        let max_locals = method.code.as_ref().map(|c| usize::from(c.max_locals)).unwrap_or(0);
        if args.len() > max_locals {
            return Err(internal(format!(
                "{} takes {} arguments but has {} locals",
                method.qualified_name,
                args.len(),
                max_locals
            )));
        }
        let mut locals = args;
        locals.resize(max_locals, Value::Null);
        Ok(Self {
            method,
            locals,
            stack: Vec::new(),
            pc: 0,
        })
    }
}

enum Flow {
    Next,
    Jump(usize),
    Call(Arc<RuntimeMethod>, Vec<Value>),
    Return(Option<Value>),
}

// =============================================================================
// Interpreter
// =============================================================================

/// One execution's machine state: heap, statics, frames and meter.
pub struct Interpreter<'a> {
    loader: &'a mut SandboxClassLoader,
    natives: Arc<NativeTable>,
    meter: RuntimeCostMeter,
    heap: Heap,
    /// Static field values by declaring class.
    statics: HashMap<String, BTreeMap<String, Value>>,
    /// Classes whose initialization has started.
    initialized: HashSet<String>,
    /// Classes whose initializer threw; every later use fails.
    failed_initializers: HashSet<String>,
    frames: Vec<Frame>,
    max_call_depth: usize,
    clock: Option<DeterministicClock>,
    random_seed: Option<[u8; 32]>,
    /// Generator behind `Math.random`.
    shared_random: Option<SeededRandom>,
    random_instances: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(loader: &'a mut SandboxClassLoader, config: &SandboxConfiguration) -> Self {
        let natives = Arc::clone(loader.bootstrap().natives());
        let random_seed = match config.determinism.random {
            RandomPolicy::Seeded { seed } => Some(seed),
            RandomPolicy::Reject => None,
        };
        Self {
            loader,
            natives,
            meter: RuntimeCostMeter::new(config.thresholds),
            heap: Heap::new(),
            statics: HashMap::new(),
            initialized: HashSet::new(),
            failed_initializers: HashSet::new(),
            frames: Vec::new(),
            max_call_depth: config.max_call_depth,
            clock: DeterministicClock::from_policy(config.determinism.clock),
            random_seed,
            shared_random: random_seed.map(SeededRandom::new),
            random_instances: 0,
        }
    }

    pub fn meter(&self) -> &RuntimeCostMeter {
        &self.meter
    }

    pub(crate) fn meter_mut(&mut self) -> &mut RuntimeCostMeter {
        &mut self.meter
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn loader(&self) -> &SandboxClassLoader {
        &*self.loader
    }

    pub(crate) fn loader_mut(&mut self) -> &mut SandboxClassLoader {
        &mut *self.loader
    }

    /// Current nesting of bytecode frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    // -------------------------------------------------------------------------
    // Entry
    // -------------------------------------------------------------------------

    /// Instantiate `entry` and call its `apply` with `input`.
    ///
    /// The instance is created without an identity hash, so the hashes user
    /// code observes start at the first object it allocates itself.
    pub fn call_entry(&mut self, entry: &Arc<RuntimeClass>, input: Value) -> Result<Value, Unwind> {
        self.ensure_initialized(entry)?;
        let instance = Value::Ref(self.alloc_instance(entry, false)?);
        let constructor = entry
            .declared_method(CONSTRUCTOR, "()V")
            .cloned()
            .ok_or_else(|| missing_member(&entry.name, CONSTRUCTOR, "()V"))?;
        self.invoke(&constructor, vec![instance])?;
        let apply = entry
            .find_method(ENTRY_METHOD, ENTRY_DESCRIPTOR)
            .ok_or_else(|| missing_member(&entry.name, ENTRY_METHOD, ENTRY_DESCRIPTOR))?;
        let output = self.invoke(&apply, vec![instance, input])?;
        debug!(
            entry = %entry.name,
            heap_objects = self.heap.len(),
            costs = ?self.meter.summary(),
            "entry point returned"
        );
        Ok(output.unwrap_or(Value::Null))
    }

    /// Call `method` with `args` (receiver first for instance methods) and
    /// run it to completion.
    pub fn invoke(&mut self, method: &Arc<RuntimeMethod>, args: Vec<Value>) -> Result<Option<Value>, Unwind> {
        if method.is_native() {
            return self.call_native(method, &args);
        }
        if method.code.is_none() {
            return Err(missing_member(&method.owner, &method.name, &method.descriptor));
        }
        if self.frames.len() >= self.max_call_depth {
            return Err(self.throwable(STACK_OVERFLOW, None));
        }
        let base = self.frames.len();
        self.frames.push(Frame::new(Arc::clone(method), args)?);
        self.run_frames(base)
    }

    /// Virtual call on `receiver`; `args` exclude the receiver.
    pub fn invoke_virtual(
        &mut self,
        receiver: Value,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Unwind> {
        let target = self.object(receiver)?;
        let class = self.object_class(target)?;
        let method = class
            .find_method(name, descriptor)
            .ok_or_else(|| missing_member(&class.name, name, descriptor))?;
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(receiver);
        all.extend(args);
        self.invoke(&method, all)
    }

    fn call_native(&mut self, method: &Arc<RuntimeMethod>, args: &[Value]) -> Result<Option<Value>, Unwind> {
        let Some(native) = self.natives.get(&method.qualified_name) else {
            return Err(Unwind::Abort(Abort::RuleViolation(format!(
                "Native method has no implementation; {}",
                method.qualified_name
            ))));
        };
        if args.len() != method.call_slots() {
            return Err(internal(format!(
                "{} called with {} arguments",
                method.qualified_name,
                args.len()
            )));
        }
        trace!(native = %method.qualified_name, "native call");
        let result = native(self, args)?;
        if method.returns_value != result.is_some() {
            return Err(internal(format!("native {} returned the wrong arity", method.qualified_name)));
        }
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    fn run_frames(&mut self, base: usize) -> Result<Option<Value>, Unwind> {
        while self.frames.len() > base {
            let (method, pc) = match self.frames.last() {
                Some(frame) => (Arc::clone(&frame.method), frame.pc),
                None => return Err(internal("no active frame")),
            };
            let Some(code) = method.code.as_ref() else {
                return Err(internal(format!("{} has no code", method.qualified_name)));
            };
            let Some(insn) = code.instructions.get(pc) else {
                self.frames.truncate(base);
                return Err(malformed(format!("execution fell off the end of {}", method.qualified_name)));
            };
            match self.step(insn) {
                Ok(Flow::Next) => self.frame_mut()?.pc += 1,
                Ok(Flow::Jump(target)) => self.frame_mut()?.pc = target,
                Ok(Flow::Call(callee, args)) => {
                    if self.frames.len() >= self.max_call_depth {
                        let error = self.throwable(STACK_OVERFLOW, None);
                        if let Some(result) = self.unwind(error, base) {
                            return result;
                        }
                        continue;
                    }
                    match Frame::new(callee, args) {
                        Ok(frame) => self.frames.push(frame),
                        Err(error) => {
                            self.frames.truncate(base);
                            return Err(error);
                        }
                    }
                }
                Ok(Flow::Return(value)) => {
                    self.frames.pop();
                    if self.frames.len() == base {
                        return Ok(value);
                    }
                    let caller = self.frame_mut()?;
                    if let Some(value) = value {
                        caller.stack.push(value);
                    }
                    caller.pc += 1;
                }
                Err(error) => {
                    if let Some(result) = self.unwind(error, base) {
                        return result;
                    }
                }
            }
        }
        Err(internal("run loop exhausted its frames"))
    }

    /// Route `error` to a handler. Returns the final result when no frame
    /// above `base` handles it.
    fn unwind(&mut self, error: Unwind, base: usize) -> Option<Result<Option<Value>, Unwind>> {
        let thrown = match error {
            Unwind::Throw(thrown) => thrown,
            abort => {
                self.frames.truncate(base);
                return Some(Err(abort));
            }
        };
        while self.frames.len() > base {
            if let Some(target) = self.find_handler(thrown) {
                if let Some(frame) = self.frames.last_mut() {
                    frame.stack.clear();
                    frame.stack.push(Value::Ref(thrown));
                    frame.pc = target;
                }
                return None;
            }
            self.frames.pop();
        }
        Some(Err(Unwind::Throw(thrown)))
    }

    fn find_handler(&self, thrown: ObjectRef) -> Option<usize> {
        let frame = self.frames.last()?;
        let code = frame.method.code.as_ref()?;
        let class = &self.heap.get(thrown)?.class;
        let pc = frame.pc as u32;
        code.handlers
            .iter()
            .find(|h| {
                h.start <= pc
                    && pc < h.end
                    && h.catch_type.as_deref().map_or(true, |catch| class.is_subclass_of(catch))
            })
            .map(|h| h.handler as usize)
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, Unwind> {
        self.frames.last_mut().ok_or_else(|| internal("no active frame"))
    }

    fn push(&mut self, value: Value) -> Result<(), Unwind> {
        self.frame_mut()?.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Unwind> {
        let frame = self.frame_mut()?;
        let method = &frame.method.qualified_name;
        match frame.stack.pop() {
            Some(value) => Ok(value),
            None => Err(malformed(format!("operand stack underflow in {}", method))),
        }
    }

    fn pop_int(&mut self) -> Result<i32, Unwind> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(malformed(format!("expected int, found {}", other.kind()))),
        }
    }

    fn pop_args(&mut self, count: usize) -> Result<Vec<Value>, Unwind> {
        let frame = self.frame_mut()?;
        if frame.stack.len() < count {
            return Err(malformed(format!(
                "operand stack underflow in {}",
                frame.method.qualified_name
            )));
        }
        let split = frame.stack.len() - count;
        Ok(frame.stack.split_off(split))
    }

    fn step(&mut self, insn: &Instruction) -> Result<Flow, Unwind> {
        match insn {
            Instruction::Nop => {}
            Instruction::Push(constant) => {
                let value = self.constant(constant)?;
                self.push(value)?;
            }
            Instruction::Load(slot) => {
                let frame = self.frame_mut()?;
                let value = frame
                    .locals
                    .get(usize::from(*slot))
                    .copied()
                    .ok_or_else(|| malformed(format!("local {} out of range", slot)))?;
                frame.stack.push(value);
            }
            Instruction::Store(slot) => {
                let value = self.pop()?;
                let frame = self.frame_mut()?;
                let local = frame
                    .locals
                    .get_mut(usize::from(*slot))
                    .ok_or_else(|| malformed(format!("local {} out of range", slot)))?;
                *local = value;
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Dup => {
                let value = self.pop()?;
                self.push(value)?;
                self.push(value)?;
            }
            Instruction::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
            }
            Instruction::Arith(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let value = self.arith(*op, left, right)?;
                self.push(value)?;
            }
            Instruction::Neg => {
                let value = match self.pop()? {
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Long(v) => Value::Long(v.wrapping_neg()),
                    Value::Double(v) => Value::Double(-v),
                    other => return Err(malformed(format!("cannot negate {}", other.kind()))),
                };
                self.push(value)?;
            }
            Instruction::Convert { from, to } => {
                let value = self.pop()?;
                let converted = convert(value, *from, *to)?;
                self.push(converted)?;
            }
            Instruction::Compare => {
                let right = self.pop()?;
                let left = self.pop()?;
                let ordering = match (left, right) {
                    (Value::Int(a), Value::Int(b)) => a.cmp(&b) as i32,
                    (Value::Long(a), Value::Long(b)) => a.cmp(&b) as i32,
                    // NaN compares as less.
                    (Value::Double(a), Value::Double(b)) => a.partial_cmp(&b).map_or(-1, |o| o as i32),
                    (a, b) => return Err(malformed(format!("cannot compare {} with {}", a.kind(), b.kind()))),
                };
                self.push(Value::Int(ordering))?;
            }
            Instruction::Increment { local, delta } => {
                let frame = self.frame_mut()?;
                match frame.locals.get_mut(usize::from(*local)) {
                    Some(Value::Int(v)) => *v = v.wrapping_add(*delta),
                    _ => return Err(malformed(format!("local {} is not an int", local))),
                }
            }
            Instruction::Goto(target) => return Ok(Flow::Jump(*target as usize)),
            Instruction::If { cond, target } => {
                let value = self.pop_int()?;
                if cond.holds(value.cmp(&0)) {
                    return Ok(Flow::Jump(*target as usize));
                }
            }
            Instruction::IfCompare { cond, target } => {
                let right = self.pop()?;
                let left = self.pop()?;
                if compare_values(*cond, left, right)? {
                    return Ok(Flow::Jump(*target as usize));
                }
            }
            Instruction::IfNull(target) => {
                if self.pop()?.is_null() {
                    return Ok(Flow::Jump(*target as usize));
                }
            }
            Instruction::IfNonNull(target) => {
                if !self.pop()?.is_null() {
                    return Ok(Flow::Jump(*target as usize));
                }
            }
            Instruction::New(name) => {
                let class = self.class(name)?;
                if class.is_interface() || class.is_abstract() {
                    return Err(Unwind::Abort(Abort::RuleViolation(format!(
                        "Cannot instantiate abstract class {}",
                        class.original_name()
                    ))));
                }
                self.ensure_initialized(&class)?;
                let object = self.alloc_instance(&class, true)?;
                self.push(Value::Ref(object))?;
            }
            Instruction::NewArray(element) => {
                let length = self.pop_int()?;
                let array = self.alloc_array(element, length)?;
                self.push(array)?;
            }
            Instruction::ArrayLength => {
                let array = self.pop()?;
                let length = self.with_array(array, |values| Ok(values.len() as i32))?;
                self.push(Value::Int(length))?;
            }
            Instruction::ArrayLoad => {
                let index = self.pop_int()?;
                let array = self.pop()?;
                let slot = self.array_slot(array, index)?;
                let value = self.with_array(array, |values| Ok(values[slot]))?;
                self.push(value)?;
            }
            Instruction::ArrayStore => {
                let value = self.pop()?;
                let index = self.pop_int()?;
                let array = self.pop()?;
                let slot = self.array_slot(array, index)?;
                let target = self.object(array)?;
                if let Some(HeapObject {
                    kind: ObjectKind::Array { values, .. },
                    ..
                }) = self.heap.get_mut(target)
                {
                    values[slot] = value;
                }
            }
            Instruction::GetField(field) => {
                let receiver = self.pop()?;
                let target = self.object(receiver)?;
                let key = self.field_key(field)?;
                let value = self
                    .heap
                    .get(target)
                    .and_then(|o| o.field(&key))
                    .unwrap_or_else(|| Value::default_for(&field.descriptor));
                self.push(value)?;
            }
            Instruction::PutField(field) => {
                let value = self.pop()?;
                let receiver = self.pop()?;
                let target = self.object(receiver)?;
                let key = self.field_key(field)?;
                self.set_field(target, key, value)?;
            }
            Instruction::GetStatic(field) => {
                let owner = self.static_owner(field)?;
                let value = self
                    .static_field(&owner, &field.name)
                    .unwrap_or_else(|| Value::default_for(&field.descriptor));
                self.push(value)?;
            }
            Instruction::PutStatic(field) => {
                let value = self.pop()?;
                let owner = self.static_owner(field)?;
                self.set_static(&owner, &field.name, value);
            }
            Instruction::Invoke { kind, method } => return self.invoke_instruction(*kind, method),
            Instruction::CheckCast(target) => {
                let value = self.pop()?;
                if let Value::Ref(object) = value {
                    if !self.is_instance(object, target) {
                        let from = self.type_name(object);
                        let to = original_type_name(target);
                        return Err(self.throwable(
                            CLASS_CAST,
                            Some(format!("class {} cannot be cast to class {}", from, to)),
                        ));
                    }
                }
                self.push(value)?;
            }
            Instruction::InstanceOf(target) => {
                let result = match self.pop()? {
                    Value::Ref(object) => self.is_instance(object, target),
                    _ => false,
                };
                self.push(Value::Int(i32::from(result)))?;
            }
            Instruction::Throw => {
                let value = self.pop()?;
                let thrown = self.object(value)?;
                return Err(Unwind::Throw(thrown));
            }
            // Execution is single threaded; only the null check remains.
            Instruction::MonitorEnter | Instruction::MonitorExit => {
                let value = self.pop()?;
                self.object(value)?;
            }
            Instruction::Return => return Ok(Flow::Return(None)),
            Instruction::ReturnValue => {
                let value = self.pop()?;
                return Ok(Flow::Return(Some(value)));
            }
        }
        Ok(Flow::Next)
    }

    fn invoke_instruction(&mut self, kind: InvokeKind, target: &MethodRef) -> Result<Flow, Unwind> {
        let owner = self.class(&target.owner)?;
        let declared = owner
            .find_method(&target.name, &target.descriptor)
            .ok_or_else(|| missing_member(&target.owner, &target.name, &target.descriptor))?;
        if declared.is_static() != (kind == InvokeKind::Static) {
            return Err(malformed(format!("{:?} call to {}", kind, declared.qualified_name)));
        }
        let args = self.pop_args(declared.call_slots())?;
        let receiver = args.first().copied().unwrap_or(Value::Null);
        let method = match kind {
            InvokeKind::Static => {
                let declaring = self.class(&declared.owner)?;
                self.ensure_initialized(&declaring)?;
                declared
            }
            InvokeKind::Special => {
                self.object(receiver)?;
                declared
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                let receiver = self.object(receiver)?;
                let class = self.object_class(receiver)?;
                class
                    .find_method(&target.name, &target.descriptor)
                    .ok_or_else(|| missing_member(&class.name, &target.name, &target.descriptor))?
            }
        };
        if method.is_native() {
            let result = self.call_native(&method, &args)?;
            if let Some(value) = result {
                self.push(value)?;
            }
            return Ok(Flow::Next);
        }
        if method.code.is_none() {
            return Err(missing_member(&method.owner, &method.name, &method.descriptor));
        }
        Ok(Flow::Call(method, args))
    }

    fn constant(&mut self, constant: &Constant) -> Result<Value, Unwind> {
        Ok(match constant {
            Constant::Null => Value::Null,
            Constant::Int(v) => Value::Int(*v),
            Constant::Long(v) => Value::Long(*v),
            Constant::Double(bits) => Value::Double(f64::from_bits(*bits)),
            Constant::String(text) => self.intern(text)?,
            Constant::Class(name) => self.class_handle(name)?,
        })
    }

    fn arith(&mut self, op: ArithOp, left: Value, right: Value) -> Result<Value, Unwind> {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => {
                let value = match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div | ArithOp::Rem if b == 0 => {
                        return Err(self.throwable(ARITHMETIC, Some("/ by zero".to_string())))
                    }
                    ArithOp::Div => a.wrapping_div(b),
                    ArithOp::Rem => a.wrapping_rem(b),
                    ArithOp::And => a & b,
                    ArithOp::Or => a | b,
                    ArithOp::Xor => a ^ b,
                    ArithOp::Shl => a.wrapping_shl(b as u32 & 31),
                    ArithOp::Shr => a.wrapping_shr(b as u32 & 31),
                    ArithOp::UShr => ((a as u32) >> (b as u32 & 31)) as i32,
                };
                Ok(Value::Int(value))
            }
            (Value::Long(a), Value::Int(b)) if matches!(op, ArithOp::Shl | ArithOp::Shr | ArithOp::UShr) => {
                Ok(Value::Long(shift_long(op, a, b as u32)))
            }
            (Value::Long(a), Value::Long(b)) => {
                let value = match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div | ArithOp::Rem if b == 0 => {
                        return Err(self.throwable(ARITHMETIC, Some("/ by zero".to_string())))
                    }
                    ArithOp::Div => a.wrapping_div(b),
                    ArithOp::Rem => a.wrapping_rem(b),
                    ArithOp::And => a & b,
                    ArithOp::Or => a | b,
                    ArithOp::Xor => a ^ b,
                    ArithOp::Shl | ArithOp::Shr | ArithOp::UShr => shift_long(op, a, b as u32),
                };
                Ok(Value::Long(value))
            }
            (Value::Double(a), Value::Double(b)) => {
                let value = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Rem => a % b,
                    _ => return Err(malformed(format!("{:?} is not defined on doubles", op))),
                };
                Ok(Value::Double(value))
            }
            (a, b) => Err(malformed(format!(
                "{:?} on mismatched operands {} and {}",
                op,
                a.kind(),
                b.kind()
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Classes and statics
    // -------------------------------------------------------------------------

    /// Load a class by runtime name.
    pub(crate) fn class(&mut self, name: &str) -> Result<Arc<RuntimeClass>, Unwind> {
        Ok(self.loader.load_runtime(name)?.class)
    }

    fn object_class(&self, object: ObjectRef) -> Result<Arc<RuntimeClass>, Unwind> {
        self.heap
            .get(object)
            .map(|o| Arc::clone(&o.class))
            .ok_or_else(|| internal(format!("dangling reference {}", object.0)))
    }

    /// Run static initialization of `class` and its super classes once.
    ///
    /// A class whose initializer threw stays erroneous for the rest of the
    /// run: later uses raise `NoClassDefFoundError`.
    pub(crate) fn ensure_initialized(&mut self, class: &Arc<RuntimeClass>) -> Result<(), Unwind> {
        if self.failed_initializers.contains(&class.name) {
            let message = format!("Could not initialize class {}", original_type_name(&class.name));
            return Err(self.throwable(NO_CLASS_DEF_FOUND, Some(message)));
        }
        if !self.initialized.insert(class.name.clone()) {
            return Ok(());
        }
        let result = self.initialize(class);
        if let Err(Unwind::Throw(_)) = &result {
            debug!(class = %class.name, "class initialization failed");
            self.failed_initializers.insert(class.name.clone());
        }
        result
    }

    fn initialize(&mut self, class: &Arc<RuntimeClass>) -> Result<(), Unwind> {
        if let Some(super_class) = &class.super_class {
            self.ensure_initialized(super_class)?;
        }
        let mut values = BTreeMap::new();
        for field in class.fields.iter().filter(|f| f.access.is_static()) {
            let value = match &field.initial {
                Some(constant) => self.constant(constant)?,
                None => Value::default_for(&field.descriptor),
            };
            values.insert(field.name.clone(), value);
        }
        self.statics.insert(class.name.clone(), values);
        if let Some(initializer) = class.declared_method(CLASS_INITIALIZER, "()V").cloned() {
            debug!(class = %class.name, "running class initializer");
            self.invoke(&initializer, Vec::new())?;
        }
        Ok(())
    }

    fn static_owner(&mut self, field: &FieldRef) -> Result<String, Unwind> {
        let class = self.class(&field.owner)?;
        let owner = match class.field_owner(&field.name, true) {
            Some((owner, _)) => owner.name.clone(),
            None => return Err(missing_member(&field.owner, &field.name, &field.descriptor)),
        };
        let owner_class = self.class(&owner)?;
        self.ensure_initialized(&owner_class)?;
        Ok(owner)
    }

    pub(crate) fn static_field(&self, class: &str, name: &str) -> Option<Value> {
        self.statics.get(class)?.get(name).copied()
    }

    pub(crate) fn set_static(&mut self, class: &str, name: &str, value: Value) {
        self.statics
            .entry(class.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    fn field_key(&mut self, field: &FieldRef) -> Result<String, Unwind> {
        let class = self.class(&field.owner)?;
        match class.field_owner(&field.name, false) {
            Some((owner, _)) => Ok(format!("{}.{}", owner.name, field.name)),
            None => Err(missing_member(&field.owner, &field.name, &field.descriptor)),
        }
    }

    pub(crate) fn get_field(&self, object: ObjectRef, owner: &str, name: &str) -> Option<Value> {
        self.heap.get(object)?.field(&format!("{}.{}", owner, name))
    }

    pub(crate) fn set_field(&mut self, object: ObjectRef, key: String, value: Value) -> Result<(), Unwind> {
        match self.heap.get_mut(object).map(|o| &mut o.kind) {
            Some(ObjectKind::Plain { fields }) => {
                fields.insert(key, value);
                Ok(())
            }
            Some(_) => Err(malformed(format!("object has no field {}", key))),
            None => Err(internal(format!("dangling reference {}", object.0))),
        }
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    /// Allocate an instance of `class` with zeroed fields. `hashed` assigns
    /// the identity hash right away.
    pub(crate) fn alloc_instance(&mut self, class: &Arc<RuntimeClass>, hashed: bool) -> Result<ObjectRef, Unwind> {
        let kind = if class.is_subclass_of(STRING) {
            ObjectKind::Str(String::new())
        } else if class.is_subclass_of(STRING_BUILDER) {
            ObjectKind::Builder(String::new())
        } else if class.is_subclass_of(RANDOM) {
            ObjectKind::Random(SeededRandom::new([0u8; 32]))
        } else {
            let fields = class
                .instance_fields()
                .into_iter()
                .map(|(owner, f)| (format!("{}.{}", owner, f.name), Value::default_for(&f.descriptor)))
                .collect();
            ObjectKind::Plain { fields }
        };
        let object = self.heap.alloc(Arc::clone(class), kind, hashed);
        if class.is_subclass_of(THROWABLE) {
            let trace = self.capture_trace();
            if let Some(o) = self.heap.get_mut(object) {
                o.trace = trace;
            }
        }
        Ok(object)
    }

    fn alloc_array(&mut self, element: &str, length: i32) -> Result<Value, Unwind> {
        if length < 0 {
            return Err(self.throwable(NEGATIVE_ARRAY_SIZE, Some(length.to_string())));
        }
        if length > MAX_ARRAY_LENGTH {
            return Err(self.throwable(
                OUT_OF_MEMORY,
                Some(format!("Requested array size {} exceeds the sandbox limit", length)),
            ));
        }
        let values = vec![Value::default_for(element); length as usize];
        self.new_array(element, values)
    }

    /// Allocate an array holding `values`.
    pub(crate) fn new_array(&mut self, element: &str, values: Vec<Value>) -> Result<Value, Unwind> {
        let class = self.class(OBJECT)?;
        let kind = ObjectKind::Array {
            element: element.to_string(),
            values,
        };
        Ok(Value::Ref(self.heap.alloc(class, kind, false)))
    }

    pub(crate) fn new_string(&mut self, text: String) -> Result<Value, Unwind> {
        let class = self.class(STRING)?;
        Ok(Value::Ref(self.heap.alloc(class, ObjectKind::Str(text), false)))
    }

    /// String constants are shared per execution.
    pub(crate) fn intern(&mut self, text: &str) -> Result<Value, Unwind> {
        if let Some(existing) = self.heap.interned(text) {
            return Ok(Value::Ref(existing));
        }
        let value = self.new_string(text.to_string())?;
        if let Value::Ref(r) = value {
            self.heap.intern(text.to_string(), r);
        }
        Ok(value)
    }

    /// The handle of a class or array type, by runtime name.
    pub(crate) fn class_handle(&mut self, name: &str) -> Result<Value, Unwind> {
        if let Some(existing) = self.heap.class_handle(name) {
            return Ok(Value::Ref(existing));
        }
        if !name.starts_with('[') {
            self.class(name)?;
        }
        let class = self.class(CLASS)?;
        let handle = self.heap.alloc(class, ObjectKind::ClassHandle(name.to_string()), false);
        self.heap.register_class_handle(name.to_string(), handle);
        Ok(Value::Ref(handle))
    }

    pub(crate) fn identity_hash(&mut self, object: ObjectRef) -> Result<i32, Unwind> {
        self.heap
            .identity_hash(object)
            .ok_or_else(|| internal(format!("dangling reference {}", object.0)))
    }

    // -------------------------------------------------------------------------
    // Host-raised throwables
    // -------------------------------------------------------------------------

    /// Create a throwable of `class` with `message`, without running its
    /// constructor, ready to be returned as an error.
    pub(crate) fn throwable(&mut self, class: &str, message: Option<String>) -> Unwind {
        match self.make_throwable(class, message) {
            Ok(thrown) => Unwind::Throw(thrown),
            Err(error) => error,
        }
    }

    fn make_throwable(&mut self, class: &str, message: Option<String>) -> Result<ObjectRef, Unwind> {
        let class = self.class(class)?;
        let message = match message {
            Some(text) => self.new_string(text)?,
            None => Value::Null,
        };
        let thrown = self.alloc_instance(&class, false)?;
        self.set_field(thrown, format!("{}.{}", THROWABLE, THROWABLE_MESSAGE), message)?;
        Ok(thrown)
    }

    pub(crate) fn null_pointer(&mut self) -> Unwind {
        self.throwable(NULL_POINTER, None)
    }

    fn capture_trace(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| StackFrame {
                class_name: from_sandboxed(&frame.method.owner)
                    .unwrap_or(&frame.method.owner)
                    .to_string(),
                method_name: frame.method.name.clone(),
                line: frame.method.code.as_ref().and_then(|c| c.line_for(frame.pc as u32)),
            })
            .collect()
    }

    /// True if the throwable must not be intercepted by sandboxed code.
    pub(crate) fn is_fatal(&self, thrown: ObjectRef) -> bool {
        self.heap.get(thrown).is_some_and(|o| {
            is_fatal_error(&o.class.name) || FATAL_ERRORS.iter().any(|fatal| o.class.is_subclass_of(fatal))
        })
    }

    /// Convert a sandboxed throwable into its host representation, with
    /// original class names. The cause chain stops at a repeated throwable
    /// or after [`MAX_CAUSE_DEPTH`] links.
    pub fn host_exception(&self, thrown: ObjectRef) -> HostException {
        let mut chain = vec![thrown];
        let mut seen = HashSet::from([thrown]);
        let mut current = thrown;
        while chain.len() < MAX_CAUSE_DEPTH {
            match self.get_field(current, THROWABLE, THROWABLE_CAUSE) {
                Some(Value::Ref(cause)) if seen.insert(cause) => {
                    chain.push(cause);
                    current = cause;
                }
                _ => break,
            }
        }
        let mut cause: Option<HostException> = None;
        for link in chain.into_iter().rev() {
            let mut exception = self.host_exception_link(link);
            exception.cause = cause.take().map(Box::new);
            cause = Some(exception);
        }
        cause.unwrap_or_else(|| self.host_exception_link(thrown))
    }

    /// One throwable of a cause chain, without its cause.
    fn host_exception_link(&self, thrown: ObjectRef) -> HostException {
        let Some(object) = self.heap.get(thrown) else {
            return HostException {
                class_name: "lang/Throwable".to_string(),
                message: None,
                stack_trace: Vec::new(),
                cause: None,
                ancestry: Vec::new(),
            };
        };
        let message = self
            .get_field(thrown, THROWABLE, THROWABLE_MESSAGE)
            .and_then(|v| self.string_content(v));
        HostException {
            class_name: self.loader.original_exception_name(&object.class.name),
            message,
            stack_trace: object.trace.clone(),
            cause: None,
            ancestry: object
                .class
                .ancestry()
                .iter()
                .map(|name| from_sandboxed(name).unwrap_or(name).to_string())
                .collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Value helpers
    // -------------------------------------------------------------------------

    /// The object behind a reference; null raises `NullPointerException`.
    pub(crate) fn object(&mut self, value: Value) -> Result<ObjectRef, Unwind> {
        match value {
            Value::Ref(object) => Ok(object),
            Value::Null => Err(self.null_pointer()),
            other => Err(malformed(format!("expected reference, found {}", other.kind()))),
        }
    }

    /// Content of a string object.
    pub(crate) fn string_content(&self, value: Value) -> Option<String> {
        match &self.heap.get(value.as_ref()?)?.kind {
            ObjectKind::Str(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Content of a string argument; null raises `NullPointerException`.
    pub(crate) fn string_arg(&mut self, value: Value) -> Result<String, Unwind> {
        let object = self.object(value)?;
        match self.heap.get(object).map(|o| &o.kind) {
            Some(ObjectKind::Str(text)) => Ok(text.clone()),
            _ => {
                let from = self.type_name(object);
                Err(self.throwable(
                    CLASS_CAST,
                    Some(format!("class {} cannot be cast to class lang/String", from)),
                ))
            }
        }
    }

    /// `String.valueOf` of any value.
    pub(crate) fn display(&mut self, value: Value) -> Result<String, Unwind> {
        match value {
            Value::Null => Ok("null".to_string()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Long(v) => Ok(v.to_string()),
            Value::Double(v) => Ok(crate::natives::format_double(v)),
            Value::Ref(_) => {
                if let Some(text) = self.string_content(value) {
                    return Ok(text);
                }
                match self.invoke_virtual(value, "toString", "()Lsandbox/lang/String;", Vec::new())? {
                    Some(result) => self.string_arg(result),
                    None => Err(internal("toString returned nothing")),
                }
            }
        }
    }

    fn with_array<T>(&mut self, array: Value, f: impl FnOnce(&[Value]) -> Result<T, Unwind>) -> Result<T, Unwind> {
        let object = self.object(array)?;
        match self.heap.get(object).map(|o| &o.kind) {
            Some(ObjectKind::Array { values, .. }) => f(values),
            _ => Err(malformed("array operation on a non-array")),
        }
    }

    fn array_slot(&mut self, array: Value, index: i32) -> Result<usize, Unwind> {
        let length = self.with_array(array, |values| Ok(values.len()))?;
        if index < 0 || index as usize >= length {
            return Err(self.throwable(
                ARRAY_INDEX_OUT_OF_BOUNDS,
                Some(format!("Index {} out of bounds for length {}", index, length)),
            ));
        }
        Ok(index as usize)
    }

    /// Elements of an array object.
    pub(crate) fn array_values(&self, value: Value) -> Option<(&str, &[Value])> {
        match &self.heap.get(value.as_ref()?)?.kind {
            ObjectKind::Array { element, values } => Some((element.as_str(), values.as_slice())),
            _ => None,
        }
    }

    pub(crate) fn array_values_mut(&mut self, value: Value) -> Option<&mut Vec<Value>> {
        match &mut self.heap.get_mut(value.as_ref()?)?.kind {
            ObjectKind::Array { values, .. } => Some(values),
            _ => None,
        }
    }

    /// `instanceof` against a class name or array descriptor.
    pub(crate) fn is_instance(&self, object: ObjectRef, target: &str) -> bool {
        let Some(heap_object) = self.heap.get(object) else {
            return false;
        };
        match &heap_object.kind {
            ObjectKind::Array { element, .. } => {
                if target == OBJECT {
                    return true;
                }
                let Some(target_element) = target.strip_prefix('[') else {
                    return false;
                };
                if target_element == element.as_str() {
                    return true;
                }
                // Reference arrays are covariant over Object.
                target_element == format!("L{};", OBJECT) && (element.starts_with('L') || element.starts_with('['))
            }
            _ => !target.starts_with('[') && heap_object.class.is_subclass_of(target),
        }
    }

    /// Original type name of an object for messages.
    pub(crate) fn type_name(&self, object: ObjectRef) -> String {
        match self.heap.get(object) {
            Some(HeapObject {
                kind: ObjectKind::Array { element, .. },
                ..
            }) => original_type_name(&format!("[{}", element)),
            Some(o) => o.class.original_name().to_string(),
            None => "?".to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Determinism sources
    // -------------------------------------------------------------------------

    pub(crate) fn clock_mut(&mut self) -> Result<&mut DeterministicClock, Unwind> {
        self.clock
            .as_mut()
            .ok_or_else(|| Unwind::Abort(Abort::RuleViolation("Clock access is disabled".to_string())))
    }

    /// Generator for a new `util/Random` instance without an explicit seed.
    pub(crate) fn next_random_instance(&mut self) -> Result<SeededRandom, Unwind> {
        let seed = self
            .random_seed
            .ok_or_else(|| Unwind::Abort(Abort::RuleViolation("Randomness is disabled".to_string())))?;
        self.random_instances += 1;
        Ok(SeededRandom::derive(&seed, self.random_instances))
    }

    pub(crate) fn shared_random(&mut self) -> Result<&mut SeededRandom, Unwind> {
        self.shared_random
            .as_mut()
            .ok_or_else(|| Unwind::Abort(Abort::RuleViolation("Randomness is disabled".to_string())))
    }
}

fn missing_member(class: &str, name: &str, descriptor: &str) -> Unwind {
    Unwind::Abort(Abort::ClassLoading(LoadError::MissingMember {
        class_name: class.to_string(),
        member: format!("{}{}", name, descriptor),
    }))
}

fn shift_long(op: ArithOp, value: i64, amount: u32) -> i64 {
    let amount = amount & 63;
    match op {
        ArithOp::Shl => value.wrapping_shl(amount),
        ArithOp::Shr => value.wrapping_shr(amount),
        _ => ((value as u64) >> amount) as i64,
    }
}

fn convert(value: Value, from: NumericType, to: NumericType) -> Result<Value, Unwind> {
    let converted = match (value, from, to) {
        (Value::Int(v), NumericType::Int, NumericType::Int) => Value::Int(v),
        (Value::Int(v), NumericType::Int, NumericType::Long) => Value::Long(i64::from(v)),
        (Value::Int(v), NumericType::Int, NumericType::Double) => Value::Double(f64::from(v)),
        (Value::Long(v), NumericType::Long, NumericType::Int) => Value::Int(v as i32),
        (Value::Long(v), NumericType::Long, NumericType::Long) => Value::Long(v),
        (Value::Long(v), NumericType::Long, NumericType::Double) => Value::Double(v as f64),
        // Saturating, NaN to zero.
        (Value::Double(v), NumericType::Double, NumericType::Int) => Value::Int(v as i32),
        (Value::Double(v), NumericType::Double, NumericType::Long) => Value::Long(v as i64),
        (Value::Double(v), NumericType::Double, NumericType::Double) => Value::Double(v),
        (other, from, to) => {
            return Err(malformed(format!(
                "cannot convert {} as {:?} to {:?}",
                other.kind(),
                from,
                to
            )))
        }
    };
    Ok(converted)
}

fn compare_values(cond: Condition, left: Value, right: Value) -> Result<bool, Unwind> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(&b)),
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(&b)),
        (Value::Double(a), Value::Double(b)) => match a.partial_cmp(&b) {
            Some(ordering) => Some(ordering),
            None => return Ok(cond == Condition::Ne),
        },
        (Value::Ref(_) | Value::Null, Value::Ref(_) | Value::Null) => {
            return match cond {
                Condition::Eq => Ok(left.same_as(right)),
                Condition::Ne => Ok(!left.same_as(right)),
                _ => Err(malformed(format!("{:?} is not defined on references", cond))),
            }
        }
        (a, b) => return Err(malformed(format!("cannot compare {} with {}", a.kind(), b.kind()))),
    };
    Ok(ordering.is_some_and(|o| cond.holds(o)))
}

/// `sandbox/com/acme/Sum` -> `com/acme/Sum`, `[Lsandbox/lang/String;` ->
/// `[Llang/String;`.
fn original_type_name(name: &str) -> String {
    if name.starts_with('[') {
        return name.replace("Lsandbox/", "L");
    }
    from_sandboxed(name).unwrap_or(name).to_string()
}
