//! Assembler for class files.
//!
//! [`ClassBuilder`] collects fields and methods; method bodies are written
//! with a [`CodeBuilder`] that supports forward and backward labels, handler
//! ranges and line numbers. Label resolution happens when the method is
//! finished, and any unresolved label surfaces as an error from
//! [`ClassBuilder::build`].
//!
//! # Example
//!
//! ```
//! use sandbox_types::builder::ClassBuilder;
//! use sandbox_types::class_file::{AccessFlags, Condition};
//!
//! let class = ClassBuilder::new("com/acme/Loop")
//!     .method("spin", "()V", AccessFlags::PUBLIC | AccessFlags::STATIC, |code| {
//!         let top = code.new_label();
//!         code.bind(top);
//!         code.goto(top);
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(class.methods.len(), 1);
//! ```

use anyhow::{anyhow, Result};

use crate::class_file::{
    AccessFlags, ArithOp, ClassFile, Code, Condition, Constant, ExceptionHandler, FieldDef,
    FieldRef, Instruction, InvokeKind, LineNumber, MethodDef, MethodRef, NumericType,
};
use crate::descriptor::MethodDescriptor;
use crate::encoding::encode_class;

pub const OBJECT_CLASS: &str = "lang/Object";

/// A position in a method body, resolved when the method is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: Option<String>,
}

/// Builds one method body.
pub struct CodeBuilder {
    instructions: Vec<Instruction>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
    handlers: Vec<PendingHandler>,
    lines: Vec<LineNumber>,
    max_locals: u16,
}

impl CodeBuilder {
    /// `param_slots` includes the receiver for instance methods.
    pub fn new(param_slots: u16) -> Self {
        Self {
            instructions: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            max_locals: param_slots,
        }
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.instructions.len() as u32);
        self
    }

    /// Index the next emitted instruction will get.
    pub fn position(&self) -> u32 {
        self.instructions.len() as u32
    }

    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        match &instruction {
            Instruction::Load(slot) | Instruction::Store(slot) => self.touch_local(*slot),
            Instruction::Increment { local, .. } => self.touch_local(*local),
            _ => {}
        }
        self.instructions.push(instruction);
        self
    }

    fn touch_local(&mut self, slot: u16) {
        self.max_locals = self.max_locals.max(slot + 1);
    }

    fn emit_branch(&mut self, instruction: Instruction, label: Label) -> &mut Self {
        self.fixups.push((self.instructions.len(), label));
        self.instructions.push(instruction);
        self
    }

    /// Record that instructions from here on belong to `line`.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.lines.push(LineNumber {
            start_pc: self.position(),
            line,
        });
        self
    }

    /// Register an exception handler covering `[start, end)`.
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch_type: Option<&str>) -> &mut Self {
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    // -------------------------------------------------------------------------
    // Convenience emitters
    // -------------------------------------------------------------------------

    pub fn push_int(&mut self, value: i32) -> &mut Self {
        self.emit(Instruction::Push(Constant::Int(value)))
    }

    pub fn push_long(&mut self, value: i64) -> &mut Self {
        self.emit(Instruction::Push(Constant::Long(value)))
    }

    pub fn push_double(&mut self, value: f64) -> &mut Self {
        self.emit(Instruction::Push(Constant::double(value)))
    }

    pub fn push_string(&mut self, value: &str) -> &mut Self {
        self.emit(Instruction::Push(Constant::String(value.to_string())))
    }

    pub fn push_class(&mut self, name: &str) -> &mut Self {
        self.emit(Instruction::Push(Constant::Class(name.to_string())))
    }

    pub fn push_null(&mut self) -> &mut Self {
        self.emit(Instruction::Push(Constant::Null))
    }

    pub fn load(&mut self, slot: u16) -> &mut Self {
        self.emit(Instruction::Load(slot))
    }

    pub fn store(&mut self, slot: u16) -> &mut Self {
        self.emit(Instruction::Store(slot))
    }

    pub fn arith(&mut self, op: ArithOp) -> &mut Self {
        self.emit(Instruction::Arith(op))
    }

    pub fn convert(&mut self, from: NumericType, to: NumericType) -> &mut Self {
        self.emit(Instruction::Convert { from, to })
    }

    pub fn increment(&mut self, local: u16, delta: i32) -> &mut Self {
        self.emit(Instruction::Increment { local, delta })
    }

    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instruction::Goto(0), label)
    }

    pub fn if_zero(&mut self, cond: Condition, label: Label) -> &mut Self {
        self.emit_branch(Instruction::If { cond, target: 0 }, label)
    }

    pub fn if_cmp(&mut self, cond: Condition, label: Label) -> &mut Self {
        self.emit_branch(Instruction::IfCompare { cond, target: 0 }, label)
    }

    pub fn if_null(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instruction::IfNull(0), label)
    }

    pub fn if_non_null(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instruction::IfNonNull(0), label)
    }

    pub fn new_object(&mut self, class: &str) -> &mut Self {
        self.emit(Instruction::New(class.to_string()))
    }

    pub fn new_array(&mut self, element: &str) -> &mut Self {
        self.emit(Instruction::NewArray(element.to_string()))
    }

    pub fn get_field(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.emit(Instruction::GetField(FieldRef::new(owner, name, descriptor)))
    }

    pub fn put_field(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.emit(Instruction::PutField(FieldRef::new(owner, name, descriptor)))
    }

    pub fn get_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.emit(Instruction::GetStatic(FieldRef::new(owner, name, descriptor)))
    }

    pub fn put_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.emit(Instruction::PutStatic(FieldRef::new(owner, name, descriptor)))
    }

    pub fn invoke(&mut self, kind: InvokeKind, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.emit(Instruction::Invoke {
            kind,
            method: MethodRef::new(owner, name, descriptor),
        })
    }

    pub fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(InvokeKind::Static, owner, name, descriptor)
    }

    pub fn invoke_virtual(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(InvokeKind::Virtual, owner, name, descriptor)
    }

    pub fn invoke_special(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(InvokeKind::Special, owner, name, descriptor)
    }

    pub fn invoke_interface(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(InvokeKind::Interface, owner, name, descriptor)
    }

    pub fn check_cast(&mut self, class: &str) -> &mut Self {
        self.emit(Instruction::CheckCast(class.to_string()))
    }

    pub fn instance_of(&mut self, class: &str) -> &mut Self {
        self.emit(Instruction::InstanceOf(class.to_string()))
    }

    pub fn throw(&mut self) -> &mut Self {
        self.emit(Instruction::Throw)
    }

    pub fn return_void(&mut self) -> &mut Self {
        self.emit(Instruction::Return)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.emit(Instruction::ReturnValue)
    }

    fn resolve(&self, label: Label) -> Result<u32> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| anyhow!("label {} was never bound", label.0))
    }

    /// Resolve labels and produce the method body.
    pub fn finish(mut self) -> Result<Code> {
        for (index, label) in std::mem::take(&mut self.fixups) {
            let target = self.resolve(label)?;
            if let Some(slot) = self.instructions[index].branch_target_mut() {
                *slot = target;
            }
        }
        let handlers = self
            .handlers
            .iter()
            .map(|h| {
                Ok(ExceptionHandler {
                    start: self.resolve(h.start)?,
                    end: self.resolve(h.end)?,
                    handler: self.resolve(h.handler)?,
                    catch_type: h.catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Code {
            max_locals: self.max_locals,
            instructions: self.instructions,
            handlers,
            lines: self.lines,
        })
    }
}

/// Builds a class file.
pub struct ClassBuilder {
    class: ClassFile,
    errors: Vec<String>,
}

impl ClassBuilder {
    /// A public class extending `lang/Object`.
    pub fn new(name: &str) -> Self {
        Self {
            class: ClassFile {
                name: name.to_string(),
                super_name: Some(OBJECT_CLASS.to_string()),
                interfaces: Vec::new(),
                access: AccessFlags::PUBLIC,
                source_file: None,
                fields: Vec::new(),
                methods: Vec::new(),
            },
            errors: Vec::new(),
        }
    }

    /// A public interface.
    pub fn interface(name: &str) -> Self {
        Self::new(name).access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.class.super_name = Some(super_name.to_string());
        self
    }

    /// Remove the super class; only a hierarchy root has none.
    pub fn root(mut self) -> Self {
        self.class.super_name = None;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.class.interfaces.push(interface.to_string());
        self
    }

    pub fn access(mut self, access: AccessFlags) -> Self {
        self.class.access = access;
        self
    }

    pub fn source_file(mut self, file: &str) -> Self {
        self.class.source_file = Some(file.to_string());
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str, access: AccessFlags) -> Self {
        self.class.fields.push(FieldDef {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            initial: None,
        });
        self
    }

    /// A static field with a constant initial value.
    pub fn constant(mut self, name: &str, descriptor: &str, value: Constant) -> Self {
        self.class.fields.push(FieldDef {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
            initial: Some(value),
        });
        self
    }

    /// Add a method whose body is written by `body`.
    pub fn method(mut self, name: &str, descriptor: &str, access: AccessFlags, body: impl FnOnce(&mut CodeBuilder)) -> Self {
        let slots = match MethodDescriptor::parse(descriptor) {
            Ok(parsed) => parsed.arg_count() as u16 + u16::from(!access.is_static()),
            Err(e) => {
                self.errors.push(format!("{}.{}: {}", self.class.name, name, e));
                return self;
            }
        };
        let mut code = CodeBuilder::new(slots);
        body(&mut code);
        match code.finish() {
            Ok(code) => self.class.methods.push(MethodDef {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                access,
                code: Some(code),
            }),
            Err(e) => self
                .errors
                .push(format!("{}.{}{}: {}", self.class.name, name, descriptor, e)),
        }
        self
    }

    /// Add a method without a body (native or abstract).
    pub fn bodyless_method(mut self, name: &str, descriptor: &str, access: AccessFlags) -> Self {
        self.class.methods.push(MethodDef {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            code: None,
        });
        self
    }

    pub fn native_method(self, name: &str, descriptor: &str, access: AccessFlags) -> Self {
        self.bodyless_method(name, descriptor, access | AccessFlags::NATIVE)
    }

    pub fn abstract_method(self, name: &str, descriptor: &str) -> Self {
        self.bodyless_method(name, descriptor, AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
    }

    /// `<init>()V` delegating to the super class constructor.
    pub fn default_constructor(self) -> Self {
        let super_name = self
            .class
            .super_name
            .clone()
            .unwrap_or_else(|| OBJECT_CLASS.to_string());
        self.method("<init>", "()V", AccessFlags::PUBLIC, |code| {
            code.load(0)
                .invoke_special(&super_name, "<init>", "()V")
                .return_void();
        })
    }

    pub fn build(self) -> Result<ClassFile> {
        if !self.errors.is_empty() {
            return Err(anyhow!("{}", self.errors.join("; ")));
        }
        Ok(self.class)
    }

    /// Build and encode in one step.
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        let class = self.build()?;
        encode_class(&class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve_forward_and_backward() {
        let class = ClassBuilder::new("com/A")
            .method("f", "(I)I", AccessFlags::STATIC, |code| {
                let top = code.new_label();
                let done = code.new_label();
                code.bind(top);
                code.load(0).if_zero(Condition::Eq, done);
                code.increment(0, -1).goto(top);
                code.bind(done);
                code.load(0).return_value();
            })
            .build()
            .unwrap();
        let insns = &class.methods[0].code.as_ref().unwrap().instructions;
        assert_eq!(insns[1], Instruction::If { cond: Condition::Eq, target: 4 });
        assert_eq!(insns[3], Instruction::Goto(0));
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let result = ClassBuilder::new("com/A")
            .method("f", "()V", AccessFlags::STATIC, |code| {
                let nowhere = code.new_label();
                code.goto(nowhere);
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_max_locals_covers_parameters_and_stores() {
        let class = ClassBuilder::new("com/A")
            .method("f", "(II)V", AccessFlags::PUBLIC, |code| {
                code.push_int(1).store(5).return_void();
            })
            .build()
            .unwrap();
        assert_eq!(class.methods[0].code.as_ref().unwrap().max_locals, 6);

        let class = ClassBuilder::new("com/B")
            .method("g", "(JJ)V", AccessFlags::PUBLIC, |code| {
                code.return_void();
            })
            .build()
            .unwrap();
        assert_eq!(class.methods[0].code.as_ref().unwrap().max_locals, 3);
    }

    #[test]
    fn test_handlers_and_lines() {
        let class = ClassBuilder::new("com/A")
            .method("f", "()V", AccessFlags::STATIC, |code| {
                let start = code.new_label();
                let end = code.new_label();
                let handler = code.new_label();
                let exit = code.new_label();
                code.line(7);
                code.bind(start);
                code.push_null().throw();
                code.bind(end);
                code.goto(exit);
                code.bind(handler);
                code.line(9);
                code.store(0);
                code.bind(exit);
                code.return_void();
                code.try_catch(start, end, handler, Some("lang/Throwable"));
            })
            .build()
            .unwrap();
        let body = class.methods[0].code.as_ref().unwrap();
        assert_eq!(
            body.handlers,
            vec![ExceptionHandler {
                start: 0,
                end: 2,
                handler: 3,
                catch_type: Some("lang/Throwable".to_string()),
            }]
        );
        assert_eq!(body.line_for(3), Some(9));
    }

    #[test]
    fn test_default_constructor_calls_super() {
        let class = ClassBuilder::new("com/E")
            .extends("lang/RuntimeException")
            .default_constructor()
            .build()
            .unwrap();
        let init = class.method("<init>", "()V").unwrap();
        assert!(init.code.as_ref().unwrap().instructions.contains(&Instruction::Invoke {
            kind: InvokeKind::Special,
            method: MethodRef::new("lang/RuntimeException", "<init>", "()V"),
        }));
    }
}
