//! In-memory model of a sandbox class file.
//!
//! A class file is the unit of loading: one named class with an optional
//! super class, a list of interfaces, fields and methods. Method bodies are
//! expressed in a small stack-machine instruction set whose branch targets
//! are absolute instruction indices.
//!
//! The on-disk encoding lives in [`crate::encoding`]; the assembler that
//! produces these structures from labelled code lives in [`crate::builder`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Access Flags
// =============================================================================

/// Class, field and method access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: AccessFlags = AccessFlags(0x0001);
    pub const PRIVATE: AccessFlags = AccessFlags(0x0002);
    pub const PROTECTED: AccessFlags = AccessFlags(0x0004);
    pub const STATIC: AccessFlags = AccessFlags(0x0008);
    pub const FINAL: AccessFlags = AccessFlags(0x0010);
    pub const SYNCHRONIZED: AccessFlags = AccessFlags(0x0020);
    pub const NATIVE: AccessFlags = AccessFlags(0x0100);
    pub const INTERFACE: AccessFlags = AccessFlags(0x0200);
    pub const ABSTRACT: AccessFlags = AccessFlags(0x0400);
    pub const STRICT: AccessFlags = AccessFlags(0x0800);
    pub const SYNTHETIC: AccessFlags = AccessFlags(0x1000);
    pub const ENUM: AccessFlags = AccessFlags(0x4000);

    pub const fn empty() -> Self {
        AccessFlags(0)
    }

    pub const fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: AccessFlags) -> Self {
        AccessFlags(self.0 | other.0)
    }

    pub const fn without(self, other: AccessFlags) -> Self {
        AccessFlags(self.0 & !other.0)
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

// =============================================================================
// Constants and Operands
// =============================================================================

/// A constant pushed by [`Instruction::Push`] or used as a static field's
/// initial value.
///
/// Doubles are stored as their IEEE-754 bit pattern so that class files have
/// a canonical byte encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Double(u64),
    String(String),
    /// A class literal, resolved to a class handle at runtime.
    Class(String),
}

impl Constant {
    pub fn double(value: f64) -> Self {
        Constant::Double(value.to_bits())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Double(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// Numeric kinds used by arithmetic conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    Int,
    Long,
    Double,
}

/// Binary arithmetic and bitwise operators. Operand kinds must agree,
/// except for shifts whose right operand is always an int.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UShr,
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Condition {
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Condition::Eq => ordering == Equal,
            Condition::Ne => ordering != Equal,
            Condition::Lt => ordering == Less,
            Condition::Ge => ordering != Less,
            Condition::Gt => ordering == Greater,
            Condition::Le => ordering != Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

/// Symbolic reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Symbolic reference to a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// One stack-machine instruction.
///
/// Locals hold one value per slot regardless of its width. Branch targets
/// are absolute indices into the owning method's instruction list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    Push(Constant),
    Load(u16),
    Store(u16),
    Pop,
    Dup,
    Swap,
    Arith(ArithOp),
    Neg,
    Convert { from: NumericType, to: NumericType },
    /// Pops two values of the same numeric kind and pushes -1, 0 or 1.
    Compare,
    Increment { local: u16, delta: i32 },
    Goto(u32),
    /// Compares the int on top of the stack against zero.
    If { cond: Condition, target: u32 },
    /// Compares the two topmost values. References only support `Eq`/`Ne`.
    IfCompare { cond: Condition, target: u32 },
    IfNull(u32),
    IfNonNull(u32),
    New(String),
    /// Pops a length and allocates an array of the given element descriptor.
    NewArray(String),
    ArrayLength,
    ArrayLoad,
    ArrayStore,
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke { kind: InvokeKind, method: MethodRef },
    CheckCast(String),
    InstanceOf(String),
    Throw,
    MonitorEnter,
    MonitorExit,
    Return,
    ReturnValue,
}

impl Instruction {
    /// Branch target of a jump instruction, if any.
    pub fn branch_target(&self) -> Option<u32> {
        match self {
            Instruction::Goto(t)
            | Instruction::If { target: t, .. }
            | Instruction::IfCompare { target: t, .. }
            | Instruction::IfNull(t)
            | Instruction::IfNonNull(t) => Some(*t),
            _ => None,
        }
    }

    /// Mutable access to the branch target of a jump instruction.
    pub fn branch_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Instruction::Goto(t)
            | Instruction::If { target: t, .. }
            | Instruction::IfCompare { target: t, .. }
            | Instruction::IfNull(t)
            | Instruction::IfNonNull(t) => Some(t),
            _ => None,
        }
    }

    /// True when control can never fall through to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Instruction::Goto(_) | Instruction::Throw | Instruction::Return | Instruction::ReturnValue
        )
    }
}

// =============================================================================
// Class Structure
// =============================================================================

/// An exception handler table entry. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    /// `None` catches everything.
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineNumber {
    pub start_pc: u32,
    pub line: u32,
}

/// A method body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Code {
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<ExceptionHandler>,
    pub lines: Vec<LineNumber>,
}

impl Code {
    /// Source line for an instruction index, from the line-number table.
    pub fn line_for(&self, pc: u32) -> Option<u32> {
        self.lines
            .iter()
            .filter(|entry| entry.start_pc <= pc)
            .max_by_key(|entry| entry.start_pc)
            .map(|entry| entry.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    /// Initial value for static fields.
    pub initial: Option<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    /// Absent for native and abstract methods.
    pub code: Option<Code>,
}

impl MethodDef {
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }
}

/// A complete class definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassFile {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: AccessFlags,
    pub source_file: Option<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl ClassFile {
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_holds() {
        use std::cmp::Ordering::*;
        assert!(Condition::Lt.holds(Less));
        assert!(!Condition::Lt.holds(Equal));
        assert!(Condition::Ge.holds(Equal));
        assert!(Condition::Ne.holds(Greater));
        assert!(Condition::Le.holds(Less));
    }

    #[test]
    fn test_line_lookup_uses_nearest_preceding_entry() {
        let code = Code {
            max_locals: 0,
            instructions: vec![Instruction::Nop; 6],
            handlers: vec![],
            lines: vec![
                LineNumber { start_pc: 0, line: 10 },
                LineNumber { start_pc: 3, line: 12 },
            ],
        };
        assert_eq!(code.line_for(0), Some(10));
        assert_eq!(code.line_for(2), Some(10));
        assert_eq!(code.line_for(5), Some(12));
    }

    #[test]
    fn test_access_flags() {
        let flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
        assert!(flags.is_static());
        assert!(!flags.is_native());
        assert!(!flags.without(AccessFlags::STATIC).is_static());
    }

    #[test]
    fn test_double_constant_keeps_bits() {
        let c = Constant::double(-0.0);
        assert_eq!(c.as_f64().map(f64::to_bits), Some((-0.0f64).to_bits()));
    }
}
