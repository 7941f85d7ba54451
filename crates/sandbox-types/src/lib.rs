//! Shared types for the det-sandbox workspace.
//!
//! This crate defines the class-file format executed by the sandbox and the
//! naming conventions that every other crate relies on:
//!
//! - [`class_file`] - classes, fields, methods, instructions and handlers
//! - [`encoding`] - the `SBXC` binary format and `.sar` class archives
//! - [`descriptor`] - field and method descriptor parsing and rewriting
//! - [`names`] - sandbox namespace mapping and exception carrier names
//! - [`builder`] - an assembler with labels for producing class files

pub mod builder;
pub mod class_file;
pub mod descriptor;
pub mod encoding;
pub mod names;

pub use builder::{ClassBuilder, CodeBuilder, Label};
pub use class_file::{
    AccessFlags, ArithOp, ClassFile, Code, Condition, Constant, ExceptionHandler, FieldDef,
    FieldRef, Instruction, InvokeKind, LineNumber, MethodDef, MethodRef, NumericType,
};
pub use descriptor::{DescriptorError, FieldType, MethodDescriptor};
pub use encoding::{content_hash, decode_class, encode_class, ClassArchive, DecodeError};
