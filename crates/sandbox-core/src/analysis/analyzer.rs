//! Reference analysis of class files.
//!
//! Walks a decoded class and records:
//!
//! 1. the super class and interfaces (class-level locations)
//! 2. every class named by field and method descriptors
//! 3. every class, field and method named by instructions, constants and
//!    exception handler catch types
//!
//! Array types are reduced to their element class and primitives are
//! ignored. Descriptors are validated along the way, so a class that
//! analyzes cleanly is structurally well-formed.
//!
//! ## Usage
//!
//! ```
//! use sandbox_core::analysis::AnalysisCache;
//! use sandbox_types::ClassBuilder;
//!
//! let bytes = ClassBuilder::new("com/acme/Empty").to_bytes().unwrap();
//! let cache = AnalysisCache::new();
//! let first = cache.get_or_analyze(&bytes).unwrap();
//! let second = cache.get_or_analyze(&bytes).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&first, &second));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use sandbox_types::descriptor::{referenced_classes, type_operand_class};
use sandbox_types::names::is_valid_class_name;
use sandbox_types::{content_hash, decode_class, ClassFile, Constant, DecodeError, Instruction};

use super::{ClassRepresentation, EntityReference, ReferenceMap};
use crate::messages::SourceLocation;

/// The class bytes could not be analyzed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    Decode(DecodeError),
    Malformed { class_name: String, reason: String },
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Decode(e) => write!(f, "Malformed class file: {}", e),
            AnalysisError::Malformed { class_name, reason } => {
                write!(f, "Malformed class file {}: {}", class_name, reason)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Result of analyzing one class file.
#[derive(Debug, Clone)]
pub struct AnalyzedClass {
    pub class_file: Arc<ClassFile>,
    pub representation: Arc<ClassRepresentation>,
    pub references: ReferenceMap,
    pub content_hash: [u8; 32],
}

impl AnalyzedClass {
    pub fn name(&self) -> &str {
        &self.representation.name
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

struct Walker<'a> {
    class: &'a ClassFile,
    references: ReferenceMap,
}

impl<'a> Walker<'a> {
    fn malformed(&self, reason: impl Into<String>) -> AnalysisError {
        AnalysisError::Malformed {
            class_name: self.class.name.clone(),
            reason: reason.into(),
        }
    }

    fn class_location(&self) -> SourceLocation {
        SourceLocation::class(&self.class.name).in_file(self.class.source_file.clone())
    }

    fn add_class(&mut self, name: &str, location: &SourceLocation) -> Result<(), AnalysisError> {
        if !is_valid_class_name(name) {
            return Err(self.malformed(format!("invalid class name '{}'", name)));
        }
        self.references
            .add(EntityReference::class(name), location.clone());
        Ok(())
    }

    fn add_descriptor(&mut self, descriptor: &str, location: &SourceLocation) -> Result<(), AnalysisError> {
        let classes = referenced_classes(descriptor).map_err(|e| self.malformed(e.to_string()))?;
        for class in classes {
            self.add_class(&class, location)?;
        }
        Ok(())
    }

    fn add_type_operand(&mut self, operand: &str, location: &SourceLocation) -> Result<(), AnalysisError> {
        let class = type_operand_class(operand).map_err(|e| self.malformed(e.to_string()))?;
        match class {
            Some(class) => self.add_class(&class, location),
            None => Ok(()),
        }
    }

    fn add_member(&mut self, owner: &str, name: &str, descriptor: &str, location: &SourceLocation) -> Result<(), AnalysisError> {
        self.add_type_operand(owner, location)?;
        self.add_descriptor(descriptor, location)?;
        self.references
            .add(EntityReference::member(owner, name, descriptor), location.clone());
        Ok(())
    }

    fn walk(mut self) -> Result<ReferenceMap, AnalysisError> {
        let class = self.class;
        if !is_valid_class_name(&class.name) {
            return Err(self.malformed("invalid class name"));
        }
        let header = self.class_location();
        if let Some(super_name) = &class.super_name {
            self.add_class(super_name, &header)?;
        }
        for interface in &class.interfaces {
            self.add_class(interface, &header)?;
        }

        for field in &class.fields {
            let location = header.clone().member(&field.name, &field.descriptor);
            if field.descriptor.starts_with('(') {
                return Err(self.malformed(format!("field {} has a method descriptor", field.name)));
            }
            self.add_descriptor(&field.descriptor, &location)?;
            if let Some(Constant::Class(name)) = &field.initial {
                self.add_type_operand(name, &location)?;
            }
        }

        for method in &class.methods {
            let member = header.clone().member(&method.name, &method.descriptor);
            if !method.descriptor.starts_with('(') {
                return Err(self.malformed(format!("method {} has a field descriptor", method.name)));
            }
            self.add_descriptor(&method.descriptor, &member)?;

            let Some(code) = &method.code else {
                continue;
            };
            for handler in &code.handlers {
                if let Some(catch_type) = &handler.catch_type {
                    let location = member.clone().at_line(code.line_for(handler.handler));
                    self.add_class(catch_type, &location)?;
                }
            }
            for (pc, instruction) in code.instructions.iter().enumerate() {
                let location = member.clone().at_line(code.line_for(pc as u32));
                self.visit_instruction(instruction, &location)?;
            }
        }
        Ok(self.references)
    }

    fn visit_instruction(&mut self, instruction: &Instruction, location: &SourceLocation) -> Result<(), AnalysisError> {
        match instruction {
            Instruction::Push(Constant::Class(name))
            | Instruction::New(name)
            | Instruction::CheckCast(name)
            | Instruction::InstanceOf(name) => self.add_type_operand(name, location),
            Instruction::NewArray(element) => self.add_descriptor(element, location),
            Instruction::GetField(field)
            | Instruction::PutField(field)
            | Instruction::GetStatic(field)
            | Instruction::PutStatic(field) => {
                if field.descriptor.starts_with('(') {
                    return Err(self.malformed(format!("field reference {} has a method descriptor", field.name)));
                }
                self.add_member(&field.owner, &field.name, &field.descriptor, location)
            }
            Instruction::Invoke { method, .. } => {
                if !method.descriptor.starts_with('(') {
                    return Err(self.malformed(format!("method reference {} has a field descriptor", method.name)));
                }
                self.add_member(&method.owner, &method.name, &method.descriptor, location)
            }
            _ => Ok(()),
        }
    }
}

/// Analyze raw class bytes. Purely syntactic; nothing is loaded.
pub fn analyze(bytes: &[u8]) -> Result<AnalyzedClass, AnalysisError> {
    let class = decode_class(bytes).map_err(AnalysisError::Decode)?;
    let references = Walker {
        class: &class,
        references: ReferenceMap::new(),
    }
    .walk()?;
    let representation = ClassRepresentation::from_class_file(&class);
    trace!(
        class = %class.name,
        references = references.len(),
        "analyzed class"
    );
    Ok(AnalyzedClass {
        representation: Arc::new(representation),
        class_file: Arc::new(class),
        references,
        content_hash: content_hash(bytes),
    })
}

/// Snapshot of cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Content-addressed memo of [`analyze`], shared across sandboxes.
///
/// Failed analyses are not cached.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    entries: RwLock<HashMap<[u8; 32], Arc<AnalyzedClass>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_analyze(&self, bytes: &[u8]) -> Result<Arc<AnalyzedClass>, AnalysisError> {
        let hash = content_hash(bytes);
        if let Some(hit) = self.entries.read().get(&hash) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hit));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let analyzed = Arc::new(analyze(bytes)?);
        let mut entries = self.entries.write();
        // Another sandbox may have raced us here; keep whichever landed first.
        let entry = entries.entry(hash).or_insert(analyzed);
        Ok(Arc::clone(entry))
    }

    pub fn stats(&self) -> AnalysisCacheStats {
        AnalysisCacheStats {
            entries: self.entries.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::{AccessFlags, ClassBuilder, Condition};

    fn sample_bytes() -> Vec<u8> {
        ClassBuilder::new("com/acme/Clock")
            .source_file("Clock.src")
            .implements("util/function/Function")
            .field("cache", "[Lcom/acme/Entry;", AccessFlags::PRIVATE)
            .method(
                "apply",
                "(Llang/Object;)Llang/Object;",
                AccessFlags::PUBLIC,
                |code| {
                    let start = code.new_label();
                    let end = code.new_label();
                    let handler = code.new_label();
                    code.line(10);
                    code.bind(start);
                    code.invoke_static("lang/System", "currentTimeMillis", "()J");
                    code.emit(Instruction::Pop);
                    code.line(11);
                    code.new_object("lang/StringBuilder");
                    code.load(1).check_cast("[I").emit(Instruction::Pop);
                    code.bind(end);
                    code.push_null().return_value();
                    code.bind(handler);
                    code.line(14);
                    code.load(1).if_zero(Condition::Eq, end);
                    code.push_null().return_value();
                    code.try_catch(start, end, handler, Some("lang/IllegalStateException"));
                },
            )
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_collects_header_descriptor_and_code_references() {
        let analyzed = analyze(&sample_bytes()).unwrap();
        let classes = analyzed.references.classes();
        for expected in [
            "lang/Object",
            "util/function/Function",
            "com/acme/Entry",
            "lang/System",
            "lang/StringBuilder",
            "lang/IllegalStateException",
        ] {
            assert!(classes.contains(expected), "missing {expected}");
        }

        let clock = EntityReference::member("lang/System", "currentTimeMillis", "()J");
        let locations = analyzed.references.locations(&clock).unwrap();
        let location = locations.iter().next().unwrap();
        assert_eq!(location.class_name, "com/acme/Clock");
        assert_eq!(location.member_name.as_deref(), Some("apply"));
        assert_eq!(location.line, Some(10));
        assert_eq!(location.source_file.as_deref(), Some("Clock.src"));
    }

    #[test]
    fn test_primitive_arrays_are_not_references() {
        let analyzed = analyze(&sample_bytes()).unwrap();
        assert!(!analyzed.references.classes().iter().any(|c| c.contains('[')));
    }

    #[test]
    fn test_representation_members() {
        let analyzed = analyze(&sample_bytes()).unwrap();
        let rep = &analyzed.representation;
        assert_eq!(rep.name, "com/acme/Clock");
        assert!(rep.member("cache", "[Lcom/acme/Entry;").is_some());
        assert!(rep.member("apply", "(Llang/Object;)Llang/Object;").is_some());
        assert!(rep.interfaces.contains("util/function/Function"));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(analyze(b"garbage"), Err(AnalysisError::Decode(_))));

        let bad_descriptor = ClassBuilder::new("com/acme/Bad")
            .field("x", "Q", AccessFlags::PRIVATE)
            .to_bytes()
            .unwrap();
        assert!(matches!(
            analyze(&bad_descriptor),
            Err(AnalysisError::Malformed { .. })
        ));

        let bad_name = ClassBuilder::new("../escape").to_bytes().unwrap();
        assert!(matches!(analyze(&bad_name), Err(AnalysisError::Malformed { .. })));
    }

    #[test]
    fn test_cache_is_content_addressed() {
        let cache = AnalysisCache::new();
        let bytes = sample_bytes();
        let a = cache.get_or_analyze(&bytes).unwrap();
        let b = cache.get_or_analyze(&bytes.clone()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        assert!(cache.get_or_analyze(b"nope").is_err());
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(a.hash_hex().len(), 64);
    }
}
