//! # Bytecode Rewriter
//!
//! Turns an original class into the class a sandbox defines.
//!
//! ## Passes
//!
//! | Pass | Option | Effect |
//! |------|--------|--------|
//! | API substitution | `api_substitution` | Reject non-deterministic APIs, redirect the rest to stand-ins |
//! | Namespace isolation | `namespace_isolation` | Move every name into `sandbox/` except pinned classes |
//! | Interface stitching | `interface_stitching` | Keep stitched host interfaces next to their twins |
//! | Native stubbing | `stub_native_methods` | Replace native bodies with a rule violation |
//! | Exception remapping | `exception_remapping` | Register throwables, guard handlers that catch fatal errors |
//! | Cost instrumentation | `cost_instrumentation` | Account invocations, allocations and backward jumps |
//! | Strict floating point | `strict_floating_point` | Flag methods of double-using classes `STRICT` |
//!
//! Passes run in the order above. Any failure rejects the whole class; a
//! partially rewritten class is never returned.

mod api_rules;
mod exceptions;
mod instrument;
mod namespace;

pub use api_rules::{ApiRule, ApiRules};

use tracing::debug;

use sandbox_types::descriptor::{FieldType, MethodDescriptor};
use sandbox_types::names::simple_name;
use sandbox_types::{
    content_hash, encode_class, AccessFlags, ClassFile, Code, Constant, Instruction, InvokeKind,
    MethodDef, MethodRef, NumericType,
};

use crate::analysis::{AnalyzedClass, ClassHierarchy, EntityReference};
use crate::config::{DeterminismPolicy, RewriteOptions};
use crate::errors::LoadError;
use crate::messages::{Message, MessageCollection, Severity, SourceLocation};
use crate::well_known::{RULE_VIOLATION, RULE_VIOLATION_DESCRIPTOR, RUNTIME};

/// What the rewriter may consult about the class and its surroundings.
pub struct RewriteContext<'a> {
    /// Analysis of the original bytes.
    pub analysis: &'a AnalyzedClass,
    /// Hierarchy keyed by original names, holding at least the class and its
    /// supertypes.
    pub hierarchy: &'a ClassHierarchy,
}

/// A rewritten class.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub bytes: Vec<u8>,
    /// Name of the rewritten class.
    pub class_name: String,
    pub modified: bool,
    /// The class extends the throwable hierarchy.
    pub is_throwable: bool,
}

/// Applies the enabled passes to original class bytes.
#[derive(Debug, Clone, Copy)]
pub struct BytecodeRewriter {
    options: RewriteOptions,
    rules: ApiRules,
}

impl BytecodeRewriter {
    pub fn new(options: RewriteOptions, determinism: DeterminismPolicy) -> Self {
        Self {
            options,
            rules: ApiRules::new(determinism),
        }
    }

    pub fn options(&self) -> RewriteOptions {
        self.options
    }

    /// Rewrite one class. Problems are reported to `messages` before the
    /// error is returned.
    pub fn rewrite(
        &self,
        original: &[u8],
        context: &RewriteContext<'_>,
        messages: &mut MessageCollection,
    ) -> Result<RewriteOutcome, LoadError> {
        let analysis = context.analysis;
        let source = analysis.class_file.as_ref();
        if content_hash(original) != analysis.content_hash {
            return Err(LoadError::internal(&source.name, "analysis does not match the class bytes"));
        }
        let location = SourceLocation::class(&source.name).in_file(source.source_file.clone());
        let malformed = |reason: String| {
            let error = LoadError::MalformedInput {
                class_name: source.name.clone(),
                reason,
            };
            (Message::from_error(&error, location.clone()), error)
        };

        let mut class = source.clone();
        for method in &class.methods {
            if let Some(code) = &method.code {
                if let Err(reason) = instrument::check_targets(code) {
                    let (message, error) = malformed(format!("{}{}: {}", method.name, method.descriptor, reason));
                    messages.add(message);
                    return Err(error);
                }
            }
        }

        if self.options.api_substitution {
            self.check_references(analysis, messages)?;
            self.redirect_calls(&mut class, messages);
        }
        if self.options.namespace_isolation {
            if let Err(e) = namespace::isolate(&mut class) {
                let (message, error) = malformed(e.to_string());
                messages.add(message);
                return Err(error);
            }
        }
        if self.options.interface_stitching && self.options.namespace_isolation {
            namespace::stitch_interfaces(&mut class, &source.interfaces);
        }
        if self.options.stub_native_methods {
            stub_native_methods(&mut class, source, messages);
        }
        let is_throwable = exceptions::is_throwable(context.hierarchy, &source.name);
        for method in &mut class.methods {
            let Some(code) = &mut method.code else {
                continue;
            };
            if self.options.exception_remapping {
                exceptions::guard_handlers(code);
            }
            if self.options.cost_instrumentation {
                instrument::instrument_costs(code);
            }
        }
        if self.options.strict_floating_point && uses_doubles(&class) {
            for method in class.methods.iter_mut().filter(|m| m.code.is_some()) {
                method.access = method.access | AccessFlags::STRICT;
            }
        }

        let modified = class != *source;
        let bytes = if modified {
            encode_class(&class).map_err(|e| LoadError::internal(&class.name, format!("{:#}", e)))?
        } else {
            original.to_vec()
        };
        debug!(
            class = %source.name,
            rewritten = %class.name,
            modified,
            is_throwable,
            "rewrote class"
        );
        Ok(RewriteOutcome {
            bytes,
            class_name: class.name,
            modified,
            is_throwable,
        })
    }

    /// Report every rejected reference, then fail with the first one.
    fn check_references(&self, analysis: &AnalyzedClass, messages: &mut MessageCollection) -> Result<(), LoadError> {
        let mut first = None;
        for (reference, locations) in analysis.references.iter() {
            let rule = match reference {
                EntityReference::Class(class) => match self.rules.check_class(&class.class_name) {
                    Some(api) => ApiRule::Reject { api },
                    None => ApiRule::Allow,
                },
                EntityReference::Member(member) if member.is_method() => self.rules.check_method(&MethodRef::new(
                    &member.class_name,
                    &member.member_name,
                    &member.descriptor,
                )),
                EntityReference::Member(member) => self.rules.check_field(&sandbox_types::FieldRef::new(
                    &member.class_name,
                    &member.member_name,
                    &member.descriptor,
                )),
            };
            let ApiRule::Reject { api } = rule else {
                continue;
            };
            let error = LoadError::UnsupportedApi {
                class_name: analysis.name().to_string(),
                api,
            };
            for location in locations {
                messages.add(Message::from_error(&error, location.clone()));
            }
            first.get_or_insert(error);
        }
        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn redirect_calls(&self, class: &mut ClassFile, messages: &mut MessageCollection) {
        let class_name = class.name.clone();
        let source_file = class.source_file.clone();
        for method in &mut class.methods {
            let Some(code) = &mut method.code else {
                continue;
            };
            for (pc, insn) in code.instructions.iter_mut().enumerate() {
                let Instruction::Invoke { kind, method: target } = insn else {
                    continue;
                };
                let ApiRule::Redirect { kind: new_kind, method: new_target } = self.rules.check_method(target) else {
                    continue;
                };
                let location = SourceLocation::class(&class_name)
                    .member(&method.name, &method.descriptor)
                    .at_line(code_line(&code.lines, pc as u32))
                    .in_file(source_file.clone());
                messages.add(Message::new(
                    Severity::Informational,
                    format!(
                        "Redirected {}.{}{} to {}.{}",
                        target.owner, target.name, target.descriptor, new_target.owner, new_target.name
                    ),
                    location,
                ));
                *kind = new_kind;
                *target = new_target;
            }
        }
    }
}

fn code_line(lines: &[sandbox_types::LineNumber], pc: u32) -> Option<u32> {
    lines
        .iter()
        .filter(|entry| entry.start_pc <= pc)
        .max_by_key(|entry| entry.start_pc)
        .map(|entry| entry.line)
}

/// Replace every native method body with a rule violation.
fn stub_native_methods(class: &mut ClassFile, source: &ClassFile, messages: &mut MessageCollection) {
    for method in class.methods.iter_mut().filter(|m| m.access.is_native()) {
        let text = format!(
            "Native method has been deleted; {}.{}{}",
            simple_name(&source.name),
            method.name,
            method.descriptor
        );
        messages.add(Message::new(
            Severity::Warning,
            text.clone(),
            SourceLocation::class(&source.name)
                .member(&method.name, &method.descriptor)
                .in_file(source.source_file.clone()),
        ));
        let slots = MethodDescriptor::parse(&method.descriptor)
            .map(|d| d.arg_count())
            .unwrap_or(0)
            + usize::from(!method.is_static());
        *method = MethodDef {
            name: std::mem::take(&mut method.name),
            descriptor: std::mem::take(&mut method.descriptor),
            access: method.access.without(AccessFlags::NATIVE),
            code: Some(Code {
                max_locals: slots as u16,
                instructions: vec![
                    Instruction::Push(Constant::String(text)),
                    Instruction::Invoke {
                        kind: InvokeKind::Static,
                        method: MethodRef::new(RUNTIME, RULE_VIOLATION, RULE_VIOLATION_DESCRIPTOR),
                    },
                    Instruction::Push(Constant::Null),
                    Instruction::Throw,
                ],
                handlers: Vec::new(),
                lines: Vec::new(),
            }),
        };
    }
}

/// True if any signature, constant or instruction of the class involves
/// doubles.
fn uses_doubles(class: &ClassFile) -> bool {
    let field_uses = class
        .fields
        .iter()
        .any(|f| FieldType::parse(&f.descriptor).is_ok_and(|t| t.is_double()));
    let signature_uses = class
        .methods
        .iter()
        .any(|m| MethodDescriptor::parse(&m.descriptor).is_ok_and(|d| d.uses_double()));
    let code_uses = class
        .methods
        .iter()
        .filter_map(|m| m.code.as_ref())
        .flat_map(|c| c.instructions.iter())
        .any(|insn| match insn {
            Instruction::Push(Constant::Double(_)) => true,
            Instruction::Convert { from, to } => *from == NumericType::Double || *to == NumericType::Double,
            Instruction::NewArray(element) => element == "D",
            Instruction::GetField(f) | Instruction::PutField(f) | Instruction::GetStatic(f) | Instruction::PutStatic(f) => {
                f.descriptor == "D"
            }
            Instruction::Invoke { method, .. } => {
                MethodDescriptor::parse(&method.descriptor).is_ok_and(|d| d.uses_double())
            }
            _ => false,
        });
    field_uses || signature_uses || code_uses
}

#[cfg(test)]
mod tests;
