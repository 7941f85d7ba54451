//! Definition-time checks of rewritten classes.
//!
//! Everything here should already hold for the rewriter's output; a failure
//! means the sandbox produced a broken class and is reported as an internal
//! error, never as a problem of the user's code.

use sandbox_types::descriptor::MethodDescriptor;
use sandbox_types::names::{is_pinned, is_sandboxed, is_stitched_interface};
use sandbox_types::{ClassFile, Code, Instruction, MethodDef};

use crate::analysis::ReferenceMap;
use crate::errors::LoadError;

fn check_code(method: &MethodDef, code: &Code) -> Result<(), String> {
    let len = code.instructions.len() as u32;
    if len == 0 {
        return Err("empty method body".to_string());
    }
    let params = MethodDescriptor::parse(&method.descriptor)
        .map_err(|e| e.to_string())?
        .arg_count()
        + usize::from(!method.is_static());
    if usize::from(code.max_locals) < params {
        return Err(format!("max_locals {} below {} parameter slots", code.max_locals, params));
    }
    for (pc, insn) in code.instructions.iter().enumerate() {
        if let Some(target) = insn.branch_target() {
            if target >= len {
                return Err(format!("branch at {} targets {}", pc, target));
            }
        }
        let slot = match insn {
            Instruction::Load(slot) | Instruction::Store(slot) => Some(*slot),
            Instruction::Increment { local, .. } => Some(*local),
            _ => None,
        };
        if let Some(slot) = slot.filter(|s| *s >= code.max_locals) {
            return Err(format!("local {} at {} exceeds max_locals {}", slot, pc, code.max_locals));
        }
    }
    for handler in &code.handlers {
        if handler.start >= handler.end || handler.end > len || handler.handler >= len {
            return Err(format!(
                "handler [{}, {}) -> {} outside the body",
                handler.start, handler.end, handler.handler
            ));
        }
    }
    if let Some(line) = code.lines.iter().find(|l| l.start_pc >= len) {
        return Err(format!("line entry at {} outside the body", line.start_pc));
    }
    Ok(())
}

/// Check a rewritten class before it is defined. `isolated` enables the
/// namespace containment check.
pub(crate) fn verify(class: &ClassFile, references: &ReferenceMap, isolated: bool) -> Result<(), LoadError> {
    let fail = |reason: String| Err(LoadError::internal(&class.name, reason));
    for method in &class.methods {
        let bodyless = method.access.is_abstract() || method.access.is_native();
        match (&method.code, bodyless) {
            (Some(code), false) => {
                if let Err(reason) = check_code(method, code) {
                    return fail(format!("{}{}: {}", method.name, method.descriptor, reason));
                }
            }
            (None, true) => {}
            (Some(_), true) => return fail(format!("{}{} is bodyless but has code", method.name, method.descriptor)),
            (None, false) => return fail(format!("{}{} has no code", method.name, method.descriptor)),
        }
    }
    if isolated {
        let escaped = references
            .classes()
            .into_iter()
            .find(|name| !is_sandboxed(name) && !is_pinned(name) && !is_stitched_interface(name));
        if let Some(name) = escaped {
            return fail(format!("reference to {} escapes the sandbox namespace", name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use sandbox_types::{AccessFlags, ClassBuilder};

    fn check(builder: ClassBuilder, isolated: bool) -> Result<(), LoadError> {
        let analysis = analyze(&builder.to_bytes().unwrap()).unwrap();
        verify(&analysis.class_file, &analysis.references, isolated)
    }

    #[test]
    fn test_sandboxed_class_passes() {
        let builder = ClassBuilder::new("sandbox/com/acme/Ok")
            .extends("sandbox/lang/Object")
            .implements("util/function/Function")
            .implements("lang/Comparable")
            .default_constructor();
        assert!(check(builder, true).is_ok());
    }

    #[test]
    fn test_escaping_reference_is_internal() {
        let builder = ClassBuilder::new("sandbox/com/acme/Leak")
            .extends("sandbox/lang/Object")
            .method("f", "()V", AccessFlags::STATIC, |code| {
                code.invoke_static("lang/System", "exit", "(I)V").return_void();
            });
        let err = check(builder, true).unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("lang/System"));
    }

    #[test]
    fn test_bad_locals_and_empty_bodies() {
        let locals = ClassBuilder::new("sandbox/A").extends("sandbox/lang/Object").method(
            "f",
            "()V",
            AccessFlags::STATIC,
            |code| {
                code.emit(Instruction::Load(3)).return_void();
            },
        );
        let analysis = analyze(&locals.to_bytes().unwrap()).unwrap();
        let mut class = (*analysis.class_file).clone();
        class.methods[0].code.as_mut().unwrap().max_locals = 1;
        assert!(verify(&class, &analysis.references, true).is_err());

        class.methods[0].code.as_mut().unwrap().instructions.clear();
        assert!(verify(&class, &analysis.references, true).is_err());

        class.methods[0].code = None;
        assert!(verify(&class, &analysis.references, true).is_err());
    }
}
