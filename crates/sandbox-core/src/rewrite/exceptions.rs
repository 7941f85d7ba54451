//! Exception remapping.
//!
//! User throwables are renamed like every other class, which mirrors the
//! platform hierarchy one-to-one inside the sandbox: a `catch` against
//! `lang/RuntimeException` becomes a catch against
//! `sandbox/lang/RuntimeException` and still matches sandboxed subclasses.
//! What this pass adds:
//!
//! - detection of throwable classes, so the loader can register the carrier
//!   name used to map them back to their original class
//! - a `sandbox/Runtime.checkCatch` guard at the start of every handler that
//!   could otherwise swallow a fatal error

use smallvec::smallvec;

use sandbox_types::{Code, Instruction, InvokeKind, MethodRef};

use super::instrument::{insert_before, Insertion};
use crate::analysis::ClassHierarchy;
use crate::well_known::{catches_fatal, CHECK_CATCH, CHECK_CATCH_DESCRIPTOR, RUNTIME};

pub(crate) const ORIGINAL_THROWABLE: &str = "lang/Throwable";

/// True if `original_name` is a throwable according to the hierarchy.
pub(crate) fn is_throwable(hierarchy: &ClassHierarchy, original_name: &str) -> bool {
    hierarchy.is_subtype_of(original_name, ORIGINAL_THROWABLE)
}

/// Guard handlers that could catch a fatal error. Returns whether anything
/// changed.
pub(crate) fn guard_handlers(code: &mut Code) -> bool {
    let mut guarded: Vec<u32> = code
        .handlers
        .iter()
        .filter(|h| catches_fatal(h.catch_type.as_deref()))
        .map(|h| h.handler)
        .collect();
    if guarded.is_empty() {
        return false;
    }
    guarded.sort_unstable();
    guarded.dedup();
    insert_before(code, |pc, _| {
        if guarded.binary_search(&(pc as u32)).is_ok() {
            // The caught throwable stays on the stack for the handler body.
            let guard: Insertion = smallvec![
                Instruction::Dup,
                Instruction::Invoke {
                    kind: InvokeKind::Static,
                    method: MethodRef::new(RUNTIME, CHECK_CATCH, CHECK_CATCH_DESCRIPTOR),
                }
            ];
            guard
        } else {
            Insertion::new()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sandbox_types::{AccessFlags, ClassBuilder};

    use crate::analysis::ClassRepresentation;

    fn catching(catch_type: Option<&str>) -> Code {
        ClassBuilder::new("com/A")
            .method("f", "()V", AccessFlags::STATIC, |code| {
                let start = code.new_label();
                let end = code.new_label();
                let handler = code.new_label();
                code.bind(start);
                code.invoke_static("com/A", "g", "()V");
                code.bind(end);
                code.return_void();
                code.bind(handler);
                code.emit(Instruction::Pop).return_void();
                code.try_catch(start, end, handler, catch_type);
            })
            .build()
            .unwrap()
            .methods
            .remove(0)
            .code
            .unwrap()
    }

    #[test]
    fn test_throwable_handler_is_guarded() {
        let mut code = catching(Some("sandbox/lang/Throwable"));
        assert!(guard_handlers(&mut code));
        let handler = code.handlers[0].handler as usize;
        assert_eq!(code.instructions[handler], Instruction::Dup);
        assert!(matches!(
            &code.instructions[handler + 1],
            Instruction::Invoke { method, .. } if method.name == CHECK_CATCH
        ));
        assert_eq!(code.instructions[handler + 2], Instruction::Pop);
    }

    #[test]
    fn test_specific_handler_is_left_alone() {
        let mut code = catching(Some("sandbox/lang/IllegalStateException"));
        let before = code.clone();
        assert!(!guard_handlers(&mut code));
        assert_eq!(code, before);
    }

    #[test]
    fn test_is_throwable() {
        let mut hierarchy = ClassHierarchy::new();
        for builder in [
            ClassBuilder::new("lang/Object").root(),
            ClassBuilder::new("lang/Throwable"),
            ClassBuilder::new("lang/Exception").extends("lang/Throwable"),
            ClassBuilder::new("com/acme/Oops").extends("lang/Exception"),
            ClassBuilder::new("com/acme/Plain"),
        ] {
            hierarchy.add(Arc::new(ClassRepresentation::from_class_file(&builder.build().unwrap())));
        }
        assert!(is_throwable(&hierarchy, "com/acme/Oops"));
        assert!(!is_throwable(&hierarchy, "com/acme/Plain"));
    }
}
