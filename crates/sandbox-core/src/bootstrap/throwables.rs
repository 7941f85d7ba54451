//! The sandboxed throwable hierarchy.
//!
//! `Throwable` carries the message and cause in plain fields so the host can
//! read them back when an exception escapes. Every subclass only forwards
//! the four standard constructors.

use anyhow::Result;

use sandbox_types::{AccessFlags, ClassBuilder, ClassFile};

use crate::well_known::{
    ARITHMETIC, ARRAY_INDEX_OUT_OF_BOUNDS, ARRAY_STORE, CLASS_CAST, CLASS_NOT_FOUND, ERROR, EXCEPTION,
    ILLEGAL_ARGUMENT, ILLEGAL_STATE, INDEX_OUT_OF_BOUNDS, LINKAGE_ERROR, NEGATIVE_ARRAY_SIZE, NO_CLASS_DEF_FOUND,
    NULL_POINTER, OBJECT, OUT_OF_MEMORY, RUNTIME_EXCEPTION, STACK_OVERFLOW, STRING_INDEX_OUT_OF_BOUNDS, THREAD_DEATH, THROWABLE,
    THROWABLE_CAUSE, THROWABLE_MESSAGE, UNSUPPORTED_OPERATION,
};

const STRING_DESC: &str = "Lsandbox/lang/String;";
const THROWABLE_DESC: &str = "Lsandbox/lang/Throwable;";

const CONSTRUCTORS: [&str; 4] = [
    "()V",
    "(Lsandbox/lang/String;)V",
    "(Lsandbox/lang/String;Lsandbox/lang/Throwable;)V",
    "(Lsandbox/lang/Throwable;)V",
];

/// `(class, super class)`, parents listed before their children.
const HIERARCHY: &[(&str, &str)] = &[
    (EXCEPTION, THROWABLE),
    (ERROR, THROWABLE),
    (RUNTIME_EXCEPTION, EXCEPTION),
    (CLASS_NOT_FOUND, EXCEPTION),
    (ILLEGAL_ARGUMENT, RUNTIME_EXCEPTION),
    (ILLEGAL_STATE, RUNTIME_EXCEPTION),
    (ARITHMETIC, RUNTIME_EXCEPTION),
    (NULL_POINTER, RUNTIME_EXCEPTION),
    (INDEX_OUT_OF_BOUNDS, RUNTIME_EXCEPTION),
    (ARRAY_INDEX_OUT_OF_BOUNDS, INDEX_OUT_OF_BOUNDS),
    (STRING_INDEX_OUT_OF_BOUNDS, INDEX_OUT_OF_BOUNDS),
    (ARRAY_STORE, RUNTIME_EXCEPTION),
    (CLASS_CAST, RUNTIME_EXCEPTION),
    (NEGATIVE_ARRAY_SIZE, RUNTIME_EXCEPTION),
    (UNSUPPORTED_OPERATION, RUNTIME_EXCEPTION),
    (STACK_OVERFLOW, ERROR),
    (OUT_OF_MEMORY, ERROR),
    (THREAD_DEATH, ERROR),
    (LINKAGE_ERROR, ERROR),
    (NO_CLASS_DEF_FOUND, LINKAGE_ERROR),
];

pub(super) fn throwable_classes() -> Result<Vec<ClassFile>> {
    let mut classes = vec![throwable()?];
    for (name, parent) in HIERARCHY {
        classes.push(subclass(name, parent)?);
    }
    Ok(classes)
}

fn throwable() -> Result<ClassFile> {
    let public = AccessFlags::PUBLIC;
    ClassBuilder::new(THROWABLE)
        .extends(OBJECT)
        .field(THROWABLE_MESSAGE, STRING_DESC, AccessFlags::PRIVATE)
        .field(THROWABLE_CAUSE, THROWABLE_DESC, AccessFlags::PRIVATE)
        .method("<init>", CONSTRUCTORS[0], public, |code| {
            code.load(0).invoke_special(OBJECT, "<init>", "()V").return_void();
        })
        .method("<init>", CONSTRUCTORS[1], public, |code| {
            code.load(0).invoke_special(OBJECT, "<init>", "()V");
            code.load(0).load(1).put_field(THROWABLE, THROWABLE_MESSAGE, STRING_DESC);
            code.return_void();
        })
        .method("<init>", CONSTRUCTORS[2], public, |code| {
            code.load(0).invoke_special(OBJECT, "<init>", "()V");
            code.load(0).load(1).put_field(THROWABLE, THROWABLE_MESSAGE, STRING_DESC);
            code.load(0).load(2).put_field(THROWABLE, THROWABLE_CAUSE, THROWABLE_DESC);
            code.return_void();
        })
        // Message defaults to the cause's toString.
        .method("<init>", CONSTRUCTORS[3], public, |code| {
            let no_cause = code.new_label();
            code.load(0).invoke_special(OBJECT, "<init>", "()V");
            code.load(1).if_null(no_cause);
            code.load(0).load(1).invoke_virtual(THROWABLE, "toString", "()Lsandbox/lang/String;");
            code.put_field(THROWABLE, THROWABLE_MESSAGE, STRING_DESC);
            code.bind(no_cause);
            code.load(0).load(1).put_field(THROWABLE, THROWABLE_CAUSE, THROWABLE_DESC);
            code.return_void();
        })
        .method("getMessage", "()Lsandbox/lang/String;", public, |code| {
            code.load(0).get_field(THROWABLE, THROWABLE_MESSAGE, STRING_DESC).return_value();
        })
        .method("getLocalizedMessage", "()Lsandbox/lang/String;", public, |code| {
            code.load(0)
                .invoke_virtual(THROWABLE, "getMessage", "()Lsandbox/lang/String;")
                .return_value();
        })
        .method("getCause", "()Lsandbox/lang/Throwable;", public, |code| {
            code.load(0).get_field(THROWABLE, THROWABLE_CAUSE, THROWABLE_DESC).return_value();
        })
        .method("initCause", "(Lsandbox/lang/Throwable;)Lsandbox/lang/Throwable;", public, |code| {
            code.load(0).load(1).put_field(THROWABLE, THROWABLE_CAUSE, THROWABLE_DESC);
            code.load(0).return_value();
        })
        .native_method("toString", "()Lsandbox/lang/String;", public)
        .build()
}

fn subclass(name: &str, parent: &str) -> Result<ClassFile> {
    CONSTRUCTORS
        .iter()
        .fold(ClassBuilder::new(name).extends(parent), |builder, descriptor| {
            let params = descriptor.matches(';').count() as u16;
            builder.method("<init>", descriptor, AccessFlags::PUBLIC, |code| {
                for slot in 0..=params {
                    code.load(slot);
                }
                code.invoke_special(parent, "<init>", descriptor).return_void();
            })
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents_precede_children() {
        for (index, (_, parent)) in HIERARCHY.iter().enumerate() {
            let declared_before = *parent == THROWABLE || HIERARCHY[..index].iter().any(|(name, _)| name == parent);
            assert!(declared_before, "{} is declared after its children", parent);
        }
    }

    #[test]
    fn test_subclasses_forward_every_constructor() {
        let classes = throwable_classes().unwrap();
        assert_eq!(classes.len(), HIERARCHY.len() + 1);
        let arithmetic = classes.iter().find(|c| c.name == ARITHMETIC).unwrap();
        assert_eq!(arithmetic.super_name.as_deref(), Some(RUNTIME_EXCEPTION));
        for descriptor in CONSTRUCTORS {
            assert!(arithmetic.method("<init>", descriptor).is_some());
        }
    }
}
