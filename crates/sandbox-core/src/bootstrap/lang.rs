//! Core classes of the replacement library, already in the sandbox
//! namespace. Bodies are bytecode where the behaviour is plain data flow and
//! `native` where it needs the host.

use anyhow::Result;

use sandbox_types::{AccessFlags, ArithOp, ClassBuilder, ClassFile, Condition, Instruction};

use crate::well_known::{
    ARRAYS, BOOLEAN, BOX_VALUE, CASE_INSENSITIVE_COMPARATOR, CASE_INSENSITIVE_ORDER, CHAR_SEQUENCE, CHECK_CATCH,
    CHECK_CATCH_DESCRIPTOR, CLASS, CLASS_INITIALIZER, COMPARABLE, COMPARATOR, COMPARATOR_DESCRIPTOR, COST_ACCOUNTER,
    DETERMINISTIC_CLOCK, DOUBLE, ENUM, ENUM_CONSTANTS, ENUM_CONSTANTS_DESCRIPTOR, ENUM_NAME, ENUM_ORDINAL, INTEGER,
    LONG, MATH, OBJECT, RANDOM, RECORD_ALLOCATION, RECORD_ARRAY_ALLOCATION, RECORD_INVOCATION, RECORD_JUMP,
    RULE_VIOLATION, RULE_VIOLATION_DESCRIPTOR, RUNTIME, STRING, STRING_BUILDER, SYSTEM,
};

pub(super) const PUBLIC: AccessFlags = AccessFlags::PUBLIC;
pub(super) const PUBLIC_STATIC: AccessFlags = AccessFlags::PUBLIC.union(AccessFlags::STATIC);
pub(super) const PUBLIC_FINAL: AccessFlags = AccessFlags::PUBLIC.union(AccessFlags::FINAL);
pub(super) const PUBLIC_STATIC_FINAL: AccessFlags = PUBLIC_STATIC.union(AccessFlags::FINAL);
pub(super) const PRIVATE_FINAL: AccessFlags = AccessFlags::PRIVATE.union(AccessFlags::FINAL);

pub(super) const STRING_DESC: &str = "Lsandbox/lang/String;";

/// Declare each `(name, descriptor)` as a native method.
pub(super) fn natives(builder: ClassBuilder, access: AccessFlags, methods: &[(&str, &str)]) -> ClassBuilder {
    methods
        .iter()
        .fold(builder, |builder, (name, descriptor)| builder.native_method(name, descriptor, access))
}

pub(super) fn final_class(name: &str) -> ClassBuilder {
    ClassBuilder::new(name).extends(OBJECT).access(PUBLIC_FINAL)
}

/// Every class of this module, in no particular order.
pub(super) fn lang_classes() -> Result<Vec<ClassFile>> {
    let mut classes = vec![
        object()?,
        ClassBuilder::interface(COMPARABLE)
            .extends(OBJECT)
            .abstract_method("compareTo", "(Lsandbox/lang/Object;)I")
            .build()?,
        ClassBuilder::interface(CHAR_SEQUENCE)
            .extends(OBJECT)
            .abstract_method("length", "()I")
            .abstract_method("charAt", "(I)C")
            .build()?,
        string()?,
        string_builder()?,
        math()?,
        system()?,
        natives(final_class(DETERMINISTIC_CLOCK), PUBLIC_STATIC, &[("currentTimeMillis", "()J"), ("nanoTime", "()J")])
            .build()?,
        class()?,
        enumeration()?,
        random()?,
        ClassBuilder::interface(COMPARATOR)
            .extends(OBJECT)
            .abstract_method("compare", COMPARATOR_DESCRIPTOR)
            .build()?,
        natives(
            final_class(CASE_INSENSITIVE_COMPARATOR).implements(COMPARATOR),
            PUBLIC,
            &[("compare", COMPARATOR_DESCRIPTOR)],
        )
        .build()?,
        natives(
            final_class(ARRAYS),
            PUBLIC_STATIC,
            &[
                ("sort", "([Lsandbox/lang/Object;)V"),
                ("sort", "([Lsandbox/lang/Object;Lsandbox/util/Comparator;)V"),
                ("sort", "([I)V"),
                ("sort", "([J)V"),
                ("sort", "([D)V"),
            ],
        )
        .build()?,
    ];
    for (name, primitive, accessor) in [
        (INTEGER, "I", "intValue"),
        (LONG, "J", "longValue"),
        (DOUBLE, "D", "doubleValue"),
        (BOOLEAN, "Z", "booleanValue"),
    ] {
        classes.push(boxed(name, primitive, accessor)?);
    }
    classes.extend(helpers()?);
    Ok(classes)
}

fn object() -> Result<ClassFile> {
    let builder = ClassBuilder::new(OBJECT)
        .root()
        .method("<init>", "()V", PUBLIC, |code| {
            code.return_void();
        })
        .method("equals", "(Lsandbox/lang/Object;)Z", PUBLIC, |code| {
            let different = code.new_label();
            code.load(0).load(1).if_cmp(Condition::Ne, different);
            code.push_int(1).return_value();
            code.bind(different);
            code.push_int(0).return_value();
        })
        .native_method("getClass", "()Lsandbox/lang/Class;", PUBLIC_FINAL);
    natives(builder, PUBLIC, &[("hashCode", "()I"), ("toString", "()Lsandbox/lang/String;")]).build()
}

fn string() -> Result<ClassFile> {
    let builder = final_class(STRING).implements(CHAR_SEQUENCE).implements(COMPARABLE);
    let builder = natives(
        builder,
        PUBLIC,
        &[
            ("<init>", "()V"),
            ("<init>", "(Lsandbox/lang/String;)V"),
            ("length", "()I"),
            ("charAt", "(I)C"),
            ("isEmpty", "()Z"),
            ("concat", "(Lsandbox/lang/String;)Lsandbox/lang/String;"),
            ("equals", "(Lsandbox/lang/Object;)Z"),
            ("hashCode", "()I"),
            ("compareTo", "(Lsandbox/lang/Object;)I"),
            ("toString", "()Lsandbox/lang/String;"),
            ("substring", "(I)Lsandbox/lang/String;"),
            ("substring", "(II)Lsandbox/lang/String;"),
            ("indexOf", "(Lsandbox/lang/String;)I"),
            ("startsWith", "(Lsandbox/lang/String;)Z"),
            ("endsWith", "(Lsandbox/lang/String;)Z"),
            ("toUpperCase", "()Lsandbox/lang/String;"),
            ("toLowerCase", "()Lsandbox/lang/String;"),
            ("compareToIgnoreCase", "(Lsandbox/lang/String;)I"),
            ("equalsIgnoreCase", "(Lsandbox/lang/String;)Z"),
        ],
    );
    let builder = natives(
        builder,
        PUBLIC_STATIC,
        &[
            ("valueOf", "(I)Lsandbox/lang/String;"),
            ("valueOf", "(J)Lsandbox/lang/String;"),
            ("valueOf", "(D)Lsandbox/lang/String;"),
            ("valueOf", "(C)Lsandbox/lang/String;"),
            ("valueOf", "(Z)Lsandbox/lang/String;"),
            ("valueOf", "(Lsandbox/lang/Object;)Lsandbox/lang/String;"),
        ],
    );
    builder
        .field(CASE_INSENSITIVE_ORDER, "Lsandbox/util/Comparator;", PUBLIC_STATIC_FINAL)
        .native_method(CLASS_INITIALIZER, "()V", AccessFlags::STATIC)
        .build()
}

fn string_builder() -> Result<ClassFile> {
    let mut builder = natives(
        final_class(STRING_BUILDER),
        PUBLIC,
        &[
            ("<init>", "()V"),
            ("<init>", "(Lsandbox/lang/String;)V"),
            ("toString", "()Lsandbox/lang/String;"),
            ("length", "()I"),
        ],
    );
    for argument in ["I", "J", "D", "C", "Z", "Lsandbox/lang/Object;", STRING_DESC] {
        builder = builder.native_method(
            "append",
            &format!("({})Lsandbox/lang/StringBuilder;", argument),
            PUBLIC,
        );
    }
    builder.build()
}

fn math() -> Result<ClassFile> {
    natives(
        final_class(MATH),
        PUBLIC_STATIC,
        &[
            ("abs", "(I)I"),
            ("abs", "(J)J"),
            ("abs", "(D)D"),
            ("max", "(II)I"),
            ("max", "(JJ)J"),
            ("max", "(DD)D"),
            ("min", "(II)I"),
            ("min", "(JJ)J"),
            ("min", "(DD)D"),
            ("sqrt", "(D)D"),
            ("floorMod", "(II)I"),
            ("addExact", "(II)I"),
            ("addExact", "(JJ)J"),
            ("multiplyExact", "(II)I"),
            ("multiplyExact", "(JJ)J"),
            ("random", "()D"),
        ],
    )
    .build()
}

fn system() -> Result<ClassFile> {
    natives(
        final_class(SYSTEM),
        PUBLIC_STATIC,
        &[
            ("arraycopy", "(Lsandbox/lang/Object;ILsandbox/lang/Object;II)V"),
            ("identityHashCode", "(Lsandbox/lang/Object;)I"),
        ],
    )
    .build()
}

fn class() -> Result<ClassFile> {
    natives(
        final_class(CLASS),
        PUBLIC,
        &[("getName", "()Lsandbox/lang/String;"), ("toString", "()Lsandbox/lang/String;")],
    )
    .native_method("forName", "(Lsandbox/lang/String;)Lsandbox/lang/Class;", PUBLIC_STATIC)
    .build()
}

fn enumeration() -> Result<ClassFile> {
    ClassBuilder::new(ENUM)
        .extends(OBJECT)
        .access(PUBLIC | AccessFlags::ABSTRACT)
        .implements(COMPARABLE)
        .field(ENUM_NAME, STRING_DESC, PRIVATE_FINAL)
        .field(ENUM_ORDINAL, "I", PRIVATE_FINAL)
        .method("<init>", "(Lsandbox/lang/String;I)V", AccessFlags::PROTECTED, |code| {
            code.load(0).invoke_special(OBJECT, "<init>", "()V");
            code.load(0).load(1).put_field(ENUM, ENUM_NAME, STRING_DESC);
            code.load(0).load(2).put_field(ENUM, ENUM_ORDINAL, "I");
            code.return_void();
        })
        .method("name", "()Lsandbox/lang/String;", PUBLIC_FINAL, |code| {
            code.load(0).get_field(ENUM, ENUM_NAME, STRING_DESC).return_value();
        })
        .method("ordinal", "()I", PUBLIC_FINAL, |code| {
            code.load(0).get_field(ENUM, ENUM_ORDINAL, "I").return_value();
        })
        .method("toString", "()Lsandbox/lang/String;", PUBLIC, |code| {
            code.load(0).get_field(ENUM, ENUM_NAME, STRING_DESC).return_value();
        })
        .method("compareTo", "(Lsandbox/lang/Object;)I", PUBLIC_FINAL, |code| {
            code.load(0).get_field(ENUM, ENUM_ORDINAL, "I");
            code.load(1).check_cast(ENUM).get_field(ENUM, ENUM_ORDINAL, "I");
            code.arith(ArithOp::Sub).return_value();
        })
        .native_method(ENUM_CONSTANTS, ENUM_CONSTANTS_DESCRIPTOR, PUBLIC_STATIC)
        .build()
}

fn random() -> Result<ClassFile> {
    natives(
        ClassBuilder::new(RANDOM).extends(OBJECT),
        PUBLIC,
        &[
            ("<init>", "()V"),
            ("<init>", "(J)V"),
            ("nextInt", "()I"),
            ("nextInt", "(I)I"),
            ("nextLong", "()J"),
            ("nextDouble", "()D"),
            ("nextBoolean", "()Z"),
        ],
    )
    .build()
}

/// Immutable box of one primitive, with `valueOf` and an accessor.
fn boxed(name: &str, primitive: &str, accessor: &str) -> Result<ClassFile> {
    box_builder(name, primitive, accessor).build()
}

pub(super) fn box_builder(name: &str, primitive: &str, accessor: &str) -> ClassBuilder {
    let constructor = format!("({})V", primitive);
    final_class(name)
        .field(BOX_VALUE, primitive, PRIVATE_FINAL)
        .method("<init>", &constructor, PUBLIC, |code| {
            code.load(0).invoke_special(OBJECT, "<init>", "()V");
            code.load(0).load(1).put_field(name, BOX_VALUE, primitive);
            code.return_void();
        })
        .method("valueOf", &format!("({})L{};", primitive, name), PUBLIC_STATIC, |code| {
            code.new_object(name).emit(Instruction::Dup).load(0);
            code.invoke_special(name, "<init>", &constructor).return_value();
        })
        .method(accessor, &format!("(){}", primitive), PUBLIC, |code| {
            code.load(0).get_field(name, BOX_VALUE, primitive).return_value();
        })
        .method("toString", "()Lsandbox/lang/String;", PUBLIC, |code| {
            code.load(0).get_field(name, BOX_VALUE, primitive);
            code.invoke_static(STRING, "valueOf", &format!("({}){}", primitive, STRING_DESC))
                .return_value();
        })
        .native_method("hashCode", "()I", PUBLIC)
        .native_method("equals", "(Lsandbox/lang/Object;)Z", PUBLIC)
}

/// Classes the rewriter injects calls to.
fn helpers() -> Result<Vec<ClassFile>> {
    let accounter = natives(
        final_class(COST_ACCOUNTER),
        PUBLIC_STATIC,
        &[
            (RECORD_INVOCATION, "()V"),
            (RECORD_ALLOCATION, "()V"),
            (RECORD_ARRAY_ALLOCATION, "(I)V"),
            (RECORD_JUMP, "()V"),
        ],
    )
    .build()?;
    let runtime = natives(
        final_class(RUNTIME),
        PUBLIC_STATIC,
        &[(CHECK_CATCH, CHECK_CATCH_DESCRIPTOR), (RULE_VIOLATION, RULE_VIOLATION_DESCRIPTOR)],
    )
    .build()?;
    Ok(vec![accounter, runtime])
}
