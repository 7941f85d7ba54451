use std::sync::Arc;

use sandbox_types::{decode_class, AccessFlags, ClassBuilder, ClassFile, Condition, Instruction, InvokeKind, MethodRef};

use super::*;
use crate::analysis::{analyze, ClassRepresentation};
use crate::config::ClockPolicy;
use crate::well_known::{CHECK_CATCH, COST_ACCOUNTER, RECORD_JUMP};

fn platform_hierarchy() -> ClassHierarchy {
    let mut hierarchy = ClassHierarchy::new();
    for builder in [
        ClassBuilder::new("lang/Object").root(),
        ClassBuilder::new("lang/Throwable"),
        ClassBuilder::new("lang/Exception").extends("lang/Throwable"),
        ClassBuilder::new("lang/RuntimeException").extends("lang/Exception"),
    ] {
        hierarchy.add(Arc::new(ClassRepresentation::from_class_file(&builder.build().unwrap())));
    }
    hierarchy
}

struct Rewritten {
    result: Result<RewriteOutcome, LoadError>,
    messages: MessageCollection,
}

fn rewrite_with(builder: ClassBuilder, rewriter: BytecodeRewriter) -> Rewritten {
    let bytes = builder.to_bytes().unwrap();
    let analysis = analyze(&bytes).unwrap();
    let mut hierarchy = platform_hierarchy();
    hierarchy.add(Arc::clone(&analysis.representation));
    let mut messages = MessageCollection::new(Severity::Trace, Vec::new());
    let result = rewriter.rewrite(
        &bytes,
        &RewriteContext {
            analysis: &analysis,
            hierarchy: &hierarchy,
        },
        &mut messages,
    );
    Rewritten { result, messages }
}

fn rewrite(builder: ClassBuilder) -> Rewritten {
    rewrite_with(builder, BytecodeRewriter::new(RewriteOptions::all(), DeterminismPolicy::default()))
}

fn decoded(outcome: &RewriteOutcome) -> ClassFile {
    decode_class(&outcome.bytes).unwrap()
}

fn body<'a>(class: &'a ClassFile, name: &str) -> &'a [Instruction] {
    &class
        .methods
        .iter()
        .find(|m| m.name == name)
        .unwrap()
        .code
        .as_ref()
        .unwrap()
        .instructions
}

fn calls(insns: &[Instruction], owner: &str, name: &str) -> usize {
    insns
        .iter()
        .filter(|i| matches!(i, Instruction::Invoke { method, .. } if method.owner == owner && method.name == name))
        .count()
}

fn sum_class() -> ClassBuilder {
    ClassBuilder::new("com/acme/Sum")
        .implements("util/function/Function")
        .default_constructor()
        .method("apply", "(Llang/Object;)Llang/Object;", AccessFlags::PUBLIC, |code| {
            let top = code.new_label();
            let done = code.new_label();
            code.load(1).check_cast("[I").store(2);
            code.push_int(0).store(3);
            code.push_int(0).store(4);
            code.bind(top);
            code.load(4).load(2).emit(Instruction::ArrayLength).if_cmp(Condition::Ge, done);
            code.load(3).load(2).load(4).emit(Instruction::ArrayLoad).arith(sandbox_types::ArithOp::Add).store(3);
            code.increment(4, 1).goto(top);
            code.bind(done);
            code.load(3).return_value();
        })
}

#[test]
fn test_sum_is_isolated_and_instrumented() {
    let rewritten = rewrite(sum_class());
    let outcome = rewritten.result.unwrap();
    assert!(outcome.modified);
    assert!(!outcome.is_throwable);
    assert_eq!(outcome.class_name, "sandbox/com/acme/Sum");

    let class = decoded(&outcome);
    assert_eq!(class.interfaces, vec!["util/function/Function"]);
    let apply = class.method("apply", "(Lsandbox/lang/Object;)Lsandbox/lang/Object;").unwrap();
    let insns = &apply.code.as_ref().unwrap().instructions;
    assert_eq!(calls(insns, COST_ACCOUNTER, RECORD_JUMP), 1);
    let init = body(&class, "<init>");
    assert_eq!(calls(init, COST_ACCOUNTER, "recordInvocation"), 1);
    assert!(rewritten.messages.is_empty());
}

#[test]
fn test_every_disallowed_reference_is_reported() {
    let rewritten = rewrite(
        ClassBuilder::new("com/acme/Leaky")
            .source_file("Leaky.src")
            .method("run", "()V", AccessFlags::PUBLIC | AccessFlags::STATIC, |code| {
                code.line(4);
                code.new_object("io/File").emit(Instruction::Pop);
                code.line(5);
                code.invoke_static("lang/Thread", "yield", "()V");
                code.return_void();
            }),
    );
    let err = rewritten.result.unwrap_err();
    assert!(matches!(err, LoadError::UnsupportedApi { .. }));
    let texts: Vec<String> = rewritten.messages.sorted().iter().map(|m| m.text.clone()).collect();
    assert!(texts.contains(&"Disallowed reference to API; io/File".to_string()));
    assert!(texts.contains(&"Disallowed reference to API; lang/Thread".to_string()));
    assert!(rewritten
        .messages
        .sorted()
        .iter()
        .all(|m| m.severity == Severity::Error && m.location.class_name == "com/acme/Leaky"));
}

#[test]
fn test_clock_is_redirected_when_allowed() {
    let clock = |code: &mut sandbox_types::CodeBuilder| {
        code.invoke_static("lang/System", "currentTimeMillis", "()J").return_value();
    };
    let rejected = rewrite(ClassBuilder::new("com/acme/Now").method("now", "()J", AccessFlags::STATIC, clock));
    assert_eq!(
        rejected.result.unwrap_err(),
        LoadError::UnsupportedApi {
            class_name: "com/acme/Now".to_string(),
            api: "lang/System.currentTimeMillis()J".to_string(),
        }
    );

    let frozen = DeterminismPolicy {
        clock: ClockPolicy::Frozen { timestamp_ms: 42 },
        ..DeterminismPolicy::default()
    };
    let redirected = rewrite_with(
        ClassBuilder::new("com/acme/Now").method("now", "()J", AccessFlags::STATIC, clock),
        BytecodeRewriter::new(RewriteOptions::all(), frozen),
    );
    let class = decoded(&redirected.result.unwrap());
    assert!(body(&class, "now").contains(&Instruction::Invoke {
        kind: InvokeKind::Static,
        method: MethodRef::new("sandbox/lang/DeterministicClock", "currentTimeMillis", "()J"),
    }));
    assert_eq!(redirected.messages.count_of(Severity::Informational), 1);
}

#[test]
fn test_enum_listing_is_redirected() {
    let rewritten = rewrite(ClassBuilder::new("com/acme/Colors").method(
        "all",
        "(Llang/Class;)[Llang/Object;",
        AccessFlags::STATIC,
        |code| {
            code.load(0)
                .invoke_virtual("lang/Class", "getEnumConstants", "()[Llang/Object;")
                .return_value();
        },
    ));
    let class = decoded(&rewritten.result.unwrap());
    assert!(body(&class, "all").contains(&Instruction::Invoke {
        kind: InvokeKind::Static,
        method: MethodRef::new(
            "sandbox/lang/Enum",
            "constantsOf",
            "(Lsandbox/lang/Class;)[Lsandbox/lang/Object;"
        ),
    }));
}

#[test]
fn test_native_methods_are_stubbed() {
    let rewritten = rewrite(ClassBuilder::new("com/acme/Native").native_method(
        "peek",
        "(J)I",
        AccessFlags::PUBLIC | AccessFlags::STATIC,
    ));
    let class = decoded(&rewritten.result.unwrap());
    let peek = class.method("peek", "(J)I").unwrap();
    assert!(!peek.access.is_native());
    let insns = &peek.code.as_ref().unwrap().instructions;
    assert_eq!(calls(insns, RUNTIME, RULE_VIOLATION), 1);
    assert_eq!(insns.last(), Some(&Instruction::Throw));
    assert_eq!(rewritten.messages.warning_count(), 1);
    assert_eq!(
        rewritten.messages.sorted()[0].text,
        "Native method has been deleted; Native.peek(J)I"
    );
}

#[test]
fn test_throwables_are_detected_and_handlers_guarded() {
    let rewritten = rewrite(
        ClassBuilder::new("com/acme/Oops")
            .extends("lang/RuntimeException")
            .method("swallow", "()V", AccessFlags::STATIC, |code| {
                let start = code.new_label();
                let end = code.new_label();
                let handler = code.new_label();
                code.bind(start);
                code.invoke_static("com/acme/Oops", "risky", "()V");
                code.bind(end);
                code.return_void();
                code.bind(handler);
                code.emit(Instruction::Pop).return_void();
                code.try_catch(start, end, handler, Some("lang/Throwable"));
            }),
    );
    let outcome = rewritten.result.unwrap();
    assert!(outcome.is_throwable);
    let class = decoded(&outcome);
    assert_eq!(class.super_name.as_deref(), Some("sandbox/lang/RuntimeException"));
    assert_eq!(calls(body(&class, "swallow"), RUNTIME, CHECK_CATCH), 1);
}

#[test]
fn test_double_arithmetic_sets_strict() {
    let rewritten = rewrite(ClassBuilder::new("com/acme/Average").method(
        "half",
        "(D)D",
        AccessFlags::STATIC,
        |code| {
            code.load(0).push_double(2.0).arith(sandbox_types::ArithOp::Div).return_value();
        },
    ));
    let class = decoded(&rewritten.result.unwrap());
    assert!(class.methods[0].access.contains(AccessFlags::STRICT));
}

#[test]
fn test_no_passes_leaves_bytes_untouched() {
    let bytes = sum_class().to_bytes().unwrap();
    let rewritten = rewrite_with(sum_class(), BytecodeRewriter::new(RewriteOptions::none(), DeterminismPolicy::default()));
    let outcome = rewritten.result.unwrap();
    assert!(!outcome.modified);
    assert_eq!(outcome.bytes, bytes);
    assert_eq!(outcome.class_name, "com/acme/Sum");
}

#[test]
fn test_bad_branch_target_is_malformed() {
    let rewritten = rewrite(ClassBuilder::new("com/acme/Broken").method("f", "()V", AccessFlags::STATIC, |code| {
        code.emit(Instruction::Goto(99));
    }));
    assert!(matches!(rewritten.result, Err(LoadError::MalformedInput { .. })));
    assert_eq!(rewritten.messages.error_count(), 1);
}
