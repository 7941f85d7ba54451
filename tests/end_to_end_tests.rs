//! End-to-end tests through the public facade
//!
//! Test coverage areas:
//! - In-memory classes combined with an on-disk classpath
//! - Byte-identical results across repeated executions
//! - Configuration errors surfacing as malformed input
//! - Reports that serialize for logs

use std::fs;

use det_sandbox::types::names::class_file_path;
use det_sandbox::types::{encode_class, AccessFlags, ArithOp, ClassBuilder, ClassFile, Instruction};
use det_sandbox::{
    execute_classes, execute_with_report, CostCounter, SandboxConfiguration, SandboxFailure, SerializedValue,
    Threshold,
};

const APPLY: &str = "(Llang/Object;)Llang/Object;";

fn build(builder: ClassBuilder) -> ClassFile {
    builder.build().expect("fixture class should build")
}

/// `apply(n)` returns `MathUtil.twice(n)` boxed.
fn doubler() -> ClassFile {
    build(
        ClassBuilder::new("com/acme/Doubler")
            .implements("util/function/Function")
            .default_constructor()
            .method("apply", APPLY, AccessFlags::PUBLIC, |code| {
                code.load(1).check_cast("lang/Integer").invoke_virtual("lang/Integer", "intValue", "()I");
                code.invoke_static("com/acme/MathUtil", "twice", "(I)I");
                code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;").return_value();
            }),
    )
}

fn math_util() -> ClassFile {
    build(
        ClassBuilder::new("com/acme/MathUtil").method("twice", "(I)I", AccessFlags::PUBLIC | AccessFlags::STATIC, |code| {
            code.load(0).emit(Instruction::Dup).arith(ArithOp::Add).return_value();
        }),
    )
}

/// Builds a string from its input and the seeded shared generator.
fn greeter() -> ClassFile {
    build(
        ClassBuilder::new("com/acme/Greeter")
            .implements("util/function/Function")
            .default_constructor()
            .method("apply", APPLY, AccessFlags::PUBLIC, |code| {
                code.new_object("lang/StringBuilder").emit(Instruction::Dup);
                code.push_string("hello ").invoke_special("lang/StringBuilder", "<init>", "(Llang/String;)V");
                code.load(1).invoke_virtual(
                    "lang/StringBuilder",
                    "append",
                    "(Llang/Object;)Llang/StringBuilder;",
                );
                code.push_string(" #");
                code.invoke_virtual("lang/StringBuilder", "append", "(Llang/String;)Llang/StringBuilder;");
                code.invoke_static("lang/Math", "random", "()D");
                code.invoke_virtual("lang/StringBuilder", "append", "(D)Llang/StringBuilder;");
                code.invoke_virtual("lang/StringBuilder", "toString", "()Llang/String;").return_value();
            }),
    )
}

#[test]
fn test_in_memory_entry_links_against_classpath() {
    let dir = tempfile::tempdir().unwrap();
    let helper = math_util();
    let path = dir.path().join(class_file_path(&helper.name));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, encode_class(&helper).unwrap()).unwrap();

    let config = SandboxConfiguration::default().with_classpath(dir.path());
    let summary = execute_classes("com.acme.Doubler", &[doubler()], &SerializedValue::Int(21), config).unwrap();
    assert_eq!(summary.output, SerializedValue::Int(42));
}

#[test]
fn test_missing_dependency_is_class_not_found() {
    let err = execute_classes(
        "com/acme/Doubler",
        &[doubler()],
        &SerializedValue::Int(1),
        SandboxConfiguration::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "class_not_found");
}

#[test]
fn test_outputs_are_byte_identical() {
    let run = || {
        let summary = execute_classes(
            "com/acme/Greeter",
            &[greeter()],
            &SerializedValue::from("world"),
            SandboxConfiguration::default(),
        )
        .unwrap();
        (bincode::serialize(&summary.output).unwrap(), summary)
    };
    let (first_bytes, first) = run();
    let (second_bytes, second) = run();
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first.costs, second.costs);
    let text = first.output.as_str().expect("string output").to_string();
    assert!(text.starts_with("hello world #"), "unexpected output {}", text);
}

#[test]
fn test_invalid_configuration_is_malformed_input() {
    let config = SandboxConfiguration::default().with_max_call_depth(0);
    let err = execute_classes("com/acme/Doubler", &[doubler()], &SerializedValue::Null, config).unwrap_err();
    assert!(matches!(err, SandboxFailure::MalformedInput { .. }));
}

#[test]
fn test_report_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfiguration::default()
        .with_classpath(dir.path())
        .with_threshold(CostCounter::Invocation, Threshold::Limited(10));
    let report = execute_with_report("com/acme/Absent", &SerializedValue::Null, config);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"], "class_not_found");
    assert_eq!(json["entry_point"], "com/acme/Absent");
    assert!(json["summary"].is_null());
}
