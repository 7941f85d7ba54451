#![allow(dead_code)]
//! Shared fixtures for sandbox integration tests.
//!
//! Classes are written with [`ClassBuilder`] under their original names and
//! placed on a temporary classpath, exactly as a caller would ship them.
//!
//! # Helpers
//!
//! - `classpath_dir` / `classpath_archive`: materialize classes on disk
//! - `run` / `run_with`: execute an entry point against a fixture classpath
//! - `function`: skeleton of an entry point class

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use sandbox_core::{execute, SandboxConfiguration, SandboxResult, SerializedValue};
use sandbox_types::names::class_file_path;
use sandbox_types::{encode_class, AccessFlags, ArithOp, ClassArchive, ClassBuilder, CodeBuilder, Condition, Instruction};

pub const FUNCTION: &str = "util/function/Function";
pub const APPLY: &str = "(Llang/Object;)Llang/Object;";
pub const IDENTITY_HASH_BASE: i32 = 0x0fed_c0de;

// =============================================================================
// Classpath
// =============================================================================

/// Write each class as `<name>.class` below a fresh directory.
pub fn classpath_dir(classes: Vec<ClassBuilder>) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    for builder in classes {
        let class = builder.build().expect("fixture class should build");
        let path = dir.path().join(class_file_path(&class.name));
        fs::create_dir_all(path.parent().expect("class path has a parent")).expect("create package dirs");
        fs::write(&path, encode_class(&class).expect("encode")).expect("write class file");
    }
    dir
}

/// Pack the classes into one archive inside a fresh directory.
pub fn classpath_archive(classes: Vec<ClassBuilder>) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut archive = ClassArchive::new();
    for builder in classes {
        let class = builder.build().expect("fixture class should build");
        archive.insert_class(&class).expect("archive insert");
    }
    let path = dir.path().join("app.sar");
    archive.write_to(&path).expect("write archive");
    (dir, path)
}

pub fn config_for(dir: &TempDir) -> SandboxConfiguration {
    SandboxConfiguration::default().with_classpath(dir.path())
}

pub fn run(classes: Vec<ClassBuilder>, entry: &str, input: &SerializedValue) -> SandboxResult {
    run_with(classes, entry, input, |config| config)
}

pub fn run_with(
    classes: Vec<ClassBuilder>,
    entry: &str,
    input: &SerializedValue,
    configure: impl FnOnce(SandboxConfiguration) -> SandboxConfiguration,
) -> SandboxResult {
    let dir = classpath_dir(classes);
    execute(entry, input, configure(config_for(&dir)))
}

// =============================================================================
// Fixture classes
// =============================================================================

/// A public entry point class with a default constructor.
pub fn function(name: &str) -> ClassBuilder {
    ClassBuilder::new(name).implements(FUNCTION).default_constructor()
}

/// Sums an `int[]` and returns the boxed total.
pub fn sum() -> ClassBuilder {
    function("com/acme/Sum").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        let top = code.new_label();
        let done = code.new_label();
        code.load(1).check_cast("[I").store(2);
        code.push_int(0).store(3);
        code.push_int(0).store(4);
        code.bind(top);
        code.load(3).load(2).emit(Instruction::ArrayLength).if_cmp(Condition::Ge, done);
        code.load(4).load(2).load(3).emit(Instruction::ArrayLoad).arith(ArithOp::Add).store(4);
        code.increment(3, 1).goto(top);
        code.bind(done);
        code.load(4).invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;");
        code.return_value();
    })
}

/// Loops forever, optionally inside `catch (Throwable)`.
pub fn infinite_loop(catch_everything: bool) -> ClassBuilder {
    function("com/acme/InfiniteLoop").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        let start = code.new_label();
        let end = code.new_label();
        let handler = code.new_label();
        code.bind(start);
        code.goto(start);
        code.bind(end);
        code.bind(handler);
        code.emit(Instruction::Pop).push_string("swallowed").return_value();
        if catch_everything {
            code.try_catch(start, end, handler, Some("lang/Throwable"));
        }
    })
}

/// Increments a static counter and returns it.
pub fn counter() -> ClassBuilder {
    function("com/acme/Counter")
        .field("count", "I", AccessFlags::PRIVATE | AccessFlags::STATIC)
        .method("apply", APPLY, AccessFlags::PUBLIC, |code| {
            code.get_static("com/acme/Counter", "count", "I").push_int(1).arith(ArithOp::Add);
            code.put_static("com/acme/Counter", "count", "I");
            code.get_static("com/acme/Counter", "count", "I");
            code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;").return_value();
        })
}

/// A user exception with message and cause constructors.
pub fn insufficient_funds() -> ClassBuilder {
    const PARENT: &str = "lang/RuntimeException";
    ClassBuilder::new("com/acme/InsufficientFunds")
        .extends(PARENT)
        .method("<init>", "(Llang/String;Llang/Throwable;)V", AccessFlags::PUBLIC, |code| {
            code.load(0).load(1).load(2);
            code.invoke_special(PARENT, "<init>", "(Llang/String;Llang/Throwable;)V").return_void();
        })
}

/// Divides by its input, wrapping the `ArithmeticException` in
/// `InsufficientFunds`.
pub fn bank() -> ClassBuilder {
    function("com/acme/Bank").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        let start = code.new_label();
        let end = code.new_label();
        let handler = code.new_label();
        code.bind(start);
        code.push_int(100);
        code.load(1).check_cast("lang/Integer").invoke_virtual("lang/Integer", "intValue", "()I");
        code.arith(ArithOp::Div);
        code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;").return_value();
        code.bind(end);
        code.bind(handler);
        code.store(2);
        code.new_object("com/acme/InsufficientFunds").emit(Instruction::Dup);
        code.push_string("balance too low").load(2);
        code.invoke_special("com/acme/InsufficientFunds", "<init>", "(Llang/String;Llang/Throwable;)V");
        code.throw();
        code.try_catch(start, end, handler, Some("lang/ArithmeticException"));
    })
}

/// Returns the identity hashes of two fresh objects.
pub fn hashes() -> ClassBuilder {
    function("com/acme/Hashes").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        for slot in [2, 3] {
            code.new_object("lang/Object").emit(Instruction::Dup);
            code.invoke_special("lang/Object", "<init>", "()V");
            code.invoke_virtual("lang/Object", "hashCode", "()I").store(slot);
        }
        code.push_int(2).new_array("I").store(4);
        for (index, slot) in [(0, 2), (1, 3)] {
            code.load(4).push_int(index).load(slot).emit(Instruction::ArrayStore);
        }
        code.load(4).return_value();
    })
}

/// Mixes a seeded `Random`, `Math.random` and an identity hash.
pub fn entropy() -> ClassBuilder {
    function("com/acme/Entropy").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        code.push_int(3).new_array("Llang/Object;").store(2);

        code.load(2).push_int(0);
        code.new_object("util/Random").emit(Instruction::Dup).push_long(42);
        code.invoke_special("util/Random", "<init>", "(J)V");
        code.invoke_virtual("util/Random", "nextLong", "()J");
        code.invoke_static("lang/Long", "valueOf", "(J)Llang/Long;");
        code.emit(Instruction::ArrayStore);

        code.load(2).push_int(1);
        code.invoke_static("lang/Math", "random", "()D");
        code.invoke_static("lang/Double", "valueOf", "(D)Llang/Double;");
        code.emit(Instruction::ArrayStore);

        code.load(2).push_int(2);
        code.new_object("lang/Object").emit(Instruction::Dup);
        code.invoke_special("lang/Object", "<init>", "()V");
        code.invoke_virtual("lang/Object", "hashCode", "()I");
        code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;");
        code.emit(Instruction::ArrayStore);

        code.load(2).return_value();
    })
}

/// Entry point whose `apply` invokes `owner.name()V` style statics and
/// returns null.
pub fn calling(name: &str, owner: &str, method: &str, descriptor: &str, returns: bool) -> ClassBuilder {
    let (owner, method, descriptor) = (owner.to_string(), method.to_string(), descriptor.to_string());
    function(name).method("apply", APPLY, AccessFlags::PUBLIC, move |code| {
        code.invoke_static(&owner, &method, &descriptor);
        if returns {
            code.emit(Instruction::Pop);
        }
        code.push_null().return_value();
    })
}

/// Recurses without bound, optionally inside `catch (Throwable)`.
pub fn recursion(catch_everything: bool) -> ClassBuilder {
    function("com/acme/Recursion")
        .method("dive", "()V", AccessFlags::PUBLIC | AccessFlags::STATIC, |code| {
            code.invoke_static("com/acme/Recursion", "dive", "()V").return_void();
        })
        .method("apply", APPLY, AccessFlags::PUBLIC, |code| {
            let start = code.new_label();
            let end = code.new_label();
            let handler = code.new_label();
            code.bind(start);
            code.invoke_static("com/acme/Recursion", "dive", "()V");
            code.bind(end);
            code.push_null().return_value();
            code.bind(handler);
            code.emit(Instruction::Pop).push_string("survived").return_value();
            if catch_everything {
                code.try_catch(start, end, handler, Some("lang/Throwable"));
            }
        })
}

/// Sorts a `String[]` in place, by `CASE_INSENSITIVE_ORDER` or naturally.
pub fn sorter(ignore_case: bool) -> ClassBuilder {
    function("com/acme/Sorter").method("apply", APPLY, AccessFlags::PUBLIC, move |code| {
        code.load(1).check_cast("[Llang/String;").store(2);
        code.load(2);
        if ignore_case {
            code.get_static("lang/String", "CASE_INSENSITIVE_ORDER", "Lutil/Comparator;");
            code.invoke_static("util/Arrays", "sort", "([Llang/Object;Lutil/Comparator;)V");
        } else {
            code.invoke_static("util/Arrays", "sort", "([Llang/Object;)V");
        }
        code.load(2).return_value();
    })
}

/// Answers a fixed set of `Character` and Unicode lookups as an `Object[]`.
pub fn characters() -> ClassBuilder {
    const CHARACTER: &str = "lang/Character";
    const BLOCK: &str = "lang/Character$UnicodeBlock";
    const SCRIPT: &str = "lang/Character$UnicodeScript";
    function("com/acme/Characters").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        code.push_int(9).new_array("Llang/Object;").store(2);
        let mut slot = 0;
        let mut store = |code: &mut CodeBuilder, value: &dyn Fn(&mut CodeBuilder)| {
            code.load(2).push_int(slot);
            value(code);
            code.emit(Instruction::ArrayStore);
            slot += 1;
        };

        store(code, &|code| {
            code.push_int(0x3A9).invoke_static(CHARACTER, "isLetter", "(I)Z");
            code.invoke_static("lang/Boolean", "valueOf", "(Z)Llang/Boolean;");
        });
        store(code, &|code| {
            code.push_int('5' as i32).invoke_static(CHARACTER, "getType", "(C)I");
            code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;");
        });
        store(code, &|code| {
            code.push_int(0x416).invoke_static(BLOCK, "of", "(C)Llang/Character$UnicodeBlock;");
            code.invoke_virtual(BLOCK, "toString", "()Llang/String;");
        });
        store(code, &|code| {
            code.push_int(0x41).invoke_static(BLOCK, "of", "(I)Llang/Character$UnicodeBlock;");
            code.get_static(BLOCK, "BASIC_LATIN", "Llang/Character$UnicodeBlock;");
            code.invoke_virtual("lang/Object", "equals", "(Llang/Object;)Z");
            code.invoke_static("lang/Boolean", "valueOf", "(Z)Llang/Boolean;");
        });
        store(code, &|code| {
            code.push_int(0x4E2D).invoke_static(SCRIPT, "of", "(I)Llang/Character$UnicodeScript;");
            code.invoke_virtual(SCRIPT, "name", "()Llang/String;");
        });
        store(code, &|code| {
            code.push_int(0xE9).invoke_static(CHARACTER, "toUpperCase", "(C)C");
            code.invoke_static(CHARACTER, "valueOf", "(C)Llang/Character;");
        });
        store(code, &|code| {
            code.push_string("Stra\u{df}e").invoke_virtual("lang/String", "toUpperCase", "()Llang/String;");
        });
        store(code, &|code| {
            code.push_string("Apple").push_string("APPLE");
            code.invoke_virtual("lang/String", "compareToIgnoreCase", "(Llang/String;)I");
            code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;");
        });
        store(code, &|code| {
            code.push_int('f' as i32).push_int(16).invoke_static(CHARACTER, "digit", "(CI)I");
            code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;");
        });

        code.load(2).return_value();
    })
}

/// Looks up the block of its boxed `int` input.
pub fn block_lookup() -> ClassBuilder {
    function("com/acme/BlockLookup").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        code.load(1).check_cast("lang/Integer").invoke_virtual("lang/Integer", "intValue", "()I");
        code.invoke_static("lang/Character$UnicodeBlock", "of", "(I)Llang/Character$UnicodeBlock;");
        code.return_value();
    })
}

/// Throws `InsufficientFunds` inside `catch (RuntimeException)` and returns
/// a marker from the handler.
pub fn vault() -> ClassBuilder {
    function("com/acme/Vault").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        let start = code.new_label();
        let end = code.new_label();
        let handler = code.new_label();
        code.bind(start);
        code.new_object("com/acme/InsufficientFunds").emit(Instruction::Dup);
        code.push_string("vault sealed").push_null();
        code.invoke_special("com/acme/InsufficientFunds", "<init>", "(Llang/String;Llang/Throwable;)V");
        code.throw();
        code.bind(end);
        code.bind(handler);
        code.emit(Instruction::Pop).push_string("recovered").return_value();
        code.try_catch(start, end, handler, Some("lang/RuntimeException"));
    })
}

/// Throws a fresh `error` inside `catch (Error)`.
pub fn throws_error(error: &str) -> ClassBuilder {
    let error = error.to_string();
    function("com/acme/Thrower").method("apply", APPLY, AccessFlags::PUBLIC, move |code| {
        let start = code.new_label();
        let end = code.new_label();
        let handler = code.new_label();
        code.bind(start);
        code.new_object(&error).emit(Instruction::Dup);
        code.invoke_special(&error, "<init>", "()V").throw();
        code.bind(end);
        code.bind(handler);
        code.emit(Instruction::Pop).push_string("survived").return_value();
        code.try_catch(start, end, handler, Some("lang/Error"));
    })
}

/// A class whose static initializer divides by zero.
pub fn fragile() -> ClassBuilder {
    ClassBuilder::new("com/acme/Fragile")
        .field("RATE", "I", AccessFlags::PUBLIC | AccessFlags::STATIC)
        .method("<clinit>", "()V", AccessFlags::STATIC, |code| {
            code.push_int(1).push_int(0).arith(ArithOp::Div);
            code.put_static("com/acme/Fragile", "RATE", "I").return_void();
        })
}

/// Reads `Fragile.RATE` twice, swallowing the first failure.
pub fn fragile_reader() -> ClassBuilder {
    function("com/acme/FragileReader").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        let start = code.new_label();
        let end = code.new_label();
        let handler = code.new_label();
        let retry = code.new_label();
        code.bind(start);
        code.get_static("com/acme/Fragile", "RATE", "I").emit(Instruction::Pop);
        code.bind(end);
        code.goto(retry);
        code.bind(handler);
        code.emit(Instruction::Pop);
        code.bind(retry);
        code.get_static("com/acme/Fragile", "RATE", "I");
        code.invoke_static("lang/Integer", "valueOf", "(I)Llang/Integer;").return_value();
        code.try_catch(start, end, handler, Some("lang/ArithmeticException"));
    })
}

/// Throws a `RuntimeException` wrapped `depth` times.
pub fn cause_chain(depth: i32) -> ClassBuilder {
    const EXCEPTION: &str = "lang/RuntimeException";
    function("com/acme/Chain").method("apply", APPLY, AccessFlags::PUBLIC, move |code| {
        let top = code.new_label();
        let done = code.new_label();
        code.new_object(EXCEPTION).emit(Instruction::Dup).push_string("root");
        code.invoke_special(EXCEPTION, "<init>", "(Llang/String;)V").store(2);
        code.push_int(0).store(3);
        code.bind(top);
        code.load(3).push_int(depth).if_cmp(Condition::Ge, done);
        code.new_object(EXCEPTION).emit(Instruction::Dup).push_string("link").load(2);
        code.invoke_special(EXCEPTION, "<init>", "(Llang/String;Llang/Throwable;)V").store(2);
        code.increment(3, 1).goto(top);
        code.bind(done);
        code.load(2).throw();
    })
}

/// Throws an exception that is its own cause.
pub fn self_caused() -> ClassBuilder {
    const EXCEPTION: &str = "lang/RuntimeException";
    function("com/acme/Ouroboros").method("apply", APPLY, AccessFlags::PUBLIC, |code| {
        code.new_object(EXCEPTION).emit(Instruction::Dup).push_string("loop");
        code.invoke_special(EXCEPTION, "<init>", "(Llang/String;)V").store(2);
        code.load(2).load(2);
        code.invoke_virtual(EXCEPTION, "initCause", "(Llang/Throwable;)Llang/Throwable;");
        code.emit(Instruction::Pop);
        code.load(2).throw();
    })
}
