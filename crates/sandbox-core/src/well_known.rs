//! Runtime names of the classes and members the sandbox itself relies on.
//!
//! Everything here is already in the sandbox namespace except the pinned
//! host interfaces, which keep their host names.

use sandbox_types::names::from_sandboxed;

pub const OBJECT: &str = "sandbox/lang/Object";
pub const STRING: &str = "sandbox/lang/String";
pub const STRING_BUILDER: &str = "sandbox/lang/StringBuilder";
pub const CLASS: &str = "sandbox/lang/Class";
pub const ENUM: &str = "sandbox/lang/Enum";
pub const MATH: &str = "sandbox/lang/Math";
pub const SYSTEM: &str = "sandbox/lang/System";
pub const DETERMINISTIC_CLOCK: &str = "sandbox/lang/DeterministicClock";
pub const RANDOM: &str = "sandbox/util/Random";
pub const INTEGER: &str = "sandbox/lang/Integer";
pub const LONG: &str = "sandbox/lang/Long";
pub const DOUBLE: &str = "sandbox/lang/Double";
pub const BOOLEAN: &str = "sandbox/lang/Boolean";
pub const CHARACTER: &str = "sandbox/lang/Character";
pub const UNICODE_BLOCK: &str = "sandbox/lang/Character$UnicodeBlock";
pub const UNICODE_SCRIPT: &str = "sandbox/lang/Character$UnicodeScript";
pub const COMPARATOR: &str = "sandbox/util/Comparator";
pub const COMPARATOR_DESCRIPTOR: &str = "(Lsandbox/lang/Object;Lsandbox/lang/Object;)I";
pub const CASE_INSENSITIVE_COMPARATOR: &str = "sandbox/lang/String$CaseInsensitiveComparator";
pub const CASE_INSENSITIVE_ORDER: &str = "CASE_INSENSITIVE_ORDER";
pub const ARRAYS: &str = "sandbox/util/Arrays";
pub const COMPARABLE: &str = "sandbox/lang/Comparable";
pub const CHAR_SEQUENCE: &str = "sandbox/lang/CharSequence";

// Throwables
pub const THROWABLE: &str = "sandbox/lang/Throwable";
pub const EXCEPTION: &str = "sandbox/lang/Exception";
pub const RUNTIME_EXCEPTION: &str = "sandbox/lang/RuntimeException";
pub const ILLEGAL_ARGUMENT: &str = "sandbox/lang/IllegalArgumentException";
pub const ILLEGAL_STATE: &str = "sandbox/lang/IllegalStateException";
pub const ARITHMETIC: &str = "sandbox/lang/ArithmeticException";
pub const NULL_POINTER: &str = "sandbox/lang/NullPointerException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS: &str = "sandbox/lang/ArrayIndexOutOfBoundsException";
pub const INDEX_OUT_OF_BOUNDS: &str = "sandbox/lang/IndexOutOfBoundsException";
pub const STRING_INDEX_OUT_OF_BOUNDS: &str = "sandbox/lang/StringIndexOutOfBoundsException";
pub const ARRAY_STORE: &str = "sandbox/lang/ArrayStoreException";
pub const CLASS_CAST: &str = "sandbox/lang/ClassCastException";
pub const NEGATIVE_ARRAY_SIZE: &str = "sandbox/lang/NegativeArraySizeException";
pub const UNSUPPORTED_OPERATION: &str = "sandbox/lang/UnsupportedOperationException";
pub const CLASS_NOT_FOUND: &str = "sandbox/lang/ClassNotFoundException";
pub const ERROR: &str = "sandbox/lang/Error";
pub const STACK_OVERFLOW: &str = "sandbox/lang/StackOverflowError";
pub const OUT_OF_MEMORY: &str = "sandbox/lang/OutOfMemoryError";
pub const THREAD_DEATH: &str = "sandbox/lang/ThreadDeath";
pub const LINKAGE_ERROR: &str = "sandbox/lang/LinkageError";
pub const NO_CLASS_DEF_FOUND: &str = "sandbox/lang/NoClassDefFoundError";

/// Errors that sandboxed code may never catch.
pub const FATAL_ERRORS: &[&str] = &[STACK_OVERFLOW, OUT_OF_MEMORY, THREAD_DEATH];

/// Field holding the primitive of a boxed value.
pub const BOX_VALUE: &str = "value";

pub const THROWABLE_MESSAGE: &str = "message";
pub const THROWABLE_CAUSE: &str = "cause";

// Injected helpers
pub const COST_ACCOUNTER: &str = "sandbox/RuntimeCostAccounter";
pub const RECORD_INVOCATION: &str = "recordInvocation";
pub const RECORD_ALLOCATION: &str = "recordAllocation";
pub const RECORD_ARRAY_ALLOCATION: &str = "recordArrayAllocation";
pub const RECORD_JUMP: &str = "recordJump";

pub const RUNTIME: &str = "sandbox/Runtime";
pub const CHECK_CATCH: &str = "checkCatch";
pub const CHECK_CATCH_DESCRIPTOR: &str = "(Lsandbox/lang/Throwable;)V";
pub const RULE_VIOLATION: &str = "ruleViolation";
pub const RULE_VIOLATION_DESCRIPTOR: &str = "(Lsandbox/lang/String;)V";

// Pinned host interfaces
pub const FUNCTION: &str = "util/function/Function";
pub const HOST_COMPARABLE: &str = "lang/Comparable";
pub const HOST_CHAR_SEQUENCE: &str = "lang/CharSequence";

/// Entry points are invoked as `Function.apply` on a fresh instance.
pub const ENTRY_METHOD: &str = "apply";
pub const ENTRY_DESCRIPTOR: &str = "(Lsandbox/lang/Object;)Lsandbox/lang/Object;";

pub const CONSTRUCTOR: &str = "<init>";
pub const CLASS_INITIALIZER: &str = "<clinit>";

/// Enum listing that replaces reflective `Class.getEnumConstants`.
pub const ENUM_CONSTANTS: &str = "constantsOf";
pub const ENUM_NAME: &str = "name";
pub const ENUM_ORDINAL: &str = "ordinal";
/// Name field of a `Character.UnicodeBlock`.
pub const BLOCK_NAME: &str = "name";
pub const ENUM_CONSTANTS_DESCRIPTOR: &str = "(Lsandbox/lang/Class;)[Lsandbox/lang/Object;";

pub fn is_fatal_error(name: &str) -> bool {
    FATAL_ERRORS.contains(&name)
}

/// True for a handler catch type that could intercept a fatal error, in
/// either original or sandboxed form. `None` catches everything.
///
/// Matching is by exact name. A handler for a user subclass of a fatal
/// error is not guarded, so it can catch instances of that subclass. Fatal
/// errors raised by the sandbox itself are never such instances.
pub fn catches_fatal(catch_type: Option<&str>) -> bool {
    let Some(catch_type) = catch_type else {
        return true;
    };
    let original = from_sandboxed(catch_type).unwrap_or(catch_type);
    matches!(
        original,
        "lang/Throwable" | "lang/Error" | "lang/StackOverflowError" | "lang/OutOfMemoryError" | "lang/ThreadDeath"
    )
}

/// Helper classes injected by the rewriter. They live in the reserved
/// namespace but have no original counterpart.
pub fn is_injected_helper(name: &str) -> bool {
    name == COST_ACCOUNTER || name == RUNTIME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catches_fatal() {
        assert!(catches_fatal(None));
        assert!(catches_fatal(Some("lang/Throwable")));
        assert!(catches_fatal(Some(ERROR)));
        assert!(catches_fatal(Some(STACK_OVERFLOW)));
        assert!(!catches_fatal(Some(EXCEPTION)));
        assert!(!catches_fatal(Some("com/acme/MyError")));
    }

    #[test]
    fn test_user_subclasses_of_fatal_errors_are_not_guarded() {
        assert!(catches_fatal(Some("sandbox/lang/ThreadDeath")));
        assert!(!catches_fatal(Some("com/acme/DeepStackOverflowError")));
        assert!(!catches_fatal(Some("sandbox/com/acme/DeepStackOverflowError")));
    }
}
