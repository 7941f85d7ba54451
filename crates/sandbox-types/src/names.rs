//! Class-name conventions shared by every crate in the workspace.
//!
//! Names are internal, slash separated (`com/acme/Sum`). Every user or
//! platform class seen inside a sandbox is renamed into the reserved
//! [`SANDBOX_PREFIX`] namespace, so a sandboxed class can only ever link to
//! other sandboxed classes or to the small pinned whitelist.

/// Reserved namespace for sandboxed classes.
pub const SANDBOX_PREFIX: &str = "sandbox/";

/// Suffix of the synthetic carrier name that ties a sandboxed throwable back
/// to its original class.
pub const EXCEPTION_CARRIER_SUFFIX: &str = "$Thrown";

/// Namespaces of the general-purpose platform library.
pub const PLATFORM_NAMESPACES: &[&str] = &[
    "lang/", "util/", "io/", "nio/", "net/", "reflect/", "time/", "security/",
];

/// Namespaces internal to the host runtime. Never resolvable from a sandbox.
pub const HOST_INTERNAL_NAMESPACES: &[&str] = &["internal/", "vm/"];

/// Host classes that are shared with sandboxed code instead of being renamed.
pub const PINNED_CLASSES: &[&str] = &["util/function/Function"];

/// Host interfaces that a sandboxed class keeps next to its sandboxed twin.
pub const STITCHED_INTERFACES: &[&str] = &["lang/Comparable", "lang/CharSequence"];

pub fn is_sandboxed(name: &str) -> bool {
    name.starts_with(SANDBOX_PREFIX)
}

/// Rename a class into the sandbox namespace.
///
/// The mapping is not idempotent: a name that already carries the prefix is
/// prefixed again, which is what keeps user code from naming a sandbox
/// internal directly.
pub fn to_sandboxed(name: &str) -> String {
    format!("{SANDBOX_PREFIX}{name}")
}

/// Strip the sandbox prefix.
pub fn from_sandboxed(name: &str) -> Option<&str> {
    name.strip_prefix(SANDBOX_PREFIX)
}

/// The name seen by sandboxed code: sandboxed, unless pinned.
pub fn sandboxed_reference(name: &str) -> String {
    if is_pinned(name) {
        name.to_string()
    } else {
        to_sandboxed(name)
    }
}

pub fn is_pinned(name: &str) -> bool {
    PINNED_CLASSES.contains(&name)
}

pub fn is_stitched_interface(name: &str) -> bool {
    STITCHED_INTERFACES.contains(&name)
}

pub fn is_platform_class(name: &str) -> bool {
    PLATFORM_NAMESPACES.iter().any(|ns| name.starts_with(ns))
}

pub fn is_host_internal(name: &str) -> bool {
    HOST_INTERNAL_NAMESPACES.iter().any(|ns| name.starts_with(ns))
}

/// Carrier name registered for a sandboxed throwable class.
pub fn exception_carrier_name(sandboxed: &str) -> String {
    format!("{sandboxed}{EXCEPTION_CARRIER_SUFFIX}")
}

/// Owning sandboxed throwable of a carrier name.
pub fn exception_owner(name: &str) -> Option<&str> {
    name.strip_suffix(EXCEPTION_CARRIER_SUFFIX)
        .filter(|owner| is_sandboxed(owner))
}

/// Relative path of a class inside a classpath directory or archive.
pub fn class_file_path(name: &str) -> String {
    format!("{name}.class")
}

/// Rejects names that could escape a classpath root.
pub fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.contains('\\')
        && !name.contains(['.', ';', '[', '(', ')'])
        && name.split('/').all(|segment| !segment.is_empty())
}

/// `com/acme/Sum` -> `Sum`.
pub fn simple_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
