//! Rule table for platform APIs.
//!
//! Rules are written against *original* names, before the namespace pass
//! runs. Each reference is either allowed, rejected with the offending API
//! name, or redirected to a deterministic stand-in. Redirect targets are
//! original names too and are renamed along with everything else.

use sandbox_types::{FieldRef, InvokeKind, MethodRef};

use crate::config::{ClockPolicy, DeterminismPolicy, RandomPolicy};

/// Whole namespaces with no deterministic counterpart.
const REJECTED_NAMESPACES: &[&str] = &[
    "io/",
    "nio/",
    "net/",
    "reflect/",
    "lang/reflect/",
    "lang/invoke/",
    "lang/ref/",
    "security/",
    "time/",
    "util/concurrent/",
];

/// Individual classes that expose threads, processes or class loading.
const REJECTED_CLASSES: &[&str] = &[
    "lang/Thread",
    "lang/ThreadGroup",
    "lang/ThreadLocal",
    "lang/InheritableThreadLocal",
    "lang/Runtime",
    "lang/Process",
    "lang/ProcessBuilder",
    "lang/ClassLoader",
    "lang/SecurityManager",
    "util/Timer",
    "util/SplittableRandom",
];

/// Host-observing members of `lang/System`.
const REJECTED_SYSTEM_METHODS: &[&str] = &[
    "exit",
    "getenv",
    "getProperty",
    "getProperties",
    "setProperty",
    "clearProperty",
    "load",
    "loadLibrary",
    "gc",
    "setIn",
    "setOut",
    "setErr",
    "console",
    "getSecurityManager",
];

/// Members of `lang/Class` that stay available.
const ALLOWED_CLASS_METHODS: &[&str] = &["forName", "getName", "toString", "hashCode", "equals"];

const MONITOR_METHODS: &[&str] = &["wait", "notify", "notifyAll"];

/// Outcome of checking one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRule {
    Allow,
    Reject { api: String },
    Redirect { kind: InvokeKind, method: MethodRef },
}

/// Rule table parameterized by the determinism policy.
#[derive(Debug, Clone, Copy)]
pub struct ApiRules {
    policy: DeterminismPolicy,
}

impl ApiRules {
    pub fn new(policy: DeterminismPolicy) -> Self {
        Self { policy }
    }

    /// Rejection reason for a class reference, if any.
    pub fn check_class(&self, name: &str) -> Option<String> {
        let rejected = REJECTED_NAMESPACES.iter().any(|ns| name.starts_with(ns))
            || REJECTED_CLASSES.contains(&name)
            || (name == "util/Random" && self.policy.random == RandomPolicy::Reject);
        rejected.then(|| name.to_string())
    }

    pub fn check_field(&self, field: &FieldRef) -> ApiRule {
        if let Some(api) = self.check_class(&field.owner) {
            return ApiRule::Reject { api };
        }
        if field.owner == "lang/System" && matches!(field.name.as_str(), "in" | "out" | "err") {
            return ApiRule::Reject {
                api: format!("{}.{}", field.owner, field.name),
            };
        }
        ApiRule::Allow
    }

    pub fn check_method(&self, method: &MethodRef) -> ApiRule {
        if let Some(api) = self.check_class(&method.owner) {
            return ApiRule::Reject { api };
        }
        let name = method.name.as_str();
        if MONITOR_METHODS.contains(&name) && matches!(method.descriptor.as_str(), "()V" | "(J)V" | "(JI)V") {
            return reject(&method.owner, name, &method.descriptor);
        }
        match method.owner.as_str() {
            "lang/System" => self.check_system(method),
            "lang/Math" if name == "random" && self.policy.random == RandomPolicy::Reject => {
                reject(&method.owner, name, &method.descriptor)
            }
            "lang/Class" => check_class_method(method),
            _ => ApiRule::Allow,
        }
    }

    fn check_system(&self, method: &MethodRef) -> ApiRule {
        let name = method.name.as_str();
        if REJECTED_SYSTEM_METHODS.contains(&name) {
            return reject(&method.owner, name, &method.descriptor);
        }
        if matches!(name, "currentTimeMillis" | "nanoTime") {
            if self.policy.clock == ClockPolicy::Reject {
                return reject(&method.owner, name, &method.descriptor);
            }
            return ApiRule::Redirect {
                kind: InvokeKind::Static,
                method: MethodRef::new("lang/DeterministicClock", name, &method.descriptor),
            };
        }
        ApiRule::Allow
    }
}

fn check_class_method(method: &MethodRef) -> ApiRule {
    let name = method.name.as_str();
    if name == "getEnumConstants" {
        return ApiRule::Redirect {
            kind: InvokeKind::Static,
            method: MethodRef::new("lang/Enum", "constantsOf", "(Llang/Class;)[Llang/Object;"),
        };
    }
    if ALLOWED_CLASS_METHODS.contains(&name) {
        ApiRule::Allow
    } else {
        reject(&method.owner, name, &method.descriptor)
    }
}

fn reject(owner: &str, name: &str, descriptor: &str) -> ApiRule {
    ApiRule::Reject {
        api: format!("{}.{}{}", owner, name, descriptor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(clock: ClockPolicy, random: RandomPolicy) -> ApiRules {
        ApiRules::new(DeterminismPolicy { clock, random })
    }

    #[test]
    fn test_namespaces_and_classes_are_rejected() {
        let rules = ApiRules::new(DeterminismPolicy::default());
        assert_eq!(rules.check_class("io/File"), Some("io/File".to_string()));
        assert_eq!(rules.check_class("lang/Thread"), Some("lang/Thread".to_string()));
        assert_eq!(
            rules.check_class("util/concurrent/atomic/AtomicLong"),
            Some("util/concurrent/atomic/AtomicLong".to_string())
        );
        assert_eq!(rules.check_class("util/Random"), None);
        assert_eq!(rules.check_class("lang/String"), None);
        assert_eq!(rules.check_class("com/acme/io/Helper"), None);
    }

    #[test]
    fn test_clock_follows_policy() {
        let millis = MethodRef::new("lang/System", "currentTimeMillis", "()J");
        assert_eq!(
            rules(ClockPolicy::Reject, RandomPolicy::Reject).check_method(&millis),
            ApiRule::Reject {
                api: "lang/System.currentTimeMillis()J".to_string()
            }
        );
        assert_eq!(
            rules(ClockPolicy::Frozen { timestamp_ms: 1 }, RandomPolicy::Reject).check_method(&millis),
            ApiRule::Redirect {
                kind: InvokeKind::Static,
                method: MethodRef::new("lang/DeterministicClock", "currentTimeMillis", "()J"),
            }
        );
    }

    #[test]
    fn test_random_follows_policy() {
        let random = MethodRef::new("lang/Math", "random", "()D");
        let seeded = rules(ClockPolicy::Reject, RandomPolicy::Seeded { seed: [7; 32] });
        assert_eq!(seeded.check_method(&random), ApiRule::Allow);
        assert_eq!(seeded.check_class("util/Random"), None);

        let strict = rules(ClockPolicy::Reject, RandomPolicy::Reject);
        assert!(matches!(strict.check_method(&random), ApiRule::Reject { .. }));
        assert!(strict.check_class("util/Random").is_some());
    }

    #[test]
    fn test_reflection_is_limited() {
        let rules = ApiRules::new(DeterminismPolicy::default());
        let for_name = MethodRef::new("lang/Class", "forName", "(Llang/String;)Llang/Class;");
        assert_eq!(rules.check_method(&for_name), ApiRule::Allow);

        let methods = MethodRef::new("lang/Class", "getDeclaredMethods", "()[Lreflect/Method;");
        assert!(matches!(rules.check_method(&methods), ApiRule::Reject { .. }));

        let constants = MethodRef::new("lang/Class", "getEnumConstants", "()[Llang/Object;");
        assert!(matches!(
            rules.check_method(&constants),
            ApiRule::Redirect { kind: InvokeKind::Static, .. }
        ));
    }

    #[test]
    fn test_monitor_methods_and_system_streams() {
        let rules = ApiRules::new(DeterminismPolicy::default());
        let wait = MethodRef::new("com/acme/Lock", "wait", "()V");
        assert!(matches!(rules.check_method(&wait), ApiRule::Reject { .. }));
        let out = FieldRef::new("lang/System", "out", "Lio/PrintStream;");
        assert_eq!(
            rules.check_field(&out),
            ApiRule::Reject {
                api: "lang/System.out".to_string()
            }
        );
        let exit = MethodRef::new("lang/System", "exit", "(I)V");
        assert!(matches!(rules.check_method(&exit), ApiRule::Reject { .. }));
    }
}
