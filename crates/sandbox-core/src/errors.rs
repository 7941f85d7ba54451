//! Error types of the sandbox.
//!
//! Failures fall into four families that never mix:
//!
//! - **input errors** - malformed classes, missing classes, unsupported APIs;
//!   always recorded in the diagnostics before they are raised
//! - **user exceptions** - throwables escaping the entry point, reported under
//!   their original class names
//! - **resource violations** - cost thresholds and sandbox rules
//! - **internal errors** - defects of the sandbox itself

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::costing::ThresholdViolation;
use crate::messages::DiagnosticsReport;

// =============================================================================
// Class Loading
// =============================================================================

/// Why a class could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The class bytes are not a valid class file.
    MalformedInput { class_name: String, reason: String },

    /// No source provides the class, or the name is not resolvable from a
    /// sandbox at all.
    ClassNotFound { name: String },

    /// The class uses an API that has no deterministic replacement.
    UnsupportedApi { class_name: String, api: String },

    /// A referenced field or method does not exist.
    MissingMember { class_name: String, member: String },

    /// The class inherits from itself.
    Circularity { class_name: String },

    /// The loader was closed.
    Closed,

    /// The sandbox produced an invalid class. Never caused by user input.
    Internal { class_name: String, reason: String },
}

impl LoadError {
    pub fn not_found(name: impl Into<String>) -> Self {
        LoadError::ClassNotFound { name: name.into() }
    }

    pub fn internal(class_name: impl Into<String>, reason: impl Into<String>) -> Self {
        LoadError::Internal {
            class_name: class_name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, LoadError::Internal { .. })
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::MalformedInput { class_name, reason } => {
                write!(f, "Malformed class {}: {}", class_name, reason)
            }
            LoadError::ClassNotFound { name } => {
                write!(f, "Class file not found; {}.class", name)
            }
            LoadError::UnsupportedApi { api, .. } => {
                write!(f, "Disallowed reference to API; {}", api)
            }
            LoadError::MissingMember { class_name, member } => {
                write!(f, "Cannot resolve member {} of {}", member, class_name)
            }
            LoadError::Circularity { class_name } => {
                write!(f, "Class circularity detected for {}", class_name)
            }
            LoadError::Closed => write!(f, "Classloader has been closed"),
            LoadError::Internal { class_name, reason } => {
                write!(f, "Internal error while defining {}: {}", class_name, reason)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// A class-loading failure together with every diagnostic collected up to
/// that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxClassLoadingException {
    pub class_name: String,
    pub cause: LoadError,
    pub diagnostics: DiagnosticsReport,
}

impl fmt::Display for SandboxClassLoadingException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to load class {}: {}", self.class_name, self.cause)?;
        if !self.diagnostics.is_empty() {
            write!(f, " ({} diagnostics)", self.diagnostics.messages.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for SandboxClassLoadingException {}

// =============================================================================
// User Exceptions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "at {}.{}(line {})", self.class_name, self.method_name, line),
            None => write!(f, "at {}.{}", self.class_name, self.method_name),
        }
    }
}

/// A sandboxed throwable, translated back to host terms.
///
/// `class_name` and `ancestry` use original (un-sandboxed) names, so a
/// `com/acme/InsufficientFunds` thrown inside the sandbox is reported as
/// exactly that class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostException {
    pub class_name: String,
    pub message: Option<String>,
    pub stack_trace: Vec<StackFrame>,
    pub cause: Option<Box<HostException>>,
    /// Super classes, nearest first.
    pub ancestry: Vec<String>,
}

impl HostException {
    /// True if this exception is `class_name` or a subclass of it.
    pub fn is_instance_of(&self, class_name: &str) -> bool {
        self.class_name == class_name || self.ancestry.iter().any(|a| a == class_name)
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message)?,
            None => write!(f, "{}", self.class_name)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for HostException {}

// =============================================================================
// Execution Failures
// =============================================================================

/// Every way an execution can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxFailure {
    /// The input value or configuration is unusable.
    MalformedInput { reason: String },

    /// A class could not be loaded. The wrapped exception carries the typed
    /// cause (`ClassNotFound`, `UnsupportedApi`, ...) and the diagnostics.
    ClassLoading(SandboxClassLoadingException),

    /// A cost counter exceeded its threshold.
    ThresholdViolation(ThresholdViolation),

    /// Sandboxed code broke a sandbox rule at runtime.
    RuleViolation { message: String },

    /// A throwable escaped the entry point.
    UserException(HostException),

    /// A defect of the sandbox itself.
    Internal { reason: String },
}

impl SandboxFailure {
    /// The typed class-loading cause, if this is a loading failure.
    pub fn load_error(&self) -> Option<&LoadError> {
        match self {
            SandboxFailure::ClassLoading(e) => Some(&e.cause),
            _ => None,
        }
    }

    /// Diagnostics attached to the failure.
    pub fn diagnostics(&self) -> Option<&DiagnosticsReport> {
        match self {
            SandboxFailure::ClassLoading(e) => Some(&e.diagnostics),
            _ => None,
        }
    }

    /// Short category name, stable for logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxFailure::MalformedInput { .. } => "malformed_input",
            SandboxFailure::ClassLoading(e) => match e.cause {
                LoadError::MalformedInput { .. } => "malformed_input",
                LoadError::ClassNotFound { .. } => "class_not_found",
                LoadError::UnsupportedApi { .. } => "unsupported_api",
                _ => "class_loading",
            },
            SandboxFailure::ThresholdViolation(_) => "threshold_violation",
            SandboxFailure::RuleViolation { .. } => "rule_violation",
            SandboxFailure::UserException(_) => "user_exception",
            SandboxFailure::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for SandboxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxFailure::MalformedInput { reason } => write!(f, "Malformed input: {}", reason),
            SandboxFailure::ClassLoading(e) => write!(f, "{}", e),
            SandboxFailure::ThresholdViolation(v) => write!(f, "{}", v),
            SandboxFailure::RuleViolation { message } => write!(f, "Rule violation: {}", message),
            SandboxFailure::UserException(e) => write!(f, "Uncaught exception {}", e),
            SandboxFailure::Internal { reason } => write!(f, "Internal sandbox error: {}", reason),
        }
    }
}

impl std::error::Error for SandboxFailure {}

impl From<ThresholdViolation> for SandboxFailure {
    fn from(violation: ThresholdViolation) -> Self {
        SandboxFailure::ThresholdViolation(violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_not_found_message() {
        let err = LoadError::not_found("io/File");
        assert_eq!(err.to_string(), "Class file not found; io/File.class");
    }

    #[test]
    fn test_failure_kinds() {
        let failure = SandboxFailure::ClassLoading(SandboxClassLoadingException {
            class_name: "com/acme/A".to_string(),
            cause: LoadError::UnsupportedApi {
                class_name: "com/acme/A".to_string(),
                api: "lang/Thread".to_string(),
            },
            diagnostics: DiagnosticsReport::default(),
        });
        assert_eq!(failure.kind(), "unsupported_api");
        assert!(matches!(
            failure.load_error(),
            Some(LoadError::UnsupportedApi { .. })
        ));
    }

    #[test]
    fn test_host_exception_ancestry() {
        let exc = HostException {
            class_name: "com/acme/Insufficient".to_string(),
            message: Some("balance too low".to_string()),
            stack_trace: vec![],
            cause: None,
            ancestry: vec!["lang/IllegalStateException".to_string(), "lang/RuntimeException".to_string()],
        };
        assert!(exc.is_instance_of("lang/RuntimeException"));
        assert!(!exc.is_instance_of("lang/Error"));
        assert_eq!(exc.to_string(), "com/acme/Insufficient: balance too low");
    }
}
