//! Static analysis of class files.
//!
//! ## Components
//!
//! - [`analyzer`] - decodes a class file and records every class and member
//!   it references, with source locations
//! - [`hierarchy`] - the per-sandbox store of [`ClassRepresentation`]s used
//!   to answer subtype questions without loading code
//! - [`references`] - the reference model shared by both
//!
//! Analysis is purely syntactic: nothing is loaded or resolved. Results are
//! content-addressed by the SHA-256 of the class bytes, so one
//! [`AnalysisCache`] can be shared by every sandbox in the process.

pub mod analyzer;
pub mod hierarchy;
pub mod references;

pub use analyzer::{analyze, AnalysisCache, AnalysisCacheStats, AnalysisError, AnalyzedClass};
pub use hierarchy::{ClassHierarchy, ClassRepresentation, MemberInformation};
pub use references::{ClassReference, EntityReference, MemberReference, ReferenceMap};
