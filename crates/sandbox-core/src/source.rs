//! # Class Sources
//!
//! Provides the ordered list of places user classes are read from.
//!
//! ## Key Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ClassProvider`] | Trait for one source of class bytes |
//! | [`DirectoryProvider`] | `root/<name>.class` files |
//! | [`ArchiveProvider`] | A `.sar` archive loaded into memory |
//! | [`MemoryProvider`] | Classes handed over as bytes |
//! | [`SourceClassLoader`] | The ordered chain, with namespace denial |
//!
//! Names asked of a source are always *original* names (`com/acme/Sum`).
//! The reserved sandbox namespace, host-internal namespaces and the platform
//! library namespaces are never served from user sources.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use sandbox_types::names::{
    class_file_path, exception_owner, from_sandboxed, is_host_internal, is_platform_class,
    is_sandboxed, is_valid_class_name,
};
use sandbox_types::ClassArchive;

use crate::errors::LoadError;

// =============================================================================
// ClassProvider Trait
// =============================================================================

/// One source of class bytes.
pub trait ClassProvider: Send + Sync {
    /// Human readable origin, for logs and diagnostics.
    fn describe(&self) -> String;

    /// Bytes for a class, `None` if this source does not have it.
    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn contains(&self, name: &str) -> bool;
}

/// Classes stored as `root/<name>.class`.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(class_file_path(name))
    }
}

impl ClassProvider for DirectoryProvider {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }
}

/// A `.sar` archive, decoded once.
#[derive(Debug, Clone)]
pub struct ArchiveProvider {
    path: PathBuf,
    archive: ClassArchive,
}

impl ArchiveProvider {
    pub fn open(path: &Path) -> Result<Self> {
        let archive = ClassArchive::read_from(path)?;
        debug!(path = %path.display(), classes = archive.len(), "opened class archive");
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    pub fn archive(&self) -> &ClassArchive {
        &self.archive
    }
}

impl ClassProvider for ArchiveProvider {
    fn describe(&self) -> String {
        format!("archive {}", self.path.display())
    }

    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.archive.get(name).map(<[u8]>::to_vec))
    }

    fn contains(&self, name: &str) -> bool {
        self.archive.get(name).is_some()
    }
}

/// Classes supplied directly as bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    classes: BTreeMap<String, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        if self.classes.contains_key(&name) {
            warn!(class = %name, "duplicate class supplied, overwriting previous");
        }
        self.classes.insert(name, bytes);
    }
}

impl ClassProvider for MemoryProvider {
    fn describe(&self) -> String {
        format!("memory ({} classes)", self.classes.len())
    }

    fn read_class(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.classes.get(name).cloned())
    }

    fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }
}

// =============================================================================
// SourceClassLoader
// =============================================================================

/// Why a source lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The name may never be served from user sources.
    Denied { name: String, reason: &'static str },
    NotFound { name: String },
    Io { name: String, message: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Denied { name, reason } => {
                write!(f, "Class file not found; {}.class ({})", name, reason)
            }
            SourceError::NotFound { name } => write!(f, "Class file not found; {}.class", name),
            SourceError::Io { name, message } => write!(f, "Cannot read {}: {}", name, message),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<SourceError> for LoadError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::Denied { name, .. } | SourceError::NotFound { name } => {
                LoadError::ClassNotFound { name }
            }
            SourceError::Io { name, message } => LoadError::MalformedInput {
                class_name: name,
                reason: message,
            },
        }
    }
}

/// The ordered chain of user class sources.
#[derive(Default)]
pub struct SourceClassLoader {
    providers: Vec<Box<dyn ClassProvider>>,
}

impl fmt::Debug for SourceClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.describe()))
            .finish()
    }
}

impl SourceClassLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// One provider per classpath entry: directories are scanned lazily,
    /// anything else is opened as an archive.
    pub fn from_classpath(classpath: &[PathBuf]) -> Result<Self> {
        let mut loader = Self::new();
        for entry in classpath {
            if entry.is_dir() {
                loader.providers.push(Box::new(DirectoryProvider::new(entry)));
            } else {
                let archive = ArchiveProvider::open(entry)
                    .with_context(|| format!("classpath entry {}", entry.display()))?;
                loader.providers.push(Box::new(archive));
            }
        }
        Ok(loader)
    }

    pub fn with_provider(mut self, provider: impl ClassProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Append every provider of `other`, after this loader's own.
    pub fn chain(mut self, other: SourceClassLoader) -> Self {
        self.providers.extend(other.providers);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn check_name(name: &str) -> Result<(), SourceError> {
        let reason = if !is_valid_class_name(name) {
            "invalid class name"
        } else if is_sandboxed(name) {
            "reserved sandbox namespace"
        } else if is_host_internal(name) {
            "host-internal namespace"
        } else if is_platform_class(name) {
            "platform namespace"
        } else {
            return Ok(());
        };
        Err(SourceError::Denied {
            name: name.to_string(),
            reason,
        })
    }

    /// Bytes of an original class name, from the first provider that has it.
    pub fn class_reader(&self, name: &str) -> Result<Vec<u8>, SourceError> {
        Self::check_name(name)?;
        for provider in &self.providers {
            match provider.read_class(name) {
                Ok(Some(bytes)) => {
                    debug!(class = %name, source = %provider.describe(), "read class bytes");
                    return Ok(bytes);
                }
                Ok(None) => continue,
                Err(e) => {
                    return Err(SourceError::Io {
                        name: name.to_string(),
                        message: format!("{:#}", e),
                    })
                }
            }
        }
        Err(SourceError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        Self::check_name(name).is_ok() && self.providers.iter().any(|p| p.contains(name))
    }

    /// Map a sandboxed name, or an exception carrier name, back to the
    /// original class it stands for, verifying that a source provides it.
    pub fn load_source_class(&self, name: &str) -> Result<String, SourceError> {
        let original = source_name(name);
        if self.contains(original) {
            Ok(original.to_string())
        } else {
            Err(SourceError::NotFound {
                name: original.to_string(),
            })
        }
    }
}

/// Original name behind a sandboxed or carrier name.
pub fn source_name(name: &str) -> &str {
    let owner = exception_owner(name).unwrap_or(name);
    from_sandboxed(owner).unwrap_or(owner)
}
