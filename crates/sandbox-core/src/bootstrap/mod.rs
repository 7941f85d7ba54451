//! # Bootstrap Replacement Library
//!
//! The deterministic stand-ins for the platform classes user code may use,
//! defined once and shared (`Arc`) by every sandbox in the process.
//!
//! ## Contents
//!
//! | Group | Classes |
//! |-------|---------|
//! | Language | `Object`, `String`, `StringBuilder`, `Class`, `Enum`, `Comparable`, `CharSequence` |
//! | Boxes | `Integer`, `Long`, `Double`, `Boolean`, `Character` |
//! | Unicode | `Character.UnicodeBlock`, `Character.UnicodeScript` |
//! | Helpers | `Math`, `System`, `DeterministicClock`, `util/Random`, `util/Arrays`, `util/Comparator` |
//! | Throwables | `Throwable` and the standard exceptions and errors |
//! | Injected | `sandbox/RuntimeCostAccounter`, `sandbox/Runtime` |
//! | Parent | `util/function/Function`, `lang/Comparable`, `lang/CharSequence` |
//!
//! Library classes already live in the sandbox namespace; they are verified
//! with the same containment check as rewritten user classes but never go
//! through the rewriter. Parent classes are the pinned host interfaces that
//! sandboxed classes link against directly.
//!
//! An optional replacement archive (`bootstrap_path`) may add classes or
//! override built-in ones. Every `native` method of the final library must
//! have an entry in the [`NativeTable`].

mod character;
mod lang;
mod throwables;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use sandbox_types::names::{from_sandboxed, is_sandboxed};
use sandbox_types::{decode_class, encode_class, ClassArchive, ClassBuilder, ClassFile};

use crate::analysis::{analyze, ClassRepresentation};
use crate::loader::{verify, ClassOrigin, RuntimeClass};
use crate::natives::{native_table, NativeTable};
use crate::well_known::{
    is_injected_helper, ENTRY_DESCRIPTOR, ENTRY_METHOD, FUNCTION, HOST_CHAR_SEQUENCE, HOST_COMPARABLE,
};

/// Original form of a runtime name, as stored in the class hierarchy.
fn original(name: &str) -> String {
    from_sandboxed(name).unwrap_or(name).to_string()
}

/// The shared library: defined classes, their hierarchy entries and the
/// native bodies.
pub struct BootstrapLibrary {
    classes: BTreeMap<String, Arc<RuntimeClass>>,
    parents: BTreeMap<String, Arc<RuntimeClass>>,
    representations: Vec<Arc<ClassRepresentation>>,
    parent_representations: Vec<Arc<ClassRepresentation>>,
    natives: Arc<NativeTable>,
}

impl fmt::Debug for BootstrapLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapLibrary")
            .field("classes", &self.classes.len())
            .field("parents", &self.parents.len())
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl BootstrapLibrary {
    /// The built-in library only.
    pub fn builtin() -> Result<Self> {
        Self::load(None)
    }

    /// The built-in library, extended or overridden by the classes of a
    /// replacement archive.
    pub fn load(archive: Option<&Path>) -> Result<Self> {
        let mut files: BTreeMap<String, ClassFile> = lang::lang_classes()?
            .into_iter()
            .chain(character::character_classes()?)
            .chain(throwables::throwable_classes()?)
            .map(|class| (class.name.clone(), class))
            .collect();
        if let Some(path) = archive {
            let replacements = read_replacements(path)?;
            info!(path = %path.display(), classes = replacements.len(), "loaded replacement library archive");
            for class in replacements {
                files.insert(class.name.clone(), class);
            }
        }
        Self::assemble(files, native_table())
    }

    fn assemble(files: BTreeMap<String, ClassFile>, natives: NativeTable) -> Result<Self> {
        let mut parents = BTreeMap::new();
        let mut parent_representations = Vec::new();
        for file in parent_classes()? {
            parent_representations.push(Arc::new(ClassRepresentation::from_class_file(&file).renamed(original)));
            let class = RuntimeClass::define(file, None, Vec::new(), ClassOrigin::Parent)?;
            parents.insert(class.name.clone(), Arc::new(class));
        }

        let mut representations = Vec::new();
        for file in files.values() {
            let analysis = analyze(&encode_class(file)?)
                .with_context(|| format!("Bootstrap class {} does not analyze", file.name))?;
            verify(&analysis.class_file, &analysis.references, true)?;
            for method in file.methods.iter().filter(|m| m.access.is_native()) {
                let qualified = format!("{}.{}{}", file.name, method.name, method.descriptor);
                if !natives.contains(&qualified) {
                    bail!("Native method has no implementation; {}", qualified);
                }
            }
            if !is_injected_helper(&file.name) {
                representations.push(Arc::new(analysis.representation.renamed(original)));
            }
        }

        let mut classes = BTreeMap::new();
        for name in files.keys() {
            define(name, &files, &parents, &mut classes, &mut Vec::new())?;
        }
        debug!(
            classes = classes.len(),
            parents = parents.len(),
            natives = natives.len(),
            "bootstrap library ready"
        );
        Ok(Self {
            classes,
            parents,
            representations,
            parent_representations,
            natives: Arc::new(natives),
        })
    }

    /// A library class by runtime name.
    pub fn get(&self, name: &str) -> Option<&Arc<RuntimeClass>> {
        self.classes.get(name)
    }

    /// A pinned host class by name.
    pub fn parent_class(&self, name: &str) -> Option<&Arc<RuntimeClass>> {
        self.parents.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Hierarchy entries of library classes under their original names.
    /// Injected helpers have no original and are left out.
    pub fn representations(&self) -> impl Iterator<Item = &Arc<ClassRepresentation>> {
        self.representations.iter()
    }

    pub fn parent_representations(&self) -> impl Iterator<Item = &Arc<ClassRepresentation>> {
        self.parent_representations.iter()
    }

    pub fn natives(&self) -> &Arc<NativeTable> {
        &self.natives
    }
}

/// Pinned host interfaces. They are roots: nothing above them is shared.
fn parent_classes() -> Result<Vec<ClassFile>> {
    Ok(vec![
        ClassBuilder::interface(FUNCTION)
            .root()
            .abstract_method(ENTRY_METHOD, ENTRY_DESCRIPTOR)
            .build()?,
        ClassBuilder::interface(HOST_COMPARABLE)
            .root()
            .abstract_method("compareTo", "(Lsandbox/lang/Object;)I")
            .build()?,
        ClassBuilder::interface(HOST_CHAR_SEQUENCE)
            .root()
            .abstract_method("length", "()I")
            .abstract_method("charAt", "(I)C")
            .build()?,
    ])
}

fn read_replacements(path: &Path) -> Result<Vec<ClassFile>> {
    let archive = ClassArchive::read_from(path)?;
    let mut classes = Vec::with_capacity(archive.len());
    for name in archive.class_names() {
        if !is_sandboxed(&name) {
            bail!("Replacement class {} is outside the sandbox namespace", name);
        }
        let bytes = archive
            .get(&name)
            .ok_or_else(|| anyhow!("Archive entry for {} disappeared", name))?;
        let class = decode_class(bytes).with_context(|| format!("Replacement class {}", name))?;
        if class.name != name {
            bail!("Archive entry {} holds class {}", name, class.name);
        }
        classes.push(class);
    }
    Ok(classes)
}

/// Define `name` after its super class and interfaces.
fn define(
    name: &str,
    files: &BTreeMap<String, ClassFile>,
    parents: &BTreeMap<String, Arc<RuntimeClass>>,
    defined: &mut BTreeMap<String, Arc<RuntimeClass>>,
    chain: &mut Vec<String>,
) -> Result<Arc<RuntimeClass>> {
    if let Some(class) = defined.get(name).or_else(|| parents.get(name)) {
        return Ok(Arc::clone(class));
    }
    let file = files
        .get(name)
        .ok_or_else(|| anyhow!("Bootstrap library has no class {}", name))?;
    if chain.iter().any(|n| n == name) {
        bail!("Bootstrap class {} inherits from itself", name);
    }
    chain.push(name.to_string());
    let super_class = match &file.super_name {
        Some(super_name) => Some(define(super_name, files, parents, defined, chain)?),
        None => None,
    };
    let mut interfaces = Vec::with_capacity(file.interfaces.len());
    for interface in &file.interfaces {
        interfaces.push(define(interface, files, parents, defined, chain)?);
    }
    chain.pop();
    let class = Arc::new(RuntimeClass::define(
        file.clone(),
        super_class,
        interfaces,
        ClassOrigin::Bootstrap,
    )?);
    defined.insert(name.to_string(), Arc::clone(&class));
    Ok(class)
}
