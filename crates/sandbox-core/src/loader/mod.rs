//! # Sandbox Classloader
//!
//! One [`SandboxClassLoader`] per execution. It resolves names in a fixed
//! order and caches every class it defines, so the same name always yields
//! the same `Arc<RuntimeClass>` for the lifetime of the loader.
//!
//! ## Resolution order
//!
//! | Step | Serves | Names |
//! |------|--------|-------|
//! | 1 | own cache | anything defined before |
//! | 2 | bootstrap library | `sandbox/lang/...`, injected helpers |
//! | 3 | denial | host-internal namespaces |
//! | 4 | parent loader | pinned host classes and stitched interfaces |
//! | 5 | source loader | `sandbox/<original>` of user classes |
//!
//! User classes go through analyze, rewrite, verify and define. Super
//! classes and interfaces are loaded first, so the class hierarchy store is
//! filled in dependency order.
//!
//! ## States
//!
//! ```text
//! Uninitialized ──► BootstrapLoaded ──► Ready ──► Closed
//! ```
//!
//! Every failure is recorded in the loader's [`MessageCollection`] before
//! the typed error is returned.

mod class;
mod verify;

pub(crate) use verify::verify;

pub use class::{ClassOrigin, LoadedClass, RuntimeClass, RuntimeMethod};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use sandbox_types::names::{
    exception_carrier_name, from_sandboxed, is_host_internal, is_pinned, to_sandboxed,
};

use crate::analysis::{analyze, AnalysisCache, AnalyzedClass, ClassHierarchy};
use crate::bootstrap::BootstrapLibrary;
use crate::config::SandboxConfiguration;
use crate::errors::LoadError;
use crate::messages::{DiagnosticsReport, Message, MessageCollection, SourceLocation};
use crate::rewrite::{ApiRule, ApiRules, BytecodeRewriter, RewriteContext};
use crate::source::SourceClassLoader;

/// Lifecycle of a classloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    BootstrapLoaded,
    Ready,
    Closed,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Uninitialized => "uninitialized",
            LoaderState::BootstrapLoaded => "bootstrap_loaded",
            LoaderState::Ready => "ready",
            LoaderState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The per-execution classloader.
pub struct SandboxClassLoader {
    state: LoaderState,
    bootstrap: Arc<BootstrapLibrary>,
    source: Arc<SourceClassLoader>,
    analysis_cache: Arc<AnalysisCache>,
    rewriter: BytecodeRewriter,
    api_rules: ApiRules,
    hierarchy: ClassHierarchy,
    /// Defined classes by runtime name.
    loaded: HashMap<String, LoadedClass>,
    /// Analyses of user classes by original name.
    analyses: HashMap<String, Arc<AnalyzedClass>>,
    /// User classes currently being defined, by original name.
    in_progress: HashSet<String>,
    /// Exception carrier name -> owning throwable class.
    exceptions: BTreeMap<String, String>,
    messages: MessageCollection,
}

impl fmt::Debug for SandboxClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxClassLoader")
            .field("state", &self.state)
            .field("loaded", &self.loaded.len())
            .field("messages", &self.messages.count())
            .finish()
    }
}

impl SandboxClassLoader {
    pub fn new(
        config: &SandboxConfiguration,
        bootstrap: Arc<BootstrapLibrary>,
        source: Arc<SourceClassLoader>,
        analysis_cache: Arc<AnalysisCache>,
    ) -> Self {
        Self {
            state: LoaderState::Uninitialized,
            bootstrap,
            source,
            analysis_cache,
            rewriter: BytecodeRewriter::new(config.rewrite, config.determinism),
            api_rules: ApiRules::new(config.determinism),
            hierarchy: ClassHierarchy::new(),
            loaded: HashMap::new(),
            analyses: HashMap::new(),
            in_progress: HashSet::new(),
            exceptions: BTreeMap::new(),
            messages: MessageCollection::new(config.minimum_severity, config.prefix_filters.clone()),
        }
    }

    fn transition(&mut self, next: LoaderState) {
        debug!(from = %self.state, to = %next, "classloader state");
        self.state = next;
    }

    /// Seed the hierarchy with the bootstrap library and the parent classes.
    pub fn initialize(&mut self) -> Result<(), LoadError> {
        match self.state {
            LoaderState::Uninitialized => {}
            LoaderState::Closed => return Err(LoadError::Closed),
            _ => return Ok(()),
        }
        for representation in self.bootstrap.representations() {
            self.hierarchy.add(Arc::clone(representation));
        }
        self.transition(LoaderState::BootstrapLoaded);
        for representation in self.bootstrap.parent_representations() {
            self.hierarchy.add(Arc::clone(representation));
        }
        self.transition(LoaderState::Ready);
        Ok(())
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    fn ensure_ready(&mut self) -> Result<(), LoadError> {
        match self.state {
            LoaderState::Ready => Ok(()),
            LoaderState::Closed => Err(LoadError::Closed),
            _ => self.initialize(),
        }
    }

    /// Record a failure against `class_name` and hand it back.
    fn fail(&mut self, class_name: &str, error: LoadError) -> LoadError {
        warn!(class = %class_name, error = %error, "class loading failed");
        self.messages
            .add(Message::from_error(&error, SourceLocation::class(class_name)));
        error
    }

    /// Load a class by the name user code knows it by.
    pub fn load_class(&mut self, original_name: &str) -> Result<LoadedClass, LoadError> {
        if is_pinned(original_name) {
            return self.load_runtime(original_name);
        }
        self.load_runtime(&to_sandboxed(original_name))
    }

    /// Load a class by its runtime name, as it appears in rewritten code.
    pub fn load_runtime(&mut self, name: &str) -> Result<LoadedClass, LoadError> {
        self.ensure_ready()?;
        if let Some(loaded) = self.loaded.get(name) {
            return Ok(loaded.clone());
        }
        if let Some(class) = self.bootstrap.get(name) {
            return Ok(self.share(name, Arc::clone(class)));
        }
        if is_host_internal(name) {
            return Err(self.fail(name, LoadError::not_found(name)));
        }
        if let Some(class) = self.bootstrap.parent_class(name) {
            return Ok(self.share(name, Arc::clone(class)));
        }
        match from_sandboxed(name) {
            Some(original) => {
                let original = original.to_string();
                self.load_user(&original)
            }
            None => Err(self.fail(name, LoadError::not_found(name))),
        }
    }

    fn share(&mut self, name: &str, class: Arc<RuntimeClass>) -> LoadedClass {
        let loaded = LoadedClass {
            class,
            is_modified: false,
        };
        trace!(class = %name, origin = ?loaded.class.origin, "resolved shared class");
        self.loaded.insert(name.to_string(), loaded.clone());
        loaded
    }

    fn load_user(&mut self, original: &str) -> Result<LoadedClass, LoadError> {
        if !self.in_progress.insert(original.to_string()) {
            let error = LoadError::Circularity {
                class_name: original.to_string(),
            };
            return Err(self.fail(original, error));
        }
        let result = self.define_user(original);
        self.in_progress.remove(original);
        result
    }

    fn define_user(&mut self, original: &str) -> Result<LoadedClass, LoadError> {
        let bytes = match self.source.class_reader(original) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(original, e.into())),
        };
        let analysis = match self.analysis_cache.get_or_analyze(&bytes) {
            Ok(analysis) => analysis,
            Err(e) => {
                let error = LoadError::MalformedInput {
                    class_name: original.to_string(),
                    reason: e.to_string(),
                };
                return Err(self.fail(original, error));
            }
        };
        if analysis.name() != original {
            let error = LoadError::MalformedInput {
                class_name: original.to_string(),
                reason: format!("class file declares {}", analysis.name()),
            };
            return Err(self.fail(original, error));
        }
        let Some(super_name) = analysis.class_file.super_name.clone() else {
            let error = LoadError::MalformedInput {
                class_name: original.to_string(),
                reason: "user classes must have a super class".to_string(),
            };
            return Err(self.fail(original, error));
        };
        self.load_class(&super_name)?;
        for interface in &analysis.class_file.interfaces {
            self.load_class(interface)?;
        }
        self.hierarchy.add(Arc::clone(&analysis.representation));

        let outcome = self.rewriter.rewrite(
            &bytes,
            &RewriteContext {
                analysis: &analysis,
                hierarchy: &self.hierarchy,
            },
            &mut self.messages,
        )?;
        let rewritten = match analyze(&outcome.bytes) {
            Ok(rewritten) => rewritten,
            Err(e) => return Err(self.fail(original, LoadError::internal(original, e.to_string()))),
        };
        if let Err(e) = verify::verify(
            &rewritten.class_file,
            &rewritten.references,
            self.rewriter.options().namespace_isolation,
        ) {
            return Err(self.fail(original, e));
        }

        let file = Arc::try_unwrap(rewritten.class_file).unwrap_or_else(|shared| (*shared).clone());
        let super_class = match &file.super_name {
            Some(name) => Some(self.load_runtime(name)?.class),
            None => None,
        };
        let mut interfaces = Vec::with_capacity(file.interfaces.len());
        for name in &file.interfaces {
            interfaces.push(self.load_runtime(name)?.class);
        }
        let class = match RuntimeClass::define(file, super_class, interfaces, ClassOrigin::Sandboxed) {
            Ok(class) => Arc::new(class),
            Err(e) => return Err(self.fail(original, e)),
        };
        if outcome.is_throwable {
            self.exceptions
                .insert(exception_carrier_name(&class.name), class.name.clone());
        }
        debug!(
            class = %original,
            runtime = %class.name,
            modified = outcome.modified,
            throwable = outcome.is_throwable,
            "defined sandboxed class"
        );
        let loaded = LoadedClass {
            class,
            is_modified: outcome.modified,
        };
        self.analyses.insert(original.to_string(), analysis);
        self.loaded.insert(loaded.class.name.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Original class name of a runtime throwable class.
    pub fn original_exception_name(&self, runtime_name: &str) -> String {
        let carrier = exception_carrier_name(runtime_name);
        if self.exceptions.contains_key(&carrier) {
            if let Ok(original) = self.source.load_source_class(&carrier) {
                return original;
            }
        }
        from_sandboxed(runtime_name).unwrap_or(runtime_name).to_string()
    }

    /// Registered exception carriers and their owning classes.
    pub fn exception_registry(&self) -> &BTreeMap<String, String> {
        &self.exceptions
    }

    /// Load the transitive reference graph of `entry` and check that every
    /// referenced member exists. All problems are recorded before the first
    /// one is returned.
    pub fn validate(&mut self, entry: &str) -> Result<(), LoadError> {
        let mut first = None;
        let mut seen = HashSet::new();
        let mut reached = Vec::new();
        let mut pending = VecDeque::from([entry.to_string()]);
        while let Some(name) = pending.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Err(e) = self.load_class(&name) {
                if e == LoadError::Closed {
                    return Err(e);
                }
                first.get_or_insert(e);
                continue;
            }
            let Some(analysis) = self.analyses.get(&name).cloned() else {
                continue;
            };
            pending.extend(
                analysis
                    .references
                    .classes()
                    .into_iter()
                    .filter(|class| !class.starts_with('['))
                    .map(str::to_string),
            );
            reached.push(analysis);
        }
        // Members are checked once the whole graph is in the hierarchy.
        for analysis in &reached {
            for member in analysis.references.members() {
                if member.class_name.starts_with('[') || !self.hierarchy.contains(&member.class_name) {
                    continue;
                }
                let rule = if member.is_method() {
                    self.api_rules.check_method(&sandbox_types::MethodRef::new(
                        &member.class_name,
                        &member.member_name,
                        &member.descriptor,
                    ))
                } else {
                    self.api_rules.check_field(&sandbox_types::FieldRef::new(
                        &member.class_name,
                        &member.member_name,
                        &member.descriptor,
                    ))
                };
                if rule != ApiRule::Allow {
                    continue;
                }
                if self
                    .hierarchy
                    .find_member(&member.class_name, &member.member_name, &member.descriptor)
                    .is_some()
                {
                    continue;
                }
                let error = LoadError::MissingMember {
                    class_name: member.class_name.clone(),
                    member: format!("{}{}", member.member_name, member.descriptor),
                };
                let reference = crate::analysis::EntityReference::Member(member.clone());
                for location in analysis.references.locations(&reference).into_iter().flatten() {
                    self.messages.add(Message::from_error(&error, location.clone()));
                }
                first.get_or_insert(error);
            }
        }
        debug!(entry = %entry, classes = seen.len(), ok = first.is_none(), "validated reference graph");
        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hierarchy
    }

    pub fn bootstrap(&self) -> &Arc<BootstrapLibrary> {
        &self.bootstrap
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_loaded(&self, runtime_name: &str) -> bool {
        self.loaded.contains_key(runtime_name)
    }

    pub fn messages(&self) -> &MessageCollection {
        &self.messages
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.messages.report()
    }

    /// Drop every cached class. Diagnostics survive so they can still be
    /// reported; every later request fails with [`LoadError::Closed`].
    pub fn close(&mut self) {
        if self.state == LoaderState::Closed {
            return;
        }
        self.loaded.clear();
        self.analyses.clear();
        self.in_progress.clear();
        self.exceptions.clear();
        self.hierarchy = ClassHierarchy::new();
        self.transition(LoaderState::Closed);
    }
}

impl Drop for SandboxClassLoader {
    fn drop(&mut self) {
        self.close();
    }
}
