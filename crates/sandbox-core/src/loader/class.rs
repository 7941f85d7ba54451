//! Defined runtime classes.
//!
//! A [`RuntimeClass`] is immutable once defined. Super classes and
//! interfaces are linked by `Arc`, so subtype checks and method lookup never
//! go back to the loader.

use std::collections::BTreeMap;
use std::sync::Arc;

use sandbox_types::descriptor::MethodDescriptor;
use sandbox_types::names::from_sandboxed;
use sandbox_types::{AccessFlags, ClassFile, Code, FieldDef};

use crate::analysis::hierarchy::member_key;
use crate::errors::LoadError;

/// Which loader owns a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOrigin {
    /// Shared replacement library.
    Bootstrap,
    /// Pinned host class owned by the parent loader.
    Parent,
    /// User class rewritten by this sandbox.
    Sandboxed,
}

/// A method ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeMethod {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    pub code: Option<Code>,
    /// Declared parameters, receiver excluded.
    pub arg_count: usize,
    pub returns_value: bool,
    /// `owner.namedescriptor`, the key natives are registered under.
    pub qualified_name: String,
}

impl RuntimeMethod {
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    pub fn is_native(&self) -> bool {
        self.access.is_native()
    }

    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract()
    }

    /// Stack slots consumed by a call, receiver included.
    pub fn call_slots(&self) -> usize {
        self.arg_count + usize::from(!self.is_static())
    }
}

/// A class defined by some loader.
#[derive(Debug)]
pub struct RuntimeClass {
    pub name: String,
    pub access: AccessFlags,
    pub super_class: Option<Arc<RuntimeClass>>,
    pub interfaces: Vec<Arc<RuntimeClass>>,
    pub origin: ClassOrigin,
    pub source_file: Option<String>,
    pub fields: Vec<FieldDef>,
    methods: BTreeMap<String, Arc<RuntimeMethod>>,
}

impl RuntimeClass {
    /// Link a decoded class file against its already defined supertypes.
    pub fn define(
        file: ClassFile,
        super_class: Option<Arc<RuntimeClass>>,
        interfaces: Vec<Arc<RuntimeClass>>,
        origin: ClassOrigin,
    ) -> Result<Self, LoadError> {
        if file.super_name.as_deref() != super_class.as_ref().map(|c| c.name.as_str()) {
            return Err(LoadError::internal(
                &file.name,
                format!("super class {:?} was not linked", file.super_name),
            ));
        }
        let mut methods = BTreeMap::new();
        for method in file.methods {
            let parsed = MethodDescriptor::parse(&method.descriptor).map_err(|e| LoadError::MalformedInput {
                class_name: file.name.clone(),
                reason: e.to_string(),
            })?;
            let qualified_name = format!("{}.{}{}", file.name, method.name, method.descriptor);
            methods.insert(
                member_key(&method.name, &method.descriptor),
                Arc::new(RuntimeMethod {
                    owner: file.name.clone(),
                    name: method.name,
                    descriptor: method.descriptor,
                    access: method.access,
                    code: method.code,
                    arg_count: parsed.arg_count(),
                    returns_value: parsed.ret.is_some(),
                    qualified_name,
                }),
            );
        }
        Ok(Self {
            name: file.name,
            access: file.access,
            super_class,
            interfaces,
            origin,
            source_file: file.source_file,
            fields: file.fields,
            methods,
        })
    }

    /// Name without the sandbox prefix.
    pub fn original_name(&self) -> &str {
        from_sandboxed(&self.name).unwrap_or(&self.name)
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract()
    }

    pub fn declared_method(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeMethod>> {
        self.methods.get(&member_key(name, descriptor))
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<RuntimeMethod>> {
        self.methods.values()
    }

    /// Virtual lookup: the class chain first, then interface defaults.
    /// A concrete method always wins over an abstract declaration.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<Arc<RuntimeMethod>> {
        let mut fallback = None;
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(method) = class.declared_method(name, descriptor) {
                if !method.is_abstract() {
                    return Some(Arc::clone(method));
                }
                fallback.get_or_insert_with(|| Arc::clone(method));
            }
            current = class.super_class.as_deref();
        }
        let mut pending: Vec<&RuntimeClass> = Vec::new();
        let mut current = Some(self);
        while let Some(class) = current {
            pending.extend(class.interfaces.iter().map(Arc::as_ref));
            current = class.super_class.as_deref();
        }
        while let Some(interface) = pending.pop() {
            if let Some(method) = interface.declared_method(name, descriptor) {
                if !method.is_abstract() {
                    return Some(Arc::clone(method));
                }
                fallback.get_or_insert_with(|| Arc::clone(method));
            }
            pending.extend(interface.interfaces.iter().map(Arc::as_ref));
        }
        fallback
    }

    /// True if this class is `name` or inherits from it.
    pub fn is_subclass_of(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        if self.interfaces.iter().any(|i| i.is_subclass_of(name)) {
            return true;
        }
        self.super_class.as_ref().is_some_and(|s| s.is_subclass_of(name))
    }

    /// Super class names, nearest first.
    pub fn ancestry(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.super_class.as_deref();
        while let Some(class) = current {
            chain.push(class.name.clone());
            current = class.super_class.as_deref();
        }
        chain
    }

    /// The class in the chain that declares field `name`.
    pub fn field_owner(&self, name: &str, is_static: bool) -> Option<(&RuntimeClass, &FieldDef)> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(field) = class
                .fields
                .iter()
                .find(|f| f.name == name && f.access.is_static() == is_static)
            {
                return Some((class, field));
            }
            current = class.super_class.as_deref();
        }
        None
    }

    /// Every instance field of the chain with its declaring class.
    pub fn instance_fields(&self) -> Vec<(&str, &FieldDef)> {
        let mut fields = Vec::new();
        let mut current = Some(self);
        while let Some(class) = current {
            fields.extend(
                class
                    .fields
                    .iter()
                    .filter(|f| !f.access.is_static())
                    .map(|f| (class.name.as_str(), f)),
            );
            current = class.super_class.as_deref();
        }
        fields
    }
}

/// A class as handed out by the sandbox classloader.
#[derive(Debug, Clone)]
pub struct LoadedClass {
    pub class: Arc<RuntimeClass>,
    /// Whether the rewriter changed the class bytes.
    pub is_modified: bool,
}

impl LoadedClass {
    pub fn name(&self) -> &str {
        &self.class.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::ClassBuilder;

    fn define(builder: ClassBuilder, super_class: Option<&Arc<RuntimeClass>>, interfaces: &[&Arc<RuntimeClass>]) -> Arc<RuntimeClass> {
        Arc::new(
            RuntimeClass::define(
                builder.build().unwrap(),
                super_class.cloned(),
                interfaces.iter().map(|i| Arc::clone(i)).collect(),
                ClassOrigin::Sandboxed,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_method_lookup_prefers_concrete() {
        let object = define(
            ClassBuilder::new("sandbox/lang/Object").root().default_constructor(),
            None,
            &[],
        );
        let shape = define(
            ClassBuilder::interface("com/Shape")
                .extends("sandbox/lang/Object")
                .abstract_method("area", "()I")
                .method("sides", "()I", AccessFlags::PUBLIC, |code| {
                    code.push_int(0).return_value();
                }),
            Some(&object),
            &[],
        );
        let square = define(
            ClassBuilder::new("com/Square")
                .extends("sandbox/lang/Object")
                .implements("com/Shape")
                .method("area", "()I", AccessFlags::PUBLIC, |code| {
                    code.push_int(4).return_value();
                }),
            Some(&object),
            &[&shape],
        );

        assert_eq!(square.find_method("area", "()I").unwrap().owner, "com/Square");
        assert_eq!(square.find_method("sides", "()I").unwrap().owner, "com/Shape");
        assert_eq!(square.find_method("<init>", "()V").unwrap().owner, "sandbox/lang/Object");
        assert!(square.find_method("nope", "()V").is_none());
        assert!(square.is_subclass_of("com/Shape"));
        assert!(square.is_subclass_of("sandbox/lang/Object"));
        assert_eq!(square.ancestry(), vec!["sandbox/lang/Object"]);
    }

    #[test]
    fn test_unlinked_super_is_internal() {
        let err = RuntimeClass::define(
            ClassBuilder::new("com/A").extends("com/B").build().unwrap(),
            None,
            vec![],
            ClassOrigin::Sandboxed,
        )
        .unwrap_err();
        assert!(err.is_internal());
    }
}
