//! Class representations and the per-sandbox hierarchy store.
//!
//! The store is write-once per name: the first representation registered for
//! a class wins and later registrations are ignored. Supertype queries only
//! see classes that have been registered, so callers add super classes
//! before their subclasses.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sandbox_types::descriptor::rewrite_descriptor;
use sandbox_types::{AccessFlags, ClassFile};

/// A field or method of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInformation {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
}

impl MemberInformation {
    pub fn is_method(&self) -> bool {
        self.descriptor.starts_with('(')
    }
}

/// Member key: `name:descriptor`.
pub fn member_key(name: &str, descriptor: &str) -> String {
    format!("{name}:{descriptor}")
}

/// Structural summary of a class, independent of its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRepresentation {
    pub name: String,
    pub access: AccessFlags,
    pub super_name: Option<String>,
    pub interfaces: BTreeSet<String>,
    pub members: BTreeMap<String, MemberInformation>,
    pub source_file: Option<String>,
}

impl ClassRepresentation {
    pub fn from_class_file(class: &ClassFile) -> Self {
        let fields = class.fields.iter().map(|f| (&f.name, &f.descriptor, f.access));
        let methods = class.methods.iter().map(|m| (&m.name, &m.descriptor, m.access));
        let members = fields
            .chain(methods)
            .map(|(name, descriptor, access)| {
                (
                    member_key(name, descriptor),
                    MemberInformation {
                        owner: class.name.clone(),
                        name: name.clone(),
                        descriptor: descriptor.clone(),
                        access,
                    },
                )
            })
            .collect();
        Self {
            name: class.name.clone(),
            access: class.access,
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.iter().cloned().collect(),
            members,
            source_file: class.source_file.clone(),
        }
    }

    /// A copy with every class name passed through `rename`, member
    /// descriptors included. Descriptors that do not parse are kept as-is.
    pub fn renamed(&self, rename: impl Fn(&str) -> String) -> Self {
        let name = rename(&self.name);
        Self {
            name: name.clone(),
            access: self.access,
            super_name: self.super_name.as_deref().map(&rename),
            interfaces: self.interfaces.iter().map(|i| rename(i)).collect(),
            members: self
                .members
                .values()
                .map(|member| {
                    let mut member = member.clone();
                    member.owner = name.clone();
                    if let Ok(descriptor) = rewrite_descriptor(&member.descriptor, &rename) {
                        member.descriptor = descriptor;
                    }
                    (member_key(&member.name, &member.descriptor), member)
                })
                .collect(),
            source_file: self.source_file.clone(),
        }
    }

    pub fn member(&self, name: &str, descriptor: &str) -> Option<&MemberInformation> {
        self.members.get(&member_key(name, descriptor))
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    /// Direct supertypes: the super class followed by interfaces.
    pub fn supertypes(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }
}

/// Known classes of one sandbox, by name.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    classes: BTreeMap<String, Arc<ClassRepresentation>>,
}

impl ClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Returns false if the name was already known.
    pub fn add(&mut self, class: Arc<ClassRepresentation>) -> bool {
        if self.classes.contains_key(&class.name) {
            return false;
        }
        self.classes.insert(class.name.clone(), class);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ClassRepresentation>> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Super class chain, nearest first, as far as it is known.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.get(name).and_then(|c| c.super_name.clone());
        while let Some(parent) = current {
            if chain.contains(&parent) {
                break;
            }
            current = self.get(&parent).and_then(|c| c.super_name.clone());
            chain.push(parent);
        }
        chain
    }

    /// True if `name` is `ancestor` or inherits from it through super
    /// classes or interfaces.
    pub fn is_subtype_of(&self, name: &str, ancestor: &str) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if current == ancestor {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(class) = self.get(&current) {
                pending.extend(class.supertypes().map(str::to_string));
            }
        }
        false
    }

    /// Look a member up in a class and its supertypes.
    pub fn find_member(&self, class: &str, name: &str, descriptor: &str) -> Option<&MemberInformation> {
        let mut visited = HashSet::new();
        let mut pending = vec![class.to_string()];
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(rep) = self.get(&current) else {
                continue;
            };
            if let Some(member) = rep.member(name, descriptor) {
                return Some(member);
            }
            // Interfaces first on the stack so the super class is searched first.
            pending.extend(rep.interfaces.iter().rev().cloned());
            pending.extend(rep.super_name.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::ClassBuilder;

    fn rep(builder: ClassBuilder) -> Arc<ClassRepresentation> {
        Arc::new(ClassRepresentation::from_class_file(&builder.build().unwrap()))
    }

    fn sample() -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.add(rep(ClassBuilder::new("lang/Object").root()));
        hierarchy.add(rep(ClassBuilder::new("lang/Throwable")
            .field("message", "Llang/String;", AccessFlags::PRIVATE)));
        hierarchy.add(rep(ClassBuilder::new("lang/Exception").extends("lang/Throwable")));
        hierarchy.add(rep(ClassBuilder::interface("lang/Comparable").abstract_method("compareTo", "(Llang/Object;)I")));
        hierarchy.add(rep(ClassBuilder::new("com/acme/Err")
            .extends("lang/Exception")
            .implements("lang/Comparable")));
        hierarchy
    }

    #[test]
    fn test_subtypes() {
        let hierarchy = sample();
        assert!(hierarchy.is_subtype_of("com/acme/Err", "lang/Throwable"));
        assert!(hierarchy.is_subtype_of("com/acme/Err", "lang/Comparable"));
        assert!(hierarchy.is_subtype_of("com/acme/Err", "com/acme/Err"));
        assert!(!hierarchy.is_subtype_of("lang/Exception", "com/acme/Err"));
        assert!(!hierarchy.is_subtype_of("com/unknown/X", "lang/Object"));
    }

    #[test]
    fn test_ancestors() {
        let hierarchy = sample();
        assert_eq!(
            hierarchy.ancestors("com/acme/Err"),
            vec!["lang/Exception", "lang/Throwable", "lang/Object"]
        );
    }

    #[test]
    fn test_find_member_walks_supertypes() {
        let hierarchy = sample();
        let field = hierarchy
            .find_member("com/acme/Err", "message", "Llang/String;")
            .unwrap();
        assert_eq!(field.owner, "lang/Throwable");
        let method = hierarchy
            .find_member("com/acme/Err", "compareTo", "(Llang/Object;)I")
            .unwrap();
        assert_eq!(method.owner, "lang/Comparable");
        assert!(hierarchy.find_member("com/acme/Err", "nope", "()V").is_none());
    }

    #[test]
    fn test_write_once() {
        let mut hierarchy = sample();
        let replacement = rep(ClassBuilder::new("com/acme/Err"));
        assert!(!hierarchy.add(replacement));
        assert_eq!(
            hierarchy.get("com/acme/Err").unwrap().super_name.as_deref(),
            Some("lang/Exception")
        );
    }

    #[test]
    fn test_renamed() {
        let hierarchy = sample();
        let renamed = hierarchy
            .get("com/acme/Err")
            .unwrap()
            .renamed(|n| format!("sandbox/{n}"));
        assert_eq!(renamed.name, "sandbox/com/acme/Err");
        assert_eq!(renamed.super_name.as_deref(), Some("sandbox/lang/Exception"));
        assert!(renamed.interfaces.contains("sandbox/lang/Comparable"));

        let throwable = hierarchy
            .get("lang/Throwable")
            .unwrap()
            .renamed(|n| format!("sandbox/{n}"));
        assert_eq!(
            throwable.member("message", "Lsandbox/lang/String;").unwrap().owner,
            "sandbox/lang/Throwable"
        );
    }
}
