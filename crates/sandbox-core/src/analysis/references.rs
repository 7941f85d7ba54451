//! References from one class to other classes and their members.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassReference {
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberReference {
    pub class_name: String,
    pub member_name: String,
    pub descriptor: String,
}

impl MemberReference {
    pub fn is_method(&self) -> bool {
        self.descriptor.starts_with('(')
    }
}

/// A class or a member of a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityReference {
    Class(ClassReference),
    Member(MemberReference),
}

impl EntityReference {
    pub fn class(name: impl Into<String>) -> Self {
        EntityReference::Class(ClassReference {
            class_name: name.into(),
        })
    }

    pub fn member(class: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        EntityReference::Member(MemberReference {
            class_name: class.into(),
            member_name: name.into(),
            descriptor: descriptor.into(),
        })
    }

    /// The class this reference points into.
    pub fn class_name(&self) -> &str {
        match self {
            EntityReference::Class(c) => &c.class_name,
            EntityReference::Member(m) => &m.class_name,
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityReference::Class(c) => f.write_str(&c.class_name),
            EntityReference::Member(m) => write!(f, "{}.{}{}", m.class_name, m.member_name, m.descriptor),
        }
    }
}

/// Every referenced entity with the locations it is referenced from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMap {
    entries: BTreeMap<EntityReference, BTreeSet<SourceLocation>>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, reference: EntityReference, location: SourceLocation) {
        self.entries.entry(reference).or_default().insert(location);
    }

    pub fn contains(&self, reference: &EntityReference) -> bool {
        self.entries.contains_key(reference)
    }

    pub fn locations(&self, reference: &EntityReference) -> Option<&BTreeSet<SourceLocation>> {
        self.entries.get(reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityReference, &BTreeSet<SourceLocation>)> {
        self.entries.iter()
    }

    /// Distinct classes referenced, directly or through a member.
    pub fn classes(&self) -> BTreeSet<&str> {
        self.entries.keys().map(EntityReference::class_name).collect()
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberReference> {
        self.entries.keys().filter_map(|r| match r {
            EntityReference::Member(m) => Some(m),
            EntityReference::Class(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
