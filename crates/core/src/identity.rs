//! Identity matching: two resources denote the same control-plane object
//! iff their name and namespace are equal.

use serde::{Deserialize, Serialize};

use crate::Resource;

/// The `(name, namespace)` pair of a resource. Cluster-scoped objects carry no namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub namespace: Option<String>,
    pub name: String,
}

impl Identity {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(str::to_string), name: name.to_string() }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

pub fn same_identity(a: &Resource, b: &Resource) -> bool {
    a.name() == b.name() && a.namespace() == b.namespace()
}

/// Predicate over candidates sharing `target`'s identity; `inverse` keeps the non-matching ones.
pub fn match_predicate(target: &Resource, inverse: bool) -> impl Fn(&Resource) -> bool + '_ {
    move |candidate| same_identity(target, candidate) != inverse
}
